//! Transport layer abstraction.
//!
//! Provides the `Transport` trait and the UDP implementation the poller
//! uses. A mock transport is available for tests.

mod udp;

#[cfg(any(test, feature = "testing"))]
mod mock;

pub use udp::*;

#[cfg(any(test, feature = "testing"))]
pub use mock::*;

use crate::error::Result;
use bytes::Bytes;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

/// Client-side transport abstraction.
///
/// # Clone Requirement
///
/// The `Clone` bound lets tests keep a handle on the transport after the
/// client takes ownership. All implementations use `Arc` internally,
/// making clone cheap.
pub trait Transport: Send + Sync + Clone {
    /// Send request data to the target.
    fn send(&self, data: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// Receive a response with a timeout.
    ///
    /// `request_id` is carried for diagnostics; correlation happens in the
    /// client after decoding. Returns (response_data, source_address).
    fn recv(
        &self,
        request_id: i32,
        timeout: Duration,
    ) -> impl Future<Output = Result<(Bytes, SocketAddr)>> + Send;

    /// The peer address for this transport.
    fn peer_addr(&self) -> SocketAddr;

    /// Local bind address.
    fn local_addr(&self) -> SocketAddr;
}

// ============================================================================
// Request ID Extraction
// ============================================================================

/// Extract request_id (or msgID for V3) from an SNMP message without a full
/// decode.
///
/// V1/V2c: `SEQUENCE { INTEGER version, OCTET STRING community, PDU }` with
/// request_id as the PDU's first INTEGER. V3: msgID inside msgGlobalData.
pub(crate) fn extract_request_id(data: &[u8]) -> Option<i32> {
    let mut pos = 0;

    // Outer SEQUENCE
    if pos >= data.len() || data[pos] != 0x30 {
        return None;
    }
    pos += 1;
    pos = skip_ber_length(data, pos)?;

    // Version (INTEGER)
    if pos >= data.len() || data[pos] != 0x02 {
        return None;
    }
    pos += 1;
    let (new_pos, version_len) = read_ber_length(data, pos)?;
    pos = new_pos;

    if pos + version_len > data.len() {
        return None;
    }
    let mut version: i32 = 0;
    for i in 0..version_len {
        version = (version << 8) | (data[pos + i] as i32);
    }
    pos += version_len;

    if pos >= data.len() {
        return None;
    }

    let next_tag = data[pos];

    if version == 3 && next_tag == 0x30 {
        extract_v3_msg_id(data, pos)
    } else if next_tag == 0x04 {
        extract_v1v2c_request_id(data, pos)
    } else {
        None
    }
}

/// Extract msgID from V3 message starting at msgGlobalData position.
fn extract_v3_msg_id(data: &[u8], mut pos: usize) -> Option<i32> {
    // msgGlobalData SEQUENCE
    if pos >= data.len() || data[pos] != 0x30 {
        return None;
    }
    pos += 1;
    pos = skip_ber_length(data, pos)?;

    // First INTEGER inside msgGlobalData is msgID
    if pos >= data.len() || data[pos] != 0x02 {
        return None;
    }
    pos += 1;

    let (new_pos, id_len) = read_ber_length(data, pos)?;
    pos = new_pos;

    if pos + id_len > data.len() {
        return None;
    }

    decode_ber_signed_integer(&data[pos..pos + id_len])
}

/// Extract request_id from V1/V2c message starting at community position.
fn extract_v1v2c_request_id(data: &[u8], mut pos: usize) -> Option<i32> {
    // Community (OCTET STRING)
    if pos >= data.len() || data[pos] != 0x04 {
        return None;
    }
    pos += 1;
    let (new_pos, community_len) = read_ber_length(data, pos)?;
    pos = new_pos + community_len;

    // PDU (context-specific, e.g., 0xA2 for Response)
    if pos >= data.len() {
        return None;
    }
    let pdu_tag = data[pos];
    if !(0xA0..=0xA8).contains(&pdu_tag) {
        return None;
    }
    pos += 1;
    pos = skip_ber_length(data, pos)?;

    // Request ID (INTEGER)
    if pos >= data.len() || data[pos] != 0x02 {
        return None;
    }
    pos += 1;

    let (new_pos, id_len) = read_ber_length(data, pos)?;
    pos = new_pos;

    if pos + id_len > data.len() {
        return None;
    }

    decode_ber_signed_integer(&data[pos..pos + id_len])
}

/// Decode a BER-encoded signed integer.
fn decode_ber_signed_integer(bytes: &[u8]) -> Option<i32> {
    if bytes.is_empty() {
        return Some(0);
    }

    // Sign extend for negative numbers
    let mut value: i32 = if bytes[0] & 0x80 != 0 { -1 } else { 0 };

    for &byte in bytes {
        value = (value << 8) | (byte as i32);
    }

    Some(value)
}

/// Skip BER length field and return new position.
fn skip_ber_length(data: &[u8], pos: usize) -> Option<usize> {
    let (new_pos, _) = read_ber_length(data, pos)?;
    Some(new_pos)
}

/// Read BER length field. Returns (new_position, length_value).
fn read_ber_length(data: &[u8], pos: usize) -> Option<(usize, usize)> {
    if pos >= data.len() {
        return None;
    }

    let first = data[pos];

    if first < 0x80 {
        // Short form
        Some((pos + 1, first as usize))
    } else if first == 0x80 {
        // Indefinite length - not supported
        None
    } else {
        // Long form
        let num_octets = (first & 0x7F) as usize;
        if pos + 1 + num_octets > data.len() {
            return None;
        }

        let mut length: usize = 0;
        for i in 0..num_octets {
            length = (length << 8) | (data[pos + 1 + i] as usize);
        }

        Some((pos + 1 + num_octets, length))
    }
}
