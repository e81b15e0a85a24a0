//! BER encoding.
//!
//! [`EncodeBuf`] accumulates bytes in reverse. Content is pushed first, then
//! its length, then the tag; [`EncodeBuf::finish`] reverses the buffer into
//! wire order. [`encode_length`](super::length::encode_length) already
//! returns its bytes reversed for this scheme.

use super::length::encode_length;
use super::tag;
use crate::oid::Oid;
use bytes::Bytes;

/// Reverse-order BER encode buffer.
#[derive(Debug, Default)]
pub struct EncodeBuf {
    // Bytes in reverse wire order.
    buf: Vec<u8>,
}

impl EncodeBuf {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(256),
        }
    }

    /// Number of bytes pushed so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True when nothing has been pushed.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Push raw bytes (given in wire order).
    pub fn push_bytes(&mut self, data: &[u8]) {
        self.buf.extend(data.iter().rev());
    }

    /// Push a tag byte.
    pub fn push_tag(&mut self, tag: u8) {
        self.buf.push(tag);
    }

    /// Push a BER length.
    pub fn push_length(&mut self, len: usize) {
        let (bytes, n) = encode_length(len);
        self.buf.extend_from_slice(&bytes[..n]);
    }

    /// Push an INTEGER (signed, minimal two's complement).
    pub fn push_integer(&mut self, value: i32) {
        let bytes = value.to_be_bytes();
        let mut start = 0;
        while start < 3 {
            let cur = bytes[start];
            let next = bytes[start + 1];
            let redundant = (cur == 0x00 && next & 0x80 == 0) || (cur == 0xFF && next & 0x80 != 0);
            if redundant {
                start += 1;
            } else {
                break;
            }
        }
        let content = &bytes[start..];
        self.push_bytes(content);
        self.push_length(content.len());
        self.push_tag(tag::universal::INTEGER);
    }

    /// Push an unsigned 32-bit value with an application tag
    /// (Counter32, Gauge32, TimeTicks).
    pub fn push_unsigned32(&mut self, type_tag: u8, value: u32) {
        let bytes = value.to_be_bytes();
        let mut start = 0;
        while start < 3 && bytes[start] == 0 {
            start += 1;
        }
        // Leading zero keeps the sign bit clear.
        let pad = bytes[start] & 0x80 != 0;
        self.push_bytes(&bytes[start..]);
        if pad {
            self.buf.push(0x00);
        }
        self.push_length(bytes.len() - start + pad as usize);
        self.push_tag(type_tag);
    }

    /// Push a Counter64.
    pub fn push_integer64(&mut self, value: u64) {
        let bytes = value.to_be_bytes();
        let mut start = 0;
        while start < 7 && bytes[start] == 0 {
            start += 1;
        }
        let pad = bytes[start] & 0x80 != 0;
        self.push_bytes(&bytes[start..]);
        if pad {
            self.buf.push(0x00);
        }
        self.push_length(bytes.len() - start + pad as usize);
        self.push_tag(tag::application::COUNTER64);
    }

    /// Push an OCTET STRING.
    pub fn push_octet_string(&mut self, data: &[u8]) {
        self.push_bytes(data);
        self.push_length(data.len());
        self.push_tag(tag::universal::OCTET_STRING);
    }

    /// Push a NULL.
    pub fn push_null(&mut self) {
        self.push_length(0);
        self.push_tag(tag::universal::NULL);
    }

    /// Push an OBJECT IDENTIFIER.
    pub fn push_oid(&mut self, oid: &Oid) {
        let content = oid.to_ber();
        self.push_bytes(&content);
        self.push_length(content.len());
        self.push_tag(tag::universal::OBJECT_IDENTIFIER);
    }

    /// Push an IpAddress.
    pub fn push_ip_address(&mut self, addr: [u8; 4]) {
        self.push_bytes(&addr);
        self.push_length(4);
        self.push_tag(tag::application::IP_ADDRESS);
    }

    /// Push a constructed TLV: the closure pushes the content (in reverse
    /// logical order), then the measured length and tag are prepended.
    pub fn push_constructed(&mut self, type_tag: u8, f: impl FnOnce(&mut Self)) {
        let before = self.buf.len();
        f(self);
        let content_len = self.buf.len() - before;
        self.push_length(content_len);
        self.push_tag(type_tag);
    }

    /// Push a SEQUENCE.
    pub fn push_sequence(&mut self, f: impl FnOnce(&mut Self)) {
        self.push_constructed(tag::universal::SEQUENCE, f);
    }

    /// Reverse into wire order and return the encoded message.
    pub fn finish(mut self) -> Bytes {
        self.buf.reverse();
        Bytes::from(self.buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oid;

    fn encoded(f: impl FnOnce(&mut EncodeBuf)) -> Vec<u8> {
        let mut buf = EncodeBuf::new();
        f(&mut buf);
        buf.finish().to_vec()
    }

    #[test]
    fn integer_minimal_forms() {
        assert_eq!(encoded(|b| b.push_integer(0)), vec![0x02, 0x01, 0x00]);
        assert_eq!(encoded(|b| b.push_integer(127)), vec![0x02, 0x01, 0x7F]);
        assert_eq!(
            encoded(|b| b.push_integer(128)),
            vec![0x02, 0x02, 0x00, 0x80]
        );
        assert_eq!(encoded(|b| b.push_integer(-1)), vec![0x02, 0x01, 0xFF]);
        assert_eq!(encoded(|b| b.push_integer(-128)), vec![0x02, 0x01, 0x80]);
        assert_eq!(
            encoded(|b| b.push_integer(-129)),
            vec![0x02, 0x02, 0xFF, 0x7F]
        );
    }

    #[test]
    fn unsigned32_sign_bit_padded() {
        assert_eq!(
            encoded(|b| b.push_unsigned32(tag::application::COUNTER32, 0)),
            vec![0x41, 0x01, 0x00]
        );
        // High bit set needs a leading zero octet.
        assert_eq!(
            encoded(|b| b.push_unsigned32(tag::application::COUNTER32, 0x80)),
            vec![0x41, 0x02, 0x00, 0x80]
        );
        assert_eq!(
            encoded(|b| b.push_unsigned32(tag::application::GAUGE32, u32::MAX)),
            vec![0x42, 0x05, 0x00, 0xFF, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn counter64_wide_values() {
        assert_eq!(
            encoded(|b| b.push_integer64(0)),
            vec![0x46, 0x01, 0x00]
        );
        assert_eq!(
            encoded(|b| b.push_integer64(u64::MAX)),
            vec![0x46, 0x09, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn octet_string_and_null() {
        assert_eq!(
            encoded(|b| b.push_octet_string(b"hi")),
            vec![0x04, 0x02, b'h', b'i']
        );
        assert_eq!(encoded(|b| b.push_null()), vec![0x05, 0x00]);
    }

    #[test]
    fn oid_tlv() {
        assert_eq!(
            encoded(|b| b.push_oid(&oid!(1, 3, 6, 1))),
            vec![0x06, 0x03, 0x2B, 0x06, 0x01]
        );
    }

    #[test]
    fn sequence_wraps_content() {
        // SEQUENCE { INTEGER 1, INTEGER 2 } pushed in reverse order
        let bytes = encoded(|b| {
            b.push_sequence(|b| {
                b.push_integer(2);
                b.push_integer(1);
            });
        });
        assert_eq!(bytes, vec![0x30, 0x06, 0x02, 0x01, 0x01, 0x02, 0x01, 0x02]);
    }

    #[test]
    fn long_form_length() {
        let payload = vec![0xAB; 200];
        let bytes = encoded(|b| b.push_octet_string(&payload));
        assert_eq!(bytes[0], 0x04);
        assert_eq!(bytes[1], 0x81);
        assert_eq!(bytes[2], 200);
        assert_eq!(bytes.len(), 3 + 200);
    }
}
