//! BER encoding and decoding.
//!
//! Encoding is done back-to-front: [`EncodeBuf`] stores bytes in reverse so
//! nested TLV lengths are known when the header is written, avoiding a
//! second sizing pass. Decoding is zero-copy over `Bytes`.

mod decode;
mod encode;
mod length;

pub use decode::Decoder;
pub use encode::EncodeBuf;
pub use length::{decode_length, encode_length, MAX_LENGTH};

/// ASN.1/SNMP tag constants.
pub mod tag {
    /// Universal class tags.
    pub mod universal {
        pub const INTEGER: u8 = 0x02;
        pub const OCTET_STRING: u8 = 0x04;
        pub const NULL: u8 = 0x05;
        pub const OBJECT_IDENTIFIER: u8 = 0x06;
        pub const SEQUENCE: u8 = 0x30;
        /// Constructed OCTET STRING; documented but unparsed by net-snmp,
        /// rejected here as well.
        pub const OCTET_STRING_CONSTRUCTED: u8 = 0x24;
    }

    /// Application class tags (RFC 2578).
    pub mod application {
        pub const IP_ADDRESS: u8 = 0x40;
        pub const COUNTER32: u8 = 0x41;
        pub const GAUGE32: u8 = 0x42;
        pub const TIMETICKS: u8 = 0x43;
        pub const OPAQUE: u8 = 0x44;
        pub const COUNTER64: u8 = 0x46;
    }

    /// Context class tags (v2c/v3 exception varbinds).
    pub mod context {
        pub const NO_SUCH_OBJECT: u8 = 0x80;
        pub const NO_SUCH_INSTANCE: u8 = 0x81;
        pub const END_OF_MIB_VIEW: u8 = 0x82;
    }

    /// PDU tags (context-constructed).
    pub mod pdu {
        pub const GET_REQUEST: u8 = 0xA0;
        pub const GET_NEXT_REQUEST: u8 = 0xA1;
        pub const RESPONSE: u8 = 0xA2;
        pub const SET_REQUEST: u8 = 0xA3;
        pub const GET_BULK_REQUEST: u8 = 0xA5;
        pub const REPORT: u8 = 0xA8;
    }
}
