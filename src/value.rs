//! SNMP value types.
//!
//! The `Value` enum represents all SNMP data types including the v2c/v3
//! exception varbinds. The polling cache stores values in stringified form;
//! [`Value::to_cache_string`] is the single place that conversion happens.

use crate::ber::{tag, Decoder, EncodeBuf};
use crate::error::{DecodeErrorKind, Error, Result};
use crate::oid::Oid;
use crate::util::hex_encode;
use bytes::Bytes;

/// SNMP value.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Value {
    /// INTEGER (ASN.1 primitive, signed 32-bit)
    Integer(i32),

    /// OCTET STRING (arbitrary bytes).
    OctetString(Bytes),

    /// NULL
    Null,

    /// OBJECT IDENTIFIER
    ObjectIdentifier(Oid),

    /// IpAddress (4 bytes, big-endian)
    IpAddress([u8; 4]),

    /// Counter32 (unsigned 32-bit, wrapping)
    Counter32(u32),

    /// Gauge32 / Unsigned32 (unsigned 32-bit, non-wrapping)
    Gauge32(u32),

    /// TimeTicks (hundredths of seconds)
    TimeTicks(u32),

    /// Opaque (legacy, arbitrary bytes)
    Opaque(Bytes),

    /// Counter64 (unsigned 64-bit, wrapping). SNMPv2c/v3 only.
    Counter64(u64),

    /// noSuchObject exception: the OID is known but has no value.
    NoSuchObject,

    /// noSuchInstance exception: the specific instance does not exist.
    NoSuchInstance,

    /// endOfMibView exception: walk ran off the end of the MIB.
    EndOfMibView,

    /// Unknown/unrecognized value type (for forward compatibility)
    Unknown { tag: u8, data: Bytes },
}

impl Value {
    /// Try to get as i32.
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Try to get as u32 (Counter32, Gauge32, TimeTicks, non-negative Integer).
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Value::Counter32(v) | Value::Gauge32(v) | Value::TimeTicks(v) => Some(*v),
            Value::Integer(v) if *v >= 0 => Some(*v as u32),
            _ => None,
        }
    }

    /// Try to get as u64 (any unsigned type or non-negative Integer).
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Counter64(v) => Some(*v),
            Value::Counter32(v) | Value::Gauge32(v) | Value::TimeTicks(v) => Some(*v as u64),
            Value::Integer(v) if *v >= 0 => Some(*v as u64),
            _ => None,
        }
    }

    /// Try to get as bytes (OctetString or Opaque).
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::OctetString(v) | Value::Opaque(v) => Some(v),
            _ => None,
        }
    }

    /// Try to get as string (UTF-8 OctetString or Opaque).
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    /// Try to get as OID.
    pub fn as_oid(&self) -> Option<&Oid> {
        match self {
            Value::ObjectIdentifier(oid) => Some(oid),
            _ => None,
        }
    }

    /// Numeric view used by the transformation pipeline.
    ///
    /// Integer and unsigned wire types convert directly; octet strings are
    /// parsed, so gauges reported as text still feed rate and formula
    /// calculations.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(v) => Some(*v as f64),
            Value::Counter32(v) | Value::Gauge32(v) | Value::TimeTicks(v) => Some(*v as f64),
            Value::Counter64(v) => Some(*v as f64),
            Value::OctetString(_) | Value::Opaque(_) => {
                self.as_str().and_then(|s| s.trim().parse().ok())
            }
            _ => None,
        }
    }

    /// Check if this is an exception value.
    pub fn is_exception(&self) -> bool {
        matches!(
            self,
            Value::NoSuchObject | Value::NoSuchInstance | Value::EndOfMibView
        )
    }

    /// The stringified form stored in the sample cache and compared by
    /// write verification.
    pub fn to_cache_string(&self) -> String {
        match self {
            Value::OctetString(data) | Value::Opaque(data) => match std::str::from_utf8(data) {
                Ok(s) => s.to_string(),
                Err(_) => format!("0x{}", hex_encode(data)),
            },
            other => other.to_string(),
        }
    }

    /// Encode to BER.
    pub fn encode(&self, buf: &mut EncodeBuf) {
        match self {
            Value::Integer(v) => buf.push_integer(*v),
            Value::OctetString(data) => buf.push_octet_string(data),
            Value::Null => buf.push_null(),
            Value::ObjectIdentifier(oid) => buf.push_oid(oid),
            Value::IpAddress(addr) => buf.push_ip_address(*addr),
            Value::Counter32(v) => buf.push_unsigned32(tag::application::COUNTER32, *v),
            Value::Gauge32(v) => buf.push_unsigned32(tag::application::GAUGE32, *v),
            Value::TimeTicks(v) => buf.push_unsigned32(tag::application::TIMETICKS, *v),
            Value::Opaque(data) => {
                buf.push_bytes(data);
                buf.push_length(data.len());
                buf.push_tag(tag::application::OPAQUE);
            }
            Value::Counter64(v) => buf.push_integer64(*v),
            Value::NoSuchObject => {
                buf.push_length(0);
                buf.push_tag(tag::context::NO_SUCH_OBJECT);
            }
            Value::NoSuchInstance => {
                buf.push_length(0);
                buf.push_tag(tag::context::NO_SUCH_INSTANCE);
            }
            Value::EndOfMibView => {
                buf.push_length(0);
                buf.push_tag(tag::context::END_OF_MIB_VIEW);
            }
            Value::Unknown { tag: t, data } => {
                buf.push_bytes(data);
                buf.push_length(data.len());
                buf.push_tag(*t);
            }
        }
    }

    /// Decode from BER.
    pub fn decode(decoder: &mut Decoder) -> Result<Self> {
        let tag = decoder.read_tag()?;
        let len = decoder.read_length()?;

        match tag {
            tag::universal::INTEGER => {
                let value = decoder.read_integer_value(len)?;
                Ok(Value::Integer(value))
            }
            tag::universal::OCTET_STRING => {
                let data = decoder.read_bytes(len)?;
                Ok(Value::OctetString(data))
            }
            tag::universal::NULL => {
                if len != 0 {
                    return Err(Error::decode(
                        decoder.offset(),
                        DecodeErrorKind::InvalidNull,
                    ));
                }
                Ok(Value::Null)
            }
            tag::universal::OBJECT_IDENTIFIER => {
                let oid = decoder.read_oid_value(len)?;
                Ok(Value::ObjectIdentifier(oid))
            }
            tag::application::IP_ADDRESS => {
                if len != 4 {
                    return Err(Error::decode(
                        decoder.offset(),
                        DecodeErrorKind::InvalidIpAddressLength { length: len },
                    ));
                }
                let data = decoder.read_bytes(4)?;
                Ok(Value::IpAddress([data[0], data[1], data[2], data[3]]))
            }
            tag::application::COUNTER32 => Ok(Value::Counter32(decoder.read_unsigned32_value(len)?)),
            tag::application::GAUGE32 => Ok(Value::Gauge32(decoder.read_unsigned32_value(len)?)),
            tag::application::TIMETICKS => Ok(Value::TimeTicks(decoder.read_unsigned32_value(len)?)),
            tag::application::OPAQUE => {
                let data = decoder.read_bytes(len)?;
                Ok(Value::Opaque(data))
            }
            tag::application::COUNTER64 => Ok(Value::Counter64(decoder.read_integer64_value(len)?)),
            tag::context::NO_SUCH_OBJECT => {
                if len != 0 {
                    let _ = decoder.read_bytes(len)?;
                }
                Ok(Value::NoSuchObject)
            }
            tag::context::NO_SUCH_INSTANCE => {
                if len != 0 {
                    let _ = decoder.read_bytes(len)?;
                }
                Ok(Value::NoSuchInstance)
            }
            tag::context::END_OF_MIB_VIEW => {
                if len != 0 {
                    let _ = decoder.read_bytes(len)?;
                }
                Ok(Value::EndOfMibView)
            }
            // Net-snmp documents but does not parse constructed form; we follow suit.
            tag::universal::OCTET_STRING_CONSTRUCTED => Err(Error::decode(
                decoder.offset(),
                DecodeErrorKind::ConstructedOctetString,
            )),
            _ => {
                // Unknown tag, preserved for forward compatibility
                let data = decoder.read_bytes(len)?;
                Ok(Value::Unknown { tag, data })
            }
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Integer(v) => write!(f, "{}", v),
            Value::OctetString(data) => {
                if let Ok(s) = std::str::from_utf8(data) {
                    write!(f, "{}", s)
                } else {
                    write!(f, "0x{}", hex_encode(data))
                }
            }
            Value::Null => write!(f, "NULL"),
            Value::ObjectIdentifier(oid) => write!(f, "{}", oid),
            Value::IpAddress(addr) => {
                write!(f, "{}.{}.{}.{}", addr[0], addr[1], addr[2], addr[3])
            }
            Value::Counter32(v) => write!(f, "{}", v),
            Value::Gauge32(v) => write!(f, "{}", v),
            Value::TimeTicks(v) => write!(f, "{}", v),
            Value::Opaque(data) => write!(f, "Opaque(0x{})", hex_encode(data)),
            Value::Counter64(v) => write!(f, "{}", v),
            Value::NoSuchObject => write!(f, "noSuchObject"),
            Value::NoSuchInstance => write!(f, "noSuchInstance"),
            Value::EndOfMibView => write!(f, "endOfMibView"),
            Value::Unknown { tag, data } => {
                write!(f, "Unknown(tag=0x{:02X}, data=0x{})", tag, hex_encode(data))
            }
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::OctetString(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::OctetString(Bytes::from(s))
    }
}

impl From<&[u8]> for Value {
    fn from(data: &[u8]) -> Self {
        Value::OctetString(Bytes::copy_from_slice(data))
    }
}

impl From<Oid> for Value {
    fn from(oid: Oid) -> Self {
        Value::ObjectIdentifier(oid)
    }
}

impl From<Bytes> for Value {
    fn from(data: Bytes) -> Self {
        Value::OctetString(data)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Counter64(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: Value) -> Value {
        let mut buf = EncodeBuf::new();
        value.encode(&mut buf);
        let data = buf.finish();
        let mut decoder = Decoder::new(data);
        Value::decode(&mut decoder).unwrap()
    }

    #[test]
    fn integer_roundtrip() {
        for v in [0, 42, -42, i32::MIN, i32::MAX] {
            let value = Value::Integer(v);
            assert_eq!(roundtrip(value.clone()), value);
        }
    }

    #[test]
    fn octet_string_roundtrip() {
        for data in [&b"hello world"[..], &[0x00, 0xFF, 0x80, 0x7F], &[]] {
            let value = Value::OctetString(Bytes::copy_from_slice(data));
            assert_eq!(roundtrip(value.clone()), value);
        }
    }

    #[test]
    fn unsigned_roundtrips() {
        for value in [
            Value::Counter32(0),
            Value::Counter32(u32::MAX),
            Value::Gauge32(1_000_000_000),
            Value::TimeTicks(123456),
            Value::Counter64(0),
            Value::Counter64(123_456_789_012_345),
            Value::Counter64(u64::MAX),
        ] {
            assert_eq!(roundtrip(value.clone()), value);
        }
    }

    #[test]
    fn misc_roundtrips() {
        for value in [
            Value::Null,
            Value::ObjectIdentifier(crate::oid!(1, 3, 6, 1, 2, 1, 1, 1, 0)),
            Value::IpAddress([192, 168, 1, 1]),
            Value::Opaque(Bytes::from_static(&[0xDE, 0xAD, 0xBE, 0xEF])),
            Value::NoSuchObject,
            Value::NoSuchInstance,
            Value::EndOfMibView,
        ] {
            assert_eq!(roundtrip(value.clone()), value);
        }
    }

    #[test]
    fn unknown_tag_preserved() {
        let data = Bytes::from_static(&[0x45, 0x03, 0x01, 0x02, 0x03]);
        let mut decoder = Decoder::new(data);
        let value = Value::decode(&mut decoder).unwrap();

        match value {
            Value::Unknown { tag, ref data } => {
                assert_eq!(tag, 0x45);
                assert_eq!(data.as_ref(), &[0x01, 0x02, 0x03]);
            }
            _ => panic!("expected Unknown variant"),
        }
        assert_eq!(roundtrip(value.clone()), value);
    }

    #[test]
    fn reject_constructed_octet_string() {
        let data = Bytes::from_static(&[0x24, 0x03, 0x04, 0x01, 0x41]);
        let mut decoder = Decoder::new(data);
        assert!(Value::decode(&mut decoder).is_err());
    }

    #[test]
    fn accessors() {
        assert_eq!(Value::Integer(42).as_i32(), Some(42));
        assert_eq!(Value::Counter32(100).as_i32(), None);
        assert_eq!(Value::Counter32(100).as_u32(), Some(100));
        assert_eq!(Value::Integer(-1).as_u32(), None);
        assert_eq!(Value::Counter64(100).as_u64(), Some(100));
        assert_eq!(
            Value::OctetString(Bytes::from_static(b"test")).as_bytes(),
            Some(b"test".as_slice())
        );
        assert_eq!(
            Value::OctetString(Bytes::from_static(&[0xFF, 0xFE])).as_str(),
            None
        );
    }

    #[test]
    fn numeric_view() {
        assert_eq!(Value::Integer(-5).as_f64(), Some(-5.0));
        assert_eq!(Value::Counter64(1500).as_f64(), Some(1500.0));
        assert_eq!(
            Value::OctetString(Bytes::from_static(b"3.5")).as_f64(),
            Some(3.5)
        );
        assert_eq!(
            Value::OctetString(Bytes::from_static(b"not a number")).as_f64(),
            None
        );
        assert_eq!(Value::Null.as_f64(), None);
    }

    #[test]
    fn exceptions() {
        assert!(Value::NoSuchObject.is_exception());
        assert!(Value::NoSuchInstance.is_exception());
        assert!(Value::EndOfMibView.is_exception());
        assert!(!Value::Integer(1).is_exception());
    }

    #[test]
    fn cache_string_forms() {
        assert_eq!(Value::Integer(7).to_cache_string(), "7");
        assert_eq!(Value::from("up").to_cache_string(), "up");
        assert_eq!(
            Value::OctetString(Bytes::from_static(&[0xFF, 0xFE])).to_cache_string(),
            "0xfffe"
        );
        assert_eq!(Value::Counter64(9).to_cache_string(), "9");
    }

    #[test]
    fn display_forms() {
        assert_eq!(format!("{}", Value::Integer(-42)), "-42");
        assert_eq!(
            format!("{}", Value::OctetString(Bytes::from_static(b"hello"))),
            "hello"
        );
        assert_eq!(format!("{}", Value::IpAddress([10, 0, 0, 1])), "10.0.0.1");
        assert_eq!(format!("{}", Value::NoSuchObject), "noSuchObject");
    }

    #[test]
    fn decode_invalid_lengths() {
        // NULL must have length 0
        let mut decoder = Decoder::from_slice(&[0x05, 0x01, 0x00]);
        assert!(Value::decode(&mut decoder).is_err());

        // IpAddress must have length 4
        let mut decoder = Decoder::from_slice(&[0x40, 0x03, 0x01, 0x02, 0x03]);
        assert!(Value::decode(&mut decoder).is_err());
    }
}
