//! SNMP message wrappers.
//!
//! Messages encapsulate PDUs with version and authentication information.
//!
//! - [`CommunityMessage`] - v1/v2c messages with community string auth
//! - [`V3Message`] - v3 messages with USM security

mod community;
mod v3;

pub use community::CommunityMessage;
pub use v3::{
    MsgFlags, MsgGlobalData, ScopedPdu, SecurityLevel, SecurityModel, V3Message, V3MessageData,
};

/// SNMP protocol version.
///
/// The wire values follow RFC 1157 and RFC 3412: v1 is 0, v2c is 1 and
/// v3 is 3 (2 was the never-deployed party-based SNMPv2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Version {
    V1 = 0,
    V2c = 1,
    V3 = 3,
}

impl Version {
    /// Wire value for the message header.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Parse a wire value.
    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(Self::V1),
            1 => Some(Self::V2c),
            3 => Some(Self::V3),
            _ => None,
        }
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::V1 => write!(f, "v1"),
            Self::V2c => write!(f, "v2c"),
            Self::V3 => write!(f, "v3"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_wire_values() {
        assert_eq!(Version::V1.as_i32(), 0);
        assert_eq!(Version::V2c.as_i32(), 1);
        assert_eq!(Version::V3.as_i32(), 3);

        assert_eq!(Version::from_i32(0), Some(Version::V1));
        assert_eq!(Version::from_i32(1), Some(Version::V2c));
        assert_eq!(Version::from_i32(2), None);
        assert_eq!(Version::from_i32(3), Some(Version::V3));
    }
}
