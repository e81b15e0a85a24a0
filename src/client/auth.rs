//! Credential resolution for SNMP operations.
//!
//! A device entry carries one [`Credentials`] record. For community-based
//! versions (v1/v2c) it resolves which community string an operation uses:
//! writes prefer the write community and fall back to the read community
//! when none is configured. For v3 it carries the USM user and the
//! (optional) authentication and privacy protocol/password pairs.

use crate::error::{Error, Result};
use crate::message::{SecurityLevel, Version};
use crate::v3::{AuthProtocol, PrivProtocol};

/// The kind of SNMP operation being performed, for credential selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// GET, GETNEXT, GETBULK
    Read,
    /// SET
    Write,
}

/// USM security settings for SNMPv3.
///
/// Absent `auth` means noAuthNoPriv; `privacy` without `auth` is invalid.
#[derive(Clone)]
pub struct V3Security {
    /// USM user name (must be non-empty)
    pub username: String,
    /// Authentication protocol and password
    pub auth: Option<(AuthProtocol, String)>,
    /// Privacy protocol and password
    pub privacy: Option<(PrivProtocol, String)>,
}

impl V3Security {
    /// Create noAuthNoPriv settings.
    pub fn no_auth(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            auth: None,
            privacy: None,
        }
    }

    /// Create authNoPriv settings.
    pub fn auth(
        username: impl Into<String>,
        protocol: AuthProtocol,
        password: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            auth: Some((protocol, password.into())),
            privacy: None,
        }
    }

    /// Create authPriv settings.
    pub fn auth_priv(
        username: impl Into<String>,
        auth_protocol: AuthProtocol,
        auth_password: impl Into<String>,
        priv_protocol: PrivProtocol,
        priv_password: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            auth: Some((auth_protocol, auth_password.into())),
            privacy: Some((priv_protocol, priv_password.into())),
        }
    }

    /// Build from configuration strings.
    ///
    /// Empty or absent protocol names mean the corresponding level is not
    /// used. Unknown protocol names are rejected.
    pub fn from_config(
        username: impl Into<String>,
        auth_protocol: Option<&str>,
        auth_password: Option<&str>,
        priv_protocol: Option<&str>,
        priv_password: Option<&str>,
    ) -> Result<Self> {
        let auth = match auth_protocol.filter(|s| !s.is_empty()) {
            Some(name) => {
                let protocol: AuthProtocol =
                    name.parse().map_err(|e: crate::v3::ParseProtocolError| {
                        Error::InvalidCredentials(e.to_string())
                    })?;
                Some((protocol, auth_password.unwrap_or_default().to_string()))
            }
            None => None,
        };

        let privacy = match priv_protocol.filter(|s| !s.is_empty()) {
            Some(name) => {
                let protocol: PrivProtocol =
                    name.parse().map_err(|e: crate::v3::ParseProtocolError| {
                        Error::InvalidCredentials(e.to_string())
                    })?;
                Some((protocol, priv_password.unwrap_or_default().to_string()))
            }
            None => None,
        };

        Ok(Self {
            username: username.into(),
            auth,
            privacy,
        })
    }

    /// The security level implied by the configured protocols.
    pub fn security_level(&self) -> SecurityLevel {
        match (&self.auth, &self.privacy) {
            (Some(_), Some(_)) => SecurityLevel::AuthPriv,
            (Some(_), None) => SecurityLevel::AuthNoPriv,
            _ => SecurityLevel::NoAuthNoPriv,
        }
    }
}

impl std::fmt::Debug for V3Security {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("V3Security")
            .field("username", &self.username)
            .field("auth", &self.auth.as_ref().map(|(p, _)| p))
            .field("privacy", &self.privacy.as_ref().map(|(p, _)| p))
            .finish()
    }
}

/// Credentials for talking to one device.
#[derive(Debug, Clone)]
pub enum Credentials {
    /// Community-based authentication (v1/v2c).
    Community {
        /// V1 or V2c
        version: Version,
        /// Community for read operations
        read: String,
        /// Community for write operations; the read community is used when absent
        write: Option<String>,
    },
    /// User-based Security Model (v3).
    Usm(V3Security),
}

impl Credentials {
    /// SNMPv1 credentials.
    pub fn v1(read: impl Into<String>, write: Option<String>) -> Self {
        Self::Community {
            version: Version::V1,
            read: read.into(),
            write,
        }
    }

    /// SNMPv2c credentials.
    pub fn v2c(read: impl Into<String>, write: Option<String>) -> Self {
        Self::Community {
            version: Version::V2c,
            read: read.into(),
            write,
        }
    }

    /// SNMPv3 credentials.
    pub fn usm(security: V3Security) -> Self {
        Self::Usm(security)
    }

    /// The wire version these credentials select.
    pub fn version(&self) -> Version {
        match self {
            Self::Community { version, .. } => *version,
            Self::Usm(_) => Version::V3,
        }
    }

    /// Resolve the community string for an operation (v1/v2c only).
    ///
    /// Write operations use the write community when configured and fall
    /// back to the read community otherwise.
    pub fn community_for(&self, op: Operation) -> Option<&str> {
        match self {
            Self::Community { read, write, .. } => match op {
                Operation::Read => Some(read.as_str()),
                Operation::Write => Some(write.as_deref().unwrap_or(read.as_str())),
            },
            Self::Usm(_) => None,
        }
    }

    /// USM settings, if these are v3 credentials.
    pub fn v3_security(&self) -> Option<&V3Security> {
        match self {
            Self::Usm(security) => Some(security),
            Self::Community { .. } => None,
        }
    }

    /// Check internal consistency.
    ///
    /// v3 requires a non-empty user name and rejects privacy without
    /// authentication (there is no noAuthPriv security level).
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Community { .. } => Ok(()),
            Self::Usm(security) => {
                if security.username.is_empty() {
                    return Err(Error::InvalidCredentials(
                        "v3 requires a non-empty user name".to_string(),
                    ));
                }
                if security.privacy.is_some() && security.auth.is_none() {
                    return Err(Error::InvalidCredentials(
                        "privacy requires authentication".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_community_fallback() {
        let creds = Credentials::v2c("public", None);
        assert_eq!(creds.community_for(Operation::Read), Some("public"));
        assert_eq!(creds.community_for(Operation::Write), Some("public"));

        let creds = Credentials::v2c("public", Some("private".to_string()));
        assert_eq!(creds.community_for(Operation::Read), Some("public"));
        assert_eq!(creds.community_for(Operation::Write), Some("private"));
    }

    #[test]
    fn test_version_selection() {
        assert_eq!(Credentials::v1("public", None).version(), Version::V1);
        assert_eq!(Credentials::v2c("public", None).version(), Version::V2c);
        assert_eq!(
            Credentials::usm(V3Security::no_auth("admin")).version(),
            Version::V3
        );
    }

    #[test]
    fn test_v3_security_levels() {
        assert_eq!(
            V3Security::no_auth("u").security_level(),
            SecurityLevel::NoAuthNoPriv
        );
        assert_eq!(
            V3Security::auth("u", AuthProtocol::Sha1, "pass").security_level(),
            SecurityLevel::AuthNoPriv
        );
        assert_eq!(
            V3Security::auth_priv("u", AuthProtocol::Sha1, "ap", PrivProtocol::Aes128, "pp")
                .security_level(),
            SecurityLevel::AuthPriv
        );
    }

    #[test]
    fn test_validate_rejects_empty_username() {
        let creds = Credentials::usm(V3Security::no_auth(""));
        assert!(matches!(creds.validate(), Err(Error::InvalidCredentials(_))));
    }

    #[test]
    fn test_validate_rejects_priv_without_auth() {
        let creds = Credentials::usm(V3Security {
            username: "admin".to_string(),
            auth: None,
            privacy: Some((PrivProtocol::Des, "pass".to_string())),
        });
        assert!(matches!(creds.validate(), Err(Error::InvalidCredentials(_))));
    }

    #[test]
    fn test_from_config_absent_protocols_mean_no_auth() {
        let security = V3Security::from_config("admin", None, None, None, None).unwrap();
        assert_eq!(security.security_level(), SecurityLevel::NoAuthNoPriv);

        // Empty strings behave like absent names
        let security =
            V3Security::from_config("admin", Some(""), Some("x"), Some(""), Some("y")).unwrap();
        assert_eq!(security.security_level(), SecurityLevel::NoAuthNoPriv);
    }

    #[test]
    fn test_from_config_parses_protocol_names() {
        let security = V3Security::from_config(
            "admin",
            Some("sha"),
            Some("authpass"),
            Some("aes"),
            Some("privpass"),
        )
        .unwrap();

        assert_eq!(security.security_level(), SecurityLevel::AuthPriv);
        assert_eq!(security.auth.as_ref().unwrap().0, AuthProtocol::Sha1);
        assert_eq!(security.privacy.as_ref().unwrap().0, PrivProtocol::Aes128);
    }

    #[test]
    fn test_from_config_rejects_unknown_protocol() {
        let result = V3Security::from_config("admin", Some("sha512"), Some("x"), None, None);
        assert!(matches!(result, Err(Error::InvalidCredentials(_))));
    }
}
