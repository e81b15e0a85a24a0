// Allow large error types - the Error enum includes OIDs inline for debugging convenience.
// Boxing them would add complexity and allocations for a marginal size reduction.
#![allow(clippy::result_large_err)]

//! # snmp-poller
//!
//! Async SNMP polling engine for network devices described by YAML
//! profiles.
//!
//! ## Features
//!
//! - Full SNMPv1, v2c, and v3 support over UDP
//! - YAML device profiles with per-variable transformation pipelines
//!   (rates, formulas, value maps)
//! - Two-pass profile validation: only variables the device actually
//!   answers get polled
//! - Serialized poll cycles with a two-generation sample cache
//! - MAC address table collection correlated to physical ports
//! - Verified writes for switch and text controls
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use snmp_poller::{Credentials, Registry, Session, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), snmp_poller::Error> {
//!     let registry = Registry::load_dir("profiles")?;
//!     let profile = registry.get("gs1900_24").expect("profile exists");
//!
//!     let config = SessionConfig::new(
//!         "192.168.1.2:161".parse().unwrap(),
//!         Credentials::v2c("public", None),
//!     );
//!     let session = Session::connect(config, profile).await?;
//!
//!     session.start();
//!     let mut cycles = session.subscribe();
//!     cycles.changed().await.ok();
//!
//!     println!("uptime: {:?}", session.value("uptime", None).await);
//!     println!("port 1 rate: {:?}", session.value("in_octets", Some("p01")).await);
//!
//!     session.stop();
//!     Ok(())
//! }
//! ```
//!
//! ## SNMPv3 Example
//!
//! ```rust,no_run
//! use snmp_poller::{Credentials, V3Security};
//! use snmp_poller::v3::{AuthProtocol, PrivProtocol};
//!
//! let credentials = Credentials::usm(V3Security::auth_priv(
//!     "admin",
//!     AuthProtocol::Sha1,
//!     "authpass123",
//!     PrivProtocol::Aes128,
//!     "privpass123",
//! ));
//! ```

pub mod ber;
pub mod cache;
pub mod client;
pub mod coordinator;
pub mod error;
pub mod mac_table;
pub mod message;
pub mod oid;
pub mod pdu;
pub mod profile;
pub mod session;
pub mod transform;
pub mod transport;
pub mod v3;
pub mod validate;
pub mod value;
pub mod varbind;

pub(crate) mod util;

// Re-exports for convenience
pub use cache::{AddressTable, SampleCache, Snapshot, ERROR, MISSING};
pub use client::{Client, ClientConfig, Credentials, Operation, V3Security, MAX_PORTS};
pub use coordinator::{Poller, PollerConfig, DEFAULT_MAC_UPDATE_CYCLE, SLOW_UPDATE_CYCLE};
pub use error::{
    AuthErrorKind, CryptoErrorKind, DecodeErrorKind, EncodeErrorKind, Error, ErrorStatus,
    OidErrorKind, Result,
};
pub use message::{SecurityLevel, Version};
pub use oid::Oid;
pub use pdu::{Pdu, PduType};
pub use profile::{Calc, DeviceProfile, Registry, ValueMap, VariableDescriptor, VariableKind};
pub use session::{Session, SessionConfig};
pub use transform::TransformContext;
pub use transport::{Transport, UdpTransport};
pub use v3::{AuthProtocol, LocalizedKey, ParseProtocolError, PrivProtocol};
pub use validate::{
    port_index, port_key, validate_profile, BoundVariable, DeviceFacts, ValidatedOidSet,
};
pub use value::Value;
pub use varbind::VarBind;

/// Type alias for a session over a dedicated UDP socket, the default.
pub type UdpSession = Session<UdpTransport>;
