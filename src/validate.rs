//! Profile validation against a live device.
//!
//! A profile describes what a device model should answer; validation
//! probes every configured variable once and keeps only the ones the
//! device actually serves. This runs in two passes: device-level
//! variables first, then each port variable bound to each physical port
//! index. The surviving set is what the poller cycles over, so a variable
//! that fails validation costs nothing at poll time.

use std::collections::{BTreeMap, HashSet};

use tracing::instrument;

use crate::client::Client;
use crate::error::{Error, Result};
use crate::oid::Oid;
use crate::profile::{DeviceProfile, VariableDescriptor, VariableKind};
use crate::transport::Transport;

/// Facts about the physical device that the profile alone cannot settle.
#[derive(Debug, Clone, Default)]
pub struct DeviceFacts {
    /// Number of physical ports to bind port variables to
    pub port_count: u32,
    /// Port indices that have PoE circuitry
    pub poe_ports: HashSet<u32>,
    /// Port indices to skip entirely (uplinks, stacking ports)
    pub excluded_ports: HashSet<u32>,
}

impl DeviceFacts {
    /// Derive the facts from the profile's static configuration.
    pub fn from_profile(profile: &DeviceProfile) -> Self {
        Self {
            port_count: profile.config.port_count.unwrap_or(0),
            poe_ports: profile.config.poe_ports.iter().copied().collect(),
            excluded_ports: profile.config.excluded_ports.iter().copied().collect(),
        }
    }
}

/// A descriptor that survived validation, with its OID parsed.
#[derive(Debug, Clone)]
pub struct BoundVariable {
    /// Resolved object identifier (for port variables, index included)
    pub oid: Oid,
    /// The descriptor driving transformation and presentation
    pub descriptor: VariableDescriptor,
}

/// The validated variable set the poller iterates over.
#[derive(Debug, Clone, Default)]
pub struct ValidatedOidSet {
    /// Device attributes (serial number, firmware and the like)
    pub attributes: BTreeMap<String, BoundVariable>,
    /// Device-level variables
    pub device: BTreeMap<String, BoundVariable>,
    /// Per-port variables keyed by padded port key, then variable name
    pub ports: BTreeMap<String, BTreeMap<String, BoundVariable>>,
}

impl ValidatedOidSet {
    /// Total number of validated variables across all sections.
    pub fn total(&self) -> usize {
        self.attributes.len()
            + self.device.len()
            + self.ports.values().map(BTreeMap::len).sum::<usize>()
    }

    /// Find a device-level variable by name, attributes first.
    pub fn device_variable(&self, key: &str) -> Option<&BoundVariable> {
        self.attributes.get(key).or_else(|| self.device.get(key))
    }

    /// The MAC address-table roots, when the profile defines both halves.
    ///
    /// Correlating MAC addresses to ports takes two walks: one over the
    /// address column and one over the port column. Both must have
    /// validated for the table to be collected at all.
    pub fn mac_descriptors(&self) -> Option<(&BoundVariable, &BoundVariable)> {
        let find = |kind: VariableKind| {
            self.device
                .values()
                .chain(self.attributes.values())
                .find(|v| v.descriptor.kind == kind)
        };
        Some((find(VariableKind::MacTable)?, find(VariableKind::MacPort)?))
    }
}

/// Zero-padded port key, `p01` through `p50`.
pub fn port_key(index: u32) -> String {
    format!("p{index:02}")
}

/// Recover the port index from a padded port key.
pub fn port_index(key: &str) -> Option<u32> {
    key.strip_prefix('p')?.parse().ok()
}

/// Probe every profile variable against the device and keep the ones it
/// answers.
///
/// The access-test OID is fetched first; a device that does not answer it
/// fails validation outright. Individual variables that fail are logged
/// and dropped. An empty surviving set is an error, since a poller with
/// nothing to poll indicates the wrong profile was chosen.
#[instrument(skip(client, profile, facts), err, fields(snmp.target = %client.peer_addr(), profile = %profile.name))]
pub async fn validate_profile<T: Transport>(
    client: &Client<T>,
    profile: &DeviceProfile,
    facts: &DeviceFacts,
) -> Result<ValidatedOidSet> {
    let access_oid: Oid = profile.config.access_test_oid.parse()?;
    client.get(&access_oid).await?;

    let mut validated = ValidatedOidSet::default();

    for (key, descriptor) in &profile.attributes {
        if let Some(bound) = validate_one(client, key, descriptor).await {
            validated.attributes.insert(key.clone(), bound);
        }
    }
    for (key, descriptor) in &profile.device {
        if let Some(bound) = validate_one(client, key, descriptor).await {
            validated.device.insert(key.clone(), bound);
        }
    }

    for index in 1..=facts.port_count {
        if facts.excluded_ports.contains(&index) {
            continue;
        }
        let mut port_vars = BTreeMap::new();
        for (name, descriptor) in &profile.ports {
            // PoE variables only exist on PoE-capable ports
            if name.starts_with("poe_") && !facts.poe_ports.contains(&index) {
                continue;
            }
            let bound_descriptor = descriptor.bound_to_port(index);
            if let Some(bound) = validate_one(client, name, &bound_descriptor).await {
                port_vars.insert(name.clone(), bound);
            }
        }
        // Ports without variables still appear, matching the physical layout
        validated.ports.insert(port_key(index), port_vars);
    }

    let total = validated.total();
    if total == 0 {
        return Err(Error::NoValidVariables);
    }

    tracing::info!(
        validated = total,
        ports = validated.ports.len(),
        "profile validated"
    );
    Ok(validated)
}

/// Probe one descriptor. `None` means the device does not serve it.
async fn validate_one<T: Transport>(
    client: &Client<T>,
    key: &str,
    descriptor: &VariableDescriptor,
) -> Option<BoundVariable> {
    if !descriptor.is_available() {
        return None;
    }

    let oid: Oid = match descriptor.oid.parse() {
        Ok(oid) => oid,
        Err(e) => {
            tracing::warn!(key, oid = %descriptor.oid, error = %e, "unparseable OID, dropping");
            return None;
        }
    };

    if descriptor.kind.is_address_table() {
        // Table roots have no instance of their own; accept when GETNEXT
        // lands inside the subtree
        match client.probe_next(&oid).await {
            Ok(vb) if oid.is_strict_prefix_of(&vb.oid) => {
                return Some(BoundVariable {
                    oid,
                    descriptor: descriptor.clone(),
                });
            }
            Ok(vb) => {
                tracing::debug!(key, next = %vb.oid, "table root has no entries, dropping");
                return None;
            }
            Err(e) => {
                tracing::debug!(key, error = %e, "table probe failed, dropping");
                return None;
            }
        }
    }

    let vb = match client.get(&oid).await {
        Ok(vb) => vb,
        Err(e) => {
            tracing::debug!(key, oid = %oid, error = %e, "probe failed, dropping");
            return None;
        }
    };

    if descriptor.requires_numeric() {
        let raw = vb.value.to_cache_string();
        if raw.trim().parse::<f64>().is_err() {
            tracing::warn!(key, value = %raw, "non-numeric value for rate/formula variable, dropping");
            return None;
        }
    }

    Some(BoundVariable {
        oid,
        descriptor: descriptor.clone(),
    })
}
