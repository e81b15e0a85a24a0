//! Poll-cycle sample cache.
//!
//! The poller keeps exactly two generations of raw samples: the current
//! cycle and the one before it. Rate calculations need the previous
//! sample and its timestamp; nothing needs older history. Values are
//! stored raw, as the device answered them, and transformed on read.

use std::collections::BTreeMap;

use crate::oid::Oid;

/// Marker stored when the device reports the object does not exist.
pub const MISSING: &str = "missing";

/// Marker stored when fetching the object failed (timeout, decode error).
pub const ERROR: &str = "error";

/// Firmware placeholder until the first successful slow-cycle fetch.
pub const UNKNOWN_FIRMWARE: &str = "Unknown";

/// Cache key for a device-level variable.
pub fn device_cache_key(key: &str) -> String {
    format!("device_{key}")
}

/// Cache key for a port variable.
pub fn port_cache_key(port: &str, key: &str) -> String {
    format!("port_{port}_{key}")
}

/// One correlated MAC address table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AddressTable {
    /// MAC addresses grouped by the port string the device reported
    pub ports: BTreeMap<String, Vec<String>>,
    /// Raw address-column walk, as returned
    pub raw_addresses: Vec<(Oid, String)>,
    /// Raw port-column walk, as returned
    pub raw_ports: Vec<(Oid, String)>,
    /// When this table was collected, seconds since the epoch
    pub last_updated: f64,
}

/// All raw samples from one poll cycle.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Device attribute samples (serial number, firmware)
    pub attributes: BTreeMap<String, String>,
    /// Device-level variable samples
    pub device: BTreeMap<String, String>,
    /// Port samples keyed by padded port key, then variable name
    pub ports: BTreeMap<String, BTreeMap<String, String>>,
    /// Most recent MAC table, carried forward between MAC sub-cycles
    pub address_table: Option<AddressTable>,
    /// Per-variable sample timestamps, seconds since the epoch
    pub last_updated: BTreeMap<String, f64>,
}

impl Snapshot {
    /// Look up a device-level sample, attributes first.
    pub fn device_value(&self, key: &str) -> Option<&str> {
        self.attributes
            .get(key)
            .or_else(|| self.device.get(key))
            .map(String::as_str)
    }

    /// Look up a port sample by padded port key and variable name.
    pub fn port_value(&self, port: &str, key: &str) -> Option<&str> {
        self.ports.get(port)?.get(key).map(String::as_str)
    }

    /// The timestamp recorded for a cache key.
    pub fn updated_at(&self, cache_key: &str) -> Option<f64> {
        self.last_updated.get(cache_key).copied()
    }
}

/// Two-generation sample store.
#[derive(Debug, Clone, Default)]
pub struct SampleCache {
    /// Samples from the cycle in progress or just committed
    pub current: Snapshot,
    /// Samples from the cycle before that
    pub previous: Snapshot,
}

impl SampleCache {
    /// Commit a finished cycle: the current generation becomes the
    /// previous one.
    pub fn commit(&mut self, next: Snapshot) {
        self.previous = std::mem::replace(&mut self.current, next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_rotates_generations() {
        let mut cache = SampleCache::default();

        let mut first = Snapshot::default();
        first.device.insert("uptime".to_string(), "100".to_string());
        cache.commit(first);

        let mut second = Snapshot::default();
        second.device.insert("uptime".to_string(), "200".to_string());
        cache.commit(second);

        assert_eq!(cache.previous.device_value("uptime"), Some("100"));
        assert_eq!(cache.current.device_value("uptime"), Some("200"));
    }

    #[test]
    fn test_device_value_prefers_attributes() {
        let mut snapshot = Snapshot::default();
        snapshot
            .attributes
            .insert("firmware".to_string(), "1.2.3".to_string());
        snapshot
            .device
            .insert("firmware".to_string(), "shadowed".to_string());

        assert_eq!(snapshot.device_value("firmware"), Some("1.2.3"));
    }

    #[test]
    fn test_cache_keys() {
        assert_eq!(device_cache_key("uptime"), "device_uptime");
        assert_eq!(port_cache_key("p05", "in_octets"), "port_p05_in_octets");
    }
}
