//! Device profile registry.
//!
//! Profiles are declarative YAML documents mapping vendor OID layouts to a
//! uniform variable model. A profile names its device family and provides
//! four sections: `config` (static settings such as the access-test OID),
//! `attributes` (identification strings), `device` (device-wide variables),
//! and an optional `ports` section of per-port variables. Port identifiers
//! are late-bound by appending `.{index}` at validation time.
//!
//! The registry loads a whole directory at once, skipping hidden and
//! underscore-prefixed files and rejecting duplicate profile names.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};

use crate::error::{Error, Result};

/// Identifier sentinel for "not available on this device".
pub const NOT_AVAILABLE: &str = "na";

/// What kind of entity a variable feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableKind {
    /// Numeric or labeled reading
    Sensor,
    /// Writable two-state control
    Switch,
    /// Writable free-form text
    Text,
    /// Read-only text
    TextSensor,
    /// Boolean reading driven by a boolean value map
    BinarySensor,
    /// Forwarding-table column: MAC address per table index
    MacTable,
    /// Forwarding-table column: owning port per table index
    MacPort,
}

impl Default for VariableKind {
    fn default() -> Self {
        Self::Sensor
    }
}

impl VariableKind {
    /// Address-table kinds are validated by a next-probe, never a direct read.
    pub fn is_address_table(self) -> bool {
        matches!(self, Self::MacTable | Self::MacPort)
    }
}

/// Calculation applied to the raw sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Calc {
    /// Use the raw value unchanged
    #[default]
    Direct,
    /// Per-second rate from two consecutive counter samples
    #[serde(rename = "diff", alias = "rate")]
    Rate,
}

/// A value-map entry's right-hand side: one token or a list of tokens.
#[derive(Debug, Clone, PartialEq)]
pub enum MapTokens {
    One(String),
    Many(Vec<String>),
}

impl MapTokens {
    /// The single token, if this is not a list.
    pub fn as_single(&self) -> Option<&str> {
        match self {
            Self::One(s) => Some(s.as_str()),
            Self::Many(_) => None,
        }
    }

    /// Iterate all tokens regardless of shape.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        match self {
            Self::One(s) => std::slice::from_ref(s).iter(),
            Self::Many(v) => v.iter(),
        }
        .map(String::as_str)
    }
}

impl<'de> Deserialize<'de> for MapTokens {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct TokenVisitor;

        impl<'de> Visitor<'de> for TokenVisitor {
            type Value = MapTokens;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a string, number, boolean, or list of strings")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> std::result::Result<MapTokens, E> {
                Ok(MapTokens::One(v.to_string()))
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> std::result::Result<MapTokens, E> {
                Ok(MapTokens::One(v.to_string()))
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> std::result::Result<MapTokens, E> {
                Ok(MapTokens::One(v.to_string()))
            }

            fn visit_f64<E: serde::de::Error>(self, v: f64) -> std::result::Result<MapTokens, E> {
                Ok(MapTokens::One(v.to_string()))
            }

            fn visit_bool<E: serde::de::Error>(self, v: bool) -> std::result::Result<MapTokens, E> {
                Ok(MapTokens::One(v.to_string()))
            }

            fn visit_seq<A: serde::de::SeqAccess<'de>>(
                self,
                mut seq: A,
            ) -> std::result::Result<MapTokens, A::Error> {
                let mut tokens = Vec::new();
                while let Some(token) = seq.next_element::<String>()? {
                    tokens.push(token);
                }
                Ok(MapTokens::Many(tokens))
            }
        }

        deserializer.deserialize_any(TokenVisitor)
    }
}

/// Value mapping from raw wire values to labels or booleans.
///
/// Entries keep their declaration order; numeric/label mapping is
/// first-match-wins in that order. Keys prefixed `<` or `>` compare
/// numerically against the input.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValueMap {
    entries: Vec<(String, MapTokens)>,
}

impl ValueMap {
    /// Build from ordered pairs. Mostly useful in tests.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, MapTokens)>) -> Self {
        Self {
            entries: pairs.into_iter().collect(),
        }
    }

    /// The entries in declaration order.
    pub fn entries(&self) -> &[(String, MapTokens)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a key exactly.
    pub fn get(&self, key: &str) -> Option<&MapTokens> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// The `on`/`off` wire tokens for a switch write.
    ///
    /// Both must be present as plain strings; legacy `1`/`0` keys are
    /// accepted in place of `on`/`off`. Anything else makes the map
    /// unusable for writes.
    pub fn switch_tokens(&self) -> Option<(&str, &str)> {
        let on = self
            .get("on")
            .or_else(|| self.get("1"))
            .and_then(MapTokens::as_single)?;
        let off = self
            .get("off")
            .or_else(|| self.get("0"))
            .and_then(MapTokens::as_single)?;
        Some((on, off))
    }

    /// Structural check against the consuming kind.
    ///
    /// Switch maps need exactly `{on, off}` (or legacy `{1, 0}`) with plain
    /// string values. Boolean-sensor maps accept the same keys with string
    /// or list values. Sensor maps accept arbitrary string keys; a
    /// comparison-prefixed key that does not parse as a number is logged
    /// and ignored rather than rejecting the map.
    pub fn validate_for(&self, kind: VariableKind) -> std::result::Result<(), String> {
        match kind {
            VariableKind::Switch => {
                self.check_boolean_keys("switch")?;
                for (key, tokens) in &self.entries {
                    if tokens.as_single().is_none() {
                        return Err(format!("switch map value for '{key}' must be a string"));
                    }
                }
                Ok(())
            }
            VariableKind::BinarySensor => {
                self.check_boolean_keys("binary sensor")?;
                for (_, tokens) in &self.entries {
                    for token in tokens.iter() {
                        if let Some(tail) = token.strip_prefix(['<', '>']) {
                            if tail.parse::<f64>().is_err() {
                                return Err(format!("comparison token '{token}' is not numeric"));
                            }
                        }
                    }
                }
                Ok(())
            }
            VariableKind::Sensor => {
                for (key, tokens) in &self.entries {
                    if let Some(tail) = key.strip_prefix(['<', '>']) {
                        if tail.parse::<f64>().is_err() {
                            // Never matches at apply time, the map stays usable
                            tracing::warn!(
                                key = %key,
                                "ignoring non-numeric comparison key in value map"
                            );
                            continue;
                        }
                    }
                    if tokens.as_single().is_none() {
                        return Err(format!("sensor map value for '{key}' must be a string"));
                    }
                }
                Ok(())
            }
            _ => Err(format!("value map not supported for kind {kind:?}")),
        }
    }

    fn check_boolean_keys(&self, what: &str) -> std::result::Result<(), String> {
        let mut keys: Vec<&str> = self.entries.iter().map(|(k, _)| k.as_str()).collect();
        keys.sort_unstable();
        if keys == ["off", "on"] || keys == ["0", "1"] {
            Ok(())
        } else {
            Err(format!(
                "{what} map must have exactly the keys {{on, off}} or {{1, 0}}"
            ))
        }
    }
}

impl<'de> Deserialize<'de> for ValueMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct MapVisitor;

        impl<'de> Visitor<'de> for MapVisitor {
            type Value = ValueMap;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a mapping of value tokens")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<ValueMap, A::Error> {
                let mut entries = Vec::new();
                while let Some((key, tokens)) = access.next_entry::<MapKey, MapTokens>()? {
                    entries.push((key.0, tokens));
                }
                Ok(ValueMap { entries })
            }
        }

        deserializer.deserialize_map(MapVisitor)
    }
}

/// YAML map keys may arrive as bare numbers (`0: off`); normalize to strings.
struct MapKey(String);

impl<'de> Deserialize<'de> for MapKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct KeyVisitor;

        impl Visitor<'_> for KeyVisitor {
            type Value = MapKey;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a string or numeric map key")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> std::result::Result<MapKey, E> {
                Ok(MapKey(v.to_string()))
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> std::result::Result<MapKey, E> {
                Ok(MapKey(v.to_string()))
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> std::result::Result<MapKey, E> {
                Ok(MapKey(v.to_string()))
            }
        }

        deserializer.deserialize_any(KeyVisitor)
    }
}

/// One declared variable: an OID plus how to read, derive, and map it.
#[derive(Debug, Clone, Deserialize)]
pub struct VariableDescriptor {
    /// Dotted OID, or the `"na"` sentinel
    pub oid: String,
    /// Entity kind (default sensor)
    #[serde(rename = "type", default)]
    pub kind: VariableKind,
    /// Calculation (default direct)
    #[serde(default)]
    pub calc: Calc,
    /// Single-variable formula applied after the calculation, e.g. `x/100`
    #[serde(rename = "math", default)]
    pub formula: Option<String>,
    /// Unit of measurement passthrough
    #[serde(default)]
    pub unit: Option<String>,
    /// Device-class hint passthrough
    #[serde(default)]
    pub device_class: Option<String>,
    /// Value map (labels or booleans)
    #[serde(default)]
    pub vmap: Option<ValueMap>,
}

impl VariableDescriptor {
    /// False when the identifier is the `"na"` sentinel.
    pub fn is_available(&self) -> bool {
        self.oid != NOT_AVAILABLE
    }

    /// Rate and formula variables require numeric samples.
    pub fn requires_numeric(&self) -> bool {
        self.calc == Calc::Rate || self.formula.is_some()
    }

    /// Copy with the identifier late-bound to a 1-based port index.
    pub fn bound_to_port(&self, index: u32) -> VariableDescriptor {
        let mut bound = self.clone();
        bound.oid = format!("{}.{}", self.oid, index);
        bound
    }

    fn normalize(&mut self) {
        if self.is_available() && !self.oid.starts_with('.') {
            self.oid.insert(0, '.');
        }
    }
}

/// Static per-profile settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StaticConfig {
    /// OID probed to confirm device access; mandatory and non-empty
    pub access_test_oid: String,
    /// Declared port count, when the device does not expose one
    #[serde(default)]
    pub port_count: Option<u32>,
    /// 1-based port indices to skip (uplink/SFP ports)
    #[serde(default)]
    pub excluded_ports: Vec<u32>,
    /// 1-based PoE-capable port indices, when statically known
    #[serde(default)]
    pub poe_ports: Vec<u32>,
}

/// A full vendor device profile.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceProfile {
    /// Profile name, unique within a registry
    pub name: String,
    pub config: StaticConfig,
    /// Identification attributes (manufacturer, model, firmware, ...)
    pub attributes: BTreeMap<String, VariableDescriptor>,
    /// Device-wide variables
    pub device: BTreeMap<String, VariableDescriptor>,
    /// Per-port variables, late-bound by index
    pub ports: BTreeMap<String, VariableDescriptor>,
}

impl DeviceProfile {
    /// Parse a single profile document.
    pub fn from_yaml(source: &str) -> Result<Self> {
        let mut profile: DeviceProfile = serde_yaml::from_str(source)
            .map_err(|e| Error::profile("<inline>", e.to_string()))?;
        profile.finish_load()?;
        Ok(profile)
    }

    /// Normalize identifiers and drop descriptors with unusable value maps.
    fn finish_load(&mut self) -> Result<()> {
        if self.config.access_test_oid.trim().is_empty() {
            return Err(Error::profile(
                self.name.clone(),
                "config.access_test_oid is mandatory",
            ));
        }

        let name = self.name.clone();
        for (section, descriptors) in [
            ("attributes", &mut self.attributes),
            ("device", &mut self.device),
            ("ports", &mut self.ports),
        ] {
            let mut rejected = Vec::new();
            for (key, descriptor) in descriptors.iter_mut() {
                descriptor.normalize();
                if let Some(vmap) = &descriptor.vmap {
                    if descriptor.kind.is_address_table() {
                        continue;
                    }
                    if let Err(reason) = vmap.validate_for(descriptor.kind) {
                        tracing::warn!(
                            profile = %name,
                            section,
                            variable = %key,
                            %reason,
                            "rejecting variable with invalid value map"
                        );
                        rejected.push(key.clone());
                    }
                }
            }
            for key in rejected {
                descriptors.remove(&key);
            }
        }

        Ok(())
    }
}

/// Read-only collection of loaded profiles, keyed by name.
#[derive(Debug, Default)]
pub struct Registry {
    profiles: BTreeMap<String, DeviceProfile>,
}

impl Registry {
    /// Load every profile document in a directory.
    ///
    /// Files named with a leading `.` or `_` are skipped, as is anything
    /// without a `.yaml`/`.yml` extension. A malformed document is logged
    /// and skipped rather than failing the whole load. On a duplicate
    /// profile name the first loaded document wins.
    pub fn load_dir(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut registry = Registry::default();

        let mut dir_entries: Vec<_> = std::fs::read_dir(path)
            .map_err(|e| Error::Io {
                target: None,
                source: e,
            })?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .collect();
        dir_entries.sort();

        for file in dir_entries {
            let Some(file_name) = file.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if file_name.starts_with('.') || file_name.starts_with('_') {
                tracing::debug!(file = %file_name, "skipping hidden profile file");
                continue;
            }
            match file.extension().and_then(|e| e.to_str()) {
                Some("yaml") | Some("yml") => {}
                _ => continue,
            }

            let source = match std::fs::read_to_string(&file) {
                Ok(source) => source,
                Err(e) => {
                    tracing::warn!(file = %file_name, error = %e, "failed to read profile file");
                    continue;
                }
            };

            let mut profile: DeviceProfile = match serde_yaml::from_str(&source) {
                Ok(profile) => profile,
                Err(e) => {
                    tracing::warn!(file = %file_name, error = %e, "skipping malformed profile");
                    continue;
                }
            };
            if let Err(e) = profile.finish_load() {
                tracing::warn!(file = %file_name, error = %e, "skipping invalid profile");
                continue;
            }

            if registry.profiles.contains_key(&profile.name) {
                tracing::warn!(
                    file = %file_name,
                    name = %profile.name,
                    "duplicate profile name, keeping first"
                );
                continue;
            }

            tracing::debug!(file = %file_name, name = %profile.name, "loaded profile");
            registry.profiles.insert(profile.name.clone(), profile);
        }

        tracing::info!(count = registry.profiles.len(), dir = %path.display(), "profile registry loaded");
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<&DeviceProfile> {
        self.profiles.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILE: &str = r#"
name: example-switch
config:
  access_test_oid: "1.3.6.1.2.1.1.4.0"
  excluded_ports: [1]
attributes:
  model:
    oid: ".1.3.6.1.4.1.890.1.15.3.1.11.0"
  manufacturer:
    oid: "na"
device:
  firmware:
    oid: ".1.3.6.1.4.1.890.1.15.3.1.6.0"
  uptime:
    oid: "1.3.6.1.2.1.1.3.0"
    type: sensor
    math: "x/100"
    unit: "s"
  igmp_snoop:
    oid: ".1.3.6.1.4.1.890.1.15.3.110.1.1.0"
    type: switch
    vmap: {"on": "1", "off": "2"}
  mac_table:
    oid: ".1.3.6.1.2.1.17.4.3.1.1"
    type: mac_table
  mac_port:
    oid: ".1.3.6.1.2.1.17.4.3.1.2"
    type: mac_port
ports:
  port_traffic_in:
    oid: "1.3.6.1.2.1.2.2.1.10"
    type: sensor
    calc: diff
    math: "(x*8)/1000000"
    unit: "Mbit/s"
  poe_status:
    oid: ".1.3.6.1.2.1.105.1.1.1.6.1"
    type: sensor
    vmap: {"0": "off", "1": "disabled", ">1": "delivering"}
"#;

    #[test]
    fn test_parse_profile() {
        let profile = DeviceProfile::from_yaml(PROFILE).unwrap();
        assert_eq!(profile.name, "example-switch");
        assert_eq!(profile.config.excluded_ports, vec![1]);
        assert_eq!(profile.device.len(), 5);

        let uptime = &profile.device["uptime"];
        assert_eq!(uptime.kind, VariableKind::Sensor);
        assert_eq!(uptime.formula.as_deref(), Some("x/100"));
        assert_eq!(uptime.unit.as_deref(), Some("s"));

        let traffic = &profile.ports["port_traffic_in"];
        assert_eq!(traffic.calc, Calc::Rate);
    }

    #[test]
    fn test_identifier_normalization() {
        let profile = DeviceProfile::from_yaml(PROFILE).unwrap();
        // Bare identifiers gain a leading dot, "na" stays untouched
        assert_eq!(profile.device["uptime"].oid, ".1.3.6.1.2.1.1.3.0");
        assert_eq!(profile.attributes["manufacturer"].oid, "na");
        assert!(!profile.attributes["manufacturer"].is_available());
    }

    #[test]
    fn test_vmap_preserves_declaration_order() {
        let profile = DeviceProfile::from_yaml(PROFILE).unwrap();
        let vmap = profile.ports["poe_status"].vmap.as_ref().unwrap();
        let keys: Vec<_> = vmap.entries().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["0", "1", ">1"]);
    }

    #[test]
    fn test_missing_access_test_oid_rejected() {
        let source = r#"
name: broken
config:
  access_test_oid: ""
attributes: {}
device: {}
ports: {}
"#;
        let err = DeviceProfile::from_yaml(source).unwrap_err();
        assert!(matches!(err, Error::Profile { .. }));
    }

    #[test]
    fn test_missing_sections_rejected() {
        // attributes, device and ports are all mandatory, empty or not
        let source = r#"
name: sectionless
config:
  access_test_oid: "1.3.6.1.2.1.1.4.0"
"#;
        let err = DeviceProfile::from_yaml(source).unwrap_err();
        assert!(matches!(err, Error::Profile { .. }));

        let source = r#"
name: portless
config:
  access_test_oid: "1.3.6.1.2.1.1.4.0"
attributes: {}
device: {}
"#;
        assert!(DeviceProfile::from_yaml(source).is_err());
    }

    #[test]
    fn test_sensor_vmap_bad_comparison_key_keeps_descriptor() {
        let source = r#"
name: tolerant
config:
  access_test_oid: "1.3.6.1.2.1.1.4.0"
attributes: {}
device:
  poe_status:
    oid: "1.3.6.1.2.1.105.1.1.1.6.1"
    vmap: {"0": "off", ">bogus": "weird", ">0": "delivering"}
ports: {}
"#;
        let profile = DeviceProfile::from_yaml(source).unwrap();
        // The unusable key is ignored, the descriptor and the rest of the
        // map survive
        let vmap = profile.device["poe_status"].vmap.as_ref().unwrap();
        assert!(vmap.validate_for(VariableKind::Sensor).is_ok());
        assert_eq!(crate::transform::apply_value_map("0", vmap), "off");
        assert_eq!(crate::transform::apply_value_map("5", vmap), "delivering");
    }

    #[test]
    fn test_switch_map_requires_both_tokens() {
        let vmap = ValueMap::from_pairs([
            ("on".to_string(), MapTokens::One("1".to_string())),
            ("off".to_string(), MapTokens::One("2".to_string())),
        ]);
        assert!(vmap.validate_for(VariableKind::Switch).is_ok());
        assert_eq!(vmap.switch_tokens(), Some(("1", "2")));

        let half = ValueMap::from_pairs([("on".to_string(), MapTokens::One("1".to_string()))]);
        assert!(half.validate_for(VariableKind::Switch).is_err());
        assert_eq!(half.switch_tokens(), None);
    }

    #[test]
    fn test_switch_descriptor_with_bad_map_dropped_at_load() {
        let source = r#"
name: bad-switch
config:
  access_test_oid: "1.3.6.1.2.1.1.4.0"
attributes: {}
device:
  broken:
    oid: "1.3.6.1.4.1.1.1.0"
    type: switch
    vmap: {"on": "1"}
  fine:
    oid: "1.3.6.1.4.1.1.2.0"
ports: {}
"#;
        let profile = DeviceProfile::from_yaml(source).unwrap();
        assert!(!profile.device.contains_key("broken"));
        assert!(profile.device.contains_key("fine"));
    }

    #[test]
    fn test_legacy_numeric_switch_keys() {
        let source = r#"
name: legacy
config:
  access_test_oid: "1.3.6.1.2.1.1.4.0"
attributes: {}
device:
  legacy_switch:
    oid: "1.3.6.1.4.1.1.3.0"
    type: switch
    vmap: {1: "1", 0: "2"}
ports: {}
"#;
        let profile = DeviceProfile::from_yaml(source).unwrap();
        let vmap = profile.device["legacy_switch"].vmap.as_ref().unwrap();
        assert_eq!(vmap.switch_tokens(), Some(("1", "2")));
    }

    #[test]
    fn test_load_dir_skips_hidden_and_duplicates() {
        let dir = tempfile::tempdir().unwrap();

        std::fs::write(dir.path().join("a.yaml"), PROFILE).unwrap();
        // Same name: first (alphabetical) file wins
        std::fs::write(dir.path().join("b.yaml"), PROFILE).unwrap();
        std::fs::write(dir.path().join("_draft.yaml"), PROFILE).unwrap();
        std::fs::write(dir.path().join(".hidden.yaml"), PROFILE).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not yaml").unwrap();
        std::fs::write(dir.path().join("broken.yaml"), "::: not a profile").unwrap();

        let registry = Registry::load_dir(dir.path()).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get("example-switch").is_some());
    }

    #[test]
    fn test_bound_to_port() {
        let profile = DeviceProfile::from_yaml(PROFILE).unwrap();
        let bound = profile.ports["port_traffic_in"].bound_to_port(5);
        assert_eq!(bound.oid, ".1.3.6.1.2.1.2.2.1.10.5");
    }
}
