//! The polling coordinator.
//!
//! One [`Poller`] owns the client, the validated variable set, and the
//! two-generation sample cache for a single device. Cycles are strictly
//! serialized: a tokio mutex around the poll state guarantees that two
//! overlapping cycle requests never interleave their requests on the
//! wire, the second simply waits for the first.
//!
//! Most variables are fetched every cycle. Two things run slower:
//! firmware is re-read once per slow sub-cycle (it changes on upgrades,
//! not in operation), and the MAC address table is re-walked once per MAC
//! sub-cycle because a full table walk is the most expensive thing the
//! poller does.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{watch, Mutex};
use tracing::instrument;

use crate::cache::{
    device_cache_key, port_cache_key, AddressTable, SampleCache, Snapshot, ERROR, MISSING,
    UNKNOWN_FIRMWARE,
};
use crate::client::Client;
use crate::error::Error;
use crate::mac_table;
use crate::transform::{self, TransformContext};
use crate::transport::{Transport, UdpTransport};
use crate::validate::{BoundVariable, ValidatedOidSet};
use crate::value::Value;

/// Firmware refresh period, in poll cycles.
pub const SLOW_UPDATE_CYCLE: u64 = 60;

/// Default MAC table refresh period, in poll cycles.
pub const DEFAULT_MAC_UPDATE_CYCLE: u64 = 5;

/// Key of the firmware variable in device profiles.
const FIRMWARE_KEY: &str = "firmware";

/// Tuning for one device's poll loop.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Base cycle period
    pub poll_interval: Duration,
    /// Firmware refresh period, in cycles
    pub slow_cycle_multiplier: u64,
    /// MAC table refresh period, in cycles
    pub mac_cycle_multiplier: u64,
    /// Whether SET operations are allowed at all
    pub controls_enabled: bool,
    /// Restrict MAC collection to these device-reported port strings
    pub mac_collection_ports: Option<HashSet<String>>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            slow_cycle_multiplier: SLOW_UPDATE_CYCLE,
            mac_cycle_multiplier: DEFAULT_MAC_UPDATE_CYCLE,
            controls_enabled: false,
            mac_collection_ports: None,
        }
    }
}

struct PollState {
    cache: SampleCache,
    firmware: String,
    last_slow_update: f64,
    last_mac_update: f64,
    cycles: u64,
}

/// Serialized poller for one device.
pub struct Poller<T: Transport = UdpTransport> {
    client: Client<T>,
    validated: ValidatedOidSet,
    config: PollerConfig,
    state: Mutex<PollState>,
    aborted: AtomicBool,
    cycle_tx: watch::Sender<u64>,
    device_info_tx: watch::Sender<String>,
}

impl<T: Transport> Poller<T> {
    /// Build a poller over an already-validated variable set.
    pub fn new(client: Client<T>, validated: ValidatedOidSet, config: PollerConfig) -> Self {
        let (cycle_tx, _) = watch::channel(0);
        let (device_info_tx, _) = watch::channel(UNKNOWN_FIRMWARE.to_string());
        Self {
            client,
            validated,
            config,
            state: Mutex::new(PollState {
                cache: SampleCache::default(),
                firmware: UNKNOWN_FIRMWARE.to_string(),
                last_slow_update: 0.0,
                last_mac_update: 0.0,
                cycles: 0,
            }),
            aborted: AtomicBool::new(false),
            cycle_tx,
            device_info_tx,
        }
    }

    /// The validated variable set this poller cycles over.
    pub fn validated(&self) -> &ValidatedOidSet {
        &self.validated
    }

    /// The loop tuning this poller was built with.
    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Stop issuing requests. Takes effect at the next cycle boundary.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    /// Whether [`abort`](Self::abort) was called.
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Watch the cycle counter; it bumps after every committed cycle.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.cycle_tx.subscribe()
    }

    /// Watch the firmware string reported by the device.
    pub fn subscribe_device_info(&self) -> watch::Receiver<String> {
        self.device_info_tx.subscribe()
    }

    /// A copy of the latest committed samples.
    pub async fn snapshot(&self) -> Snapshot {
        self.state.lock().await.cache.current.clone()
    }

    /// Run one full poll cycle and return the committed snapshot.
    ///
    /// Per-variable failures never fail the cycle: an absent object is
    /// cached as `missing` and a fetch failure as `error`, each stamped
    /// with the cycle timestamp. After an abort no requests are issued
    /// and the cache is returned unchanged.
    #[instrument(skip(self), fields(snmp.target = %self.client.peer_addr()))]
    pub async fn poll_cycle(&self) -> Snapshot {
        let mut state = self.state.lock().await;

        if self.is_aborted() {
            tracing::debug!("poller aborted, skipping cycle");
            return state.cache.current.clone();
        }

        let now = epoch_seconds();
        let first_cycle = state.cycles == 0;
        let mut next = state.cache.current.clone();

        for (key, bound) in &self.validated.attributes {
            if self.skip_in_fast_pass(key, bound) {
                continue;
            }
            let sample = self.fetch_sample(bound).await;
            next.attributes.insert(key.clone(), sample);
            next.last_updated.insert(device_cache_key(key), now);
        }
        for (key, bound) in &self.validated.device {
            if self.skip_in_fast_pass(key, bound) {
                continue;
            }
            let sample = self.fetch_sample(bound).await;
            next.device.insert(key.clone(), sample);
            next.last_updated.insert(device_cache_key(key), now);
        }

        let slow_due = first_cycle
            || now - state.last_slow_update
                >= (self.config.slow_cycle_multiplier * self.config.poll_interval.as_secs()) as f64;
        if slow_due {
            if let Some(bound) = self.validated.device_variable(FIRMWARE_KEY) {
                match self.client.get(&bound.oid).await {
                    Ok(vb) => {
                        let firmware = vb.value.to_cache_string();
                        if firmware != state.firmware {
                            state.firmware = firmware.clone();
                            self.device_info_tx.send_replace(firmware);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "firmware fetch failed");
                        state.firmware = UNKNOWN_FIRMWARE.to_string();
                    }
                }
                next.last_updated.insert(device_cache_key(FIRMWARE_KEY), now);
            }
            state.last_slow_update = now;
        }
        if self.validated.device_variable(FIRMWARE_KEY).is_some() {
            next.device
                .insert(FIRMWARE_KEY.to_string(), state.firmware.clone());
        }

        for (port, vars) in &self.validated.ports {
            for (key, bound) in vars {
                let sample = self.fetch_sample(bound).await;
                next.ports
                    .entry(port.clone())
                    .or_default()
                    .insert(key.clone(), sample);
                next.last_updated.insert(port_cache_key(port, key), now);
            }
            next.last_updated.insert(format!("port_{port}"), now);
        }

        let mac_due = first_cycle
            || now - state.last_mac_update
                >= (self.config.mac_cycle_multiplier * self.config.poll_interval.as_secs()) as f64;
        if mac_due {
            if let Some((addresses, ports)) = self.validated.mac_descriptors() {
                match self.walk_address_table(addresses, ports, now).await {
                    Ok(table) => {
                        next.address_table = Some(table);
                        next.last_updated.insert("mac_table".to_string(), now);
                    }
                    // Keep the previous table rather than flapping entities
                    Err(e) => tracing::warn!(error = %e, "MAC table walk failed, keeping previous"),
                }
            }
            state.last_mac_update = now;
        }

        state.cache.commit(next);
        state.cycles += 1;
        self.cycle_tx.send_replace(state.cycles);

        tracing::debug!(cycle = state.cycles, "poll cycle committed");
        state.cache.current.clone()
    }

    fn skip_in_fast_pass(&self, key: &str, bound: &BoundVariable) -> bool {
        key == FIRMWARE_KEY || bound.descriptor.kind.is_address_table()
    }

    async fn fetch_sample(&self, bound: &BoundVariable) -> String {
        match self.client.get(&bound.oid).await {
            Ok(vb) => vb.value.to_cache_string(),
            Err(e) if e.is_no_such_object() => MISSING.to_string(),
            Err(e) => {
                tracing::debug!(oid = %bound.oid, error = %e, "sample fetch failed");
                ERROR.to_string()
            }
        }
    }

    async fn walk_address_table(
        &self,
        addresses: &BoundVariable,
        ports: &BoundVariable,
        now: f64,
    ) -> Result<AddressTable, Error> {
        let address_walk = self.client.walk_subtree(&addresses.oid).await?;
        let port_walk = self.client.walk_subtree(&ports.oid).await?;
        Ok(mac_table::correlate(
            &addresses.oid,
            &address_walk,
            &ports.oid,
            &port_walk,
            self.config.mac_collection_ports.as_ref(),
            now,
        ))
    }

    /// Read a variable from the committed cache with its transformation
    /// pipeline applied.
    ///
    /// `port` selects a port variable by padded port key; `None` looks up
    /// a device-level variable. The `missing` and `error` markers read as
    /// no value, as does a rate without usable history.
    pub async fn value(&self, key: &str, port: Option<&str>) -> Option<String> {
        let state = self.state.lock().await;

        let bound = match port {
            Some(p) => self.validated.ports.get(p)?.get(key)?,
            None => self.validated.device_variable(key)?,
        };
        let cache_key = match port {
            Some(p) => port_cache_key(p, key),
            None => device_cache_key(key),
        };

        let current = &state.cache.current;
        let previous = &state.cache.previous;
        let raw = match port {
            Some(p) => current.port_value(p, key)?,
            None => current.device_value(key)?,
        };
        if raw == MISSING || raw == ERROR {
            return None;
        }

        let prev_raw = match port {
            Some(p) => previous.port_value(p, key),
            None => previous.device_value(key),
        }
        .filter(|v| *v != MISSING && *v != ERROR);

        let ctx = TransformContext {
            previous: prev_raw,
            previous_timestamp: previous.updated_at(&cache_key).unwrap_or(0.0),
            now: current.updated_at(&cache_key).unwrap_or(0.0),
        };
        transform::transform(raw, &bound.descriptor, &ctx)
    }

    /// Write a boolean control and verify the device took it.
    ///
    /// The desired state is translated through the variable's value map
    /// to its wire token and written with a verified SET. On success the
    /// cached sample is updated in place so readers see the new state
    /// before the next cycle. Returns `false` without touching the wire
    /// when controls are disabled or the variable cannot express writes.
    pub async fn set_switch(&self, key: &str, on: bool, port: Option<&str>) -> bool {
        if !self.config.controls_enabled {
            tracing::warn!(key, "write rejected, controls are disabled");
            return false;
        }
        let Some(bound) = self.resolve_writable(key, port) else {
            return false;
        };
        let Some(vmap) = bound.descriptor.vmap.as_ref() else {
            tracing::warn!(key, "switch has no value map, cannot translate state");
            return false;
        };
        let Some(token) = transform::to_wire_bool(on, vmap) else {
            tracing::warn!(key, "value map has no usable on/off tokens");
            return false;
        };

        // Integer-valued tokens are written as INTEGER, the common case
        // for admin-status style objects
        let value = match token.parse::<i32>() {
            Ok(n) => Value::Integer(n),
            Err(_) => Value::OctetString(token.clone().into_bytes().into()),
        };

        self.write_and_cache(key, port, &bound, value, token).await
    }

    /// Write a string control and verify the device took it.
    pub async fn set_text(&self, key: &str, text: &str, port: Option<&str>) -> bool {
        if !self.config.controls_enabled {
            tracing::warn!(key, "write rejected, controls are disabled");
            return false;
        }
        let Some(bound) = self.resolve_writable(key, port) else {
            return false;
        };

        let value = Value::OctetString(text.as_bytes().to_vec().into());
        self.write_and_cache(key, port, &bound, value, text.to_string())
            .await
    }

    fn resolve_writable(&self, key: &str, port: Option<&str>) -> Option<BoundVariable> {
        let bound = match port {
            Some(p) => self.validated.ports.get(p).and_then(|m| m.get(key)),
            None => self.validated.device_variable(key),
        };
        match bound {
            Some(bound) => Some(bound.clone()),
            None => {
                tracing::warn!(key, ?port, "write to unknown variable rejected");
                None
            }
        }
    }

    async fn write_and_cache(
        &self,
        key: &str,
        port: Option<&str>,
        bound: &BoundVariable,
        value: Value,
        cached: String,
    ) -> bool {
        // Writes hold the cycle lock for their whole wire exchange, so a
        // SET never interleaves with an in-flight poll cycle's requests
        let mut state = self.state.lock().await;
        match self.client.set_verified(&bound.oid, value).await {
            Ok(()) => {
                let now = epoch_seconds();
                match port {
                    Some(p) => {
                        state
                            .cache
                            .current
                            .ports
                            .entry(p.to_string())
                            .or_default()
                            .insert(key.to_string(), cached);
                        state
                            .cache
                            .current
                            .last_updated
                            .insert(port_cache_key(p, key), now);
                    }
                    None => {
                        state.cache.current.device.insert(key.to_string(), cached);
                        state
                            .cache
                            .current
                            .last_updated
                            .insert(device_cache_key(key), now);
                    }
                }
                true
            }
            Err(e) => {
                tracing::warn!(key, oid = %bound.oid, error = %e, "verified write failed");
                false
            }
        }
    }
}

fn epoch_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientConfig, Credentials};
    use crate::oid;
    use crate::oid::Oid;
    use crate::profile::{Calc, MapTokens, ValueMap, VariableDescriptor, VariableKind};
    use crate::transport::{MockTransport, ResponseBuilder};
    use std::collections::BTreeMap;

    fn test_client(mock: MockTransport) -> Client<MockTransport> {
        let mut config = ClientConfig::new(Credentials::v2c("public", None));
        config.retry_backoff = Duration::ZERO;
        Client::with_transport(mock, config).unwrap()
    }

    fn mock() -> MockTransport {
        MockTransport::new("192.0.2.1:161".parse().unwrap())
    }

    fn descriptor(kind: VariableKind) -> VariableDescriptor {
        VariableDescriptor {
            oid: String::new(),
            kind,
            calc: Calc::Direct,
            formula: None,
            unit: None,
            device_class: None,
            vmap: None,
        }
    }

    fn bound(oid: Oid, kind: VariableKind) -> BoundVariable {
        BoundVariable {
            oid,
            descriptor: descriptor(kind),
        }
    }

    fn device_set(entries: &[(&str, Oid)]) -> ValidatedOidSet {
        let mut set = ValidatedOidSet::default();
        for (key, oid) in entries {
            set.device
                .insert(key.to_string(), bound(oid.clone(), VariableKind::Sensor));
        }
        set
    }

    fn integer_response(oid: Oid, n: i32) -> bytes::Bytes {
        ResponseBuilder::new(0)
            .varbind(oid, Value::Integer(n))
            .build_v2c(b"public")
    }

    fn string_response(oid: Oid, s: &str) -> bytes::Bytes {
        ResponseBuilder::new(0)
            .varbind(oid, Value::OctetString(s.as_bytes().to_vec().into()))
            .build_v2c(b"public")
    }

    #[tokio::test]
    async fn test_cycle_records_markers() {
        let transport = mock();
        let uptime_oid = oid!(1, 3, 6, 1, 2, 1, 1, 3, 0);
        let gone_oid = oid!(1, 3, 6, 1, 2, 1, 99, 1, 0);
        let broken_oid = oid!(1, 3, 6, 1, 2, 1, 99, 2, 0);

        // BTreeMap iterates keys in order: broken, gone, uptime
        transport.queue_io_error("network unreachable");
        transport.queue_io_error("network unreachable");
        transport.queue_response(
            ResponseBuilder::new(0)
                .varbind(gone_oid.clone(), Value::NoSuchObject)
                .build_v2c(b"public"),
        );
        transport.queue_response(integer_response(uptime_oid.clone(), 12345));

        let validated = device_set(&[
            ("broken", broken_oid),
            ("gone", gone_oid),
            ("uptime", uptime_oid),
        ]);
        let poller = Poller::new(test_client(transport), validated, PollerConfig::default());

        let snapshot = poller.poll_cycle().await;

        assert_eq!(snapshot.device_value("uptime"), Some("12345"));
        assert_eq!(snapshot.device_value("gone"), Some(MISSING));
        assert_eq!(snapshot.device_value("broken"), Some(ERROR));
        // Every variable gets a timestamp, markers included
        assert!(snapshot.updated_at("device_gone").is_some());
        assert!(snapshot.updated_at("device_broken").is_some());
    }

    #[tokio::test]
    async fn test_firmware_only_refreshes_on_slow_cycle() {
        let transport = mock();
        let uptime_oid = oid!(1, 3, 6, 1, 2, 1, 1, 3, 0);
        let fw_oid = oid!(1, 3, 6, 1, 4, 1, 9, 1, 0);

        // Cycle 1: firmware then uptime (firmware is skipped in the fast
        // pass and fetched by the slow cycle after it)
        transport.queue_response(integer_response(uptime_oid.clone(), 1));
        transport.queue_response(string_response(fw_oid.clone(), "V4.70"));
        // Cycle 2: uptime only
        transport.queue_response(integer_response(uptime_oid.clone(), 2));

        let mut validated = device_set(&[("uptime", uptime_oid)]);
        validated
            .device
            .insert("firmware".to_string(), bound(fw_oid, VariableKind::Sensor));

        let config = PollerConfig {
            poll_interval: Duration::from_secs(3600),
            ..PollerConfig::default()
        };
        let poller = Poller::new(test_client(transport.clone()), validated, config);
        let mut info = poller.subscribe_device_info();
        assert_eq!(*info.borrow(), UNKNOWN_FIRMWARE);

        let first = poller.poll_cycle().await;
        assert_eq!(first.device_value("firmware"), Some("V4.70"));
        assert!(info.has_changed().unwrap());
        assert_eq!(*info.borrow_and_update(), "V4.70");

        let second = poller.poll_cycle().await;
        // Carried forward without a fetch
        assert_eq!(second.device_value("firmware"), Some("V4.70"));
        assert_eq!(transport.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_abort_stops_requests_and_preserves_cache() {
        let transport = mock();
        let uptime_oid = oid!(1, 3, 6, 1, 2, 1, 1, 3, 0);
        transport.queue_response(integer_response(uptime_oid.clone(), 7));

        let poller = Poller::new(
            test_client(transport.clone()),
            device_set(&[("uptime", uptime_oid)]),
            PollerConfig::default(),
        );

        let before = poller.poll_cycle().await;
        assert_eq!(before.device_value("uptime"), Some("7"));
        let requests_before = transport.requests().len();

        poller.abort();
        let after = poller.poll_cycle().await;

        assert_eq!(after.device_value("uptime"), Some("7"));
        assert_eq!(transport.requests().len(), requests_before);
    }

    #[tokio::test]
    async fn test_concurrent_cycles_are_serialized() {
        let transport = mock();
        let uptime_oid = oid!(1, 3, 6, 1, 2, 1, 1, 3, 0);
        transport.queue_response(integer_response(uptime_oid.clone(), 1));
        transport.queue_response(integer_response(uptime_oid.clone(), 2));

        let poller = std::sync::Arc::new(Poller::new(
            test_client(transport),
            device_set(&[("uptime", uptime_oid)]),
            PollerConfig::default(),
        ));

        let a = std::sync::Arc::clone(&poller);
        let b = std::sync::Arc::clone(&poller);
        let (_, _) = tokio::join!(a.poll_cycle(), b.poll_cycle());

        let mut rx = poller.subscribe();
        assert_eq!(*rx.borrow_and_update(), 2);
        // The later cycle saw the earlier one as its previous generation
        let snapshot = poller.snapshot().await;
        assert_eq!(snapshot.device_value("uptime"), Some("2"));
    }

    #[tokio::test]
    async fn test_mac_walk_failure_keeps_previous_table() {
        let transport = mock();
        let addr_root = oid!(1, 3, 6, 1, 2, 1, 17, 4, 3, 1, 1);
        let port_root = oid!(1, 3, 6, 1, 2, 1, 17, 4, 3, 1, 2);

        let mut validated = ValidatedOidSet::default();
        validated.device.insert(
            "mac_addresses".to_string(),
            bound(addr_root.clone(), VariableKind::MacTable),
        );
        validated.device.insert(
            "mac_ports".to_string(),
            bound(port_root.clone(), VariableKind::MacPort),
        );

        let row = addr_root.child(1).child(2).child(3).child(4).child(5).child(6);
        let port_row = port_root.child(1).child(2).child(3).child(4).child(5).child(6);

        // Cycle 1: each bulk answer carries the row and the varbind that
        // leaves the subtree, ending the walk in one step
        transport.queue_response(
            ResponseBuilder::new(0)
                .varbind(row, Value::Integer(1))
                .varbind(port_row.clone(), Value::Integer(4))
                .build_v2c(b"public"),
        );
        transport.queue_response(
            ResponseBuilder::new(0)
                .varbind(port_row, Value::Integer(4))
                .varbind(oid!(1, 3, 6, 1, 2, 1, 18), Value::Integer(0))
                .build_v2c(b"public"),
        );
        // Cycle 2: the address walk times out (both attempts)
        transport.queue_timeout();
        transport.queue_timeout();

        let config = PollerConfig {
            mac_cycle_multiplier: 0,
            ..PollerConfig::default()
        };
        let poller = Poller::new(test_client(transport), validated, config);

        let first = poller.poll_cycle().await;
        let table = first.address_table.as_ref().unwrap();
        assert_eq!(table.ports["4"], vec!["01:02:03:04:05:06"]);

        let second = poller.poll_cycle().await;
        assert_eq!(second.address_table, first.address_table);
    }

    /// Mock transport whose responses are withheld until the test opens
    /// the gate, keeping a request in flight on demand.
    #[derive(Clone)]
    struct GatedTransport {
        inner: MockTransport,
        gate: std::sync::Arc<tokio::sync::Semaphore>,
    }

    impl Transport for GatedTransport {
        fn send(
            &self,
            data: &[u8],
        ) -> impl std::future::Future<Output = crate::error::Result<()>> + Send {
            self.inner.send(data)
        }

        fn recv(
            &self,
            request_id: i32,
            timeout: Duration,
        ) -> impl std::future::Future<
            Output = crate::error::Result<(bytes::Bytes, std::net::SocketAddr)>,
        > + Send {
            let inner = self.inner.clone();
            let gate = std::sync::Arc::clone(&self.gate);
            async move {
                let _permit = gate.acquire().await.expect("gate closed");
                inner.recv(request_id, timeout).await
            }
        }

        fn peer_addr(&self) -> std::net::SocketAddr {
            self.inner.peer_addr()
        }

        fn local_addr(&self) -> std::net::SocketAddr {
            self.inner.local_addr()
        }
    }

    #[tokio::test]
    async fn test_write_waits_for_in_flight_cycle() {
        let transport = mock();
        let uptime_oid = oid!(1, 3, 6, 1, 2, 1, 1, 3, 0);
        let switch_oid = oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 7, 1);

        // Cycle: GET port_enable, GET uptime. Write: SET echo, verify GET.
        transport.queue_response(integer_response(switch_oid.clone(), 2));
        transport.queue_response(integer_response(uptime_oid.clone(), 1));
        transport.queue_response(integer_response(switch_oid.clone(), 1));
        transport.queue_response(integer_response(switch_oid.clone(), 1));

        let gate = std::sync::Arc::new(tokio::sync::Semaphore::new(0));
        let gated = GatedTransport {
            inner: transport.clone(),
            gate: std::sync::Arc::clone(&gate),
        };
        let mut config = ClientConfig::new(Credentials::v2c("public", None));
        config.retry_backoff = Duration::ZERO;
        let client = Client::with_transport(gated, config).unwrap();

        let mut validated = device_set(&[("uptime", uptime_oid)]);
        let mut desc = descriptor(VariableKind::Switch);
        desc.vmap = Some(ValueMap::from_pairs([
            ("on".to_string(), MapTokens::One("1".to_string())),
            ("off".to_string(), MapTokens::One("2".to_string())),
        ]));
        validated.device.insert(
            "port_enable".to_string(),
            BoundVariable {
                oid: switch_oid,
                descriptor: desc,
            },
        );

        let poller = std::sync::Arc::new(Poller::new(
            client,
            validated,
            PollerConfig {
                controls_enabled: true,
                ..PollerConfig::default()
            },
        ));

        let cycle = tokio::spawn({
            let poller = std::sync::Arc::clone(&poller);
            async move { poller.poll_cycle().await }
        });
        tokio::task::yield_now().await;
        // The cycle sent its first request and is parked on the response
        assert_eq!(transport.requests().len(), 1);

        let write = tokio::spawn({
            let poller = std::sync::Arc::clone(&poller);
            async move { poller.set_switch("port_enable", true, None).await }
        });
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        // The write is queued behind the cycle, nothing new on the wire
        assert_eq!(transport.requests().len(), 1);

        gate.add_permits(16);
        let snapshot = cycle.await.unwrap();
        assert!(write.await.unwrap());

        // Cycle requests completed before the SET and its verify read
        assert_eq!(transport.requests().len(), 4);
        assert_eq!(snapshot.device_value("uptime"), Some("1"));
        assert_eq!(
            poller.snapshot().await.device_value("port_enable"),
            Some("1")
        );
    }

    #[tokio::test]
    async fn test_set_switch_requires_controls_enabled() {
        let transport = mock();
        let oid = oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 7, 1);

        let mut validated = ValidatedOidSet::default();
        let mut desc = descriptor(VariableKind::Switch);
        desc.vmap = Some(ValueMap::from_pairs([
            ("on".to_string(), MapTokens::One("1".to_string())),
            ("off".to_string(), MapTokens::One("2".to_string())),
        ]));
        validated.device.insert(
            "port_enable".to_string(),
            BoundVariable {
                oid,
                descriptor: desc,
            },
        );

        let poller = Poller::new(
            test_client(transport.clone()),
            validated,
            PollerConfig::default(),
        );

        assert!(!poller.set_switch("port_enable", true, None).await);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_set_switch_writes_token_and_updates_cache() {
        let transport = mock();
        let oid = oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 7, 1);

        // SET response, then the verification GET
        transport.queue_response(integer_response(oid.clone(), 1));
        transport.queue_response(integer_response(oid.clone(), 1));

        let mut validated = ValidatedOidSet::default();
        let mut desc = descriptor(VariableKind::Switch);
        desc.vmap = Some(ValueMap::from_pairs([
            ("on".to_string(), MapTokens::One("1".to_string())),
            ("off".to_string(), MapTokens::One("2".to_string())),
        ]));
        let mut port_vars = BTreeMap::new();
        port_vars.insert(
            "enable".to_string(),
            BoundVariable {
                oid,
                descriptor: desc,
            },
        );
        validated.ports.insert("p01".to_string(), port_vars);

        let config = PollerConfig {
            controls_enabled: true,
            ..PollerConfig::default()
        };
        let poller = Poller::new(test_client(transport.clone()), validated, config);

        assert!(poller.set_switch("enable", true, Some("p01")).await);

        let snapshot = poller.snapshot().await;
        assert_eq!(snapshot.port_value("p01", "enable"), Some("1"));
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_set_text_rejected_write_leaves_cache_untouched() {
        let transport = mock();
        let oid = oid!(1, 3, 6, 1, 2, 1, 31, 1, 1, 1, 18, 1);

        // SET answers, but the verification GET reads back the old name
        transport.queue_response(string_response(oid.clone(), "uplink"));
        transport.queue_response(string_response(oid.clone(), "old-name"));

        let mut validated = ValidatedOidSet::default();
        validated.device.insert(
            "alias".to_string(),
            bound(oid, VariableKind::Text),
        );

        let config = PollerConfig {
            controls_enabled: true,
            ..PollerConfig::default()
        };
        let poller = Poller::new(test_client(transport), validated, config);

        assert!(!poller.set_text("alias", "uplink", None).await);
        assert_eq!(poller.snapshot().await.device_value("alias"), None);
    }

    #[tokio::test]
    async fn test_value_applies_transformation() {
        let transport = mock();
        let oid = oid!(1, 3, 6, 1, 2, 1, 105, 1, 1, 1, 1, 1);
        transport.queue_response(integer_response(oid.clone(), 250));

        let mut validated = ValidatedOidSet::default();
        let mut desc = descriptor(VariableKind::Sensor);
        desc.formula = Some("x/100".to_string());
        validated.device.insert(
            "poe_power".to_string(),
            BoundVariable {
                oid,
                descriptor: desc,
            },
        );

        let poller = Poller::new(test_client(transport), validated, PollerConfig::default());
        poller.poll_cycle().await;

        assert_eq!(
            poller.value("poe_power", None).await,
            Some("2.5".to_string())
        );
    }

    #[tokio::test]
    async fn test_value_markers_read_as_no_value() {
        let transport = mock();
        let oid = oid!(1, 3, 6, 1, 2, 1, 99, 1, 0);
        transport.queue_response(
            ResponseBuilder::new(0)
                .varbind(oid.clone(), Value::NoSuchObject)
                .build_v2c(b"public"),
        );

        let poller = Poller::new(
            test_client(transport),
            device_set(&[("gone", oid)]),
            PollerConfig::default(),
        );
        poller.poll_cycle().await;

        assert_eq!(poller.snapshot().await.device_value("gone"), Some(MISSING));
        assert_eq!(poller.value("gone", None).await, None);
    }
}
