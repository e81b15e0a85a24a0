//! Device session lifecycle.
//!
//! A [`Session`] ties a client, a validated profile, and a background
//! polling task together. Consumers subscribe to the cycle counter (or
//! the firmware channel) and read values from the snapshot on each tick,
//! the same shape an integration layer wants.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::cache::Snapshot;
use crate::client::{Client, ClientConfig, Credentials};
use crate::coordinator::{Poller, PollerConfig};
use crate::error::Result;
use crate::profile::DeviceProfile;
use crate::transport::{Transport, UdpTransport};
use crate::validate::{validate_profile, DeviceFacts};

/// Everything needed to open a session with one device.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Agent address (UDP)
    pub target: SocketAddr,
    /// Version and credentials
    pub credentials: Credentials,
    /// Base cycle period
    pub poll_interval: Duration,
    /// Whether SET operations are allowed
    pub controls_enabled: bool,
    /// MAC table refresh period, in cycles
    pub mac_cycle_multiplier: u64,
    /// Restrict MAC collection to these device-reported port strings
    pub mac_collection_ports: Option<HashSet<String>>,
}

impl SessionConfig {
    /// Defaults around the given target and credentials.
    pub fn new(target: SocketAddr, credentials: Credentials) -> Self {
        let defaults = PollerConfig::default();
        Self {
            target,
            credentials,
            poll_interval: defaults.poll_interval,
            controls_enabled: defaults.controls_enabled,
            mac_cycle_multiplier: defaults.mac_cycle_multiplier,
            mac_collection_ports: None,
        }
    }

    fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            poll_interval: self.poll_interval,
            controls_enabled: self.controls_enabled,
            mac_cycle_multiplier: self.mac_cycle_multiplier,
            mac_collection_ports: self.mac_collection_ports.clone(),
            ..PollerConfig::default()
        }
    }
}

/// A validated, optionally self-polling connection to one device.
pub struct Session<T: Transport = UdpTransport> {
    poller: Arc<Poller<T>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Session<UdpTransport> {
    /// Connect to the device and validate the profile against it.
    ///
    /// Fails when the device does not answer the profile's access-test
    /// OID or when no configured variable validates.
    pub async fn connect(config: SessionConfig, profile: &DeviceProfile) -> Result<Self> {
        let client = Client::connect(
            config.target,
            ClientConfig::new(config.credentials.clone()),
        )
        .await?;
        Self::with_client(client, profile, config.poller_config()).await
    }
}

impl<T: Transport + 'static> Session<T> {
    /// Build a session over an existing client, validating the profile.
    pub async fn with_client(
        client: Client<T>,
        profile: &DeviceProfile,
        config: PollerConfig,
    ) -> Result<Self> {
        let facts = DeviceFacts::from_profile(profile);
        let validated = validate_profile(&client, profile, &facts).await?;
        Ok(Self {
            poller: Arc::new(Poller::new(client, validated, config)),
            handle: Mutex::new(None),
        })
    }

    /// Start the background poll loop. Idempotent.
    pub fn start(&self) {
        let mut handle = lock(&self.handle);
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let poller = Arc::clone(&self.poller);
        let interval = poller.config().poll_interval;
        *handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if poller.is_aborted() {
                    break;
                }
                poller.poll_cycle().await;
            }
        }));
    }

    /// Stop polling. In-flight requests are abandoned, the cache stays
    /// readable.
    pub fn stop(&self) {
        self.poller.abort();
        if let Some(handle) = lock(&self.handle).take() {
            handle.abort();
        }
    }

    /// Run one poll cycle now and return the committed snapshot.
    pub async fn poll_once(&self) -> Snapshot {
        self.poller.poll_cycle().await
    }

    /// The latest committed samples.
    pub async fn snapshot(&self) -> Snapshot {
        self.poller.snapshot().await
    }

    /// A variable's transformed value from the committed cache.
    pub async fn value(&self, key: &str, port: Option<&str>) -> Option<String> {
        self.poller.value(key, port).await
    }

    /// Write a boolean control through its value map.
    pub async fn set_switch(&self, key: &str, on: bool, port: Option<&str>) -> bool {
        self.poller.set_switch(key, on, port).await
    }

    /// Write a string control.
    pub async fn set_text(&self, key: &str, text: &str, port: Option<&str>) -> bool {
        self.poller.set_text(key, text, port).await
    }

    /// Watch the cycle counter; it bumps after every committed cycle.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.poller.subscribe()
    }

    /// Watch the device's firmware string.
    pub fn subscribe_device_info(&self) -> watch::Receiver<String> {
        self.poller.subscribe_device_info()
    }

    /// Direct access to the poller, for callers that manage their own
    /// scheduling.
    pub fn poller(&self) -> &Arc<Poller<T>> {
        &self.poller
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        self.poller.abort();
        if let Some(handle) = lock(&self.handle).take() {
            handle.abort();
        }
    }
}

fn lock<'a, V>(mutex: &'a Mutex<V>) -> std::sync::MutexGuard<'a, V> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oid;
    use crate::transport::{MockResponse, MockTransport, ResponseBuilder};
    use crate::value::Value;

    const PROFILE: &str = r#"
name: testswitch
config:
  access_test_oid: .1.3.6.1.2.1.1.2.0
attributes: {}
device:
  uptime:
    oid: .1.3.6.1.2.1.1.3.0
ports: {}
"#;

    fn mock_with_default() -> MockTransport {
        let transport = MockTransport::new("192.0.2.1:161".parse().unwrap());
        transport.set_default_response(MockResponse::Data(
            ResponseBuilder::new(0)
                .varbind(oid!(1, 3, 6, 1, 2, 1, 1, 3, 0), Value::Integer(42))
                .build_v2c(b"public"),
        ));
        transport
    }

    fn test_client(transport: MockTransport) -> Client<MockTransport> {
        let mut config = ClientConfig::new(Credentials::v2c("public", None));
        config.retry_backoff = Duration::ZERO;
        Client::with_transport(transport, config).unwrap()
    }

    #[tokio::test]
    async fn test_session_validates_then_polls() {
        let profile = DeviceProfile::from_yaml(PROFILE).unwrap();
        let session = Session::with_client(
            test_client(mock_with_default()),
            &profile,
            PollerConfig::default(),
        )
        .await
        .unwrap();

        let snapshot = session.poll_once().await;
        assert_eq!(snapshot.device_value("uptime"), Some("42"));
        assert_eq!(session.value("uptime", None).await, Some("42".to_string()));
    }

    #[tokio::test]
    async fn test_background_loop_notifies_subscribers() {
        let profile = DeviceProfile::from_yaml(PROFILE).unwrap();
        let session = Session::with_client(
            test_client(mock_with_default()),
            &profile,
            PollerConfig {
                poll_interval: Duration::from_millis(10),
                ..PollerConfig::default()
            },
        )
        .await
        .unwrap();

        let mut rx = session.subscribe();
        session.start();
        // Idempotent start must not spawn a second loop
        session.start();

        rx.changed().await.unwrap();
        assert!(*rx.borrow() >= 1);

        session.stop();
    }

    #[tokio::test]
    async fn test_stop_halts_polling() {
        let transport = mock_with_default();
        let profile = DeviceProfile::from_yaml(PROFILE).unwrap();
        let session = Session::with_client(
            test_client(transport.clone()),
            &profile,
            PollerConfig {
                poll_interval: Duration::from_millis(5),
                ..PollerConfig::default()
            },
        )
        .await
        .unwrap();

        let mut rx = session.subscribe();
        session.start();
        rx.changed().await.unwrap();
        session.stop();

        let requests = transport.requests().len();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(transport.requests().len(), requests);
    }
}
