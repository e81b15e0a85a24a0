//! SNMP client implementation.
//!
//! [`Client`] is generic over its [`Transport`] and carries the credentials,
//! timeout, and retry policy for one device. Every operation follows the
//! same discipline: one attempt, and on timeout/transport/decode failure a
//! single retry after a fixed backoff.

mod auth;
mod retry;
mod v3;
mod walk;

pub use auth::{Credentials, Operation, V3Security};
pub use retry::{MAX_RETRIES, REQUEST_TIMEOUT, RETRY_BACKOFF};
pub use walk::MAX_PORTS;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{instrument, Span};

use crate::error::{DecodeErrorKind, Error, Result};
use crate::message::{CommunityMessage, Version};
use crate::oid::Oid;
use crate::pdu::{GetBulkPdu, Pdu, PduType};
use crate::transport::{Transport, UdpTransport};
use crate::v3::{EngineState, SaltCounter};
use crate::value::Value;
use crate::varbind::VarBind;

use v3::V3DerivedKeys;

/// Client configuration for one device.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Credentials (version, communities or USM settings)
    pub credentials: Credentials,
    /// Per-request response timeout
    pub timeout: Duration,
    /// Pause before the single retry
    pub retry_backoff: Duration,
    /// Max-repetitions for GETBULK walks
    pub max_repetitions: i32,
}

impl ClientConfig {
    /// Configuration with the default timings (5 s timeout, 5 s backoff).
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            timeout: REQUEST_TIMEOUT,
            retry_backoff: RETRY_BACKOFF,
            max_repetitions: 25,
        }
    }
}

/// SNMP client for a single device.
///
/// Cloning is cheap; clones share the transport and v3 engine state.
#[derive(Clone)]
pub struct Client<T: Transport = UdpTransport> {
    inner: Arc<ClientInner<T>>,
}

struct ClientInner<T: Transport> {
    transport: T,
    config: ClientConfig,
    /// Request ID / msgID allocator
    request_id: AtomicI32,
    /// Discovered engine state (v3)
    engine_state: RwLock<Option<EngineState>>,
    /// Keys localized to the discovered engine (v3)
    derived_keys: RwLock<Option<V3DerivedKeys>>,
    /// Salt counter for privacy (v3)
    salt_counter: SaltCounter,
}

impl Client<UdpTransport> {
    /// Connect a UDP client to the target.
    pub async fn connect(target: SocketAddr, config: ClientConfig) -> Result<Self> {
        config.credentials.validate()?;
        let transport = UdpTransport::connect(target).await?;
        Ok(Self::from_parts(transport, config))
    }
}

impl<T: Transport> Client<T> {
    /// Create a client over an existing transport.
    pub fn with_transport(transport: T, config: ClientConfig) -> Result<Self> {
        config.credentials.validate()?;
        Ok(Self::from_parts(transport, config))
    }

    fn from_parts(transport: T, config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                transport,
                config,
                request_id: AtomicI32::new(1),
                engine_state: RwLock::new(None),
                derived_keys: RwLock::new(None),
                salt_counter: SaltCounter::new(),
            }),
        }
    }

    /// The peer (target) address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.transport.peer_addr()
    }

    /// The configuration this client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Allocate the next request ID (also used as v3 msgID).
    fn next_request_id(&self) -> i32 {
        // Mask keeps the value in the non-negative range RFC 3412 requires
        self.inner.request_id.fetch_add(1, Ordering::Relaxed) & 0x7FFF_FFFF
    }

    fn version(&self) -> Version {
        self.inner.config.credentials.version()
    }

    /// One send/receive/decode pass for a community (v1/v2c) request.
    async fn request_once(&self, request_id: i32, data: &[u8]) -> Result<Pdu> {
        self.inner.transport.send(data).await?;
        let (response_data, _source) = self
            .inner
            .transport
            .recv(request_id, self.inner.config.timeout)
            .await?;

        tracing::trace!(snmp.bytes = response_data.len(), "received response");

        let response = CommunityMessage::decode(response_data)?;

        if response.version != self.version() {
            tracing::warn!(
                expected = ?self.version(),
                actual = ?response.version,
                peer = %self.peer_addr(),
                "version mismatch in response"
            );
            return Err(Error::decode(
                0,
                DecodeErrorKind::UnknownVersion(response.version.as_i32()),
            ));
        }

        let pdu = response.into_pdu();

        if pdu.request_id != request_id {
            tracing::warn!(
                expected = request_id,
                actual = pdu.request_id,
                peer = %self.peer_addr(),
                "request ID mismatch in response"
            );
            return Err(Error::RequestIdMismatch {
                expected: request_id,
                actual: pdu.request_id,
            });
        }

        if pdu.is_error() {
            let status = pdu.error_status_enum();
            // error_index is 1-based; 0 means the error applies to the PDU
            let oid = (pdu.error_index as usize)
                .checked_sub(1)
                .and_then(|idx| pdu.varbinds.get(idx))
                .map(|vb| vb.oid.clone());
            return Err(Error::Snmp {
                target: Some(self.peer_addr()),
                status,
                index: pdu.error_index.max(0) as u32,
                oid,
            });
        }

        Ok(pdu)
    }

    /// Send pre-encoded request data and wait for the matching response,
    /// retrying once after the backoff on unreachable-class failures.
    #[instrument(
        level = "debug",
        skip(self, data),
        fields(
            snmp.target = %self.peer_addr(),
            snmp.request_id = request_id,
            snmp.attempt = tracing::field::Empty,
            snmp.elapsed_ms = tracing::field::Empty,
        )
    )]
    async fn send_and_recv(&self, request_id: i32, data: &[u8]) -> Result<Pdu> {
        let start = Instant::now();
        let mut last_error: Option<Error> = None;

        for attempt in 0..=MAX_RETRIES {
            Span::current().record("snmp.attempt", attempt);
            if attempt > 0 {
                tracing::debug!(
                    backoff_ms = self.inner.config.retry_backoff.as_millis() as u64,
                    "retrying request after backoff"
                );
                tokio::time::sleep(self.inner.config.retry_backoff).await;
            }

            match self.request_once(request_id, data).await {
                Ok(pdu) => {
                    Span::current().record("snmp.elapsed_ms", start.elapsed().as_millis() as u64);
                    return Ok(pdu);
                }
                Err(e) if retry::is_retryable(&e) => {
                    tracing::debug!(error = %e, "request attempt failed");
                    last_error = Some(e);
                }
                Err(e) => {
                    Span::current().record("snmp.elapsed_ms", start.elapsed().as_millis() as u64);
                    return Err(e);
                }
            }
        }

        Span::current().record("snmp.elapsed_ms", start.elapsed().as_millis() as u64);
        Err(last_error.unwrap_or_else(|| Error::Timeout {
            target: Some(self.peer_addr()),
            elapsed: start.elapsed(),
            request_id,
            retries: MAX_RETRIES,
        }))
    }

    /// Send a GET/GETNEXT/SET request, dispatching on version.
    async fn send_request(&self, pdu: Pdu) -> Result<Pdu> {
        if self.version() == Version::V3 {
            return self.send_v3_and_recv(pdu).await;
        }

        let op = if pdu.pdu_type == PduType::SetRequest {
            Operation::Write
        } else {
            Operation::Read
        };
        let community = self.community_bytes(op);

        tracing::debug!(
            snmp.pdu_type = %pdu.pdu_type,
            snmp.varbind_count = pdu.varbinds.len(),
            "sending {} request",
            pdu.pdu_type
        );

        let request_id = pdu.request_id;
        let data = CommunityMessage::new(self.version(), community, pdu).encode();
        let response = self.send_and_recv(request_id, &data).await?;

        tracing::debug!(
            snmp.pdu_type = %response.pdu_type,
            snmp.varbind_count = response.varbinds.len(),
            "received {} response",
            response.pdu_type
        );

        Ok(response)
    }

    /// Send a GETBULK request (v2c/v3 only).
    async fn send_bulk_request(&self, pdu: GetBulkPdu) -> Result<Pdu> {
        if self.version() == Version::V3 {
            return self.send_v3_and_recv(pdu.into_pdu()).await;
        }

        tracing::debug!(
            snmp.non_repeaters = pdu.non_repeaters,
            snmp.max_repetitions = pdu.max_repetitions,
            snmp.varbind_count = pdu.varbinds.len(),
            "sending GetBulkRequest"
        );

        let request_id = pdu.request_id;
        let community = self.community_bytes(Operation::Read);
        let data = CommunityMessage::encode_bulk(self.version(), community, &pdu);
        self.send_and_recv(request_id, &data).await
    }

    fn community_bytes(&self, op: Operation) -> Bytes {
        let community = self
            .inner
            .config
            .credentials
            .community_for(op)
            .unwrap_or_default();
        Bytes::copy_from_slice(community.as_bytes())
    }

    /// GET a single OID.
    ///
    /// A v2c/v3 exception varbind (noSuchObject, noSuchInstance,
    /// endOfMibView) maps to [`Error::NoSuchObject`]; v1 devices signal the
    /// same condition through a noSuchName error-status.
    #[instrument(skip(self), err, fields(snmp.target = %self.peer_addr(), snmp.oid = %oid))]
    pub async fn get(&self, oid: &Oid) -> Result<VarBind> {
        let request_id = self.next_request_id();
        let pdu = Pdu::get_request(request_id, std::slice::from_ref(oid));
        let response = self.send_request(pdu).await?;

        let vb = response
            .varbinds
            .into_iter()
            .next()
            .ok_or_else(|| Error::decode(0, DecodeErrorKind::EmptyVarbindList))?;

        if vb.value.is_exception() {
            return Err(Error::NoSuchObject {
                oid: vb.oid.clone(),
            });
        }

        Ok(vb)
    }

    /// GETNEXT probe: return the varbind lexicographically after `oid`.
    #[instrument(skip(self), err, fields(snmp.target = %self.peer_addr(), snmp.oid = %oid))]
    pub async fn probe_next(&self, oid: &Oid) -> Result<VarBind> {
        let request_id = self.next_request_id();
        let pdu = Pdu::get_next_request(request_id, std::slice::from_ref(oid));
        let response = self.send_request(pdu).await?;

        response
            .varbinds
            .into_iter()
            .next()
            .ok_or_else(|| Error::decode(0, DecodeErrorKind::EmptyVarbindList))
    }

    /// SET a single OID.
    #[instrument(skip(self, value), err, fields(snmp.target = %self.peer_addr(), snmp.oid = %oid))]
    pub async fn set(&self, oid: &Oid, value: Value) -> Result<VarBind> {
        let request_id = self.next_request_id();
        let varbind = VarBind::new(oid.clone(), value);
        let pdu = Pdu::set_request(request_id, vec![varbind]);
        let response = self.send_request(pdu).await?;

        response
            .varbinds
            .into_iter()
            .next()
            .ok_or_else(|| Error::decode(0, DecodeErrorKind::EmptyVarbindList))
    }

    /// SET then read back; succeeds only when the device echoes the value.
    ///
    /// The comparison is on the cache string form of both values, so an
    /// integer write verified against an integer read compares `"1"` to
    /// `"1"` regardless of the returned SNMP type.
    #[instrument(skip(self, value), err, fields(snmp.target = %self.peer_addr(), snmp.oid = %oid))]
    pub async fn set_verified(&self, oid: &Oid, value: Value) -> Result<()> {
        let written = value.to_cache_string();
        self.set(oid, value).await?;

        let actual = match self.get(oid).await {
            Ok(vb) => Some(vb.value.to_cache_string()),
            Err(e) if e.is_no_such_object() => None,
            Err(e) => return Err(e),
        };

        if actual.as_deref() == Some(written.as_str()) {
            Ok(())
        } else {
            tracing::warn!(
                snmp.oid = %oid,
                written = %written,
                read_back = ?actual,
                "write not verified"
            );
            Err(Error::WriteRejected {
                oid: oid.clone(),
                actual,
            })
        }
    }

    /// GETBULK request (v2c/v3 only).
    #[instrument(skip(self, oids), err, fields(
        snmp.target = %self.peer_addr(),
        snmp.oid_count = oids.len(),
        snmp.non_repeaters = non_repeaters,
        snmp.max_repetitions = max_repetitions,
    ))]
    pub async fn get_bulk(
        &self,
        oids: &[Oid],
        non_repeaters: i32,
        max_repetitions: i32,
    ) -> Result<Vec<VarBind>> {
        let request_id = self.next_request_id();
        let pdu = GetBulkPdu::new(request_id, non_repeaters, max_repetitions, oids);
        let response = self.send_bulk_request(pdu).await?;
        Ok(response.varbinds)
    }
}
