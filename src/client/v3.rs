//! SNMPv3 request path.
//!
//! Engine discovery, key localization, message building, and the
//! authenticated/encrypted send loop. Reports that indicate a stale time
//! window trigger one resynchronized retry; everything else surfaces as an
//! error.

use std::sync::RwLock;
use std::time::Instant;

use bytes::Bytes;
use tracing::{instrument, Span};

use crate::ber::Decoder;
use crate::error::{AuthErrorKind, CryptoErrorKind, EncodeErrorKind, Error, ErrorStatus, Result};
use crate::message::{MsgFlags, MsgGlobalData, ScopedPdu, V3Message, V3MessageData};
use crate::pdu::{Pdu, PduType};
use crate::transport::Transport;
use crate::util::hex_encode;
use crate::v3::{
    authenticate_message, is_not_in_time_window_report, is_unknown_engine_id_report,
    is_unknown_user_name_report, is_wrong_digest_report, parse_discovery_response, verify_message,
    LocalizedKey, PrivKey, UsmSecurityParams, DEFAULT_MSG_MAX_SIZE,
};

use super::auth::V3Security;
use super::{retry, Client, MAX_RETRIES};

/// Keys localized to the discovered engine.
pub(super) struct V3DerivedKeys {
    pub auth_key: Option<LocalizedKey>,
    pub priv_key: Option<PrivKey>,
}

/// Localize keys from the configured passwords for a specific engine ID.
fn derive_keys(security: &V3Security, engine_id: &[u8]) -> V3DerivedKeys {
    let auth_key = security.auth.as_ref().map(|(protocol, password)| {
        LocalizedKey::from_password(*protocol, password.as_bytes(), engine_id)
    });

    let priv_key = match (&security.auth, &security.privacy) {
        (Some((auth_protocol, _)), Some((priv_protocol, priv_password))) => {
            Some(PrivKey::from_password(
                *auth_protocol,
                *priv_protocol,
                priv_password.as_bytes(),
                engine_id,
            ))
        }
        _ => None,
    };

    V3DerivedKeys { auth_key, priv_key }
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

/// Outcome of one v3 request attempt.
enum V3Reply {
    Response(Pdu),
    /// The agent reported notInTimeWindow; engine time was resynchronized.
    NotInTimeWindow,
}

impl<T: Transport> Client<T> {
    /// Discover the authoritative engine if we have not already.
    #[instrument(level = "debug", skip(self), fields(snmp.target = %self.peer_addr()))]
    pub(super) async fn ensure_engine_discovered(&self) -> Result<()> {
        if read_lock(&self.inner.engine_state).is_some() {
            return Ok(());
        }

        let mut last_error: Option<Error> = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                tracing::debug!("retrying engine discovery after backoff");
                tokio::time::sleep(self.inner.config.retry_backoff).await;
            }

            match self.discover_once().await {
                Ok(()) => return Ok(()),
                Err(e) if retry::is_retryable(&e) => {
                    tracing::debug!(error = %e, "engine discovery attempt failed");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| Error::UnknownEngineId {
            target: Some(self.peer_addr()),
        }))
    }

    async fn discover_once(&self) -> Result<()> {
        let msg_id = self.next_request_id();
        let data = V3Message::discovery_request(msg_id).encode();

        self.inner.transport.send(&data).await?;
        let (response_data, _source) = self
            .inner
            .transport
            .recv(msg_id, self.inner.config.timeout)
            .await?;

        let response = V3Message::decode(response_data)?;
        let engine_state = parse_discovery_response(&response.security_params)?;

        tracing::debug!(
            snmp.engine_id = %hex_encode(&engine_state.engine_id),
            snmp.engine_boots = engine_state.engine_boots,
            snmp.engine_time = engine_state.engine_time,
            "discovered engine"
        );

        if let Some(security) = self.inner.config.credentials.v3_security() {
            let keys = derive_keys(security, &engine_state.engine_id);
            *write_lock(&self.inner.derived_keys) = Some(keys);
        }

        *write_lock(&self.inner.engine_state) = Some(engine_state);

        Ok(())
    }

    /// Build and encode a v3 message, encrypting and authenticating per the
    /// configured security level. The msgID is the PDU's request ID.
    fn build_v3_message(&self, pdu: &Pdu, security: &V3Security) -> Result<Vec<u8>> {
        let (engine_id, engine_boots, engine_time) = {
            let state = read_lock(&self.inner.engine_state);
            let state = state
                .as_ref()
                .ok_or_else(|| Error::encode(EncodeErrorKind::EngineNotDiscovered))?;
            (
                state.engine_id.clone(),
                state.engine_boots,
                state.estimated_time(),
            )
        };

        let security_level = security.security_level();
        let msg_id = pdu.request_id;

        let scoped_pdu = ScopedPdu::new(engine_id.clone(), Bytes::new(), pdu.clone());

        let (msg_data, priv_params) = if security_level.requires_priv() {
            let derived = read_lock(&self.inner.derived_keys);
            let priv_key = derived
                .as_ref()
                .and_then(|d| d.priv_key.as_ref())
                .ok_or_else(|| Error::encode(EncodeErrorKind::NoPrivKey))?;

            let plaintext = scoped_pdu.encode_to_bytes();
            let (ciphertext, salt) = priv_key.encrypt(
                &plaintext,
                engine_boots,
                engine_time,
                &self.inner.salt_counter,
            )?;

            tracing::trace!(
                plaintext_len = plaintext.len(),
                ciphertext_len = ciphertext.len(),
                "encrypted scoped PDU"
            );

            (V3MessageData::Encrypted(ciphertext), salt)
        } else {
            (V3MessageData::Plaintext(scoped_pdu), Bytes::new())
        };

        let mut usm_params = UsmSecurityParams::new(
            engine_id,
            engine_boots,
            engine_time,
            Bytes::copy_from_slice(security.username.as_bytes()),
        );

        if let Some((auth_protocol, _)) = &security.auth {
            usm_params = usm_params.with_auth_placeholder(auth_protocol.mac_len());
        }

        if security_level.requires_priv() {
            usm_params = usm_params.with_priv_params(priv_params);
        }

        let global_data = MsgGlobalData::new(
            msg_id,
            DEFAULT_MSG_MAX_SIZE as i32,
            MsgFlags::new(security_level, true),
        );

        let msg = match msg_data {
            V3MessageData::Plaintext(scoped_pdu) => {
                V3Message::new(global_data, usm_params.encode(), scoped_pdu)
            }
            V3MessageData::Encrypted(ciphertext) => {
                V3Message::new_encrypted(global_data, usm_params.encode(), ciphertext)
            }
        };

        let mut encoded = msg.encode().to_vec();

        if security_level.requires_auth() {
            let derived = read_lock(&self.inner.derived_keys);
            let auth_key = derived
                .as_ref()
                .and_then(|d| d.auth_key.as_ref())
                .ok_or_else(|| Error::encode(EncodeErrorKind::MissingAuthKey))?;

            let (offset, len) = UsmSecurityParams::find_auth_params_offset(&encoded)
                .ok_or_else(|| Error::encode(EncodeErrorKind::MissingAuthParams))?;
            authenticate_message(auth_key, &mut encoded, offset, len);
        }

        Ok(encoded)
    }

    /// Send a v3 request and wait for the matching response, retrying once
    /// after the backoff on unreachable-class failures and once more
    /// (without backoff) after a time-window resynchronization.
    #[instrument(
        level = "debug",
        skip(self, pdu),
        fields(
            snmp.target = %self.peer_addr(),
            snmp.request_id = pdu.request_id,
            snmp.attempt = tracing::field::Empty,
            snmp.elapsed_ms = tracing::field::Empty,
        )
    )]
    pub(super) async fn send_v3_and_recv(&self, pdu: Pdu) -> Result<Pdu> {
        let start = Instant::now();

        let security = match self.inner.config.credentials.v3_security() {
            Some(security) => security,
            None => {
                return Err(Error::InvalidCredentials(
                    "v3 operation without USM credentials".to_string(),
                ))
            }
        };

        self.ensure_engine_discovered().await?;

        let mut attempt = 0u32;
        let mut resyncs = 0u32;

        loop {
            Span::current().record("snmp.attempt", attempt);

            match self.v3_request_once(&pdu, security).await {
                Ok(V3Reply::Response(response)) => {
                    Span::current().record("snmp.elapsed_ms", start.elapsed().as_millis() as u64);
                    return Ok(response);
                }
                Ok(V3Reply::NotInTimeWindow) => {
                    resyncs += 1;
                    if resyncs > 1 {
                        Span::current()
                            .record("snmp.elapsed_ms", start.elapsed().as_millis() as u64);
                        return Err(Error::NotInTimeWindow {
                            target: Some(self.peer_addr()),
                        });
                    }
                    tracing::debug!("engine time resynchronized, retrying");
                }
                Err(e) if retry::is_retryable(&e) && attempt < MAX_RETRIES => {
                    attempt += 1;
                    tracing::debug!(
                        error = %e,
                        backoff_ms = self.inner.config.retry_backoff.as_millis() as u64,
                        "v3 request attempt failed, backing off"
                    );
                    tokio::time::sleep(self.inner.config.retry_backoff).await;
                }
                Err(e) => {
                    Span::current().record("snmp.elapsed_ms", start.elapsed().as_millis() as u64);
                    return Err(e);
                }
            }
        }
    }

    async fn v3_request_once(&self, pdu: &Pdu, security: &V3Security) -> Result<V3Reply> {
        let security_level = security.security_level();

        // Rebuilt on every attempt so the timestamps stay inside the window
        let data = self.build_v3_message(pdu, security)?;

        tracing::trace!(snmp.bytes = data.len(), "sending v3 request");
        self.inner.transport.send(&data).await?;

        let (response_data, _source) = self
            .inner
            .transport
            .recv(pdu.request_id, self.inner.config.timeout)
            .await?;

        tracing::trace!(snmp.bytes = response_data.len(), "received v3 response");

        if security_level.requires_auth() {
            let derived = read_lock(&self.inner.derived_keys);
            let auth_key = derived
                .as_ref()
                .and_then(|d| d.auth_key.as_ref())
                .ok_or_else(|| Error::auth(Some(self.peer_addr()), AuthErrorKind::NoAuthKey))?;

            let (offset, len) = UsmSecurityParams::find_auth_params_offset(&response_data)
                .ok_or_else(|| {
                    Error::auth(Some(self.peer_addr()), AuthErrorKind::AuthParamsNotFound)
                })?;

            if !verify_message(auth_key, &response_data, offset, len) {
                return Err(Error::auth(
                    Some(self.peer_addr()),
                    AuthErrorKind::HmacMismatch,
                ));
            }
        }

        let response = V3Message::decode(response_data)?;
        let response_security_params = response.security_params.clone();

        // Report PDUs arrive as plaintext regardless of our security level
        if let Some(scoped_pdu) = response.scoped_pdu() {
            if scoped_pdu.pdu.pdu_type == PduType::Report {
                return self.classify_report(&scoped_pdu.pdu, &response_security_params);
            }
        }

        let response_pdu = if security_level.requires_priv() {
            match response.data {
                V3MessageData::Encrypted(ciphertext) => {
                    let usm_params = UsmSecurityParams::decode(response_security_params.clone())?;

                    let derived = read_lock(&self.inner.derived_keys);
                    let priv_key =
                        derived
                            .as_ref()
                            .and_then(|d| d.priv_key.as_ref())
                            .ok_or_else(|| {
                                Error::decrypt(Some(self.peer_addr()), CryptoErrorKind::NoPrivKey)
                            })?;

                    let plaintext = priv_key.decrypt(
                        &ciphertext,
                        usm_params.engine_boots,
                        usm_params.engine_time,
                        &usm_params.priv_params,
                    )?;

                    let mut decoder = Decoder::new(plaintext);
                    ScopedPdu::decode(&mut decoder)?.pdu
                }
                V3MessageData::Plaintext(scoped_pdu) => scoped_pdu.pdu,
            }
        } else {
            match response.data {
                V3MessageData::Plaintext(scoped_pdu) => scoped_pdu.pdu,
                V3MessageData::Encrypted(_) => {
                    return Err(Error::decode(
                        0,
                        crate::error::DecodeErrorKind::ExpectedEncryption,
                    ))
                }
            }
        };

        if response_pdu.request_id != pdu.request_id {
            return Err(Error::RequestIdMismatch {
                expected: pdu.request_id,
                actual: response_pdu.request_id,
            });
        }

        self.update_engine_time(&response_security_params)?;

        if response_pdu.is_error() {
            let status = response_pdu.error_status_enum();
            let oid = (response_pdu.error_index as usize)
                .checked_sub(1)
                .and_then(|idx| response_pdu.varbinds.get(idx))
                .map(|vb| vb.oid.clone());
            return Err(Error::Snmp {
                target: Some(self.peer_addr()),
                status,
                index: response_pdu.error_index.max(0) as u32,
                oid,
            });
        }

        Ok(V3Reply::Response(response_pdu))
    }

    fn classify_report(&self, report: &Pdu, security_params: &Bytes) -> Result<V3Reply> {
        if is_not_in_time_window_report(report) {
            tracing::debug!("agent reported notInTimeWindow");
            self.update_engine_time(security_params)?;
            return Ok(V3Reply::NotInTimeWindow);
        }

        if is_unknown_engine_id_report(report) {
            return Err(Error::UnknownEngineId {
                target: Some(self.peer_addr()),
            });
        }

        if is_wrong_digest_report(report) {
            return Err(Error::auth(
                Some(self.peer_addr()),
                AuthErrorKind::HmacMismatch,
            ));
        }

        if is_unknown_user_name_report(report) {
            return Err(Error::InvalidCredentials(
                "agent does not know this user name".to_string(),
            ));
        }

        Err(Error::Snmp {
            target: Some(self.peer_addr()),
            status: ErrorStatus::GenErr,
            index: 0,
            oid: report.varbinds.first().map(|vb| vb.oid.clone()),
        })
    }

    fn update_engine_time(&self, security_params: &Bytes) -> Result<()> {
        let usm_params = UsmSecurityParams::decode(security_params.clone())?;
        let mut state = write_lock(&self.inner.engine_state);
        if let Some(ref mut s) = *state {
            s.update_time(usm_params.engine_boots, usm_params.engine_time);
        }
        Ok(())
    }
}
