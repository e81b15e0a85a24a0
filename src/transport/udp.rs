//! UDP transport implementation.

use super::Transport;
use crate::error::{Error, Result};
use bytes::Bytes;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

/// UDP transport for a single target.
///
/// Each `UdpTransport` owns a connected UDP socket to a specific target.
#[derive(Clone)]
pub struct UdpTransport {
    inner: Arc<UdpTransportInner>,
}

struct UdpTransportInner {
    socket: UdpSocket,
    target: SocketAddr,
    local_addr: SocketAddr,
}

impl UdpTransport {
    /// Connect to a target address.
    ///
    /// Creates an ephemeral UDP socket bound to the matching address family.
    pub async fn connect(target: SocketAddr) -> Result<Self> {
        tracing::debug!(snmp.target = %target, "connecting UDP transport");

        let bind_addr: SocketAddr = if target.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(bind_addr).await.map_err(|e| Error::Io {
            target: Some(target),
            source: e,
        })?;

        socket.connect(target).await.map_err(|e| Error::Io {
            target: Some(target),
            source: e,
        })?;

        let local_addr = socket.local_addr().map_err(|e| Error::Io {
            target: Some(target),
            source: e,
        })?;

        tracing::debug!(
            snmp.target = %target,
            snmp.local_addr = %local_addr,
            "UDP transport connected"
        );

        Ok(Self {
            inner: Arc::new(UdpTransportInner {
                socket,
                target,
                local_addr,
            }),
        })
    }

    /// Connect with a timeout covering bind and connect.
    pub async fn connect_timeout(target: SocketAddr, connect_timeout: Duration) -> Result<Self> {
        let result = timeout(connect_timeout, Self::connect(target)).await;

        match result {
            Ok(inner) => inner,
            Err(_) => Err(Error::Timeout {
                target: Some(target),
                elapsed: connect_timeout,
                request_id: 0,
                retries: 0,
            }),
        }
    }
}

impl Transport for UdpTransport {
    async fn send(&self, data: &[u8]) -> Result<()> {
        tracing::trace!(
            snmp.target = %self.inner.target,
            snmp.bytes = data.len(),
            "UDP send"
        );
        self.inner.socket.send(data).await.map_err(|e| Error::Io {
            target: Some(self.inner.target),
            source: e,
        })?;
        Ok(())
    }

    async fn recv(&self, request_id: i32, recv_timeout: Duration) -> Result<(Bytes, SocketAddr)> {
        tracing::trace!(
            snmp.target = %self.inner.target,
            snmp.request_id = request_id,
            snmp.timeout_ms = recv_timeout.as_millis() as u64,
            "UDP recv waiting"
        );

        let mut buf = vec![0u8; 65535];

        let result = timeout(recv_timeout, self.inner.socket.recv(&mut buf)).await;

        match result {
            Ok(Ok(len)) => {
                buf.truncate(len);
                tracing::trace!(
                    snmp.target = %self.inner.target,
                    snmp.bytes = len,
                    "UDP recv complete"
                );
                Ok((Bytes::from(buf), self.inner.target))
            }
            Ok(Err(e)) => {
                tracing::trace!(
                    snmp.target = %self.inner.target,
                    error = %e,
                    "UDP recv error"
                );
                Err(Error::Io {
                    target: Some(self.inner.target),
                    source: e,
                })
            }
            Err(_) => {
                tracing::trace!(
                    snmp.target = %self.inner.target,
                    snmp.request_id = request_id,
                    "UDP recv timeout"
                );
                Err(Error::Timeout {
                    target: Some(self.inner.target),
                    elapsed: recv_timeout,
                    request_id,
                    retries: 0,
                })
            }
        }
    }

    fn peer_addr(&self) -> SocketAddr {
        self.inner.target
    }

    fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }
}
