//! Mock transport for testing.
//!
//! Provides a programmable transport that can simulate various scenarios
//! without needing an actual network connection.

use super::Transport;
use crate::error::{Error, Result};
use bytes::Bytes;
use std::collections::VecDeque;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A mock response to return for a request.
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// Return this data as the response (request_id will be patched to match)
    Data(Bytes),
    /// Return this data as-is without patching request_id
    RawData(Bytes),
    /// Simulate a timeout
    Timeout,
    /// Simulate an IO error
    IoError(String),
}

/// A recorded request sent through the mock transport.
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    /// The raw request data
    pub data: Bytes,
    /// The request ID extracted from the message (if possible)
    pub request_id: Option<i32>,
}

/// Mock transport state shared between clones.
struct MockTransportInner {
    target: SocketAddr,
    responses: VecDeque<MockResponse>,
    requests: Vec<RecordedRequest>,
    /// Default response when queue is empty
    default_response: Option<MockResponse>,
    /// Last request_id seen (for patching responses)
    last_request_id: Option<i32>,
}

/// Mock transport for testing SNMP client functionality.
///
/// Queue responses with [`queue_response`](Self::queue_response); the
/// request_id in each queued message is patched to match the request that
/// preceded it, so fixtures can use a placeholder id.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new(target: SocketAddr) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockTransportInner {
                target,
                responses: VecDeque::new(),
                requests: Vec::new(),
                default_response: None,
                last_request_id: None,
            })),
        }
    }

    /// Queue a data response.
    ///
    /// The request_id in the response will be automatically patched to match
    /// the actual request. Use [`queue_raw_response`](Self::queue_raw_response)
    /// to bypass patching for testing request_id mismatch scenarios.
    pub fn queue_response(&self, data: impl Into<Bytes>) {
        let mut inner = self.inner.lock().unwrap();
        inner.responses.push_back(MockResponse::Data(data.into()));
    }

    /// Queue a raw data response without request_id patching.
    pub fn queue_raw_response(&self, data: impl Into<Bytes>) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .responses
            .push_back(MockResponse::RawData(data.into()));
    }

    /// Queue a timeout.
    pub fn queue_timeout(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.responses.push_back(MockResponse::Timeout);
    }

    /// Queue an IO error.
    pub fn queue_io_error(&self, msg: impl Into<String>) {
        let mut inner = self.inner.lock().unwrap();
        inner.responses.push_back(MockResponse::IoError(msg.into()));
    }

    /// Set a default response when the queue is empty.
    pub fn set_default_response(&self, response: MockResponse) {
        let mut inner = self.inner.lock().unwrap();
        inner.default_response = Some(response);
    }

    /// Get all recorded requests.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        let inner = self.inner.lock().unwrap();
        inner.requests.clone()
    }

    /// Clear recorded requests.
    pub fn clear_requests(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.requests.clear();
    }

    /// Get the number of queued responses remaining.
    pub fn queued_response_count(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.responses.len()
    }

    /// Patch the request_id in a v1/v2c response to match the actual request.
    ///
    /// V3 messages are returned unchanged; fixtures for v3 must carry the
    /// right msgID already.
    fn patch_response_request_id(data: Bytes, new_id: i32) -> Bytes {
        use crate::message::CommunityMessage;

        let Ok(mut msg) = CommunityMessage::decode(data.clone()) else {
            return data;
        };

        msg.pdu.request_id = new_id;
        msg.encode()
    }
}

impl Transport for MockTransport {
    fn send(&self, data: &[u8]) -> impl Future<Output = Result<()>> + Send {
        let data = Bytes::copy_from_slice(data);
        let request_id = super::extract_request_id(&data);

        let mut inner = self.inner.lock().unwrap();
        inner.requests.push(RecordedRequest { data, request_id });
        // Store the request_id for response patching
        inner.last_request_id = request_id;

        async { Ok(()) }
    }

    fn recv(
        &self,
        request_id: i32,
        recv_timeout: Duration,
    ) -> impl Future<Output = Result<(Bytes, SocketAddr)>> + Send {
        let inner = self.inner.clone();

        async move {
            let (response, target, last_req_id) = {
                let mut guard = inner.lock().unwrap();
                let resp = guard
                    .responses
                    .pop_front()
                    .or_else(|| guard.default_response.clone());
                (resp, guard.target, guard.last_request_id)
            };

            match response {
                Some(MockResponse::Data(data)) => {
                    // Patch the response to use the actual request_id from the request
                    let patched = if let Some(req_id) = last_req_id {
                        Self::patch_response_request_id(data, req_id)
                    } else {
                        data
                    };
                    Ok((patched, target))
                }
                Some(MockResponse::RawData(data)) => Ok((data, target)),
                Some(MockResponse::Timeout) => Err(Error::Timeout {
                    target: Some(target),
                    elapsed: recv_timeout,
                    request_id,
                    retries: 0,
                }),
                Some(MockResponse::IoError(msg)) => Err(Error::Io {
                    target: Some(target),
                    source: std::io::Error::other(msg),
                }),
                None => Err(Error::Timeout {
                    target: Some(target),
                    elapsed: recv_timeout,
                    request_id,
                    retries: 0,
                }),
            }
        }
    }

    fn peer_addr(&self) -> SocketAddr {
        let inner = self.inner.lock().unwrap();
        inner.target
    }

    fn local_addr(&self) -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }
}

/// Builder for creating SNMP response messages for testing.
///
/// This helps construct valid SNMP response bytes without manually
/// crafting BER encoding.
pub struct ResponseBuilder {
    request_id: i32,
    varbinds: Vec<(crate::Oid, crate::Value)>,
    error_status: i32,
    error_index: i32,
}

impl ResponseBuilder {
    /// Create a new response builder with the given request ID.
    pub fn new(request_id: i32) -> Self {
        Self {
            request_id,
            varbinds: Vec::new(),
            error_status: 0,
            error_index: 0,
        }
    }

    /// Add a varbind to the response.
    pub fn varbind(mut self, oid: crate::Oid, value: crate::Value) -> Self {
        self.varbinds.push((oid, value));
        self
    }

    /// Set the error status.
    pub fn error_status(mut self, status: i32) -> Self {
        self.error_status = status;
        self
    }

    /// Set the error index.
    pub fn error_index(mut self, index: i32) -> Self {
        self.error_index = index;
        self
    }

    fn build(self, version: crate::message::Version, community: &[u8]) -> Bytes {
        use crate::message::CommunityMessage;
        use crate::pdu::{Pdu, PduType};
        use crate::varbind::VarBind;

        let varbinds: Vec<VarBind> = self
            .varbinds
            .into_iter()
            .map(|(oid, value)| VarBind::new(oid, value))
            .collect();

        let pdu = Pdu {
            pdu_type: PduType::Response,
            request_id: self.request_id,
            error_status: self.error_status,
            error_index: self.error_index,
            varbinds,
        };
        CommunityMessage::new(version, Bytes::copy_from_slice(community), pdu).encode()
    }

    /// Build a v2c SNMP response message.
    pub fn build_v2c(self, community: &[u8]) -> Bytes {
        self.build(crate::message::Version::V2c, community)
    }

    /// Build a v1 SNMP response message.
    pub fn build_v1(self, community: &[u8]) -> Bytes {
        self.build(crate::message::Version::V1, community)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{oid, Value};

    #[tokio::test]
    async fn test_mock_transport_queue_response() {
        let mock = MockTransport::new("127.0.0.1:161".parse().unwrap());

        let response = ResponseBuilder::new(1)
            .varbind(
                oid!(1, 3, 6, 1, 2, 1, 1, 1, 0),
                Value::OctetString("test".into()),
            )
            .build_v2c(b"public");

        mock.queue_response(response.clone());

        // The dummy request is not decodable, so no patching happens
        mock.send(b"dummy request").await.unwrap();

        let (data, _addr) = mock.recv(1, Duration::from_secs(1)).await.unwrap();
        assert_eq!(data, response);
    }

    #[tokio::test]
    async fn test_mock_transport_timeout() {
        let mock = MockTransport::new("127.0.0.1:161".parse().unwrap());
        mock.queue_timeout();

        mock.send(b"request").await.unwrap();

        let result = mock.recv(1, Duration::from_millis(100)).await;
        assert!(matches!(result, Err(Error::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_mock_transport_records_requests() {
        let mock = MockTransport::new("127.0.0.1:161".parse().unwrap());

        mock.send(b"request 1").await.unwrap();
        mock.send(b"request 2").await.unwrap();

        let requests = mock.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].data.as_ref(), b"request 1");
        assert_eq!(requests[1].data.as_ref(), b"request 2");
    }

    #[tokio::test]
    async fn test_mock_transport_patches_request_id() {
        let mock = MockTransport::new("127.0.0.1:161".parse().unwrap());

        // Queue a response with a placeholder request_id
        let response = ResponseBuilder::new(0)
            .varbind(oid!(1, 3, 6, 1, 2, 1, 1, 1, 0), Value::Integer(7))
            .build_v2c(b"public");
        mock.queue_response(response);

        // Send a real request carrying request_id 4242
        let request = crate::message::CommunityMessage::v2c(
            b"public".as_slice(),
            crate::pdu::Pdu::get_request(4242, &[oid!(1, 3, 6, 1, 2, 1, 1, 1, 0)]),
        )
        .encode();
        mock.send(&request).await.unwrap();

        let (data, _) = mock.recv(4242, Duration::from_secs(1)).await.unwrap();
        let decoded = crate::message::CommunityMessage::decode(data).unwrap();
        assert_eq!(decoded.pdu.request_id, 4242);
    }

    #[tokio::test]
    async fn test_mock_transport_default_response() {
        let mock = MockTransport::new("127.0.0.1:161".parse().unwrap());

        let response = ResponseBuilder::new(1)
            .varbind(
                oid!(1, 3, 6, 1, 2, 1, 1, 1, 0),
                Value::OctetString("default".into()),
            )
            .build_v2c(b"public");

        mock.set_default_response(MockResponse::Data(response.clone()));

        let (data1, _) = mock.recv(1, Duration::from_secs(1)).await.unwrap();
        assert_eq!(data1, response);

        let (data2, _) = mock.recv(2, Duration::from_secs(1)).await.unwrap();
        assert_eq!(data2, response);
    }
}
