//! Retry and timeout behavior tests.

use snmp_poller::transport::{MockTransport, ResponseBuilder};
use snmp_poller::{oid, Client, ClientConfig, Credentials, Error, Value};
use std::time::Duration;

fn test_client(transport: MockTransport) -> Client<MockTransport> {
    let mut config = ClientConfig::new(Credentials::v2c("public", None));
    config.retry_backoff = Duration::ZERO;
    Client::with_transport(transport, config).unwrap()
}

fn mock() -> MockTransport {
    MockTransport::new("192.0.2.1:161".parse().unwrap())
}

/// A timed-out request is retried once and can still succeed.
#[tokio::test]
async fn client_retries_once_after_timeout() {
    let transport = mock();
    transport.queue_timeout();
    transport.queue_response(
        ResponseBuilder::new(0)
            .varbind(oid!(1, 3, 6, 1, 2, 1, 1, 1, 0), Value::Integer(1))
            .build_v2c(b"public"),
    );

    let client = test_client(transport.clone());
    let result = client.get(&oid!(1, 3, 6, 1, 2, 1, 1, 1, 0)).await;

    assert!(result.is_ok());
    assert_eq!(transport.requests().len(), 2);
}

/// After the single retry the error is returned as-is.
#[tokio::test]
async fn client_gives_up_after_one_retry() {
    let transport = mock();
    transport.queue_timeout();
    transport.queue_timeout();

    let client = test_client(transport.clone());
    let result = client.get(&oid!(1, 3, 6, 1, 2, 1, 1, 1, 0)).await;

    assert!(matches!(result, Err(Error::Timeout { .. })));
    assert_eq!(transport.requests().len(), 2);
}

/// Agent-reported errors are not retried; the agent already answered.
#[tokio::test]
async fn agent_errors_are_not_retried() {
    let transport = mock();
    transport.queue_response(
        ResponseBuilder::new(0)
            .varbind(oid!(1, 3, 6, 1, 2, 1, 1, 1, 0), Value::Null)
            .error_status(5) // genErr
            .error_index(1)
            .build_v2c(b"public"),
    );

    let client = test_client(transport.clone());
    let result = client.get(&oid!(1, 3, 6, 1, 2, 1, 1, 1, 0)).await;

    assert!(matches!(result, Err(Error::Snmp { .. })));
    assert_eq!(transport.requests().len(), 1);
}

/// The retry pause is honored between attempts.
#[tokio::test(start_paused = true)]
async fn retry_waits_for_the_backoff() {
    let transport = mock();
    transport.queue_timeout();
    transport.queue_response(
        ResponseBuilder::new(0)
            .varbind(oid!(1, 3, 6, 1, 2, 1, 1, 1, 0), Value::Integer(1))
            .build_v2c(b"public"),
    );

    let mut config = ClientConfig::new(Credentials::v2c("public", None));
    config.retry_backoff = Duration::from_secs(5);
    let client = Client::with_transport(transport, config).unwrap();

    let start = tokio::time::Instant::now();
    let result = client.get(&oid!(1, 3, 6, 1, 2, 1, 1, 1, 0)).await;

    assert!(result.is_ok());
    assert!(start.elapsed() >= Duration::from_secs(5));
}
