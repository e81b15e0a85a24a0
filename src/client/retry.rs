//! Retry policy for request/response operations.
//!
//! Every operation is attempted twice at most: the initial send, and one
//! retry after a fixed backoff. Only failures that suggest the device
//! might answer a second time are retried; protocol-level errors (SNMP
//! error-status, authentication failures) are returned immediately.

use std::time::Duration;

use crate::error::Error;

/// Per-request response timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause before the single retry.
pub const RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// Number of retries after the initial attempt.
pub const MAX_RETRIES: u32 = 1;

/// Whether a failed attempt should be retried.
///
/// Timeouts, transport errors, and undecodable responses are treated as
/// the device being unreachable; everything else is a definitive answer.
pub fn is_retryable(error: &Error) -> bool {
    matches!(
        error,
        Error::Timeout { .. } | Error::Io { .. } | Error::Decode { .. }
    )
}
