//! HTTP adapter over libcurl easy handles.
//!
//! Probing (size, range support) lives in [`probe`]; segment and stream
//! workers build their own transfer handles with the helpers in [`headers`].
//! Header lists are assembled in capture order and never canonicalized.

pub mod headers;
mod parse;
pub mod probe;

pub use parse::ResponseHeaders;

use std::time::Duration;
use thiserror::Error;

/// Connect timeout for every request.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// A transfer stalled below 1 byte/s for this long counts as a read timeout.
pub const READ_STALL_TIMEOUT: Duration = Duration::from_secs(30);
/// Overall budget for a foreground discovery probe.
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);
/// Overall budget for a background capture-size probe.
pub const BACKGROUND_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Error raised by a probe or transfer attempt.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Transport-level failure (DNS, reset, timeout, TLS).
    #[error("{0}")]
    Curl(#[from] curl::Error),
    /// Non-success HTTP status outside the auth-expired class.
    #[error("HTTP {0}")]
    Http(u32),
    /// 401/403/410: the captured session no longer authorizes the origin.
    #[error("session expired (HTTP {0})")]
    SessionExpired(u32),
    /// The origin answered with an HTML page where binary data was expected
    /// (captive portal or login page).
    #[error("server returned HTML instead of binary data")]
    HtmlBody,
    /// The stream ended before the requested range was exhausted.
    #[error("short body: expected {expected} bytes, got {received}")]
    ShortBody { expected: u64, received: u64 },
    /// Local disk write failed while sinking the body.
    #[error("storage: {0}")]
    Storage(#[source] std::io::Error),
}

impl TransferError {
    /// Map an HTTP status outside {200, 206} to the right error class.
    pub fn from_status(code: u32) -> Self {
        if is_session_expired_status(code) {
            TransferError::SessionExpired(code)
        } else {
            TransferError::Http(code)
        }
    }
}

/// The auth-expired status class that terminates retries and triggers a
/// session renewal signal.
pub fn is_session_expired_status(code: u32) -> bool {
    matches!(code, 401 | 403 | 410)
}
