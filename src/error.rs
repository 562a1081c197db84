//! Slotwise error types

use std::time::Duration;

/// Slotwise error types.
///
/// Only [`RateLimited`](SlotwiseError::RateLimited) after exhausted retries
/// and [`InvalidInput`](SlotwiseError::InvalidInput) ever reach callers of
/// the availability operations; everything else is recovered locally into
/// an empty or optimistic result.
#[derive(Debug, thiserror::Error)]
pub enum SlotwiseError {
    // Upstream/network errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("upstream call timed out after {0:?}")]
    Timeout(Duration),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("malformed upstream response: {0}")]
    MalformedResponse(String),

    // Data errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The throttle dispatcher stopped before the request was served.
    #[error("request throttle is shut down")]
    ThrottleClosed,
}

impl SlotwiseError {
    /// Whether the failure is a transport-level condition that the
    /// availability layer recovers from with a fallback value.
    pub fn is_transient(&self) -> bool {
        match self {
            SlotwiseError::Http(_)
            | SlotwiseError::Timeout(_)
            | SlotwiseError::MalformedResponse(_)
            | SlotwiseError::Json(_)
            | SlotwiseError::ThrottleClosed => true,
            SlotwiseError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Whether the upstream rejected the call with a rate-limit status.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, SlotwiseError::RateLimited { .. })
    }

    /// Wait hint carried by a `RateLimited` error, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SlotwiseError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Human-readable wait estimate for a surfaced rate-limit error.
    ///
    /// Returns `None` for every other variant.
    pub fn wait_hint(&self) -> Option<String> {
        match self {
            SlotwiseError::RateLimited { retry_after } => Some(describe_wait(
                retry_after.unwrap_or(Duration::from_secs(1)),
            )),
            _ => None,
        }
    }
}

/// Render a wait duration for display, rounded up to whole seconds.
pub fn describe_wait(wait: Duration) -> String {
    let secs = wait.as_millis().div_ceil(1000).max(1);
    if secs == 1 {
        "too many requests, try again in about 1 second".to_string()
    } else {
        format!("too many requests, try again in about {secs} seconds")
    }
}

/// Result type alias for Slotwise operations
pub type Result<T> = std::result::Result<T, SlotwiseError>;
