//! Ratewire REST - rate-limited HTTP transport
//!
//! Provides:
//! - Bucket discovery from rate-limit response headers
//! - Preemptive gating against route buckets and the global window
//! - Retry with server-directed backoff on throttles
//! - Status classification into typed errors
//!
//! ## Modules
//!
//! - [`bucket`] - Per-route quota windows with atomic reservation
//! - [`client`] - The dispatcher that callers use
//! - [`global`] - Process-wide request window
//! - [`headers`] - Rate-limit header parsing
//! - [`rate_limit`] - Shared limiter state and the admission gate
//! - [`registry`] - Route to bucket-hash mapping and discovery
//! - [`response`] - Response records and status classification
//! - [`retry`] - Throttle retry loop
//! - [`transport`] - Wire abstraction and the reqwest implementation

pub mod bucket;
pub mod client;
pub mod global;
pub mod headers;
pub mod rate_limit;
pub mod registry;
pub mod response;
pub mod retry;
pub mod transport;

use std::time::Duration;

use ratewire_core::domain::DomainError;
use reqwest::StatusCode;
use thiserror::Error;

pub use client::RestClient;
pub use rate_limit::{Admission, RateLimiter, Throttle, Ticket};
pub use response::{ApiDiagnostic, ApiFailure, ResponseRecord, StatusClass};
pub use retry::RetryPolicy;
pub use transport::{HttpTransport, ReqwestTransport, WireRequest};

/// Errors surfaced by [`RestClient`]
#[derive(Debug, Error)]
pub enum RestError {
    /// 400 or 405; the diagnostic payload is kept verbatim
    #[error("Bad request: {0}")]
    BadRequest(ApiFailure),

    /// 401 or 403
    #[error("Unauthorized: {0}")]
    Unauthorized(ApiFailure),

    #[error("Not found: {0}")]
    NotFound(ApiFailure),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(ApiFailure),

    /// Throttled past the retry budget. `response` is set when the final
    /// throttle was a 429 from the server.
    #[error("Rate limited, retry after {:?}", .throttle.retry_after())]
    RateLimited {
        throttle: Throttle,
        response: Option<ApiFailure>,
    },

    /// 5xx, not retried
    #[error("Server error: {0}")]
    ServerError(ApiFailure),

    #[error("Unexpected status: {0}")]
    UnexpectedStatus(ApiFailure),

    /// Connection, TLS or body failure
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// A single wire attempt outlived its deadline
    #[error("Attempt timed out after {0:?}")]
    AttemptTimeout(Duration),

    /// The caller's overall deadline expired, possibly mid-retry
    #[error("Request deadline of {0:?} exceeded")]
    Timeout(Duration),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl From<DomainError> for RestError {
    fn from(err: DomainError) -> Self {
        RestError::InvalidRequest(err.to_string())
    }
}

impl RestError {
    /// The server response behind this error, if there was one
    pub fn failure(&self) -> Option<&ApiFailure> {
        match self {
            RestError::BadRequest(failure)
            | RestError::Unauthorized(failure)
            | RestError::NotFound(failure)
            | RestError::PayloadTooLarge(failure)
            | RestError::ServerError(failure)
            | RestError::UnexpectedStatus(failure) => Some(failure),
            RestError::RateLimited { response, .. } => response.as_ref(),
            RestError::Transport(_)
            | RestError::AttemptTimeout(_)
            | RestError::Timeout(_)
            | RestError::InvalidRequest(_) => None,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.failure().map(|failure| failure.status)
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, RestError::RateLimited { .. })
    }

    /// True for failures below HTTP: connection errors and attempt timeouts
    pub fn is_transport(&self) -> bool {
        matches!(self, RestError::Transport(_) | RestError::AttemptTimeout(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RestError::Timeout(_))
    }
}
