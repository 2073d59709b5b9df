//! Domain error types
//!
//! Errors raised while building request descriptors, before anything
//! reaches the rate limiter or the wire.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Route template is empty or not a path
    #[error("Invalid route template: {0}")]
    InvalidRoute(String),

    /// Concrete URL is empty or malformed
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Header name or value cannot be sent
    #[error("Invalid header {name}: {reason}")]
    InvalidHeader {
        /// Offending header name
        name: String,
        /// Why it was rejected
        reason: String,
    },

    /// Request body could not be encoded
    #[error("Invalid body: {0}")]
    InvalidBody(String),

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
