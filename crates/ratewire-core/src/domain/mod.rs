//! Domain types for the REST core
//!
//! - Route templates and the major-parameter scope derived from them
//! - Request descriptors handed in by endpoint methods
//! - Domain-specific error types

pub mod errors;
pub mod request;
pub mod route;

pub use errors::DomainError;
pub use request::{FileAttachment, HttpMethod, RequestBody, RequestDescriptor};
pub use route::{RouteKey, RouteTemplate, ScopeKey};
