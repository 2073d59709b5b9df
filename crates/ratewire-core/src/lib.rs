//! Ratewire Core - Configuration and request model
//!
//! This crate holds the pieces of the REST core that carry no I/O:
//! - **Configuration** - `Config` loaded from YAML, with validation and a builder
//! - **Domain types** - `RouteTemplate`, `ScopeKey`, `RequestDescriptor` and friends
//!
//! The rate-limit machinery and the HTTP dispatcher live in `ratewire-rest`;
//! observability counters live in `ratewire-telemetry`.

pub mod config;
pub mod domain;
