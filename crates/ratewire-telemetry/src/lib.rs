//! Ratewire Telemetry - counters and logging
//!
//! Provides:
//! - `RequestMetrics`: lifetime and since-last-read request counters
//! - `MetricsRegistry`: optional Prometheus mirror of those counters
//! - `init_tracing`: tracing subscriber setup from `LoggingConfig`

pub mod logging;
pub mod metrics;

pub use logging::init_tracing;
pub use metrics::{CounterValues, MetricsRegistry, MetricsSnapshot, RequestMetrics, RequestOutcome};
