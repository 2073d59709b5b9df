//! Request counters
//!
//! [`RequestMetrics`] keeps two sets of lock-free counters: one for the
//! lifetime of the client and one for the window since the last
//! [`RequestMetrics::temporal`] read. A [`MetricsRegistry`] can be attached
//! to mirror every increment into Prometheus.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use serde::Serialize;

// ============================================================================
// Outcomes
// ============================================================================

/// Final classification of one logical request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestOutcome {
    Success,
    BadRequest,
    Unauthorized,
    NotFound,
    PayloadTooLarge,
    /// Throttles outlasted the retry budget
    RateLimited,
    ServerError,
    TransportFailure,
    Other,
}

impl RequestOutcome {
    /// Label value used in Prometheus output
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestOutcome::Success => "success",
            RequestOutcome::BadRequest => "bad_request",
            RequestOutcome::Unauthorized => "unauthorized",
            RequestOutcome::NotFound => "not_found",
            RequestOutcome::PayloadTooLarge => "payload_too_large",
            RequestOutcome::RateLimited => "rate_limited",
            RequestOutcome::ServerError => "server_error",
            RequestOutcome::TransportFailure => "transport_failure",
            RequestOutcome::Other => "other",
        }
    }
}

// ============================================================================
// Counters
// ============================================================================

#[derive(Debug, Default)]
struct Counters {
    requests: AtomicU64,
    successes: AtomicU64,
    global_rate_limits: AtomicU64,
    bucket_rate_limits: AtomicU64,
    bad_requests: AtomicU64,
    unauthorized: AtomicU64,
    not_found: AtomicU64,
    too_large: AtomicU64,
    rate_limited: AtomicU64,
    server_errors: AtomicU64,
    transport_failures: AtomicU64,
    other_failures: AtomicU64,
}

impl Counters {
    fn outcome(&self, outcome: RequestOutcome) -> &AtomicU64 {
        match outcome {
            RequestOutcome::Success => &self.successes,
            RequestOutcome::BadRequest => &self.bad_requests,
            RequestOutcome::Unauthorized => &self.unauthorized,
            RequestOutcome::NotFound => &self.not_found,
            RequestOutcome::PayloadTooLarge => &self.too_large,
            RequestOutcome::RateLimited => &self.rate_limited,
            RequestOutcome::ServerError => &self.server_errors,
            RequestOutcome::TransportFailure => &self.transport_failures,
            RequestOutcome::Other => &self.other_failures,
        }
    }

    fn record_outcome(&self, outcome: RequestOutcome) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.outcome(outcome).fetch_add(1, Ordering::Relaxed);
    }

    fn record_throttle(&self, global: bool) {
        let counter = if global {
            &self.global_rate_limits
        } else {
            &self.bucket_rate_limits
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Read every counter, zeroing them when `reset` is set
    fn read(&self, reset: bool) -> CounterValues {
        let get = |counter: &AtomicU64| {
            if reset {
                counter.swap(0, Ordering::Relaxed)
            } else {
                counter.load(Ordering::Relaxed)
            }
        };
        CounterValues {
            requests: get(&self.requests),
            successes: get(&self.successes),
            global_rate_limits: get(&self.global_rate_limits),
            bucket_rate_limits: get(&self.bucket_rate_limits),
            bad_requests: get(&self.bad_requests),
            unauthorized: get(&self.unauthorized),
            not_found: get(&self.not_found),
            too_large: get(&self.too_large),
            rate_limited: get(&self.rate_limited),
            server_errors: get(&self.server_errors),
            transport_failures: get(&self.transport_failures),
            other_failures: get(&self.other_failures),
        }
    }
}

/// Plain counter values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterValues {
    /// Logical requests that reached a final outcome
    pub requests: u64,
    pub successes: u64,
    /// Throttles on the global window, local or from the server
    pub global_rate_limits: u64,
    /// Throttles on a route bucket or route discovery
    pub bucket_rate_limits: u64,
    pub bad_requests: u64,
    /// 401 and 403 responses
    pub unauthorized: u64,
    pub not_found: u64,
    pub too_large: u64,
    /// Requests that gave up after exhausting retries
    pub rate_limited: u64,
    pub server_errors: u64,
    pub transport_failures: u64,
    pub other_failures: u64,
}

/// Counter values over a time window
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
    #[serde(flatten)]
    pub counters: CounterValues,
}

// ============================================================================
// RequestMetrics
// ============================================================================

/// Success, failure and throttle counters for a REST client
#[derive(Debug)]
pub struct RequestMetrics {
    created_at: DateTime<Utc>,
    lifetime: Counters,
    temporal: Counters,
    temporal_since: Mutex<DateTime<Utc>>,
    prometheus: Option<Arc<MetricsRegistry>>,
}

impl Default for RequestMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestMetrics {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            lifetime: Counters::default(),
            temporal: Counters::default(),
            temporal_since: Mutex::new(now),
            prometheus: None,
        }
    }

    /// Mirror every recorded event into `registry`
    pub fn with_registry(mut self, registry: Arc<MetricsRegistry>) -> Self {
        self.prometheus = Some(registry);
        self
    }

    pub fn registry(&self) -> Option<&Arc<MetricsRegistry>> {
        self.prometheus.as_ref()
    }

    /// Count a finished logical request
    pub fn record_outcome(&self, outcome: RequestOutcome) {
        self.lifetime.record_outcome(outcome);
        self.temporal.record_outcome(outcome);
        if let Some(registry) = &self.prometheus {
            registry.record_request(outcome);
        }
    }

    /// Count one throttle, whether local or from a 429
    pub fn record_throttle(&self, global: bool) {
        self.lifetime.record_throttle(global);
        self.temporal.record_throttle(global);
        if let Some(registry) = &self.prometheus {
            registry.record_throttle(global);
        }
    }

    /// Everything since this instance was created
    pub fn lifetime(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            since: self.created_at,
            until: Utc::now(),
            counters: self.lifetime.read(false),
        }
    }

    /// Everything since the previous call, which starts a new window
    pub fn temporal(&self) -> MetricsSnapshot {
        let mut since = self
            .temporal_since
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let until = Utc::now();
        let snapshot = MetricsSnapshot {
            since: *since,
            until,
            counters: self.temporal.read(true),
        };
        *since = until;
        snapshot
    }
}

// ============================================================================
// Prometheus
// ============================================================================

/// Prometheus registry holding the REST counters
pub struct MetricsRegistry {
    registry: Registry,
    /// Counter: finished requests by outcome
    pub rest_requests_total: IntCounterVec,
    /// Counter: throttles by scope (global, bucket)
    pub rest_throttles_total: IntCounterVec,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry").finish_non_exhaustive()
    }
}

impl MetricsRegistry {
    /// Creates a new `MetricsRegistry` with all metrics registered.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new_custom(Some("ratewire".to_string()), None)?;

        let rest_requests_total = IntCounterVec::new(
            Opts::new("rest_requests_total", "Finished REST requests by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(rest_requests_total.clone()))?;

        let rest_throttles_total = IntCounterVec::new(
            Opts::new("rest_throttles_total", "Rate-limit throttles by scope"),
            &["scope"],
        )?;
        registry.register(Box::new(rest_throttles_total.clone()))?;

        Ok(Self {
            registry,
            rest_requests_total,
            rest_throttles_total,
        })
    }

    pub fn record_request(&self, outcome: RequestOutcome) {
        self.rest_requests_total
            .with_label_values(&[outcome.as_str()])
            .inc();
    }

    pub fn record_throttle(&self, global: bool) {
        let scope = if global { "global" } else { "bucket" };
        self.rest_throttles_total.with_label_values(&[scope]).inc();
    }

    /// Encode all metrics in Prometheus text exposition format.
    pub fn encode(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
