//! Rate-limit coordination
//!
//! [`RateLimiter`] owns every piece of shared rate-limit state: the global
//! window, the route registry and the bucket table. It is constructed once
//! and injected into each [`RestClient`](crate::RestClient) that should
//! share limits.
//!
//! A request goes through [`RateLimiter::admit`] before it touches the
//! wire and hands its [`Ticket`] back through [`RateLimiter::observe`]
//! once the response headers are known.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ratewire_core::config::RateLimitingConfig;
use ratewire_core::domain::{RequestDescriptor, RouteKey, ScopeKey};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bucket::{duration_ms, Bucket, Reservation, UNLIMITED_HASH};
use crate::global::GlobalLimiter;
use crate::headers::{self, BucketSnapshot};
use crate::registry::{DiscoveryGuard, RouteRegistry};

// ============================================================================
// Throttle / Admission
// ============================================================================

/// Why a request may not be sent right now
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Throttle {
    /// Another request is discovering this route's bucket
    Preemptive { scope: String, retry_after: Duration },
    /// A bucket or the global window is spent, either by local accounting
    /// or according to a 429 from the server
    Server { retry_after: Duration, is_global: bool },
}

impl Throttle {
    pub fn retry_after(&self) -> Duration {
        match self {
            Throttle::Preemptive { retry_after, .. } | Throttle::Server { retry_after, .. } => {
                *retry_after
            }
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self, Throttle::Server { is_global: true, .. })
    }

    /// Throttle described by a 429 response
    pub fn from_response(headers: &HeaderMap, fallback: Duration) -> Self {
        Throttle::Server {
            retry_after: headers::retry_after(headers, fallback),
            is_global: headers::is_global(headers),
        }
    }
}

/// Result of [`RateLimiter::admit`]
#[derive(Debug)]
pub enum Admission {
    Admitted(Ticket),
    Denied(Throttle),
}

/// Proof of admission, returned to [`RateLimiter::observe`] with the
/// response.
///
/// A probe ticket keeps its route in the pending-discovery set until it is
/// observed or dropped.
#[derive(Debug)]
pub struct Ticket {
    route: RouteKey,
    scope: ScopeKey,
    bucket: Option<Arc<Bucket>>,
    discovery: Option<DiscoveryGuard>,
}

impl Ticket {
    fn new(route: RouteKey, scope: ScopeKey) -> Self {
        Self {
            route,
            scope,
            bucket: None,
            discovery: None,
        }
    }

    pub fn route(&self) -> &RouteKey {
        &self.route
    }

    pub fn scope(&self) -> &ScopeKey {
        &self.scope
    }

    /// Bucket a slot was reserved from, if any
    pub fn bucket(&self) -> Option<&Arc<Bucket>> {
        self.bucket.as_ref()
    }

    /// True if this request is discovering its route's hash, or is the
    /// first request into a known hash under a new scope
    pub fn is_probe(&self) -> bool {
        self.discovery.is_some()
    }

    fn discovers_route(&self) -> bool {
        self.discovery.as_ref().is_some_and(DiscoveryGuard::is_route)
    }

    fn with_discovery(mut self, guard: DiscoveryGuard) -> Self {
        self.discovery = Some(guard);
        self
    }
}

// ============================================================================
// RateLimiter
// ============================================================================

/// Shared rate-limit state for one API identity
#[derive(Debug)]
pub struct RateLimiter {
    epoch: Instant,
    global: GlobalLimiter,
    registry: Arc<RouteRegistry>,
    buckets: DashMap<String, Arc<Bucket>>,
    discovery_window: Duration,
    bucket_idle: Duration,
}

impl RateLimiter {
    pub fn new(config: &RateLimitingConfig) -> Self {
        Self {
            epoch: Instant::now(),
            global: GlobalLimiter::new(config.global_max_requests, config.global_window()),
            registry: Arc::new(RouteRegistry::new()),
            buckets: DashMap::new(),
            discovery_window: config.discovery_window(),
            bucket_idle: config.bucket_idle(),
        }
    }

    /// Milliseconds since this limiter was created
    pub fn now_ms(&self) -> u64 {
        duration_ms(self.epoch.elapsed())
    }

    pub fn global(&self) -> &GlobalLimiter {
        &self.global
    }

    pub fn registry(&self) -> &RouteRegistry {
        &self.registry
    }

    pub fn discovery_window(&self) -> Duration {
        self.discovery_window
    }

    /// Decide whether `request` may be sent now.
    ///
    /// Checks run in order: the all-limits exemption, the global window,
    /// route discovery, then the route's bucket. A denial never reaches
    /// the transport.
    pub fn admit(&self, request: &RequestDescriptor) -> Admission {
        if request.is_exempt_from_all_limits() {
            debug!(route = %request.route_key(), "Request exempt from all limits");
            return Admission::Admitted(self.bypass(request));
        }

        let route = request.route_key();
        let scope = request.scope().clone();

        let now = self.now_ms();

        if !request.is_exempt_from_global_limit() {
            if let Err(retry_after) = self.global.try_acquire(now) {
                warn!(
                    route = %route,
                    retry_after_ms = duration_ms(retry_after),
                    "Global limit reached"
                );
                return Admission::Denied(Throttle::Server {
                    retry_after,
                    is_global: true,
                });
            }
        }

        let Some(hash) = self.registry.resolve(&route) else {
            return match self.registry.try_begin_discovery(&route) {
                Some(guard) => {
                    Admission::Admitted(Ticket::new(route, scope).with_discovery(guard))
                }
                None => {
                    debug!(route = %route, "Route discovery in flight");
                    Admission::Denied(Throttle::Preemptive {
                        scope: route.to_string(),
                        retry_after: self.discovery_window,
                    })
                }
            };
        };

        let bucket_id = scope.bucket_id(&hash);
        let bucket = if hash == UNLIMITED_HASH {
            Some(self.unlimited_bucket(&scope, now))
        } else {
            self.bucket(&bucket_id)
        };

        let Some(bucket) = bucket else {
            // Known hash, but nothing has seeded it under this scope yet
            return match self.registry.try_begin_bucket_discovery(&bucket_id) {
                Some(guard) => {
                    debug!(route = %route, bucket = %bucket_id, "First request into bucket");
                    Admission::Admitted(Ticket::new(route, scope).with_discovery(guard))
                }
                None => {
                    debug!(route = %route, bucket = %bucket_id, "Bucket discovery in flight");
                    Admission::Denied(Throttle::Preemptive {
                        scope: bucket_id,
                        retry_after: self.discovery_window,
                    })
                }
            };
        };

        match bucket.try_reserve(now) {
            Reservation::Admitted => {
                let mut ticket = Ticket::new(route, scope);
                ticket.bucket = Some(bucket);
                Admission::Admitted(ticket)
            }
            Reservation::Exhausted { retry_after } => {
                warn!(
                    route = %route,
                    bucket = %bucket.id(),
                    retry_after_ms = duration_ms(retry_after),
                    "Bucket exhausted"
                );
                Admission::Denied(Throttle::Server {
                    retry_after,
                    is_global: false,
                })
            }
        }
    }

    /// Ticket for a request sent without any gating.
    ///
    /// Its response still feeds [`observe`](Self::observe), so buckets keep
    /// learning from ungated traffic.
    pub fn bypass(&self, request: &RequestDescriptor) -> Ticket {
        Ticket::new(request.route_key(), request.scope().clone())
    }

    /// Fold a response back into the shared state.
    ///
    /// Creates or updates the bucket named by the headers, records a
    /// rehash when the route's hash changed, and closes discovery for a
    /// probe. Responses without complete bucket headers leave buckets
    /// untouched; a successful probe without them binds the route to the
    /// unlimited placeholder.
    pub fn observe(&self, ticket: Ticket, status: StatusCode, headers: &HeaderMap) {
        let now = self.now_ms();

        let Some(snapshot) = headers::extract_bucket(headers) else {
            if let Some(bucket) = ticket.bucket() {
                bucket.touch(now);
            }
            if ticket.discovers_route() && status.is_success() && !headers::is_global(headers) {
                debug!(route = %ticket.route, "Route reported no bucket, treating as unlimited");
                self.registry.bind(&ticket.route, UNLIMITED_HASH);
            }
            return;
        };

        if snapshot.is_global {
            debug!(route = %ticket.route, "Global throttle headers, no bucket update");
            return;
        }

        self.apply_snapshot(&ticket.route, &ticket.scope, &snapshot, now);
        // Dropping the ticket here releases the pending-discovery entry
        // after the registry already knows the hash.
        drop(ticket);
    }

    fn apply_snapshot(
        &self,
        route: &RouteKey,
        scope: &ScopeKey,
        snapshot: &BucketSnapshot,
        now: u64,
    ) {
        let previous = self.registry.bind(route, &snapshot.hash);

        let bucket = match self.buckets.entry(scope.bucket_id(&snapshot.hash)) {
            Entry::Occupied(entry) => {
                entry.get().update(snapshot, now);
                Arc::clone(entry.get())
            }
            Entry::Vacant(entry) => {
                let bucket = Arc::new(Bucket::from_snapshot(scope, snapshot, now));
                debug!(
                    bucket = %bucket.id(),
                    maximum = snapshot.maximum,
                    remaining = snapshot.remaining,
                    "Bucket created"
                );
                entry.insert(Arc::clone(&bucket));
                bucket
            }
        };

        match previous {
            Some(old) if old != snapshot.hash && old != UNLIMITED_HASH => {
                info!(route = %route, old_hash = %old, new_hash = %snapshot.hash, "Route rehashed");
                bucket.record_past_hash(&old);
                if let Some(old_bucket) = self.bucket(&scope.bucket_id(&old)) {
                    for hash in old_bucket.past_hashes() {
                        bucket.record_past_hash(&hash);
                    }
                    let still_bound = self.registry.routes_for_hash(&old);
                    if still_bound.is_empty() {
                        old_bucket.mark_superseded();
                    } else {
                        debug!(
                            bucket = %old_bucket.id(),
                            routes = still_bound.len(),
                            "Old bucket still serves other routes"
                        );
                    }
                }
            }
            Some(old) if old == UNLIMITED_HASH => {
                info!(route = %route, hash = %snapshot.hash, "Route now reports a bucket");
            }
            _ => {}
        }
    }

    fn unlimited_bucket(&self, scope: &ScopeKey, now: u64) -> Arc<Bucket> {
        let entry = self
            .buckets
            .entry(scope.bucket_id(UNLIMITED_HASH))
            .or_insert_with(|| Arc::new(Bucket::unlimited(scope, now)));
        Arc::clone(entry.value())
    }

    /// Bucket by its full identifier (`hash:guild:channel:webhook`)
    pub fn bucket(&self, id: &str) -> Option<Arc<Bucket>> {
        self.buckets.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Bucket currently serving `route` under `scope`
    pub fn bucket_for_route(&self, route: &RouteKey, scope: &ScopeKey) -> Option<Arc<Bucket>> {
        let hash = self.registry.resolve(route)?;
        self.bucket(&scope.bucket_id(&hash))
    }

    /// Every live bucket that wears `hash` now or wore it before a rehash
    pub fn find_by_hash(&self, hash: &str) -> Vec<Arc<Bucket>> {
        let mut found: Vec<Arc<Bucket>> = self
            .buckets
            .iter()
            .filter(|entry| entry.value().has_worn(hash))
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        found.sort_by(|a, b| a.id().cmp(b.id()));
        found
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Drop buckets idle for longer than the configured grace period.
    ///
    /// A bucket still referenced by an in-flight ticket is kept regardless
    /// of age. Returns the number of buckets removed.
    pub fn sweep(&self) -> usize {
        let now = self.now_ms();
        let before = self.buckets.len();
        self.buckets.retain(|id, bucket| {
            let expired =
                Arc::strong_count(bucket) == 1 && bucket.idle_for(now) >= self.bucket_idle;
            if expired {
                debug!(bucket = %id, superseded = bucket.is_superseded(), "Removing idle bucket");
            }
            !expired
        });
        let removed = before.saturating_sub(self.buckets.len());
        if removed > 0 {
            info!(removed, remaining = self.buckets.len(), "Bucket cleanup finished");
        }
        removed
    }

    /// Run [`sweep`](Self::sweep) every `interval` until `shutdown` fires.
    pub fn spawn_cleanup(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Bucket cleanup stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        limiter.sweep();
                    }
                }
            }
        })
    }
}
