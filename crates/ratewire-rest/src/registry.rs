//! Route registry
//!
//! Maps each route to the bucket hash the server last reported for it and
//! tracks what is still being discovered: routes with no known hash, and
//! scoped buckets of a known hash that no response has seeded yet. Entry
//! into a pending set is a single atomic insert, so exactly one caller
//! becomes the probe.

use std::fmt;
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use ratewire_core::domain::RouteKey;
use tracing::debug;

/// What a probe is discovering
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Pending {
    /// The hash of a route
    Route(RouteKey),
    /// The quota of a known hash under a new major-parameter scope
    Bucket(String),
}

impl fmt::Display for Pending {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pending::Route(route) => write!(f, "route {route}"),
            Pending::Bucket(id) => write!(f, "bucket {id}"),
        }
    }
}

/// Route → bucket hash mapping plus the pending-discovery set
#[derive(Debug, Default)]
pub struct RouteRegistry {
    routes: DashMap<RouteKey, String>,
    pending: DashSet<Pending>,
}

impl RouteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash currently bound to `route`
    pub fn resolve(&self, route: &RouteKey) -> Option<String> {
        self.routes.get(route).map(|hash| hash.value().clone())
    }

    /// Claim the right to probe `route`.
    ///
    /// Returns a guard for the single caller that inserted the route into
    /// the pending set; everyone else gets `None` until the guard drops.
    pub fn try_begin_discovery(self: &Arc<Self>, route: &RouteKey) -> Option<DiscoveryGuard> {
        self.claim(Pending::Route(route.clone()))
    }

    /// Claim the right to send the first request into bucket `bucket_id`,
    /// a known hash under a scope no response has seeded yet.
    pub fn try_begin_bucket_discovery(
        self: &Arc<Self>,
        bucket_id: &str,
    ) -> Option<DiscoveryGuard> {
        self.claim(Pending::Bucket(bucket_id.to_string()))
    }

    fn claim(self: &Arc<Self>, pending: Pending) -> Option<DiscoveryGuard> {
        if !self.pending.insert(pending.clone()) {
            return None;
        }
        debug!(pending = %pending, "Probing");
        Some(DiscoveryGuard {
            registry: Arc::clone(self),
            pending,
        })
    }

    pub fn is_pending(&self, route: &RouteKey) -> bool {
        self.pending.contains(&Pending::Route(route.clone()))
    }

    pub fn is_bucket_pending(&self, bucket_id: &str) -> bool {
        self.pending.contains(&Pending::Bucket(bucket_id.to_string()))
    }

    /// Bind `route` to `hash`, returning the hash it was bound to before.
    pub fn bind(&self, route: &RouteKey, hash: &str) -> Option<String> {
        self.routes.insert(route.clone(), hash.to_string())
    }

    /// Routes currently bound to `hash`
    pub fn routes_for_hash(&self, hash: &str) -> Vec<RouteKey> {
        let mut routes: Vec<RouteKey> = self
            .routes
            .iter()
            .filter(|entry| entry.value() == hash)
            .map(|entry| entry.key().clone())
            .collect();
        routes.sort();
        routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Held by the probing request for an unknown route or unseeded bucket.
///
/// Dropping the guard removes the entry from the pending set, whether the
/// probe completed, failed, or was cancelled mid-flight.
#[derive(Debug)]
pub struct DiscoveryGuard {
    registry: Arc<RouteRegistry>,
    pending: Pending,
}

impl DiscoveryGuard {
    /// True when probing a route's hash rather than a scoped bucket
    pub fn is_route(&self) -> bool {
        matches!(self.pending, Pending::Route(_))
    }
}

impl Drop for DiscoveryGuard {
    fn drop(&mut self) {
        self.registry.pending.remove(&self.pending);
        debug!(pending = %self.pending, "Discovery window closed");
    }
}
