//! Rate-limit buckets
//!
//! A [`Bucket`] mirrors one server-side quota window: a hash plus the
//! major-parameter scope it was observed under. Reservations are a single
//! compare-and-swap on `remaining`; no lock is held while deciding.
//!
//! Times are stored as milliseconds relative to the owning limiter's epoch
//! so every field fits in an atomic.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashSet;
use ratewire_core::domain::ScopeKey;
use tracing::{debug, warn};

use crate::headers::BucketSnapshot;

/// Hash bound to routes whose responses carry no bucket headers
pub const UNLIMITED_HASH: &str = "unlimited";

/// Convert a duration to whole milliseconds, saturating
pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Window length for `reset_after`, never shorter than one millisecond
/// so a rolled window always ends strictly after the instant it started.
fn window_ms(reset_after: Duration) -> u64 {
    duration_ms(reset_after).max(1)
}

/// Outcome of [`Bucket::try_reserve`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// One request slot was taken from the bucket
    Admitted,
    /// The window is spent; wait this long for the reset
    Exhausted { retry_after: Duration },
}

/// A discovered rate-limit window
#[derive(Debug)]
pub struct Bucket {
    id: String,
    hash: String,
    unlimited: bool,
    maximum: AtomicI64,
    remaining: AtomicI64,
    reset_at_ms: AtomicU64,
    reset_after_ms: AtomicU64,
    last_touched_ms: AtomicU64,
    /// Hashes the routes now served by this bucket used to report
    past_hashes: DashSet<String>,
    /// Set once a rehash moved every route away from this bucket
    superseded: AtomicBool,
}

impl Bucket {
    /// Create a bucket seeded from the first response that named it.
    pub fn from_snapshot(scope: &ScopeKey, snapshot: &BucketSnapshot, now_ms: u64) -> Self {
        let reset_after_ms = window_ms(snapshot.reset_after);
        let remaining = sanitize_remaining(&snapshot.hash, snapshot.remaining);
        Self {
            id: scope.bucket_id(&snapshot.hash),
            hash: snapshot.hash.clone(),
            unlimited: false,
            maximum: AtomicI64::new(snapshot.maximum),
            remaining: AtomicI64::new(remaining),
            reset_at_ms: AtomicU64::new(now_ms.saturating_add(reset_after_ms)),
            reset_after_ms: AtomicU64::new(reset_after_ms),
            last_touched_ms: AtomicU64::new(now_ms),
            past_hashes: DashSet::new(),
            superseded: AtomicBool::new(false),
        }
    }

    /// Placeholder for a route that reported no bucket; only the global
    /// limiter applies to it.
    pub fn unlimited(scope: &ScopeKey, now_ms: u64) -> Self {
        Self {
            id: scope.bucket_id(UNLIMITED_HASH),
            hash: UNLIMITED_HASH.to_string(),
            unlimited: true,
            maximum: AtomicI64::new(i64::MAX),
            remaining: AtomicI64::new(i64::MAX),
            reset_at_ms: AtomicU64::new(0),
            reset_after_ms: AtomicU64::new(0),
            last_touched_ms: AtomicU64::new(now_ms),
            past_hashes: DashSet::new(),
            superseded: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn is_unlimited(&self) -> bool {
        self.unlimited
    }

    pub fn maximum(&self) -> i64 {
        self.maximum.load(Ordering::Acquire)
    }

    pub fn remaining(&self) -> i64 {
        self.remaining.load(Ordering::Acquire)
    }

    /// Reset deadline in limiter-epoch milliseconds
    pub fn reset_at_ms(&self) -> u64 {
        self.reset_at_ms.load(Ordering::Acquire)
    }

    pub fn reset_after(&self) -> Duration {
        Duration::from_millis(self.reset_after_ms.load(Ordering::Acquire))
    }

    pub fn last_touched_ms(&self) -> u64 {
        self.last_touched_ms.load(Ordering::Acquire)
    }

    pub fn touch(&self, now_ms: u64) {
        self.last_touched_ms.fetch_max(now_ms, Ordering::AcqRel);
    }

    /// Time since a request last used this bucket
    pub fn idle_for(&self, now_ms: u64) -> Duration {
        Duration::from_millis(now_ms.saturating_sub(self.last_touched_ms()))
    }

    /// Remember that routes served by this bucket once reported `hash`
    pub fn record_past_hash(&self, hash: &str) {
        if hash != self.hash {
            self.past_hashes.insert(hash.to_string());
        }
    }

    /// True if this bucket currently wears `hash` or wore it before
    pub fn has_worn(&self, hash: &str) -> bool {
        self.hash == hash || self.past_hashes.contains(hash)
    }

    pub fn past_hashes(&self) -> Vec<String> {
        let mut hashes: Vec<String> = self.past_hashes.iter().map(|h| h.clone()).collect();
        hashes.sort();
        hashes
    }

    pub fn mark_superseded(&self) {
        self.superseded.store(true, Ordering::Release);
    }

    pub fn is_superseded(&self) -> bool {
        self.superseded.load(Ordering::Acquire)
    }

    /// Time until the current window resets, zero if already due
    pub fn time_until_reset(&self, now_ms: u64) -> Duration {
        Duration::from_millis(self.reset_at_ms().saturating_sub(now_ms))
    }

    /// Restore `remaining` to `maximum` if the window has elapsed.
    ///
    /// Exactly one caller wins the swap of the reset deadline and performs
    /// the restore. Returns true for that caller.
    pub fn reset_if_elapsed(&self, now_ms: u64) -> bool {
        if self.unlimited {
            return false;
        }
        let reset_at = self.reset_at_ms.load(Ordering::Acquire);
        if now_ms < reset_at {
            return false;
        }
        let next = now_ms.saturating_add(self.reset_after_ms.load(Ordering::Acquire));
        if self
            .reset_at_ms
            .compare_exchange(reset_at, next, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let maximum = self.maximum.load(Ordering::Acquire);
        self.remaining.store(maximum, Ordering::Release);
        debug!(bucket = %self.id, maximum, "Bucket window reset");
        true
    }

    /// Try to take one request slot.
    ///
    /// The decrement is a compare-and-swap loop that never takes
    /// `remaining` below zero. A negative value found here is clamped to
    /// zero and reported as exhausted.
    pub fn try_reserve(&self, now_ms: u64) -> Reservation {
        self.touch(now_ms);
        if self.unlimited {
            return Reservation::Admitted;
        }
        self.reset_if_elapsed(now_ms);

        let decremented =
            self.remaining
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |remaining| {
                    (remaining > 0).then(|| remaining - 1)
                });

        match decremented {
            Ok(previous) => {
                debug!(bucket = %self.id, remaining = previous - 1, "Reserved bucket slot");
                Reservation::Admitted
            }
            Err(current) => {
                if current < 0 {
                    warn!(
                        bucket = %self.id,
                        remaining = current,
                        "Negative remaining count, clamping to zero"
                    );
                    let _ = self.remaining.compare_exchange(
                        current,
                        0,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    );
                }
                Reservation::Exhausted {
                    retry_after: self.time_until_reset(now_ms),
                }
            }
        }
    }

    /// Overwrite quota state with what the server reported.
    ///
    /// Last write wins: whichever response completes last decides the
    /// state the next reservation sees.
    pub fn update(&self, snapshot: &BucketSnapshot, now_ms: u64) {
        if self.unlimited {
            self.touch(now_ms);
            return;
        }
        let reset_after_ms = window_ms(snapshot.reset_after);
        let remaining = sanitize_remaining(&snapshot.hash, snapshot.remaining);

        self.maximum.store(snapshot.maximum, Ordering::Release);
        self.reset_after_ms.store(reset_after_ms, Ordering::Release);
        self.reset_at_ms
            .store(now_ms.saturating_add(reset_after_ms), Ordering::Release);
        self.remaining.store(remaining, Ordering::Release);
        self.touch(now_ms);

        debug!(
            bucket = %self.id,
            maximum = snapshot.maximum,
            remaining,
            reset_after_ms,
            "Bucket updated from response"
        );
    }
}

fn sanitize_remaining(hash: &str, remaining: i64) -> i64 {
    if remaining < 0 {
        warn!(hash, remaining, "Server reported negative remaining, clamping to zero");
        0
    } else {
        remaining
    }
}
