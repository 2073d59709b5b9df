//! Global request limiter
//!
//! One fixed window shared by every request that is not exempt from the
//! global limit. The window state sits behind a short-lived mutex: both
//! the reset and the decrement must observe the same window, and the
//! critical section is a handful of integer operations.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tracing::debug;

use crate::bucket::duration_ms;

#[derive(Debug)]
struct GlobalWindow {
    remaining: u32,
    reset_at_ms: u64,
}

/// Process-wide fixed-window counter
#[derive(Debug)]
pub struct GlobalLimiter {
    maximum: u32,
    window_ms: u64,
    state: Mutex<GlobalWindow>,
}

impl GlobalLimiter {
    /// Create a limiter admitting `maximum` requests per `window`.
    ///
    /// The first window starts at the limiter epoch (0 ms).
    pub fn new(maximum: u32, window: Duration) -> Self {
        let window_ms = duration_ms(window).max(1);
        Self {
            maximum,
            window_ms,
            state: Mutex::new(GlobalWindow {
                remaining: maximum,
                reset_at_ms: window_ms,
            }),
        }
    }

    pub fn maximum(&self) -> u32 {
        self.maximum
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    fn with_window<R>(&self, now_ms: u64, f: impl FnOnce(&mut GlobalWindow) -> R) -> R {
        let mut window = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if now_ms >= window.reset_at_ms {
            window.remaining = self.maximum;
            window.reset_at_ms = now_ms.saturating_add(self.window_ms);
            debug!(maximum = self.maximum, "Global window reset");
        }
        f(&mut window)
    }

    /// Take one slot from the current window.
    ///
    /// Returns the wait until the window resets when no slot is left.
    pub fn try_acquire(&self, now_ms: u64) -> Result<(), Duration> {
        self.with_window(now_ms, |window| {
            if window.remaining == 0 {
                return Err(Duration::from_millis(
                    window.reset_at_ms.saturating_sub(now_ms),
                ));
            }
            window.remaining -= 1;
            Ok(())
        })
    }

    /// Slots left in the window current at `now_ms`
    pub fn remaining(&self, now_ms: u64) -> u32 {
        self.with_window(now_ms, |window| window.remaining)
    }

    /// Reset deadline of the window current at `now_ms`
    pub fn reset_at_ms(&self, now_ms: u64) -> u64 {
        self.with_window(now_ms, |window| window.reset_at_ms)
    }
}
