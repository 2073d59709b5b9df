//! Throttle retry loop
//!
//! Throttles, whether decided locally by the gate or returned by the
//! server as a 429, are waited out and re-attempted. Everything else,
//! including transport failures, passes straight through.

use std::future::Future;
use std::time::Duration;

use ratewire_core::config::RateLimitingConfig;
use tracing::{info, warn};

use crate::bucket::duration_ms;
use crate::rate_limit::Throttle;
use crate::response::{ApiFailure, ResponseRecord};
use crate::RestError;

/// Result of one attempt as seen by the retry loop
#[derive(Debug)]
pub enum AttemptOutcome {
    /// A response that is not a throttle
    Completed(ResponseRecord),
    /// Denied by the gate (`response` is `None`) or a 429 from the server
    Throttled {
        throttle: Throttle,
        response: Option<ResponseRecord>,
    },
}

/// How many throttles to sit out, and how long to wait when the throttle
/// does not say
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: Option<u32>,
    fallback: Duration,
}

impl RetryPolicy {
    /// `max_retries` of `None` retries forever
    pub fn new(max_retries: Option<u32>, fallback: Duration) -> Self {
        Self {
            max_retries,
            fallback,
        }
    }

    pub fn from_config(config: &RateLimitingConfig) -> Self {
        Self::new(config.max_retries, config.retry_fallback())
    }

    pub fn max_retries(&self) -> Option<u32> {
        self.max_retries
    }

    pub fn fallback(&self) -> Duration {
        self.fallback
    }

    /// False when retrying is switched off, which also switches off the
    /// preemptive gate
    pub fn gating_enabled(&self) -> bool {
        self.max_retries != Some(0)
    }

    /// Whether another attempt may follow `retries` earlier retries
    pub fn allows_retry(&self, retries: u32) -> bool {
        self.max_retries.map_or(true, |max| retries < max)
    }

    /// Wait before re-attempting after `throttle`
    pub fn delay_for(&self, throttle: &Throttle) -> Duration {
        let retry_after = throttle.retry_after();
        if retry_after.is_zero() {
            self.fallback
        } else {
            retry_after
        }
    }

    /// Drive `attempt` until it completes, errors, or the retry budget is
    /// spent. `attempt` receives the number of retries so far.
    pub async fn run<F, Fut>(&self, mut attempt: F) -> Result<ResponseRecord, RestError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<AttemptOutcome, RestError>>,
    {
        let mut retries = 0;
        loop {
            let (throttle, response) = match attempt(retries).await? {
                AttemptOutcome::Completed(response) => return Ok(response),
                AttemptOutcome::Throttled { throttle, response } => (throttle, response),
            };

            if !self.allows_retry(retries) {
                warn!(
                    retries,
                    retry_after_ms = duration_ms(throttle.retry_after()),
                    global = throttle.is_global(),
                    "Retries exhausted while throttled"
                );
                return Err(RestError::RateLimited {
                    throttle,
                    response: response.map(ApiFailure::from),
                });
            }

            let delay = self.delay_for(&throttle);
            info!(
                attempt = retries + 1,
                delay_ms = duration_ms(delay),
                global = throttle.is_global(),
                preemptive = matches!(throttle, Throttle::Preemptive { .. }),
                "Throttled, waiting before retry"
            );
            tokio::time::sleep(delay).await;
            retries += 1;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RateLimitingConfig::default())
    }
}
