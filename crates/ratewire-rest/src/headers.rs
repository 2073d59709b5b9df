//! Rate-limit header extraction
//!
//! Every response may carry a description of the bucket that served it.
//! [`extract_bucket`] turns those headers into a [`BucketSnapshot`] when,
//! and only when, all the required headers are present. A partial set is
//! treated as "no bucket information" so it can never corrupt a bucket.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::HeaderMap;
use tracing::warn;

/// Maximum requests in the bucket's window
pub const LIMIT: &str = "x-ratelimit-limit";
/// Requests left in the current window
pub const REMAINING: &str = "x-ratelimit-remaining";
/// Unix timestamp (fractional seconds) at which the window resets
pub const RESET: &str = "x-ratelimit-reset";
/// Seconds (fractional) until the window resets
pub const RESET_AFTER: &str = "x-ratelimit-reset-after";
/// Opaque bucket hash
pub const BUCKET: &str = "x-ratelimit-bucket";
/// Present and `true` on global throttles
pub const GLOBAL: &str = "x-ratelimit-global";
/// Throttle scope on 429 responses: `user`, `global` or `shared`
pub const SCOPE: &str = "x-ratelimit-scope";
/// Seconds to wait before retrying a 429
pub const RETRY_AFTER: &str = "retry-after";

/// Upper bound accepted for any server-provided wait
const MAX_SERVER_WAIT: Duration = Duration::from_secs(3600);

/// Bucket state reported by one response
#[derive(Debug, Clone, PartialEq)]
pub struct BucketSnapshot {
    pub hash: String,
    pub maximum: i64,
    pub remaining: i64,
    /// Absolute reset time, when the server sent one
    pub reset_at: Option<DateTime<Utc>>,
    /// Time until the window resets, as seen when the response arrived
    pub reset_after: Duration,
    pub is_global: bool,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name)?.to_str().ok().map(str::trim)
}

fn header_f64(headers: &HeaderMap, name: &str) -> Option<f64> {
    header_str(headers, name)?
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

fn seconds(value: f64) -> Duration {
    if value >= MAX_SERVER_WAIT.as_secs_f64() {
        return MAX_SERVER_WAIT;
    }
    Duration::from_secs_f64(value.max(0.0))
}

/// Parse the bucket snapshot out of `headers`.
///
/// Requires the bucket hash, limit and remaining headers plus at least one
/// of reset-after / reset. Returns `None` otherwise.
pub fn extract_bucket(headers: &HeaderMap) -> Option<BucketSnapshot> {
    let hash = header_str(headers, BUCKET).filter(|h| !h.is_empty())?;
    let maximum = header_str(headers, LIMIT)?.parse::<i64>().ok()?;
    let remaining = header_str(headers, REMAINING)?.parse::<i64>().ok()?;

    let reset_at = header_f64(headers, RESET).and_then(|epoch| {
        let millis = (epoch * 1000.0).round() as i64;
        Utc.timestamp_millis_opt(millis).single()
    });
    let reset_after = match (header_f64(headers, RESET_AFTER), reset_at) {
        (Some(after), _) => seconds(after),
        (None, Some(at)) => (at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO)
            .min(MAX_SERVER_WAIT),
        (None, None) => return None,
    };

    Some(BucketSnapshot {
        hash: hash.to_string(),
        maximum,
        remaining,
        reset_at,
        reset_after,
        is_global: is_global(headers),
    })
}

/// True when the response describes the global limit rather than a route bucket.
pub fn is_global(headers: &HeaderMap) -> bool {
    let flagged = header_str(headers, GLOBAL).is_some_and(|v| v.eq_ignore_ascii_case("true"));
    let scoped = header_str(headers, SCOPE).is_some_and(|v| v.eq_ignore_ascii_case("global"));
    flagged || scoped
}

/// Wait requested by a throttled response.
///
/// Uses `Retry-After`, then `X-RateLimit-Reset-After`, then `fallback`.
pub fn retry_after(headers: &HeaderMap, fallback: Duration) -> Duration {
    if let Some(value) = header_str(headers, RETRY_AFTER) {
        return parse_retry_after(value, fallback);
    }
    header_f64(headers, RESET_AFTER)
        .map(seconds)
        .unwrap_or(fallback)
}

/// Parses a Retry-After header value into a Duration.
///
/// The header can be either:
/// - A number of seconds, possibly fractional (e.g., "1.5")
/// - An HTTP-date (e.g., "Fri, 31 Dec 2025 23:59:59 GMT") - parsed as time from now
///
/// Falls back to the default duration if parsing fails.
pub fn parse_retry_after(value: &str, default: Duration) -> Duration {
    if let Ok(secs) = value.trim().parse::<f64>() {
        if secs.is_finite() {
            return seconds(secs);
        }
    }

    if let Ok(date) = DateTime::parse_from_rfc2822(value.trim()) {
        let target = date.with_timezone(&Utc);
        return (target - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO)
            .min(MAX_SERVER_WAIT);
    }

    warn!(value, "Could not parse Retry-After header, using default");
    default
}
