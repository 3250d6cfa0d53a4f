// SPDX-License-Identifier: PMPL-1.0-or-later

//! Fixed-window rate limiter for GraphQL fields.
//!
//! Every key owns one counter and one window. The first consumption for a key
//! opens a window of `duration` seconds; consumptions inside the window are
//! admitted until `limit` points have been spent, after which they are denied
//! (without touching the counter) until the window expires.
//!
//! Counters live in a [`DashMap`]; the whole read-check-increment sequence runs
//! under the entry lock for its key, so concurrent requests cannot both take
//! the last point of capacity.

use crate::clock::{Clock, SystemClock};
use crate::error::{AppError, Result};
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Longest accepted window: one year.
pub const MAX_DURATION_SECS: i64 = 365 * 24 * 60 * 60;

/// Capacity and window of one rate-limited field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLimitSpec {
    points: u32,
    window: Duration,
}

impl FieldLimitSpec {
    /// Validate raw `limit` / `duration` annotation values.
    ///
    /// Both must be positive and the duration at most [`MAX_DURATION_SECS`];
    /// anything else is a configuration error that must stop the server
    /// before it accepts traffic.
    pub fn new(limit: i64, duration_secs: i64) -> Result<Self> {
        if limit <= 0 {
            return Err(AppError::Configuration(format!(
                "rate limit must be a positive integer, got {limit}"
            )));
        }
        if duration_secs <= 0 {
            return Err(AppError::Configuration(format!(
                "rate limit duration must be a positive number of seconds, got {duration_secs}"
            )));
        }
        if duration_secs > MAX_DURATION_SECS {
            return Err(AppError::Configuration(format!(
                "rate limit duration {duration_secs}s exceeds the maximum of {MAX_DURATION_SECS}s"
            )));
        }
        let points = u32::try_from(limit).map_err(|_| {
            AppError::Configuration(format!("rate limit {limit} is out of range"))
        })?;

        Ok(Self {
            points,
            window: Duration::from_secs(duration_secs.unsigned_abs()),
        })
    }

    /// Points that may be spent per window.
    pub fn points(&self) -> u32 {
        self.points
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn window_secs(&self) -> u64 {
        self.window.as_secs()
    }
}

/// Lookup key: `<identity>:<Type>.<field>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    pub fn new(identity: &str, type_name: &str, field_name: &str) -> Self {
        Self(format!("{identity}:{type_name}.{field_name}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of a consumption attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Points were taken from the window
    Admitted {
        /// Points left in the current window
        remaining: u32,
    },
    /// Capacity exhausted; the counter was left untouched
    Denied {
        /// Whole seconds until the window resets, rounded up
        retry_after_secs: u64,
    },
}

impl Outcome {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Outcome::Admitted { .. })
    }
}

/// Per-key counter state.
#[derive(Debug, Clone, Copy)]
struct ConsumptionRecord {
    consumed: u32,
    expires_at: Instant,
}

impl ConsumptionRecord {
    fn open(now: Instant, window: Duration) -> Self {
        Self {
            consumed: 0,
            expires_at: now + window,
        }
    }
}

/// In-memory fixed-window rate limiter shared by every request of the process.
pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    records: DashMap<RateLimitKey, ConsumptionRecord>,
}

impl RateLimiter {
    /// Create a rate limiter on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            records: DashMap::new(),
        }
    }

    /// Try to spend `points` from `key`'s window.
    pub fn consume(&self, key: &RateLimitKey, points: u32, spec: &FieldLimitSpec) -> Outcome {
        let now = self.clock.now();

        let mut record = self
            .records
            .entry(key.clone())
            .or_insert_with(|| ConsumptionRecord::open(now, spec.window()));

        if now >= record.expires_at {
            *record = ConsumptionRecord::open(now, spec.window());
        }

        let wanted = record.consumed.saturating_add(points);
        if wanted <= spec.points() {
            record.consumed = wanted;
            let remaining = spec.points() - wanted;
            trace!(%key, points, remaining, "Consumed rate limit points");
            Outcome::Admitted { remaining }
        } else {
            let retry_after_secs = ceil_secs(record.expires_at.saturating_duration_since(now));
            debug!(%key, retry_after_secs, "Rate limit exceeded");
            Outcome::Denied { retry_after_secs }
        }
    }

    /// Drop records whose window has already ended.
    ///
    /// Such records would be reset on their next use, so this never changes an
    /// admission decision.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.records.len();
        self.records.retain(|_, record| now < record.expires_at);
        let purged = before.saturating_sub(self.records.len());
        if purged > 0 {
            debug!(purged, "Purged expired rate limit records");
        }
        purged
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&self) {
        self.records.clear();
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter() -> (RateLimiter, ManualClock) {
        let clock = ManualClock::default();
        (RateLimiter::with_clock(Arc::new(clock.clone())), clock)
    }

    fn key(identity: &str) -> RateLimitKey {
        RateLimitKey::new(identity, "Query", "quote")
    }

    #[test]
    fn test_key_format() {
        assert_eq!(
            RateLimitKey::new("10.0.0.1:token", "Query", "books").as_str(),
            "10.0.0.1:token:Query.books"
        );
    }

    #[test]
    fn test_spec_rejects_non_positive_values() {
        assert!(matches!(
            FieldLimitSpec::new(0, 15),
            Err(AppError::Configuration(_))
        ));
        assert!(matches!(
            FieldLimitSpec::new(1, 0),
            Err(AppError::Configuration(_))
        ));
        assert!(matches!(
            FieldLimitSpec::new(-3, 15),
            Err(AppError::Configuration(_))
        ));
        assert!(FieldLimitSpec::new(i64::from(u32::MAX) + 1, 15).is_err());
    }

    #[test]
    fn test_spec_rejects_unbounded_duration() {
        assert!(matches!(
            FieldLimitSpec::new(1, i64::MAX),
            Err(AppError::Configuration(_))
        ));
        assert!(FieldLimitSpec::new(1, MAX_DURATION_SECS + 1).is_err());

        let longest = FieldLimitSpec::new(1, MAX_DURATION_SECS).unwrap();
        let limiter = RateLimiter::new();
        let key = RateLimitKey::new("", "Query", "quote");
        assert!(limiter.consume(&key, 1, &longest).is_admitted());
        assert!(!limiter.consume(&key, 1, &longest).is_admitted());
    }

    #[test]
    fn test_admits_up_to_limit_then_denies() {
        let (limiter, _clock) = limiter();
        let spec = FieldLimitSpec::new(3, 60).unwrap();
        let key = key("a");

        for i in 0..3 {
            let outcome = limiter.consume(&key, 1, &spec);
            assert_eq!(outcome, Outcome::Admitted { remaining: 2 - i });
        }

        assert_eq!(
            limiter.consume(&key, 1, &spec),
            Outcome::Denied {
                retry_after_secs: 60
            }
        );
    }

    #[test]
    fn test_retry_after_counts_down_and_rounds_up() {
        let (limiter, clock) = limiter();
        let spec = FieldLimitSpec::new(1, 15).unwrap();
        let key = key("a");

        assert!(limiter.consume(&key, 1, &spec).is_admitted());

        clock.advance(Duration::from_millis(4_500));
        assert_eq!(
            limiter.consume(&key, 1, &spec),
            Outcome::Denied {
                retry_after_secs: 11
            }
        );

        clock.advance(Duration::from_millis(10_499));
        assert_eq!(
            limiter.consume(&key, 1, &spec),
            Outcome::Denied {
                retry_after_secs: 1
            }
        );
    }

    #[test]
    fn test_window_resets_after_duration() {
        let (limiter, clock) = limiter();
        let spec = FieldLimitSpec::new(1, 15).unwrap();
        let key = key("a");

        assert!(limiter.consume(&key, 1, &spec).is_admitted());
        assert!(!limiter.consume(&key, 1, &spec).is_admitted());
        assert!(!limiter.consume(&key, 1, &spec).is_admitted());

        clock.advance(Duration::from_secs(15));
        assert!(limiter.consume(&key, 1, &spec).is_admitted());
        assert!(!limiter.consume(&key, 1, &spec).is_admitted());
    }

    #[test]
    fn test_denial_does_not_extend_window() {
        let (limiter, clock) = limiter();
        let spec = FieldLimitSpec::new(1, 10).unwrap();
        let key = key("a");

        assert!(limiter.consume(&key, 1, &spec).is_admitted());
        for _ in 0..9 {
            clock.advance(Duration::from_secs(1));
            assert!(!limiter.consume(&key, 1, &spec).is_admitted());
        }
        clock.advance(Duration::from_secs(1));
        assert!(limiter.consume(&key, 1, &spec).is_admitted());
    }

    #[test]
    fn test_keys_are_independent() {
        let (limiter, _clock) = limiter();
        let spec = FieldLimitSpec::new(1, 15).unwrap();

        assert!(limiter.consume(&key("a"), 1, &spec).is_admitted());
        assert!(!limiter.consume(&key("a"), 1, &spec).is_admitted());

        assert!(limiter.consume(&key("b"), 1, &spec).is_admitted());
        let books = RateLimitKey::new("a", "Query", "books");
        assert!(limiter.consume(&books, 1, &spec).is_admitted());
    }

    #[test]
    fn test_more_points_than_capacity_never_admitted() {
        let (limiter, _clock) = limiter();
        let spec = FieldLimitSpec::new(2, 15).unwrap();

        assert!(!limiter.consume(&key("a"), 3, &spec).is_admitted());
        // The failed attempt did not spend anything.
        assert_eq!(
            limiter.consume(&key("a"), 2, &spec),
            Outcome::Admitted { remaining: 0 }
        );
    }

    #[test]
    fn test_retry_after_within_bounds() {
        let (limiter, clock) = limiter();
        let spec = FieldLimitSpec::new(1, 15).unwrap();
        let key = key("a");
        limiter.consume(&key, 1, &spec);

        for _ in 0..30 {
            if let Outcome::Denied { retry_after_secs } = limiter.consume(&key, 1, &spec) {
                assert!(retry_after_secs <= spec.window_secs());
            }
            clock.advance(Duration::from_millis(700));
        }
    }

    #[test]
    fn test_concurrent_consumers_share_single_point() {
        let limiter = Arc::new(RateLimiter::new());
        let spec = FieldLimitSpec::new(1, 60).unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || limiter.consume(&key("shared"), 1, &spec).is_admitted())
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|admitted| *admitted)
            .count();
        assert_eq!(admitted, 1);
    }

    #[test]
    fn test_purge_expired_only_drops_finished_windows() {
        let (limiter, clock) = limiter();
        let short = FieldLimitSpec::new(1, 5).unwrap();
        let long = FieldLimitSpec::new(1, 60).unwrap();

        limiter.consume(&key("short"), 1, &short);
        limiter.consume(&key("long"), 1, &long);
        assert_eq!(limiter.len(), 2);

        clock.advance(Duration::from_secs(5));
        assert_eq!(limiter.purge_expired(), 1);
        assert_eq!(limiter.len(), 1);
        assert!(!limiter.consume(&key("long"), 1, &long).is_admitted());

        limiter.clear();
        assert!(limiter.is_empty());
    }
}
