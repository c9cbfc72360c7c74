//! API quota tracking and adaptive poll cadence.
//!
//! The limiter answers two questions each poll: how long to sleep, and
//! whether to switch queries to the cheaper REST endpoints. Observations are
//! cached (memory, then file) for a short TTL so that a poll costs at most
//! one quota query.
//!
//! # Interval tiers
//!
//! | remaining    | multiplier |
//! |--------------|------------|
//! | ≥ 500        | ×1         |
//! | 100 ..= 499  | ×2         |
//! | 50 ..= 99    | ×4         |
//! | < 50         | ×6         |

mod cache;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use cache::{CacheEntry, FileCache, MemoryCache, RateLimitCache};

use crate::clock::Clock;
use crate::github::ReviewHost;

/// Observations younger than this are reused.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

/// Below this many remaining calls, queries switch to REST.
pub const REST_PRIORITY_THRESHOLD: u64 = 200;

/// A quota observation. `limit == 0` means "unknown", never "no quota".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitStatus {
    pub remaining: u64,
    pub limit: u64,
    /// Unix seconds at which the quota resets.
    pub reset: i64,
}

impl RateLimitStatus {
    /// The observation reported when the quota could not be determined.
    pub const UNKNOWN: Self = RateLimitStatus {
        remaining: 0,
        limit: 0,
        reset: 0,
    };

    pub fn is_known(&self) -> bool {
        self.limit > 0
    }

    /// Poll interval to use given this observation.
    ///
    /// An unknown quota leaves `base` unchanged rather than throttling as if
    /// the quota were exhausted.
    pub fn poll_interval(&self, base: Duration) -> Duration {
        if self.is_known() {
            adjusted_interval(base, self.remaining)
        } else {
            base
        }
    }
}

/// Scales `base` by the tier `remaining` falls in. Each tier includes its
/// lower boundary.
pub fn adjusted_interval(base: Duration, remaining: u64) -> Duration {
    let multiplier = match remaining {
        500.. => 1,
        100..=499 => 2,
        50..=99 => 4,
        _ => 6,
    };
    base * multiplier
}

/// Quota tracker with a two-tier cache.
pub struct RateLimiter {
    memory: Box<dyn RateLimitCache>,
    file: Option<Box<dyn RateLimitCache>>,
    ttl: Duration,
    rest_priority: bool,
}

impl RateLimiter {
    pub fn new(
        memory: Box<dyn RateLimitCache>,
        file: Option<Box<dyn RateLimitCache>>,
        ttl: Duration,
    ) -> Self {
        RateLimiter {
            memory,
            file,
            ttl,
            rest_priority: false,
        }
    }

    /// Memory-only limiter, for tests and one-off use.
    pub fn in_memory(ttl: Duration) -> Self {
        Self::new(Box::new(MemoryCache::new()), None, ttl)
    }

    /// Whether the limiter is currently in REST-priority mode.
    pub fn is_rest_priority(&self) -> bool {
        self.rest_priority
    }

    /// Current quota, consulting memory, then file, then the host.
    ///
    /// Any failure yields [`RateLimitStatus::UNKNOWN`].
    pub fn check(
        &mut self,
        host: &dyn ReviewHost,
        clock: &dyn Clock,
        use_cache: bool,
    ) -> RateLimitStatus {
        let now = clock.unix_now();

        if use_cache {
            if let Some(entry) = self.memory.load()
                && entry.is_valid(now, self.ttl)
            {
                return entry.status();
            }
            if let Some(file) = self.file.as_mut()
                && let Some(entry) = file.load()
                && entry.is_valid(now, self.ttl)
            {
                self.memory.store(entry);
                return entry.status();
            }
        }

        match host.rate_limit() {
            Ok(status) => {
                let entry = CacheEntry::new(status, now);
                self.memory.store(entry);
                if let Some(file) = self.file.as_mut() {
                    file.store(entry);
                }
                status
            }
            Err(e) => {
                tracing::debug!(error = %e, "rate limit query failed");
                RateLimitStatus::UNKNOWN
            }
        }
    }

    /// Whether queries should use REST endpoints this poll.
    ///
    /// Logs only when the mode changes.
    pub fn should_prefer_rest(&mut self, host: &dyn ReviewHost, clock: &dyn Clock) -> bool {
        let status = self.check(host, clock, true);
        let prefer = status.is_known() && status.remaining < REST_PRIORITY_THRESHOLD;

        if prefer != self.rest_priority {
            if prefer {
                tracing::warn!(
                    remaining = status.remaining,
                    limit = status.limit,
                    "API quota low, entering REST-priority mode"
                );
            } else {
                tracing::info!(
                    remaining = status.remaining,
                    limit = status.limit,
                    "leaving REST-priority mode"
                );
            }
            self.rest_priority = prefer;
        }
        prefer
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("ttl", &self.ttl)
            .field("has_file_cache", &self.file.is_some())
            .field("rest_priority", &self.rest_priority)
            .finish()
    }
}
