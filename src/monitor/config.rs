//! Monitor configuration.
//!
//! Cadences, caps and budgets are fixed constants; only the PR, the overall
//! timeout and the early-exit flag are supplied per invocation
//! ([`MonitorOptions`]). The one environment override is the state
//! directory.
//!
//! # Waits
//!
//! - **Poll interval**: 30 seconds, stretched by the rate limiter when quota
//!   runs low
//! - **Review retry wait**: 60 seconds per cycle, at most 10 cycles per
//!   re-requested review
//! - **Dirty-checkout wait**: 10 seconds per cycle, at most 20 cycles
//! - **Base stability**: no base commit for 5 minutes, checked every 30
//!   seconds for at most 10 minutes

use std::path::PathBuf;
use std::time::Duration;

use crate::github::RetryConfig;
use crate::rate_limit::DEFAULT_CACHE_TTL;
use crate::types::PrNumber;

/// Environment variable overriding the state directory.
pub const STATE_DIR_ENV: &str = "PR_MONITOR_STATE_DIR";

const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
const DEFAULT_FETCH_RETRY_SECS: u64 = 15;
const DEFAULT_MAX_REBASES: u32 = 5;
const DEFAULT_DIRTY_WAIT_CYCLES: u32 = 20;
const DEFAULT_DIRTY_WAIT_SECS: u64 = 10;
const DEFAULT_STABILITY_WINDOW_SECS: u64 = 5 * 60;
const DEFAULT_STABILITY_POLL_SECS: u64 = 30;
const DEFAULT_STABILITY_MAX_WAIT_SECS: u64 = 10 * 60;
const DEFAULT_STABILITY_RESETS: u32 = 1;
const DEFAULT_REVIEW_RETRY_CAP: u32 = 3;
const DEFAULT_REVIEW_WAIT_CYCLES: u32 = 10;
const DEFAULT_REVIEW_WAIT_SECS: u64 = 60;
const DEFAULT_STUCK_REVIEWER_SECS: u64 = 20 * 60;
const DEFAULT_RECREATION_BUDGET: u32 = 1;
const DEFAULT_RECHECK_DELAY_SECS: u64 = 30;
const DEFAULT_RECHECK_MAX_REFRESHES: u32 = 3;

/// Fixed monitor configuration.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Base sleep between polls, before rate-limit scaling.
    pub poll_interval: Duration,

    /// Sleep after a failed state fetch.
    pub fetch_retry_delay: Duration,

    /// Rebases allowed before the stability wait is consulted.
    pub max_rebases: u32,

    /// Polls to wait for a dirty local checkout to become clean.
    pub dirty_wait_cycles: u32,
    pub dirty_wait_interval: Duration,

    /// The base branch counts as stable after this long without a commit.
    pub stability_window: Duration,
    pub stability_poll_interval: Duration,
    pub stability_max_wait: Duration,

    /// Times the rebase counter may be reset by a stable base branch.
    pub stability_resets: u32,

    /// Re-requests allowed per reviewer after error reviews.
    pub review_retry_cap: u32,

    /// Polls to wait for a re-requested review to start.
    pub review_wait_cycles: u32,

    /// Sleep between polls while a re-requested review has not started.
    pub review_wait_interval: Duration,

    /// A reviewer pending this long is considered stuck.
    pub stuck_reviewer_timeout: Duration,

    /// PR recreations allowed per run.
    pub recreation_budget: u32,

    /// Retry ladder for reopening the original PR after a failed recreation.
    pub reopen_retry: RetryConfig,

    /// Delay before the post-rebase reviewer re-check.
    pub recheck_delay: Duration,

    /// Refreshes allowed before the re-check trusts the current snapshot.
    pub recheck_max_refreshes: u32,

    pub rate_limit_ttl: Duration,

    /// Where the state file and rate-limit cache live.
    pub state_dir: PathBuf,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorConfig {
    /// Production constants, with the state directory under the system temp dir.
    pub fn new() -> Self {
        MonitorConfig {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            fetch_retry_delay: Duration::from_secs(DEFAULT_FETCH_RETRY_SECS),
            max_rebases: DEFAULT_MAX_REBASES,
            dirty_wait_cycles: DEFAULT_DIRTY_WAIT_CYCLES,
            dirty_wait_interval: Duration::from_secs(DEFAULT_DIRTY_WAIT_SECS),
            stability_window: Duration::from_secs(DEFAULT_STABILITY_WINDOW_SECS),
            stability_poll_interval: Duration::from_secs(DEFAULT_STABILITY_POLL_SECS),
            stability_max_wait: Duration::from_secs(DEFAULT_STABILITY_MAX_WAIT_SECS),
            stability_resets: DEFAULT_STABILITY_RESETS,
            review_retry_cap: DEFAULT_REVIEW_RETRY_CAP,
            review_wait_cycles: DEFAULT_REVIEW_WAIT_CYCLES,
            review_wait_interval: Duration::from_secs(DEFAULT_REVIEW_WAIT_SECS),
            stuck_reviewer_timeout: Duration::from_secs(DEFAULT_STUCK_REVIEWER_SECS),
            recreation_budget: DEFAULT_RECREATION_BUDGET,
            reopen_retry: RetryConfig::REOPEN,
            recheck_delay: Duration::from_secs(DEFAULT_RECHECK_DELAY_SECS),
            recheck_max_refreshes: DEFAULT_RECHECK_MAX_REFRESHES,
            rate_limit_ttl: DEFAULT_CACHE_TTL,
            state_dir: default_state_dir(),
        }
    }

    /// Production constants, reading `PR_MONITOR_STATE_DIR` for the state
    /// directory.
    pub fn from_env() -> Self {
        let state_dir = std::env::var_os(STATE_DIR_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_state_dir);

        MonitorConfig {
            state_dir,
            ..Self::new()
        }
    }

    pub fn with_state_dir(mut self, state_dir: impl Into<PathBuf>) -> Self {
        self.state_dir = state_dir.into();
        self
    }
}

fn default_state_dir() -> PathBuf {
    std::env::temp_dir().join("pr-monitor")
}

/// Per-invocation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorOptions {
    pub pr: PrNumber,

    /// Overall wall-clock budget.
    pub timeout: Duration,

    /// Return as soon as review comments appear, without waiting for CI.
    pub early_exit: bool,
}

impl MonitorOptions {
    pub fn new(pr: PrNumber, timeout_minutes: u64, early_exit: bool) -> Self {
        MonitorOptions {
            pr,
            timeout: Duration::from_secs(timeout_minutes.saturating_mul(60)),
            early_exit,
        }
    }

    pub fn timeout_minutes(&self) -> u64 {
        self.timeout.as_secs() / 60
    }
}
