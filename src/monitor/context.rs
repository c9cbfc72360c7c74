//! Mutable state carried between polls.
//!
//! Everything the loop remembers from one iteration to the next lives in
//! [`LoopContext`]. The phase handlers take it by `&mut` and nothing else
//! holds loop state, so each transition can be exercised on its own.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::comments::ToneTracker;
use super::config::MonitorConfig;
use super::review::ReviewTracker;
use crate::clock::elapsed_between;
use crate::persistence::{MonitorStateRecord, MonitorStatus, RecoveryRecord};
use crate::rate_limit::RateLimitStatus;
use crate::types::{ContentHash, MonitorResult, PrNumber, PrState};

#[derive(Debug, Clone)]
pub struct LoopContext {
    pub pr: PrNumber,
    pub started_at: DateTime<Utc>,
    pub poll_iteration: u64,

    // Rebase coordination
    pub rebase_count: u32,
    pub dirty_wait_cycles: u32,
    pub stability_resets: u32,
    pub file_drift_warnings: u32,

    /// Captured just before a rebase, consumed by the next successful fetch.
    pub resolved_before_rebase: Option<BTreeSet<ContentHash>>,

    // Post-rebase reviewer re-check
    pub recheck_done: bool,
    pub recheck_refreshes: u32,

    // Review tracking
    pub review: ReviewTracker,
    pub tones: ToneTracker,
    pub duplicates_resolved: usize,

    // Recovery
    pub recreation_attempts: u32,
    pub recovery: Option<RecoveryRecord>,

    pub last_rate_limit: Option<RateLimitStatus>,
    pub last_state: Option<PrState>,
}

impl LoopContext {
    pub fn new(pr: PrNumber, started_at: DateTime<Utc>, config: &MonitorConfig) -> Self {
        LoopContext {
            pr,
            started_at,
            poll_iteration: 0,
            rebase_count: 0,
            dirty_wait_cycles: 0,
            stability_resets: 0,
            file_drift_warnings: 0,
            resolved_before_rebase: None,
            // Nothing to re-check until a rebase happens.
            recheck_done: true,
            recheck_refreshes: 0,
            review: ReviewTracker::new(config),
            tones: ToneTracker::new(),
            duplicates_resolved: 0,
            recreation_attempts: 0,
            recovery: None,
            last_rate_limit: None,
            last_state: None,
        }
    }

    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        elapsed_between(self.started_at, now)
    }

    /// The persisted view of this context.
    pub fn record(
        &self,
        status: MonitorStatus,
        timeout: Duration,
        now: DateTime<Utc>,
        result: Option<&MonitorResult>,
    ) -> MonitorStateRecord {
        MonitorStateRecord {
            pr: self.pr,
            status,
            rebase_count: self.rebase_count,
            elapsed_seconds: self.elapsed(now).as_secs(),
            timeout_seconds: timeout.as_secs(),
            poll_iteration: self.poll_iteration,
            rate_limit: self.last_rate_limit,
            updated_at: now,
            result: result.cloned(),
            recovery: self.recovery.clone(),
        }
    }
}
