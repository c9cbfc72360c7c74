//! The monitor loop.
//!
//! A single state machine drives everything. Each phase handler does one
//! step and names the next phase, and every exit goes through
//! [`Phase::Done`]:
//!
//! ```text
//! Init ─► Polling ─┬─► Rebasing ───────────► Sleeping / Done
//!            ▲     ├─► Recovering ─────────► Sleeping / Done
//!            │     ├─► PostRebaseRecheck ──► Polling / Done
//!            │     ├─► Sleeping ──┐
//!            │     └─► Done       │
//!            └────────────────────┘
//! ```
//!
//! The loop is synchronous and blocks only inside [`Clock::sleep`]. No
//! error escapes it: every external failure is logged and mapped to
//! "try again later" or to a terminal [`MonitorResult`].

use std::collections::BTreeSet;
use std::time::Duration;

use serde_json::Value;

use super::comments::CommentReport;
use super::config::{MonitorConfig, MonitorOptions};
use super::context::LoopContext;
use super::duplicates::resolve_duplicates;
use super::fetch::fetch_pr_state;
use super::rebase::{RebaseOutcome, handle_behind};
use super::recovery::{RecoveryOutcome, recreate_pr};
use super::review::{ReviewAction, ReviewOutcome, ReviewerKind, has_ai_review_pending, rerequest};
use crate::clock::Clock;
use crate::git::LocalRepo;
use crate::github::{ApiMode, ReviewHost};
use crate::persistence::{MonitorStatus, save_record, state_path};
use crate::rate_limit::{FileCache, MemoryCache, RateLimitStatus, RateLimiter};
use crate::types::{CheckStatus, FinalState, MergeState, MonitorResult, PrState, ThreadStatus};

/// Text used wherever the unresolved-thread count could not be determined.
pub const THREAD_STATUS_UNKNOWN: &str = "thread status unknown - API error";

#[derive(Debug)]
enum Phase {
    Init,
    Polling,
    Rebasing(Box<PrState>),
    Recovering(ReviewerKind),
    PostRebaseRecheck,
    Sleeping(Duration),
    Done(MonitorResult),
}

/// Watches one PR until it is ready, fails, or time runs out.
pub struct Monitor<'a> {
    host: &'a dyn ReviewHost,
    repo: &'a dyn LocalRepo,
    clock: &'a dyn Clock,
    config: MonitorConfig,
    options: MonitorOptions,
    limiter: RateLimiter,
    ctx: LoopContext,
}

impl<'a> Monitor<'a> {
    /// A monitor with the rate-limit cache in `config.state_dir`.
    pub fn new(
        host: &'a dyn ReviewHost,
        repo: &'a dyn LocalRepo,
        clock: &'a dyn Clock,
        config: MonitorConfig,
        options: MonitorOptions,
    ) -> Self {
        let limiter = RateLimiter::new(
            Box::new(MemoryCache::new()),
            Some(Box::new(FileCache::in_dir(&config.state_dir))),
            config.rate_limit_ttl,
        );
        Self::with_limiter(host, repo, clock, config, options, limiter)
    }

    pub fn with_limiter(
        host: &'a dyn ReviewHost,
        repo: &'a dyn LocalRepo,
        clock: &'a dyn Clock,
        config: MonitorConfig,
        options: MonitorOptions,
        limiter: RateLimiter,
    ) -> Self {
        let ctx = LoopContext::new(options.pr, clock.now(), &config);
        Monitor {
            host,
            repo,
            clock,
            config,
            options,
            limiter,
            ctx,
        }
    }

    /// Runs to completion and returns the one terminal result.
    pub fn run(&mut self) -> MonitorResult {
        let mut phase = Phase::Init;
        loop {
            phase = match phase {
                Phase::Init => self.init(),
                Phase::Polling => self.poll(),
                Phase::Rebasing(state) => self.rebase(&state),
                Phase::Recovering(reviewer) => self.recover(reviewer),
                Phase::PostRebaseRecheck => self.recheck(),
                Phase::Sleeping(duration) => self.sleep(duration),
                Phase::Done(result) => return self.finish(result),
            };
        }
    }

    // ─── Phases ───────────────────────────────────────────────────────────────

    fn init(&mut self) -> Phase {
        tracing::info!(
            pr = %self.options.pr,
            timeout_mins = self.options.timeout_minutes(),
            early_exit = self.options.early_exit,
            "monitoring PR"
        );
        self.persist(MonitorStatus::Monitoring, None);
        Phase::Polling
    }

    fn poll(&mut self) -> Phase {
        let now = self.clock.now();
        if self.ctx.elapsed(now) >= self.options.timeout {
            return Phase::Done(self.timeout_result());
        }

        self.persist(MonitorStatus::Monitoring, None);
        self.ctx.poll_iteration += 1;

        let mode = if self.limiter.should_prefer_rest(self.host, self.clock) {
            ApiMode::Rest
        } else {
            ApiMode::GraphQl
        };
        let quota = self.limiter.check(self.host, self.clock, true);
        self.ctx.last_rate_limit = Some(quota);

        let state = match fetch_pr_state(self.host, self.options.pr, mode) {
            Ok(state) => self.drop_duplicates(state),
            Err(e) => {
                tracing::warn!(
                    pr = %self.options.pr,
                    error = %e,
                    retriable = e.kind.is_retriable(),
                    "failed to fetch PR state, will retry"
                );
                return Phase::Sleeping(self.config.fetch_retry_delay);
            }
        };
        self.ctx.tones.observe(&state.review_comments);
        self.ctx.last_state = Some(state.clone());

        if state.check_status.is_failed() {
            return Phase::Done(ci_failed_result(&state));
        }

        match state.merge_state {
            MergeState::Dirty => {
                return Phase::Done(MonitorResult::failure(
                    FinalState::MergeConflict,
                    format!(
                        "PR has merge conflicts with {}; resolve them manually",
                        state.base_ref
                    ),
                ));
            }
            _ if self.options.early_exit && !state.review_comments.is_empty() => {
                let mut result = MonitorResult::new(
                    true,
                    FinalState::CommentsReceived,
                    format!("{} review comment(s) received", state.review_comments.len()),
                );
                result.ci_passed = state.check_status == CheckStatus::Success;
                return Phase::Done(result);
            }
            MergeState::Behind => return Phase::Rebasing(Box::new(state)),
            MergeState::Clean | MergeState::Unknown => {}
        }

        let review = self.ctx.review.observe(&state, now);
        self.execute(&review.actions);
        if let Some(message) = &review.failed {
            return Phase::Done(MonitorResult::failure(FinalState::ReviewFailed, message.clone()));
        }
        if let Some((reviewer, waited)) = review.stuck
            && self.ctx.recreation_attempts < self.config.recreation_budget
        {
            tracing::warn!(
                pr = %self.options.pr,
                reviewer = %reviewer,
                waited_mins = waited.as_secs() / 60,
                "AI review appears stuck"
            );
            return Phase::Recovering(reviewer);
        }

        if state.check_status == CheckStatus::Success
            && review.is_settled()
            && state.merge_state == MergeState::Clean
        {
            if !self.ctx.recheck_done {
                return Phase::PostRebaseRecheck;
            }
            return Phase::Done(ready_result(&state));
        }

        self.log_progress(&state, &review);
        let interval = if review.awaiting_retry {
            self.config.review_wait_interval
        } else {
            quota.poll_interval(self.config.poll_interval)
        };
        Phase::Sleeping(interval)
    }

    fn rebase(&mut self, state: &PrState) -> Phase {
        let remaining = self
            .options
            .timeout
            .saturating_sub(self.ctx.elapsed(self.clock.now()));
        match handle_behind(
            self.host,
            self.repo,
            self.clock,
            &self.config,
            &mut self.ctx,
            state,
            remaining,
        ) {
            // GitHub recomputes the merge state asynchronously; polling at
            // once can still report BEHIND for the branch just rebased.
            RebaseOutcome::Rebased => {
                let quota = self.ctx.last_rate_limit.unwrap_or(RateLimitStatus::UNKNOWN);
                Phase::Sleeping(quota.poll_interval(self.config.poll_interval))
            }
            RebaseOutcome::Waiting(duration) => Phase::Sleeping(duration),
            RebaseOutcome::Finished(result) => Phase::Done(result),
        }
    }

    fn recover(&mut self, reviewer: ReviewerKind) -> Phase {
        self.ctx.recreation_attempts += 1;
        let pr = self.options.pr;

        match recreate_pr(self.host, self.clock, &self.config, pr) {
            RecoveryOutcome::Recreated { new_pr } => {
                let (message, number) = match new_pr {
                    Some(n) => (
                        format!(
                            "{} review was stuck; PR {} was closed and recreated as {}",
                            reviewer, pr, n
                        ),
                        Value::from(n.0),
                    ),
                    None => (
                        format!(
                            "{} review was stuck; PR {} was recreated but the new number is unknown, check the review tool",
                            reviewer, pr
                        ),
                        Value::Null,
                    ),
                };
                Phase::Done(
                    MonitorResult::failure(FinalState::Recreated, message)
                        .with_detail("recreated_pr", number),
                )
            }
            RecoveryOutcome::Aborted { reason } => {
                tracing::warn!(pr = %pr, reason = %reason, "PR recreation aborted, continuing to monitor");
                Phase::Sleeping(self.config.poll_interval)
            }
            RecoveryOutcome::RolledBack { create_error } => {
                tracing::warn!(pr = %pr, error = %create_error, "PR recreation rolled back, continuing to monitor");
                Phase::Sleeping(self.config.poll_interval)
            }
            RecoveryOutcome::RecoveryNeeded(record) => {
                let message = format!(
                    "PR {} was closed for recreation, but creating the replacement failed ({}) and reopening failed ({}); manual recovery needed",
                    pr, record.create_error, record.reopen_error
                );
                self.ctx.recovery = Some(record);
                Phase::Done(MonitorResult::failure(FinalState::RecoveryNeeded, message))
            }
        }
    }

    /// After a rebase, wait briefly and confirm no reviewer was re-requested.
    fn recheck(&mut self) -> Phase {
        self.ctx.recheck_refreshes += 1;
        let attempt = self.ctx.recheck_refreshes;
        let cap_reached = attempt >= self.config.recheck_max_refreshes;

        tracing::info!(
            pr = %self.options.pr,
            attempt,
            delay_secs = self.config.recheck_delay.as_secs(),
            "CI green after rebase, re-checking for re-requested reviews"
        );
        self.clock.sleep(self.config.recheck_delay);

        let refreshed = match fetch_pr_state(self.host, self.options.pr, self.api_mode()) {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(pr = %self.options.pr, error = %e, "re-check fetch failed");
                if cap_reached {
                    self.ctx.recheck_done = true;
                }
                return Phase::Polling;
            }
        };
        self.ctx.last_state = Some(refreshed.clone());

        if refreshed.check_status != CheckStatus::Success
            || refreshed.merge_state != MergeState::Clean
        {
            tracing::info!(
                pr = %self.options.pr,
                checks = ?refreshed.check_status,
                merge_state = ?refreshed.merge_state,
                "PR changed during re-check, resuming polling"
            );
            if cap_reached {
                tracing::warn!(pr = %self.options.pr, "re-check limit reached, trusting regular polling");
                self.ctx.recheck_done = true;
            }
            return Phase::Polling;
        }

        self.ctx.recheck_done = true;
        if has_ai_review_pending(&refreshed) {
            tracing::info!(pr = %self.options.pr, "AI review re-requested after rebase, waiting for it");
            return Phase::Polling;
        }
        Phase::Done(ready_result(&refreshed))
    }

    fn sleep(&mut self, duration: Duration) -> Phase {
        let left = self
            .options
            .timeout
            .saturating_sub(self.ctx.elapsed(self.clock.now()));
        self.clock.sleep(duration.min(left));
        Phase::Polling
    }

    fn finish(&mut self, result: MonitorResult) -> MonitorResult {
        let result = self.enrich(result);
        let status = match result.final_state {
            FinalState::RecoveryNeeded => MonitorStatus::RecoveryNeeded,
            _ if result.success => MonitorStatus::Succeeded,
            _ => MonitorStatus::Failed,
        };
        self.persist(status, Some(&result));

        if result.success {
            tracing::info!(pr = %self.options.pr, final_state = ?result.final_state, "{}", result.message);
        } else {
            tracing::warn!(pr = %self.options.pr, final_state = ?result.final_state, "{}", result.message);
        }
        result
    }

    // ─── Helpers ──────────────────────────────────────────────────────────────

    fn api_mode(&self) -> ApiMode {
        if self.limiter.is_rest_priority() {
            ApiMode::Rest
        } else {
            ApiMode::GraphQl
        }
    }

    fn execute(&self, actions: &[ReviewAction]) {
        for action in actions {
            match *action {
                ReviewAction::ReRequest { reviewer, attempt } => {
                    if let Err(e) = rerequest(self.host, self.options.pr, reviewer) {
                        tracing::warn!(
                            pr = %self.options.pr,
                            reviewer = %reviewer,
                            attempt,
                            error = %e,
                            "failed to re-request review"
                        );
                    }
                }
            }
        }
    }

    /// Resolves threads re-posted by a rebase and hides them from this poll.
    fn drop_duplicates(&mut self, state: PrState) -> PrState {
        if !state.unresolved_threads.is_known() {
            return state;
        }
        let Some(before) = self.ctx.resolved_before_rebase.take() else {
            return state;
        };
        let resolution = resolve_duplicates(self.host, &before, state.unresolved_threads.threads());
        if resolution.count() > 0 {
            tracing::info!(
                pr = %self.options.pr,
                resolved = resolution.count(),
                "auto-resolved duplicate threads re-posted after rebase"
            );
        }
        self.ctx.duplicates_resolved += resolution.count();
        resolution.exclude_from(state)
    }

    fn persist(&self, status: MonitorStatus, result: Option<&MonitorResult>) {
        let path = state_path(&self.config.state_dir, self.options.pr);
        let record = self
            .ctx
            .record(status, self.options.timeout, self.clock.now(), result);
        if let Err(e) = save_record(&path, &record) {
            tracing::warn!(path = %path.display(), error = %e, "failed to persist monitor state");
        }
    }

    fn log_progress(&self, state: &PrState, review: &ReviewOutcome) {
        let reviewers: Vec<&str> = review.pending.iter().map(ReviewerKind::name).collect();
        tracing::info!(
            pr = %self.options.pr,
            iteration = self.ctx.poll_iteration,
            elapsed_secs = self.ctx.elapsed(self.clock.now()).as_secs(),
            merge_state = ?state.merge_state,
            checks = ?state.check_status,
            pending_checks = state.pending_checks().len(),
            pending_reviews = %reviewers.join(","),
            awaiting_retry = review.awaiting_retry,
            rebases = self.ctx.rebase_count,
            "waiting for PR"
        );
    }

    fn timeout_result(&self) -> MonitorResult {
        let minutes = self.options.timeout_minutes();
        let Some(state) = &self.ctx.last_state else {
            return MonitorResult::failure(
                FinalState::TimedOut,
                format!("Timed out after {} minutes before PR state could be fetched", minutes),
            );
        };

        let mut outstanding = vec![];
        if state.check_status == CheckStatus::Pending {
            let pending = state.pending_checks();
            if pending.is_empty() {
                outstanding.push("CI still pending".to_string());
            } else {
                outstanding.push(format!("CI still pending ({})", pending.join(", ")));
            }
        }
        let reviewers: Vec<&str> = ReviewerKind::ALL
            .iter()
            .filter(|k| k.is_pending(state))
            .map(ReviewerKind::name)
            .collect();
        if !reviewers.is_empty() {
            outstanding.push(format!("AI review still pending ({})", reviewers.join(", ")));
        }
        match state.merge_state {
            MergeState::Unknown => outstanding.push("merge state not yet computed".to_string()),
            MergeState::Behind => outstanding.push(format!("branch behind {}", state.base_ref)),
            MergeState::Clean | MergeState::Dirty => {}
        }
        if outstanding.is_empty() {
            outstanding.push("waiting on a re-requested AI review".to_string());
        }

        let mut result = MonitorResult::failure(
            FinalState::TimedOut,
            format!("Timed out after {} minutes: {}", minutes, outstanding.join("; ")),
        );
        result.ci_passed = state.check_status == CheckStatus::Success;
        result
    }

    /// Attaches counts and the final flags to a terminal result.
    fn enrich(&self, mut result: MonitorResult) -> MonitorResult {
        result.rebase_count = self.ctx.rebase_count;

        if let Some(state) = &self.ctx.last_state {
            if matches!(result.final_state, FinalState::Ready) {
                result.review_completed = true;
                result.ci_passed = true;
            } else {
                result.review_completed = result.review_completed
                    || (!has_ai_review_pending(state)
                        && !matches!(result.final_state, FinalState::ReviewFailed));
                result.ci_passed = result.ci_passed || state.check_status == CheckStatus::Success;
            }

            let unresolved = match &state.unresolved_threads {
                ThreadStatus::Unknown => Value::from(THREAD_STATUS_UNKNOWN),
                known => Value::from(known.count().unwrap_or_default()),
            };
            result = result.with_detail("unresolved_threads", unresolved);

            if !state.review_comments.is_empty() {
                let changed = self.changed_files();
                let report = CommentReport::build(&state.review_comments, changed.as_ref());
                result = result
                    .with_detail("comments_in_scope", report.in_scope)
                    .with_detail("comments_out_of_scope", report.out_of_scope)
                    .with_detail("comments_general", report.general);
            }
        }

        if self.ctx.tones.contradictions() > 0 {
            result = result.with_detail("contradictions", self.ctx.tones.contradictions());
        }
        if self.ctx.duplicates_resolved > 0 {
            result = result.with_detail("duplicates_resolved", self.ctx.duplicates_resolved);
        }
        let retries = self.ctx.review.retries_used();
        if retries > 0 {
            result = result.with_detail("review_retries", retries);
        }
        if self.ctx.file_drift_warnings > 0 {
            result = result.with_detail("file_drift_warnings", self.ctx.file_drift_warnings);
        }
        result
    }

    fn changed_files(&self) -> Option<BTreeSet<String>> {
        match self.host.changed_files(self.options.pr) {
            Ok(files) => Some(files.into_iter().collect()),
            Err(e) => {
                tracing::debug!(pr = %self.options.pr, error = %e, "changed-file query failed");
                None
            }
        }
    }
}

fn ci_failed_result(state: &PrState) -> MonitorResult {
    let failed = state.failed_checks();
    let names = failed.join(", ");
    let result = match state.check_status {
        CheckStatus::Cancelled => {
            MonitorResult::failure(FinalState::CiCancelled, format!("CI cancelled: {}", names))
        }
        _ => MonitorResult::failure(FinalState::CiFailed, format!("CI failed: {}", names)),
    };
    result.with_detail("failed_checks", failed)
}

fn ready_result(state: &PrState) -> MonitorResult {
    let threads = match state.unresolved_threads.count() {
        Some(0) => "no unresolved threads".to_string(),
        Some(n) => format!("{} unresolved thread(s)", n),
        None => THREAD_STATUS_UNKNOWN.to_string(),
    };
    MonitorResult::new(
        true,
        FinalState::Ready,
        format!("PR is ready: CI passed, AI reviews complete, {}", threads),
    )
}
