//! AI reviewer tracking.
//!
//! Two automated reviewers are followed independently:
//!
//! - **Copilot**: any login containing `copilot`.
//! - **CodeRabbit**: `coderabbitai` (with or without `[bot]`). It also
//!   reports progress through a status check, which counts as pending.
//!
//! # Per-reviewer lifecycle
//!
//! ```text
//! Pending ──(review lands)──► Settled
//!    ▲                           │ latest review is an error
//!    │                           ▼
//!    └──(review starts)──── AwaitingRetry ──(cap exhausted)──► Failed
//! ```
//!
//! An error review triggers a re-request. The tracker then waits a bounded
//! number of polls for the reviewer to show up as pending again; if it does
//! not, that attempt is written off and the next one is made. Each error
//! review is handled once, so a stale error still at the top of the review
//! list does not burn further retries.
//!
//! The tracker only decides; [`rerequest`] performs the remote call.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::config::MonitorConfig;
use crate::clock::elapsed_between;
use crate::github::{GitHubError, ReviewHost};
use crate::types::{CheckState, ContentHash, PrNumber, PrState, Review};

/// An automated reviewer the monitor knows how to wait for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReviewerKind {
    Copilot,
    CodeRabbit,
}

impl ReviewerKind {
    pub const ALL: [ReviewerKind; 2] = [ReviewerKind::Copilot, ReviewerKind::CodeRabbit];

    pub fn name(&self) -> &'static str {
        match self {
            ReviewerKind::Copilot => "Copilot",
            ReviewerKind::CodeRabbit => "CodeRabbit",
        }
    }

    pub fn matches_login(&self, login: &str) -> bool {
        let login = login.to_lowercase();
        match self {
            ReviewerKind::Copilot => login.contains("copilot"),
            ReviewerKind::CodeRabbit => login.trim_end_matches("[bot]") == "coderabbitai",
        }
    }

    fn error_phrases(&self) -> &'static [&'static str] {
        match self {
            ReviewerKind::Copilot => &["encountered an error", "unable to review"],
            ReviewerKind::CodeRabbit => &["review failed", "failed to review"],
        }
    }

    /// Requested-and-not-submitted, or (CodeRabbit) its check still running.
    pub fn is_pending(&self, state: &PrState) -> bool {
        let requested = state.pending_reviewers.iter().any(|r| self.matches_login(r));
        let check_running = *self == ReviewerKind::CodeRabbit
            && state.check_details.iter().any(|c| {
                c.state == CheckState::Pending && c.name.to_lowercase().contains("coderabbit")
            });
        requested || check_running
    }

    /// This reviewer's most recent review.
    pub fn latest_review<'a>(&self, state: &'a PrState) -> Option<&'a Review> {
        state
            .reviews
            .iter()
            .filter(|r| self.matches_login(&r.author))
            .max_by_key(|r| r.submitted_at)
    }

    pub fn is_error_review(&self, review: &Review) -> bool {
        let body = review.body.to_lowercase();
        self.error_phrases().iter().any(|p| body.contains(p))
    }
}

impl std::fmt::Display for ReviewerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// True if any AI reviewer is still working on the PR.
pub fn has_ai_review_pending(state: &PrState) -> bool {
    ReviewerKind::ALL.iter().any(|k| k.is_pending(state))
}

/// Asks `kind` to review the PR again.
pub fn rerequest(host: &dyn ReviewHost, pr: PrNumber, kind: ReviewerKind) -> Result<(), GitHubError> {
    match kind {
        ReviewerKind::Copilot => host.add_reviewer(pr, "@copilot"),
        ReviewerKind::CodeRabbit => host.post_comment(pr, "@coderabbitai review"),
    }
}

/// A remote call the loop should make on the tracker's behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewAction {
    ReRequest { reviewer: ReviewerKind, attempt: u32 },
}

/// Aggregate view after one poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReviewOutcome {
    pub actions: Vec<ReviewAction>,

    /// Reviewers currently working.
    pub pending: Vec<ReviewerKind>,

    /// Some reviewer was re-requested and has not started yet.
    pub awaiting_retry: bool,

    /// Set once a reviewer has exhausted its retries.
    pub failed: Option<String>,

    /// The longest-pending reviewer, if it has passed the stuck threshold.
    pub stuck: Option<(ReviewerKind, Duration)>,
}

impl ReviewOutcome {
    /// No reviewer is working, waiting for a retry, or failed.
    pub fn is_settled(&self) -> bool {
        self.pending.is_empty() && !self.awaiting_retry && self.failed.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ReviewerStatus {
    Pending { since: DateTime<Utc> },
    AwaitingRetry,
    Settled,
    Failed(String),
}

#[derive(Debug, Clone)]
struct ReviewerTracker {
    kind: ReviewerKind,
    pending_since: Option<DateTime<Utc>>,
    handled_errors: BTreeSet<String>,
    retries: u32,
    /// Polls since the last re-request, while waiting for it to start.
    awaiting: Option<u32>,
    failed: Option<String>,
}

fn review_key(review: &Review) -> String {
    let at = review
        .submitted_at
        .map(|t| t.to_rfc3339())
        .unwrap_or_default();
    format!(
        "{}@{}#{}",
        review.author,
        at,
        ContentHash::of_comment(&review.author, None, &review.body)
    )
}

impl ReviewerTracker {
    fn new(kind: ReviewerKind) -> Self {
        ReviewerTracker {
            kind,
            pending_since: None,
            handled_errors: BTreeSet::new(),
            retries: 0,
            awaiting: None,
            failed: None,
        }
    }

    fn observe(
        &mut self,
        state: &PrState,
        now: DateTime<Utc>,
        retry_cap: u32,
        wait_cycles: u32,
        actions: &mut Vec<ReviewAction>,
    ) -> ReviewerStatus {
        if let Some(message) = &self.failed {
            return ReviewerStatus::Failed(message.clone());
        }

        if self.kind.is_pending(state) {
            if self.awaiting.take().is_some() {
                tracing::info!(reviewer = %self.kind, attempt = self.retries, "re-requested review started");
            }
            let since = *self.pending_since.get_or_insert(now);
            return ReviewerStatus::Pending { since };
        }
        self.pending_since = None;

        let new_error = self
            .kind
            .latest_review(state)
            .filter(|r| self.kind.is_error_review(r))
            .map(review_key)
            .filter(|key| !self.handled_errors.contains(key));
        if let Some(key) = new_error {
            self.handled_errors.insert(key);
            self.awaiting = None;
            return self.retry_or_fail("review completed in an error state", retry_cap, actions);
        }

        if let Some(cycles) = self.awaiting.as_mut() {
            *cycles += 1;
            if *cycles < wait_cycles {
                return ReviewerStatus::AwaitingRetry;
            }
            self.awaiting = None;
            let reason = format!("re-requested review did not start within {} polls", wait_cycles);
            return self.retry_or_fail(&reason, retry_cap, actions);
        }

        ReviewerStatus::Settled
    }

    fn retry_or_fail(
        &mut self,
        reason: &str,
        retry_cap: u32,
        actions: &mut Vec<ReviewAction>,
    ) -> ReviewerStatus {
        if self.retries < retry_cap {
            self.retries += 1;
            tracing::warn!(
                reviewer = %self.kind,
                attempt = self.retries,
                max_attempts = retry_cap,
                reason,
                "AI review errored, re-requesting review"
            );
            self.awaiting = Some(0);
            actions.push(ReviewAction::ReRequest {
                reviewer: self.kind,
                attempt: self.retries,
            });
            ReviewerStatus::AwaitingRetry
        } else {
            let message = format!(
                "{} review failed after {} retries: {}",
                self.kind, retry_cap, reason
            );
            tracing::error!(reviewer = %self.kind, retries = self.retries, reason, "giving up on AI review");
            self.failed = Some(message.clone());
            ReviewerStatus::Failed(message)
        }
    }
}

/// Tracks every known AI reviewer across polls.
#[derive(Debug, Clone)]
pub struct ReviewTracker {
    reviewers: Vec<ReviewerTracker>,
    retry_cap: u32,
    wait_cycles: u32,
    stuck_timeout: Duration,
}

impl ReviewTracker {
    pub fn new(config: &MonitorConfig) -> Self {
        ReviewTracker {
            reviewers: ReviewerKind::ALL.into_iter().map(ReviewerTracker::new).collect(),
            retry_cap: config.review_retry_cap,
            wait_cycles: config.review_wait_cycles.max(1),
            stuck_timeout: config.stuck_reviewer_timeout,
        }
    }

    /// Updates every reviewer from this poll's state.
    pub fn observe(&mut self, state: &PrState, now: DateTime<Utc>) -> ReviewOutcome {
        let mut outcome = ReviewOutcome::default();
        let mut longest: Option<(ReviewerKind, Duration)> = None;

        for reviewer in &mut self.reviewers {
            match reviewer.observe(
                state,
                now,
                self.retry_cap,
                self.wait_cycles,
                &mut outcome.actions,
            ) {
                ReviewerStatus::Pending { since } => {
                    outcome.pending.push(reviewer.kind);
                    let waited = elapsed_between(since, now);
                    if longest.is_none_or(|(_, d)| waited > d) {
                        longest = Some((reviewer.kind, waited));
                    }
                }
                ReviewerStatus::AwaitingRetry => outcome.awaiting_retry = true,
                ReviewerStatus::Failed(message) => {
                    outcome.failed.get_or_insert(message);
                }
                ReviewerStatus::Settled => {}
            }
        }

        outcome.stuck = longest.filter(|(_, waited)| *waited >= self.stuck_timeout);
        outcome
    }

    /// Re-requests made so far, across reviewers.
    pub fn retries_used(&self) -> u32 {
        self.reviewers.iter().map(|r| r.retries).sum()
    }
}
