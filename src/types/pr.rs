//! Pull request types and state representations.
//!
//! These types represent one poll's view of a pull request as reported by the
//! review tool. A fresh [`PrState`] is built on every poll.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{ContentHash, PrNumber, ThreadId};

/// Whether the PR branch is up to date with its base.
///
/// GitHub reports a richer `mergeStateStatus`; only the distinctions the
/// monitor acts on are kept. See [`MergeState::from_github`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MergeState {
    /// Up to date with the base branch (includes blocked/unstable).
    Clean,

    /// Head branch behind base - needs a rebase.
    Behind,

    /// Merge conflicts exist. Never auto-resolved.
    Dirty,

    /// Not yet computed by GitHub - wait and re-check.
    Unknown,
}

impl MergeState {
    /// Maps GitHub's `mergeStateStatus` onto the monitor's states.
    ///
    /// `BLOCKED`, `UNSTABLE`, `HAS_HOOKS` and `DRAFT` all mean the branch is
    /// current with its base, so they map to `Clean`. Anything unrecognised is
    /// `Unknown`.
    pub fn from_github(status: &str) -> Self {
        match status.trim().to_ascii_uppercase().as_str() {
            "BEHIND" => MergeState::Behind,
            "DIRTY" => MergeState::Dirty,
            "CLEAN" | "BLOCKED" | "UNSTABLE" | "HAS_HOOKS" | "DRAFT" => MergeState::Clean,
            _ => MergeState::Unknown,
        }
    }
}

/// State of a single check run, from `gh pr checks` buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckState {
    Pending,
    Pass,
    Fail,
    Cancel,
    Skipping,
}

impl CheckState {
    /// Parses a `gh pr checks` bucket (`pass`, `fail`, `pending`, `skipping`, `cancel`).
    ///
    /// Unknown buckets are treated as pending so they never count as passing.
    pub fn from_bucket(bucket: &str) -> Self {
        match bucket.trim().to_ascii_lowercase().as_str() {
            "pass" => CheckState::Pass,
            "fail" => CheckState::Fail,
            "cancel" => CheckState::Cancel,
            "skipping" => CheckState::Skipping,
            _ => CheckState::Pending,
        }
    }
}

/// A named check and its state, in the order the review tool reported it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckDetail {
    pub name: String,
    pub state: CheckState,
}

impl CheckDetail {
    pub fn new(name: impl Into<String>, state: CheckState) -> Self {
        CheckDetail {
            name: name.into(),
            state,
        }
    }
}

/// Aggregate CI status for the PR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckStatus {
    Pending,
    Success,
    Failure,
    Cancelled,
}

impl CheckStatus {
    /// Folds individual checks into one status.
    ///
    /// Precedence: any failure, then any cancellation, then any pending.
    /// A PR with no checks at all counts as successful.
    pub fn aggregate(checks: &[CheckDetail]) -> Self {
        let has = |state: CheckState| checks.iter().any(|c| c.state == state);
        if has(CheckState::Fail) {
            CheckStatus::Failure
        } else if has(CheckState::Cancel) {
            CheckStatus::Cancelled
        } else if has(CheckState::Pending) {
            CheckStatus::Pending
        } else {
            CheckStatus::Success
        }
    }

    /// Returns true if CI has finished unsuccessfully.
    pub fn is_failed(&self) -> bool {
        matches!(self, CheckStatus::Failure | CheckStatus::Cancelled)
    }
}

/// A single review comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewComment {
    /// Login of the comment author.
    pub author: String,

    /// Comment text.
    pub body: String,

    /// The thread this comment belongs to.
    pub thread_id: ThreadId,

    /// File the comment is anchored to, if it is a line comment.
    pub path: Option<String>,
}

impl ReviewComment {
    pub fn content_hash(&self) -> ContentHash {
        ContentHash::of_comment(&self.author, self.path.as_deref(), &self.body)
    }
}

/// A review thread with its resolution state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewThread {
    pub id: ThreadId,
    pub is_resolved: bool,
    pub comments: Vec<ReviewComment>,
}

impl ReviewThread {
    /// Hash of the thread's opening comment. `None` for an empty thread.
    pub fn content_hash(&self) -> Option<ContentHash> {
        self.comments.first().map(ReviewComment::content_hash)
    }
}

/// Result of asking for the PR's unresolved review threads.
///
/// `Unknown` (the query failed) must never be conflated with `Empty` (the
/// query succeeded and nothing is unresolved).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "threads", rename_all = "snake_case")]
pub enum ThreadStatus {
    #[default]
    Unknown,
    Empty,
    Values(Vec<ReviewThread>),
}

impl ThreadStatus {
    /// Builds the status from a successful thread listing, keeping only
    /// unresolved threads.
    pub fn from_threads(threads: Vec<ReviewThread>) -> Self {
        let unresolved: Vec<_> = threads.into_iter().filter(|t| !t.is_resolved).collect();
        if unresolved.is_empty() {
            ThreadStatus::Empty
        } else {
            ThreadStatus::Values(unresolved)
        }
    }

    /// Number of unresolved threads, or `None` if unknown.
    pub fn count(&self) -> Option<usize> {
        match self {
            ThreadStatus::Unknown => None,
            ThreadStatus::Empty => Some(0),
            ThreadStatus::Values(threads) => Some(threads.len()),
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, ThreadStatus::Unknown)
    }

    /// The unresolved threads; empty when unknown.
    pub fn threads(&self) -> &[ReviewThread] {
        match self {
            ThreadStatus::Values(threads) => threads,
            ThreadStatus::Unknown | ThreadStatus::Empty => &[],
        }
    }
}

/// A submitted review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub author: String,
    pub body: String,
    /// GitHub review state (`COMMENTED`, `APPROVED`, `CHANGES_REQUESTED`, ...).
    pub state: String,
    pub submitted_at: Option<DateTime<Utc>>,
}

/// One poll's snapshot of a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrState {
    pub number: PrNumber,
    pub head_ref: String,
    pub base_ref: String,
    pub merge_state: MergeState,
    pub check_status: CheckStatus,
    pub check_details: Vec<CheckDetail>,
    /// Logins (or team slugs) whose review is requested but not submitted.
    pub pending_reviewers: BTreeSet<String>,
    /// Latest review per reviewer.
    pub reviews: Vec<Review>,
    pub review_comments: Vec<ReviewComment>,
    pub unresolved_threads: ThreadStatus,
}

impl PrState {
    /// Names of checks that failed or were cancelled, in reported order.
    pub fn failed_checks(&self) -> Vec<&str> {
        self.check_details
            .iter()
            .filter(|c| matches!(c.state, CheckState::Fail | CheckState::Cancel))
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Names of checks still running, in reported order.
    pub fn pending_checks(&self) -> Vec<&str> {
        self.check_details
            .iter()
            .filter(|c| c.state == CheckState::Pending)
            .map(|c| c.name.as_str())
            .collect()
    }
}

/// The metadata needed to recreate a PR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrMetadata {
    pub title: String,
    pub body: Option<String>,
    pub base_ref: String,
    pub head_ref: String,
    pub labels: Vec<String>,
    pub assignees: Vec<String>,
    pub is_draft: bool,
}
