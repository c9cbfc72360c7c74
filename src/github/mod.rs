//! Review-tool boundary (GitHub via the `gh` CLI).
//!
//! The monitor talks to GitHub exclusively through the [`ReviewHost`] trait.
//! [`GhCli`] implements it by shelling out to `gh` with per-call timeouts;
//! tests substitute an in-memory fake.
//!
//! Key features:
//! - Every query distinguishes "call errored" (`Err`) from "call succeeded
//!   with an empty answer" (`Ok` of an empty collection)
//! - Failures are categorised transient / permanent / timed-out
//! - Queries come in a GraphQL flavour and a cheaper REST flavour, selected
//!   by [`ApiMode`] when the GraphQL quota runs low

mod cli;
mod error;
mod retry;

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

pub use cli::GhCli;
pub use error::{GitHubError, GitHubErrorKind};
pub use retry::{RetryConfig, RetryResult, retry_with_backoff};

use crate::rate_limit::RateLimitStatus;
use crate::types::{
    CheckDetail, MergeState, PrMetadata, PrNumber, RebaseResult, Review, ReviewComment,
    ReviewThread, ThreadId,
};

/// Which API family queries should use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ApiMode {
    /// Normal operation: GraphQL-backed queries with full thread data.
    #[default]
    GraphQl,

    /// Low GraphQL quota: REST endpoints, no thread resolution data.
    Rest,
}

/// The PR fields fetched by a single view query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrView {
    pub merge_state: MergeState,
    pub head_ref: String,
    pub base_ref: String,
    pub pending_reviewers: BTreeSet<String>,
    /// Latest review per author.
    pub reviews: Vec<Review>,
}

/// Operations against the remote review system.
///
/// Query methods return `Err` only when the call itself failed. Mutation
/// methods are never retried implicitly by implementations.
pub trait ReviewHost {
    // ─── Queries ──────────────────────────────────────────────────────────────

    /// Merge state, branches, pending reviewers and latest reviews.
    fn pr_view(&self, pr: PrNumber, mode: ApiMode) -> Result<PrView, GitHubError>;

    /// Every check run on the PR head, in reported order.
    fn checks(&self, pr: PrNumber) -> Result<Vec<CheckDetail>, GitHubError>;

    /// All review threads, resolved and unresolved (GraphQL only).
    fn review_threads(&self, pr: PrNumber) -> Result<Vec<ReviewThread>, GitHubError>;

    /// Line comments without thread resolution data (REST).
    fn review_comments(&self, pr: PrNumber) -> Result<Vec<ReviewComment>, GitHubError>;

    /// Paths touched by the PR.
    fn changed_files(&self, pr: PrNumber) -> Result<Vec<String>, GitHubError>;

    /// Commit time of the newest commit on `branch`.
    fn branch_last_commit(&self, branch: &str) -> Result<DateTime<Utc>, GitHubError>;

    /// Current API quota.
    fn rate_limit(&self) -> Result<RateLimitStatus, GitHubError>;

    /// Everything needed to recreate the PR.
    fn pr_metadata(&self, pr: PrNumber) -> Result<PrMetadata, GitHubError>;

    // ─── Mutations ────────────────────────────────────────────────────────────

    /// Rebases the PR branch onto its base on the remote side.
    fn rebase(&self, pr: PrNumber) -> RebaseResult;

    fn resolve_thread(&self, thread: &ThreadId) -> Result<(), GitHubError>;

    fn add_reviewer(&self, pr: PrNumber, reviewer: &str) -> Result<(), GitHubError>;

    fn post_comment(&self, pr: PrNumber, body: &str) -> Result<(), GitHubError>;

    fn close_pr(&self, pr: PrNumber) -> Result<(), GitHubError>;

    /// Opens a new PR and returns the tool's raw stdout (which carries the URL).
    fn create_pr(&self, metadata: &PrMetadata) -> Result<String, GitHubError>;

    fn reopen_pr(&self, pr: PrNumber) -> Result<(), GitHubError>;
}
