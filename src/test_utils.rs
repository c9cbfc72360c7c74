//! Shared test fakes and arbitrary generators.
//!
//! The fakes are single-threaded (`RefCell`), like the monitor itself. Each
//! records the operations invoked on it so tests can assert on call counts
//! and mutations.

use std::cell::{Cell, Ref, RefCell};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use proptest::prelude::*;

use crate::clock::Clock;
use crate::git::{GitError, GitResult, LocalRepo};
use crate::github::{ApiMode, GitHubError, PrView, ReviewHost};
use crate::rate_limit::RateLimitStatus;
use crate::types::{
    CheckDetail, ContentHash, MergeState, PrMetadata, PrNumber, RebaseResult, Review,
    ReviewComment, ReviewThread, Sha, ThreadId,
};

// ─── Builders ─────────────────────────────────────────────────────────────────

/// A comment not yet attached to a thread (see [`thread`]).
pub fn comment(author: &str, path: Option<&str>, body: &str) -> ReviewComment {
    ReviewComment {
        author: author.to_string(),
        body: body.to_string(),
        thread_id: ThreadId::new(""),
        path: path.map(str::to_string),
    }
}

/// An unresolved thread opened by `first`.
pub fn thread(id: &str, first: ReviewComment) -> ReviewThread {
    let id = ThreadId::new(id);
    ReviewThread {
        id: id.clone(),
        is_resolved: false,
        comments: vec![ReviewComment {
            thread_id: id,
            ..first
        }],
    }
}

/// A review submitted at `at`.
pub fn review(author: &str, body: &str, at: DateTime<Utc>) -> Review {
    Review {
        author: author.to_string(),
        body: body.to_string(),
        state: "COMMENTED".to_string(),
        submitted_at: Some(at),
    }
}

pub fn sha(n: u8) -> Sha {
    Sha::new(format!("{:02x}", n).repeat(20))
}

/// A fixed, readable epoch for fake clocks.
pub fn epoch() -> DateTime<Utc> {
    DateTime::from_timestamp(1_735_689_600, 0).unwrap_or_default()
}

// ─── FakeClock ────────────────────────────────────────────────────────────────

/// A clock whose `sleep` advances time instantly.
#[derive(Debug)]
pub struct FakeClock {
    now: Cell<DateTime<Utc>>,
    sleeps: RefCell<Vec<Duration>>,
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeClock {
    pub fn new() -> Self {
        Self::at(epoch())
    }

    pub fn at(now: DateTime<Utc>) -> Self {
        FakeClock {
            now: Cell::new(now),
            sleeps: RefCell::new(vec![]),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now.get()
    }

    pub fn advance(&self, by: Duration) {
        let by = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
        self.now.set(self.now.get() + by);
    }

    /// Every duration passed to `sleep`, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.borrow().clone()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.borrow_mut().push(duration);
        self.advance(duration);
    }
}

// ─── FakeHost ─────────────────────────────────────────────────────────────────

/// Mutable remote state behind [`FakeHost`].
#[derive(Debug, Clone)]
pub struct HostState {
    pub view: PrView,
    pub checks: Vec<CheckDetail>,
    /// All threads, resolved and unresolved.
    pub threads: Vec<ReviewThread>,
    pub rest_comments: Vec<ReviewComment>,
    pub changed_files: Vec<String>,
    pub base_last_commit: Option<DateTime<Utc>>,
    pub rate_limit: Result<RateLimitStatus, GitHubError>,
    pub metadata: PrMetadata,
    /// Consumed by `rebase`; an empty queue means success.
    pub rebase_results: VecDeque<RebaseResult>,
    pub create_output: Result<String, GitHubError>,
    /// Number of upcoming `reopen_pr` calls that fail.
    pub reopen_failures: u32,

    // Recorded mutations
    pub resolved: Vec<ThreadId>,
    pub reviewers_added: Vec<String>,
    pub comments_posted: Vec<String>,
    pub closed: u32,
    pub reopened: u32,
    pub created: Vec<PrMetadata>,
}

impl Default for HostState {
    fn default() -> Self {
        HostState {
            view: PrView {
                merge_state: MergeState::Clean,
                head_ref: "feature".to_string(),
                base_ref: "main".to_string(),
                pending_reviewers: BTreeSet::new(),
                reviews: vec![],
            },
            checks: vec![],
            threads: vec![],
            rest_comments: vec![],
            changed_files: vec!["src/lib.rs".to_string()],
            base_last_commit: None,
            rate_limit: Err(GitHubError::transient("gh api rate_limit", "unavailable")),
            metadata: PrMetadata {
                title: "Add feature".to_string(),
                body: Some("Does the thing".to_string()),
                base_ref: "main".to_string(),
                head_ref: "feature".to_string(),
                labels: vec![],
                assignees: vec![],
                is_draft: false,
            },
            rebase_results: VecDeque::new(),
            create_output: Ok("https://github.com/o/r/pull/2\n".to_string()),
            reopen_failures: 0,
            resolved: vec![],
            reviewers_added: vec![],
            comments_posted: vec![],
            closed: 0,
            reopened: 0,
            created: vec![],
        }
    }
}

type Step = Box<dyn FnOnce(&mut HostState)>;

/// In-memory [`ReviewHost`].
///
/// By default the PR is clean with no checks, no reviewers and no threads,
/// so a monitor pointed at it succeeds on the first poll.
#[derive(Default)]
pub struct FakeHost {
    state: RefCell<HostState>,
    failures: RefCell<HashMap<&'static str, VecDeque<GitHubError>>>,
    calls: RefCell<Vec<&'static str>>,
    /// Steps applied when the n-th `pr_view` call starts (1-based).
    on_view: RefCell<HashMap<usize, Vec<Step>>>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Ref<'_, HostState> {
        self.state.borrow()
    }

    pub fn update(&self, f: impl FnOnce(&mut HostState)) {
        f(&mut self.state.borrow_mut());
    }

    /// Schedules `f` to run just before the `n`-th `pr_view` call is answered.
    pub fn on_view(&self, n: usize, f: impl FnOnce(&mut HostState) + 'static) {
        self.on_view
            .borrow_mut()
            .entry(n)
            .or_default()
            .push(Box::new(f));
    }

    /// Makes the next call to `op` fail with `err`.
    pub fn fail_next(&self, op: &'static str, err: GitHubError) {
        self.failures
            .borrow_mut()
            .entry(op)
            .or_default()
            .push_back(err);
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.calls.borrow().iter().filter(|c| **c == op).count()
    }

    pub fn set_merge_state(&self, merge_state: MergeState) {
        self.update(|s| s.view.merge_state = merge_state);
    }

    pub fn set_checks(&self, checks: Vec<CheckDetail>) {
        self.update(|s| s.checks = checks);
    }

    pub fn set_threads(&self, threads: Vec<ReviewThread>) {
        self.update(|s| s.threads = threads);
    }

    pub fn set_rest_comments(&self, comments: Vec<ReviewComment>) {
        self.update(|s| s.rest_comments = comments);
    }

    pub fn set_rate_limit(&self, status: Result<RateLimitStatus, GitHubError>) {
        self.update(|s| s.rate_limit = status);
    }

    fn enter(&self, op: &'static str) -> Result<(), GitHubError> {
        self.calls.borrow_mut().push(op);
        match self.failures.borrow_mut().get_mut(op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl ReviewHost for FakeHost {
    fn pr_view(&self, _pr: PrNumber, _mode: ApiMode) -> Result<PrView, GitHubError> {
        let n = self.call_count("pr_view") + 1;
        let steps = self.on_view.borrow_mut().remove(&n).unwrap_or_default();
        for step in steps {
            step(&mut self.state.borrow_mut());
        }
        self.enter("pr_view")?;
        Ok(self.state().view.clone())
    }

    fn checks(&self, _pr: PrNumber) -> Result<Vec<CheckDetail>, GitHubError> {
        self.enter("checks")?;
        Ok(self.state().checks.clone())
    }

    fn review_threads(&self, _pr: PrNumber) -> Result<Vec<ReviewThread>, GitHubError> {
        self.enter("review_threads")?;
        Ok(self.state().threads.clone())
    }

    fn review_comments(&self, _pr: PrNumber) -> Result<Vec<ReviewComment>, GitHubError> {
        self.enter("review_comments")?;
        Ok(self.state().rest_comments.clone())
    }

    fn changed_files(&self, _pr: PrNumber) -> Result<Vec<String>, GitHubError> {
        self.enter("changed_files")?;
        Ok(self.state().changed_files.clone())
    }

    fn branch_last_commit(&self, branch: &str) -> Result<DateTime<Utc>, GitHubError> {
        self.enter("branch_last_commit")?;
        self.state().base_last_commit.ok_or_else(|| {
            GitHubError::permanent(format!("gh api commits/{}", branch), "no commits")
        })
    }

    fn rate_limit(&self) -> Result<RateLimitStatus, GitHubError> {
        self.enter("rate_limit")?;
        self.state().rate_limit.clone()
    }

    fn pr_metadata(&self, _pr: PrNumber) -> Result<PrMetadata, GitHubError> {
        self.enter("pr_metadata")?;
        Ok(self.state().metadata.clone())
    }

    fn rebase(&self, _pr: PrNumber) -> RebaseResult {
        if let Err(e) = self.enter("rebase") {
            return RebaseResult::failed(e.to_string());
        }
        let mut state = self.state.borrow_mut();
        let result = state
            .rebase_results
            .pop_front()
            .unwrap_or_else(|| RebaseResult::from_output(true, "", ""));
        if result.success {
            state.view.merge_state = MergeState::Clean;
        }
        result
    }

    fn resolve_thread(&self, thread: &ThreadId) -> Result<(), GitHubError> {
        self.enter("resolve_thread")?;
        let mut state = self.state.borrow_mut();
        for t in state.threads.iter_mut().filter(|t| &t.id == thread) {
            t.is_resolved = true;
        }
        state.resolved.push(thread.clone());
        Ok(())
    }

    fn add_reviewer(&self, _pr: PrNumber, reviewer: &str) -> Result<(), GitHubError> {
        self.enter("add_reviewer")?;
        self.state.borrow_mut().reviewers_added.push(reviewer.to_string());
        Ok(())
    }

    fn post_comment(&self, _pr: PrNumber, body: &str) -> Result<(), GitHubError> {
        self.enter("post_comment")?;
        self.state.borrow_mut().comments_posted.push(body.to_string());
        Ok(())
    }

    fn close_pr(&self, _pr: PrNumber) -> Result<(), GitHubError> {
        self.enter("close_pr")?;
        self.state.borrow_mut().closed += 1;
        Ok(())
    }

    fn create_pr(&self, metadata: &PrMetadata) -> Result<String, GitHubError> {
        self.enter("create_pr")?;
        let mut state = self.state.borrow_mut();
        state.created.push(metadata.clone());
        state.create_output.clone()
    }

    fn reopen_pr(&self, pr: PrNumber) -> Result<(), GitHubError> {
        self.enter("reopen_pr")?;
        let mut state = self.state.borrow_mut();
        if state.reopen_failures > 0 {
            state.reopen_failures -= 1;
            return Err(GitHubError::permanent(
                format!("gh pr reopen {}", pr.0),
                "could not reopen",
            ));
        }
        state.reopened += 1;
        Ok(())
    }
}

// ─── FakeRepo ─────────────────────────────────────────────────────────────────

/// Mutable local-clone state behind [`FakeRepo`].
#[derive(Debug, Clone)]
pub struct RepoState {
    /// Consumed by `has_uncommitted_changes`; when empty, `dirty` is used.
    pub dirty_sequence: VecDeque<bool>,
    pub dirty: bool,
    pub dirty_check_fails: bool,
    pub branch: Option<String>,
    pub fetch_fails: bool,
    pub remote_head: Sha,
    pub fetches: u32,
    pub resets: Vec<String>,
}

impl Default for RepoState {
    fn default() -> Self {
        RepoState {
            dirty_sequence: VecDeque::new(),
            dirty: false,
            dirty_check_fails: false,
            branch: Some("feature".to_string()),
            fetch_fails: false,
            remote_head: sha(2),
            fetches: 0,
            resets: vec![],
        }
    }
}

/// In-memory [`LocalRepo`], checked out on `feature` and clean by default.
#[derive(Debug, Default)]
pub struct FakeRepo {
    state: RefCell<RepoState>,
}

impl FakeRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Ref<'_, RepoState> {
        self.state.borrow()
    }

    pub fn update(&self, f: impl FnOnce(&mut RepoState)) {
        f(&mut self.state.borrow_mut());
    }
}

fn fake_git_error(command: &str) -> GitError {
    GitError::CommandFailed {
        command: command.to_string(),
        stderr: "fatal: simulated failure".to_string(),
    }
}

impl LocalRepo for FakeRepo {
    fn has_uncommitted_changes(&self) -> GitResult<bool> {
        let mut state = self.state.borrow_mut();
        if state.dirty_check_fails {
            return Err(fake_git_error("git status --porcelain"));
        }
        Ok(state.dirty_sequence.pop_front().unwrap_or(state.dirty))
    }

    fn current_branch(&self) -> GitResult<Option<String>> {
        Ok(self.state().branch.clone())
    }

    fn fetch_branch(&self, branch: &str) -> GitResult<()> {
        let mut state = self.state.borrow_mut();
        if state.fetch_fails {
            return Err(fake_git_error(&format!("git fetch origin {}", branch)));
        }
        state.fetches += 1;
        Ok(())
    }

    fn remote_head(&self, _branch: &str) -> GitResult<Sha> {
        Ok(self.state().remote_head.clone())
    }

    fn reset_to_remote(&self, branch: &str) -> GitResult<()> {
        self.state.borrow_mut().resets.push(branch.to_string());
        Ok(())
    }
}

// ─── Arbitrary generators ─────────────────────────────────────────────────────

pub fn arb_pr_number() -> impl Strategy<Value = PrNumber> {
    (1u64..100_000).prop_map(PrNumber)
}

pub fn arb_comment() -> impl Strategy<Value = ReviewComment> {
    (
        prop_oneof![Just("copilot"), Just("coderabbitai"), Just("alice")],
        proptest::option::of("[a-z]{1,8}\\.rs"),
        "[a-zA-Z ]{1,40}",
    )
        .prop_map(|(author, path, body)| comment(author, path.as_deref(), &body))
}

/// Unresolved threads with distinct ids `T0`, `T1`, ...
pub fn arb_threads() -> impl Strategy<Value = Vec<ReviewThread>> {
    prop::collection::vec(arb_comment(), 0..8).prop_map(|comments| {
        comments
            .into_iter()
            .enumerate()
            .map(|(i, c)| thread(&format!("T{}", i), c))
            .collect()
    })
}

pub fn hashes_of(threads: &[ReviewThread]) -> BTreeSet<ContentHash> {
    threads.iter().filter_map(ReviewThread::content_hash).collect()
}
