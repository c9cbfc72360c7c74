//! [`ReviewHost`] implemented over the `gh` command-line tool.
//!
//! Each method runs exactly one `gh` invocation (two for REST views) through
//! [`process::run`] with the query or mutation timeout, then parses the JSON
//! it prints. Parsing lives in free functions so it can be tested against
//! captured output without a network.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::error::GitHubError;
use super::{ApiMode, PrView, ReviewHost};
use crate::process::{self, CommandOutput};
use crate::rate_limit::RateLimitStatus;
use crate::types::{
    CheckDetail, CheckState, MergeState, PrMetadata, PrNumber, RebaseResult, Review,
    ReviewComment, ReviewThread, ThreadId,
};

/// Default timeout for read-only calls.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for calls that change remote state.
pub const DEFAULT_MUTATION_TIMEOUT: Duration = Duration::from_secs(120);

const VIEW_FIELDS: &str =
    "mergeStateStatus,headRefName,baseRefName,reviewRequests,latestReviews";

const METADATA_FIELDS: &str = "title,body,baseRefName,headRefName,labels,assignees,isDraft";

const THREADS_QUERY: &str = "query($owner: String!, $name: String!, $number: Int!) {
  repository(owner: $owner, name: $name) {
    pullRequest(number: $number) {
      reviewThreads(first: 100) {
        nodes {
          id
          isResolved
          comments(first: 50) { nodes { author { login } body path } }
        }
      }
    }
  }
}";

const RESOLVE_MUTATION: &str = "mutation($id: ID!) {
  resolveReviewThread(input: {threadId: $id}) { thread { isResolved } }
}";

/// `gh`-backed review host.
#[derive(Debug, Clone)]
pub struct GhCli {
    program: String,
    /// `OWNER/REPO`; when `None`, `gh` infers it from the working directory.
    repo: Option<String>,
    workdir: Option<PathBuf>,
    query_timeout: Duration,
    mutation_timeout: Duration,
}

impl Default for GhCli {
    fn default() -> Self {
        Self::new()
    }
}

impl GhCli {
    pub fn new() -> Self {
        GhCli {
            program: "gh".to_string(),
            repo: None,
            workdir: None,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            mutation_timeout: DEFAULT_MUTATION_TIMEOUT,
        }
    }

    /// Targets an explicit repository instead of the current directory's.
    pub fn with_repo(mut self, repo: impl Into<String>) -> Self {
        self.repo = Some(repo.into());
        self
    }

    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(args);
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }
        if let Some(repo) = &self.repo {
            cmd.env("GH_REPO", repo);
        }
        // Never page or prompt; output is parsed.
        cmd.env("GH_PAGER", "cat");
        cmd.env("GH_PROMPT_DISABLED", "1");
        cmd.env("NO_COLOR", "1");
        cmd
    }

    fn exec(&self, args: &[&str], timeout: Duration) -> Result<CommandOutput, GitHubError> {
        process::run(self.command(args), timeout).map_err(|e| GitHubError::from_command_error(&e))
    }

    /// Runs a query and returns stdout, failing on non-zero exit.
    fn query(&self, args: &[&str]) -> Result<(String, String), GitHubError> {
        let output = self.exec(args, self.query_timeout)?;
        if !output.success {
            return Err(GitHubError::from_output(&output));
        }
        Ok((output.command, output.stdout))
    }

    /// Runs a mutation, failing on non-zero exit.
    fn mutate(&self, args: &[&str]) -> Result<CommandOutput, GitHubError> {
        let output = self.exec(args, self.mutation_timeout)?;
        if !output.success {
            return Err(GitHubError::from_output(&output));
        }
        Ok(output)
    }

    fn query_json<T: for<'de> Deserialize<'de>>(&self, args: &[&str]) -> Result<T, GitHubError> {
        let (command, stdout) = self.query(args)?;
        serde_json::from_str(&stdout).map_err(|e| GitHubError::parse(command, e))
    }
}

impl ReviewHost for GhCli {
    fn pr_view(&self, pr: PrNumber, mode: ApiMode) -> Result<PrView, GitHubError> {
        match mode {
            ApiMode::GraphQl => {
                let raw: RawPrView =
                    self.query_json(&["pr", "view", &pr.as_arg(), "--json", VIEW_FIELDS])?;
                Ok(raw.into_view())
            }
            ApiMode::Rest => {
                let pull_endpoint = format!("repos/{{owner}}/{{repo}}/pulls/{}", pr.0);
                let pull: RestPull = self.query_json(&["api", &pull_endpoint])?;
                let reviews_endpoint = format!("{}/reviews?per_page=100", pull_endpoint);
                let reviews: Vec<RestReview> = self.query_json(&["api", &reviews_endpoint])?;
                Ok(pull.into_view(reviews))
            }
        }
    }

    fn checks(&self, pr: PrNumber) -> Result<Vec<CheckDetail>, GitHubError> {
        // `gh pr checks` exits 8 while checks are pending and 1 when any
        // failed, so the exit code alone says nothing about the call itself.
        let output = self.exec(
            &["pr", "checks", &pr.as_arg(), "--json", "name,state,bucket"],
            self.query_timeout,
        )?;
        parse_checks(&output)
    }

    fn review_threads(&self, pr: PrNumber) -> Result<Vec<ReviewThread>, GitHubError> {
        let query = format!("query={}", THREADS_QUERY);
        let number = format!("number={}", pr.0);
        let (command, stdout) = self.query(&[
            "api",
            "graphql",
            "-f",
            &query,
            "-F",
            "owner={owner}",
            "-F",
            "name={repo}",
            "-F",
            &number,
        ])?;
        parse_review_threads(&stdout).map_err(|e| GitHubError::parse(command, e))
    }

    fn review_comments(&self, pr: PrNumber) -> Result<Vec<ReviewComment>, GitHubError> {
        let endpoint = format!("repos/{{owner}}/{{repo}}/pulls/{}/comments?per_page=100", pr.0);
        let raw: Vec<RestComment> = self.query_json(&["api", &endpoint])?;
        Ok(raw.into_iter().map(RestComment::into_comment).collect())
    }

    fn changed_files(&self, pr: PrNumber) -> Result<Vec<String>, GitHubError> {
        let (_, stdout) = self.query(&["pr", "diff", &pr.as_arg(), "--name-only"])?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn branch_last_commit(&self, branch: &str) -> Result<DateTime<Utc>, GitHubError> {
        let endpoint = format!("repos/{{owner}}/{{repo}}/commits/{}", branch);
        let (command, stdout) =
            self.query(&["api", &endpoint, "--jq", ".commit.committer.date"])?;
        DateTime::parse_from_rfc3339(stdout.trim())
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| GitHubError::parse(command, e))
    }

    fn rate_limit(&self) -> Result<RateLimitStatus, GitHubError> {
        let (command, stdout) = self.query(&["api", "rate_limit"])?;
        parse_rate_limit(&stdout).map_err(|e| GitHubError::parse(command, e))
    }

    fn pr_metadata(&self, pr: PrNumber) -> Result<PrMetadata, GitHubError> {
        let raw: RawMetadata =
            self.query_json(&["pr", "view", &pr.as_arg(), "--json", METADATA_FIELDS])?;
        Ok(raw.into_metadata())
    }

    fn rebase(&self, pr: PrNumber) -> RebaseResult {
        match self.exec(
            &["pr", "update-branch", &pr.as_arg(), "--rebase"],
            self.mutation_timeout,
        ) {
            Ok(output) => RebaseResult::from_output(output.success, &output.stdout, &output.stderr),
            Err(e) => RebaseResult::failed(e.to_string()),
        }
    }

    fn resolve_thread(&self, thread: &ThreadId) -> Result<(), GitHubError> {
        let query = format!("query={}", RESOLVE_MUTATION);
        let id = format!("id={}", thread.as_str());
        self.mutate(&["api", "graphql", "-f", &query, "-f", &id])?;
        Ok(())
    }

    fn add_reviewer(&self, pr: PrNumber, reviewer: &str) -> Result<(), GitHubError> {
        self.mutate(&["pr", "edit", &pr.as_arg(), "--add-reviewer", reviewer])?;
        Ok(())
    }

    fn post_comment(&self, pr: PrNumber, body: &str) -> Result<(), GitHubError> {
        self.mutate(&["pr", "comment", &pr.as_arg(), "--body", body])?;
        Ok(())
    }

    fn close_pr(&self, pr: PrNumber) -> Result<(), GitHubError> {
        self.mutate(&["pr", "close", &pr.as_arg()])?;
        Ok(())
    }

    fn create_pr(&self, metadata: &PrMetadata) -> Result<String, GitHubError> {
        let body = metadata.body.clone().unwrap_or_default();
        let mut args: Vec<&str> = vec![
            "pr",
            "create",
            "--title",
            &metadata.title,
            "--body",
            &body,
            "--base",
            &metadata.base_ref,
            "--head",
            &metadata.head_ref,
        ];
        for label in &metadata.labels {
            args.extend(["--label", label.as_str()]);
        }
        for assignee in &metadata.assignees {
            args.extend(["--assignee", assignee.as_str()]);
        }
        if metadata.is_draft {
            args.push("--draft");
        }
        Ok(self.mutate(&args)?.stdout)
    }

    fn reopen_pr(&self, pr: PrNumber) -> Result<(), GitHubError> {
        self.mutate(&["pr", "reopen", &pr.as_arg()])?;
        Ok(())
    }
}

// ─── Output parsing ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Login {
    #[serde(default)]
    login: Option<String>,
}

fn login_or_ghost(author: Option<Login>) -> String {
    author
        .and_then(|a| a.login)
        .unwrap_or_else(|| "ghost".to_string())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPrView {
    #[serde(default)]
    merge_state_status: String,
    head_ref_name: String,
    base_ref_name: String,
    #[serde(default)]
    review_requests: Vec<RawReviewRequest>,
    #[serde(default)]
    latest_reviews: Vec<RawReview>,
}

/// A requested reviewer: a user or bot (`login`) or a team (`slug`/`name`).
#[derive(Debug, Deserialize)]
struct RawReviewRequest {
    #[serde(default)]
    login: Option<String>,
    #[serde(default)]
    slug: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

impl RawReviewRequest {
    fn identity(self) -> Option<String> {
        self.login.or(self.slug).or(self.name)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReview {
    #[serde(default)]
    author: Option<Login>,
    #[serde(default)]
    body: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    submitted_at: Option<DateTime<Utc>>,
}

impl RawPrView {
    fn into_view(self) -> PrView {
        PrView {
            merge_state: MergeState::from_github(&self.merge_state_status),
            head_ref: self.head_ref_name,
            base_ref: self.base_ref_name,
            pending_reviewers: self
                .review_requests
                .into_iter()
                .filter_map(RawReviewRequest::identity)
                .collect(),
            reviews: self
                .latest_reviews
                .into_iter()
                .map(|r| Review {
                    author: login_or_ghost(r.author),
                    body: r.body,
                    state: r.state,
                    submitted_at: r.submitted_at,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RestRef {
    #[serde(rename = "ref")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct RestTeam {
    slug: String,
}

#[derive(Debug, Deserialize)]
struct RestPull {
    #[serde(default)]
    mergeable_state: Option<String>,
    head: RestRef,
    base: RestRef,
    #[serde(default)]
    requested_reviewers: Vec<Login>,
    #[serde(default)]
    requested_teams: Vec<RestTeam>,
}

#[derive(Debug, Deserialize)]
struct RestReview {
    #[serde(default)]
    user: Option<Login>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    state: String,
    #[serde(default)]
    submitted_at: Option<DateTime<Utc>>,
}

impl RestPull {
    fn into_view(self, reviews: Vec<RestReview>) -> PrView {
        let mut pending: BTreeSet<String> = self
            .requested_reviewers
            .into_iter()
            .filter_map(|l| l.login)
            .collect();
        pending.extend(self.requested_teams.into_iter().map(|t| t.slug));

        PrView {
            merge_state: MergeState::from_github(self.mergeable_state.as_deref().unwrap_or("")),
            head_ref: self.head.name,
            base_ref: self.base.name,
            pending_reviewers: pending,
            reviews: latest_per_author(reviews),
        }
    }
}

/// REST returns every review; keep the newest per author, like `latestReviews`.
fn latest_per_author(reviews: Vec<RestReview>) -> Vec<Review> {
    let mut latest: BTreeMap<String, Review> = BTreeMap::new();
    for r in reviews {
        let review = Review {
            author: login_or_ghost(r.user),
            body: r.body.unwrap_or_default(),
            state: r.state,
            submitted_at: r.submitted_at,
        };
        let newer = latest
            .get(&review.author)
            .is_none_or(|existing| review.submitted_at >= existing.submitted_at);
        if newer {
            latest.insert(review.author.clone(), review);
        }
    }
    latest.into_values().collect()
}

#[derive(Debug, Deserialize)]
struct RawCheck {
    name: String,
    #[serde(default)]
    bucket: String,
}

fn parse_checks(output: &CommandOutput) -> Result<Vec<CheckDetail>, GitHubError> {
    let stdout = output.stdout.trim();
    if !stdout.is_empty()
        && let Ok(raw) = serde_json::from_str::<Vec<RawCheck>>(stdout)
    {
        return Ok(raw
            .into_iter()
            .map(|c| CheckDetail::new(c.name, CheckState::from_bucket(&c.bucket)))
            .collect());
    }

    if output.error_text().to_lowercase().contains("no checks reported") {
        return Ok(vec![]);
    }

    if output.success {
        return Err(GitHubError::parse(
            output.command.clone(),
            "check list is not a JSON array",
        ));
    }
    Err(GitHubError::from_output(output))
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: ThreadsData,
}

#[derive(Debug, Deserialize)]
struct ThreadsData {
    repository: ThreadsRepository,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadsRepository {
    pull_request: ThreadsPullRequest,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadsPullRequest {
    review_threads: Nodes<RawThread>,
}

#[derive(Debug, Deserialize)]
struct Nodes<T> {
    nodes: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawThread {
    id: String,
    is_resolved: bool,
    comments: Nodes<RawThreadComment>,
}

#[derive(Debug, Deserialize)]
struct RawThreadComment {
    #[serde(default)]
    author: Option<Login>,
    #[serde(default)]
    body: String,
    #[serde(default)]
    path: Option<String>,
}

fn parse_review_threads(stdout: &str) -> Result<Vec<ReviewThread>, serde_json::Error> {
    let response: GraphQlResponse = serde_json::from_str(stdout)?;
    Ok(response
        .data
        .repository
        .pull_request
        .review_threads
        .nodes
        .into_iter()
        .map(|t| {
            let id = ThreadId::new(t.id);
            let comments = t
                .comments
                .nodes
                .into_iter()
                .map(|c| ReviewComment {
                    author: login_or_ghost(c.author),
                    body: c.body,
                    thread_id: id.clone(),
                    path: c.path,
                })
                .collect();
            ReviewThread {
                id,
                is_resolved: t.is_resolved,
                comments,
            }
        })
        .collect())
}

#[derive(Debug, Deserialize)]
struct RestComment {
    id: u64,
    #[serde(default)]
    in_reply_to_id: Option<u64>,
    #[serde(default)]
    user: Option<Login>,
    #[serde(default)]
    body: String,
    #[serde(default)]
    path: Option<String>,
}

impl RestComment {
    fn into_comment(self) -> ReviewComment {
        ReviewComment {
            author: login_or_ghost(self.user),
            body: self.body,
            thread_id: ThreadId::new(self.in_reply_to_id.unwrap_or(self.id).to_string()),
            path: self.path,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RateLimitResponse {
    resources: RateLimitResources,
}

#[derive(Debug, Deserialize)]
struct RateLimitResources {
    graphql: RateLimitStatus,
}

fn parse_rate_limit(stdout: &str) -> Result<RateLimitStatus, serde_json::Error> {
    let response: RateLimitResponse = serde_json::from_str(stdout)?;
    Ok(response.resources.graphql)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMetadata {
    #[serde(default)]
    title: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    base_ref_name: String,
    #[serde(default)]
    head_ref_name: String,
    #[serde(default)]
    labels: Vec<RawLabel>,
    #[serde(default)]
    assignees: Vec<Login>,
    #[serde(default)]
    is_draft: bool,
}

#[derive(Debug, Deserialize)]
struct RawLabel {
    name: String,
}

impl RawMetadata {
    fn into_metadata(self) -> PrMetadata {
        PrMetadata {
            title: self.title,
            body: self.body.filter(|b| !b.trim().is_empty()),
            base_ref: self.base_ref_name,
            head_ref: self.head_ref_name,
            labels: self.labels.into_iter().map(|l| l.name).collect(),
            assignees: self.assignees.into_iter().filter_map(|a| a.login).collect(),
            is_draft: self.is_draft,
        }
    }
}
