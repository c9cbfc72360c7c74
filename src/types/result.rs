//! Outcome types: the result of a rebase attempt and the terminal result of a
//! monitoring run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Substrings in `update-branch` output that mean the rebase hit conflicts.
///
/// Matched case-insensitively against combined stdout/stderr.
pub const CONFLICT_PHRASES: &[&str] = &[
    "conflict",
    "could not be rebased",
    "cannot be rebased",
    "not possible to rebase",
    "merge conflict",
];

/// Result of a remote rebase (`gh pr update-branch --rebase`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebaseResult {
    pub success: bool,

    /// True when the failure output mentions a conflict.
    pub conflict: bool,

    /// stderr, falling back to stdout; `None` when both are empty.
    pub error_message: Option<String>,
}

impl RebaseResult {
    /// Builds a result from the rebase command's exit status and output.
    pub fn from_output(success: bool, stdout: &str, stderr: &str) -> Self {
        if success {
            return RebaseResult {
                success: true,
                conflict: false,
                error_message: None,
            };
        }

        let combined = format!("{}\n{}", stdout, stderr).to_lowercase();
        let conflict = CONFLICT_PHRASES.iter().any(|p| combined.contains(p));

        let error_message = [stderr.trim(), stdout.trim()]
            .into_iter()
            .find(|s| !s.is_empty())
            .map(str::to_string);

        RebaseResult {
            success: false,
            conflict,
            error_message,
        }
    }

    /// A failed rebase that never produced output (spawn failure, timeout).
    pub fn failed(message: impl Into<String>) -> Self {
        RebaseResult {
            success: false,
            conflict: false,
            error_message: Some(message.into()),
        }
    }
}

/// Why monitoring stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalState {
    /// CI passed, reviews settled, branch current.
    Ready,
    /// Early-exit mode saw review comments.
    CommentsReceived,
    CiFailed,
    CiCancelled,
    MergeConflict,
    RebaseConflict,
    RebaseFailed,
    /// The base branch kept moving after the rebase cap was hit.
    RebaseLimit,
    /// Uncommitted local changes never cleared.
    LocalChanges,
    ReviewFailed,
    /// The PR was closed and recreated under a new number.
    Recreated,
    /// Creation failed and reopening the original failed too.
    RecoveryNeeded,
    TimedOut,
}

/// The terminal value of a monitoring run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorResult {
    pub success: bool,
    pub message: String,
    pub rebase_count: u32,
    pub final_state: FinalState,
    pub review_completed: bool,
    pub ci_passed: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, serde_json::Value>,
}

impl MonitorResult {
    pub fn new(success: bool, final_state: FinalState, message: impl Into<String>) -> Self {
        MonitorResult {
            success,
            message: message.into(),
            rebase_count: 0,
            final_state,
            review_completed: false,
            ci_passed: false,
            details: BTreeMap::new(),
        }
    }

    pub fn failure(final_state: FinalState, message: impl Into<String>) -> Self {
        Self::new(false, final_state, message)
    }

    /// Adds a `details` entry, replacing any existing value for `key`.
    pub fn with_detail(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn detail(&self, key: &str) -> Option<&serde_json::Value> {
        self.details.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_has_no_error() {
        let r = RebaseResult::from_output(true, "rebased", "warning: conflict-ish noise");
        assert!(r.success);
        assert!(!r.conflict);
        assert_eq!(r.error_message, None);
    }

    #[test]
    fn conflict_detected_case_insensitively() {
        let r = RebaseResult::from_output(false, "", "Head branch Could Not Be Rebased");
        assert!(r.conflict);
        let r = RebaseResult::from_output(false, "MERGE CONFLICT in src/lib.rs", "");
        assert!(r.conflict);
    }

    #[test]
    fn error_message_prefers_stderr() {
        let r = RebaseResult::from_output(false, "out", "err");
        assert_eq!(r.error_message.as_deref(), Some("err"));
        assert!(!r.conflict);

        let r = RebaseResult::from_output(false, "out only", "  ");
        assert_eq!(r.error_message.as_deref(), Some("out only"));

        let r = RebaseResult::from_output(false, "", "");
        assert_eq!(r.error_message, None);
    }

    #[test]
    fn details_are_omitted_when_empty() {
        let result = MonitorResult::failure(FinalState::TimedOut, "timed out");
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("details").is_none());
        assert_eq!(json["final_state"], "timed_out");

        let result = result.with_detail("recreated_pr", 456);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["details"]["recreated_pr"], 456);
    }
}
