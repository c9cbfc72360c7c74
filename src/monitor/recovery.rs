//! PR recreation for reviews that never finish.
//!
//! When an AI reviewer has been pending past the stuck threshold, closing
//! the PR and opening an identical one is the only reliable way to get a
//! fresh review. The procedure fails closed:
//!
//! 1. Fetch metadata. Missing title or head branch aborts with nothing
//!    changed.
//! 2. Close the PR. If that fails, abort (still nothing changed).
//! 3. Create the replacement. On failure, reopen the original on a short
//!    fixed retry ladder.
//! 4. If reopening fails too, the original is closed with no replacement.
//!    The caller persists a `recovery_needed` record for a human.

use super::config::MonitorConfig;
use crate::clock::Clock;
use crate::github::{ReviewHost, RetryResult, retry_with_backoff};
use crate::persistence::RecoveryRecord;
use crate::types::{PrMetadata, PrNumber};

/// Body used when the original PR had none.
pub const PLACEHOLDER_BODY: &str =
    "_This pull request was recreated automatically after its AI review stalled._";

/// How a recreation attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// The replacement exists. `None` if its number could not be read from
    /// the tool output.
    Recreated { new_pr: Option<PrNumber> },

    /// Stopped before changing anything remote.
    Aborted { reason: String },

    /// Creation failed and the original PR was reopened.
    RolledBack { create_error: String },

    /// Creation failed and the original could not be reopened.
    RecoveryNeeded(RecoveryRecord),
}

/// Closes `pr` and opens an identical replacement.
pub fn recreate_pr(
    host: &dyn ReviewHost,
    clock: &dyn Clock,
    config: &MonitorConfig,
    pr: PrNumber,
) -> RecoveryOutcome {
    let metadata = match host.pr_metadata(pr) {
        Ok(m) => m,
        Err(e) => {
            return RecoveryOutcome::Aborted {
                reason: format!("could not read PR metadata: {}", e),
            };
        }
    };
    if metadata.title.trim().is_empty() || metadata.head_ref.trim().is_empty() {
        return RecoveryOutcome::Aborted {
            reason: "PR metadata is missing a title or head branch".to_string(),
        };
    }

    if let Err(e) = host.close_pr(pr) {
        return RecoveryOutcome::Aborted {
            reason: format!("could not close PR: {}", e),
        };
    }
    tracing::info!(pr = %pr, head = %metadata.head_ref, "closed PR for recreation");

    let replacement = PrMetadata {
        body: Some(
            metadata
                .body
                .clone()
                .unwrap_or_else(|| PLACEHOLDER_BODY.to_string()),
        ),
        ..metadata.clone()
    };

    let create_error = match host.create_pr(&replacement) {
        Ok(output) => {
            let new_pr = PrNumber::from_pr_url_output(&output);
            match new_pr {
                Some(n) => tracing::info!(pr = %pr, new_pr = %n, "PR recreated"),
                None => tracing::warn!(
                    pr = %pr,
                    output = output.trim(),
                    "PR recreated but its number could not be read; check the review tool"
                ),
            }
            return RecoveryOutcome::Recreated { new_pr };
        }
        Err(e) => e,
    };
    tracing::error!(pr = %pr, error = %create_error, "recreation failed, reopening original PR");

    let reopen = retry_with_backoff(config.reopen_retry, clock, |attempt| {
        tracing::info!(pr = %pr, attempt, "reopening original PR");
        host.reopen_pr(pr)
    });

    match reopen {
        RetryResult::Success(()) => RecoveryOutcome::RolledBack {
            create_error: create_error.to_string(),
        },
        RetryResult::ExhaustedRetries {
            last_error,
            attempts,
        } => {
            tracing::error!(pr = %pr, attempts, error = %last_error, "could not reopen original PR");
            RecoveryOutcome::RecoveryNeeded(RecoveryRecord {
                original_pr: pr,
                head_ref: metadata.head_ref,
                base_ref: metadata.base_ref,
                title: metadata.title,
                create_error: create_error.to_string(),
                reopen_error: last_error.to_string(),
                reopen_attempts: attempts,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::GitHubError;
    use crate::test_utils::{FakeClock, FakeHost};
    use std::time::Duration;

    fn run(host: &FakeHost) -> (RecoveryOutcome, FakeClock) {
        let clock = FakeClock::new();
        let outcome = recreate_pr(host, &clock, &MonitorConfig::new(), PrNumber(123));
        (outcome, clock)
    }

    #[test]
    fn recreates_with_identical_metadata() {
        let host = FakeHost::new();
        host.update(|s| {
            s.metadata.labels = vec!["bug".into()];
            s.metadata.assignees = vec!["me".into()];
            s.metadata.is_draft = true;
            s.create_output = Ok("https://github.com/o/r/pull/456\n".into());
        });

        let (outcome, _) = run(&host);
        assert_eq!(
            outcome,
            RecoveryOutcome::Recreated {
                new_pr: Some(PrNumber(456))
            }
        );
        let state = host.state();
        assert_eq!(state.closed, 1);
        assert_eq!(state.created[0], state.metadata);
    }

    #[test]
    fn missing_body_gets_placeholder() {
        let host = FakeHost::new();
        host.update(|s| s.metadata.body = None);
        run(&host);
        assert_eq!(host.state().created[0].body.as_deref(), Some(PLACEHOLDER_BODY));
    }

    #[test]
    fn unreadable_output_still_succeeds() {
        let host = FakeHost::new();
        host.update(|s| s.create_output = Ok("created!".into()));
        assert_eq!(run(&host).0, RecoveryOutcome::Recreated { new_pr: None });
    }

    #[test]
    fn empty_title_aborts_without_mutation() {
        let host = FakeHost::new();
        host.update(|s| s.metadata.title = "  ".into());
        assert!(matches!(run(&host).0, RecoveryOutcome::Aborted { .. }));
        assert_eq!(host.call_count("close_pr"), 0);
    }

    #[test]
    fn close_failure_aborts() {
        let host = FakeHost::new();
        host.fail_next("close_pr", GitHubError::permanent("gh pr close 123", "forbidden"));
        assert!(matches!(run(&host).0, RecoveryOutcome::Aborted { .. }));
        assert_eq!(host.call_count("create_pr"), 0);
    }

    #[test]
    fn create_failure_reopens() {
        let host = FakeHost::new();
        host.update(|s| {
            s.create_output = Err(GitHubError::permanent("gh pr create", "validation failed"));
            s.reopen_failures = 1;
        });

        let (outcome, clock) = run(&host);
        assert!(matches!(outcome, RecoveryOutcome::RolledBack { .. }));
        assert_eq!(host.state().reopened, 1);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(5)]);
    }

    #[test]
    fn failed_reopen_needs_recovery() {
        let host = FakeHost::new();
        host.update(|s| {
            s.create_output = Err(GitHubError::permanent("gh pr create", "validation failed"));
            s.reopen_failures = 10;
        });

        match run(&host).0 {
            RecoveryOutcome::RecoveryNeeded(record) => {
                assert_eq!(record.original_pr, PrNumber(123));
                assert_eq!(record.reopen_attempts, 3);
                assert!(record.create_error.contains("validation failed"));
            }
            other => panic!("expected RecoveryNeeded, got {:?}", other),
        }
        assert_eq!(host.call_count("reopen_pr"), 3);
    }
}
