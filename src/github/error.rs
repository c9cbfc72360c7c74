//! Review-tool error types.
//!
//! Every `gh` failure is categorised so callers can decide between "log and
//! keep polling" and "stop":
//!
//! - **Transient** errors are worth another try (5xx, rate limits, network).
//! - **Permanent** errors will not fix themselves (bad arguments, 404, auth).
//! - **TimedOut** means the call exceeded its per-call timeout. On a query
//!   this is treated like a transient error; on a mutation the outcome is
//!   unknown and the attempt is treated as failed.
//!
//! A successful call with an empty or negative answer is never an error.

use thiserror::Error;

use crate::process::{CommandError, CommandOutput};

/// The kind of review-tool error, categorized for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitHubErrorKind {
    /// Safe to retry.
    ///
    /// Examples:
    /// - HTTP 5xx / 502 Bad Gateway
    /// - API rate limit exceeded, secondary rate limit
    /// - Connection reset, DNS failure
    Transient,

    /// Requires a different request or human intervention.
    ///
    /// Examples:
    /// - PR not found
    /// - Authentication failures
    /// - `gh` not installed
    /// - Output that could not be parsed
    Permanent,

    /// The call did not finish within its timeout and was killed.
    TimedOut,
}

impl GitHubErrorKind {
    /// Returns true if this error is retriable.
    pub fn is_retriable(&self) -> bool {
        matches!(self, GitHubErrorKind::Transient | GitHubErrorKind::TimedOut)
    }
}

/// A review-tool error with categorization for retry decisions.
#[derive(Debug, Clone, Error)]
#[error("{command}: {message}")]
pub struct GitHubError {
    pub kind: GitHubErrorKind,

    /// The command that failed (e.g. `gh pr view 12 --json ...`).
    pub command: String,

    /// A human-readable description of the error.
    pub message: String,
}

impl GitHubError {
    pub fn transient(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: GitHubErrorKind::Transient,
            command: command.into(),
            message: message.into(),
        }
    }

    pub fn permanent(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: GitHubErrorKind::Permanent,
            command: command.into(),
            message: message.into(),
        }
    }

    /// Output that did not have the expected shape.
    pub fn parse(command: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::permanent(command, format!("unexpected output: {}", err))
    }

    /// Categorizes a subprocess that could not be run to completion.
    pub fn from_command_error(err: &CommandError) -> Self {
        match err {
            CommandError::TimedOut { command, .. } => Self {
                kind: GitHubErrorKind::TimedOut,
                command: command.clone(),
                message: err.to_string(),
            },
            CommandError::Spawn { command, .. } | CommandError::Wait { command, .. } => {
                Self::permanent(command.clone(), err.to_string())
            }
        }
    }

    /// Categorizes a command that exited non-zero.
    ///
    /// Categorization is based on the error text, since `gh` reports HTTP
    /// failures as prose on stderr.
    pub fn from_output(output: &CommandOutput) -> Self {
        let message = output.error_text().to_string();
        let kind = if is_transient_message(&message)
            || is_rate_limit_error(&message)
            || is_server_error(&message)
            || is_network_error(&message)
        {
            GitHubErrorKind::Transient
        } else {
            GitHubErrorKind::Permanent
        };

        Self {
            kind,
            command: output.command.clone(),
            message,
        }
    }
}

/// Checks if an error message indicates a transient condition.
///
/// These messages indicate GitHub API quirks that resolve with retries:
/// - Concurrent modifications to the base branch
/// - mergeability still being computed
fn is_transient_message(message: &str) -> bool {
    let message_lower = message.to_lowercase();

    if message_lower.contains("base branch was modified") {
        return true;
    }

    // Generic "try again" suggestions from GitHub
    if message_lower.contains("try again") {
        return true;
    }

    false
}

/// Checks if an error message indicates a rate limit.
pub(crate) fn is_rate_limit_error(message: &str) -> bool {
    let message_lower = message.to_lowercase();
    message_lower.contains("rate limit")
        || message_lower.contains("api rate")
        || message_lower.contains("secondary rate")
        || message_lower.contains("abuse detection")
}

/// Checks if an error message carries an HTTP 5xx status.
fn is_server_error(message: &str) -> bool {
    let message_lower = message.to_lowercase();
    ["http 500", "http 502", "http 503", "http 504", "bad gateway", "service unavailable"]
        .iter()
        .any(|p| message_lower.contains(p))
        || message_lower.contains("internal server error")
}

/// Checks if an error message indicates a network-level error.
fn is_network_error(message: &str) -> bool {
    let message_lower = message.to_lowercase();
    message_lower.contains("timeout")
        || message_lower.contains("connection")
        || message_lower.contains("error connecting")
        || message_lower.contains("network")
        || message_lower.contains("dns")
        || message_lower.contains("timed out")
        || message_lower.contains("eof")
}
