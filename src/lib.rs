//! PR Monitor - waits for a pull request to become mergeable.
//!
//! The monitor polls a PR through the `gh` CLI until CI passes and every AI
//! reviewer has finished. Along the way it rebases the branch when it falls
//! behind, re-requests reviews that errored, auto-resolves review threads a
//! rebase re-posted, and closes and recreates the PR when a review is stuck.
//! It adapts its cadence and API choice to the remaining rate limit.

pub mod clock;
pub mod git;
pub mod github;
pub mod monitor;
pub mod persistence;
pub mod process;
pub mod rate_limit;
pub mod types;

#[cfg(test)]
mod test_utils;
