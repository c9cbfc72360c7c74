//! One poll's worth of PR state.
//!
//! The view and check queries are mandatory: if either fails the whole fetch
//! fails and the loop retries later. Thread data is best effort. When the
//! thread query fails the snapshot still comes back, with
//! [`ThreadStatus::Unknown`] so the failure is visible downstream instead of
//! reading as "no unresolved threads".

use crate::github::{ApiMode, GitHubError, ReviewHost};
use crate::types::{CheckStatus, PrNumber, PrState, ReviewComment, ThreadStatus};

/// Fetches a fresh [`PrState`].
///
/// In [`ApiMode::Rest`] comments come from the REST endpoint and thread
/// status is always `Unknown`.
pub fn fetch_pr_state(
    host: &dyn ReviewHost,
    pr: PrNumber,
    mode: ApiMode,
) -> Result<PrState, GitHubError> {
    let view = host.pr_view(pr, mode)?;
    let check_details = host.checks(pr)?;

    let (review_comments, unresolved_threads) = match mode {
        ApiMode::GraphQl => match host.review_threads(pr) {
            Ok(threads) => {
                let status = ThreadStatus::from_threads(threads);
                let comments: Vec<ReviewComment> = status
                    .threads()
                    .iter()
                    .flat_map(|t| t.comments.iter().cloned())
                    .collect();
                (comments, status)
            }
            Err(e) => {
                tracing::warn!(pr = %pr, error = %e, "review thread query failed, thread status unknown");
                (vec![], ThreadStatus::Unknown)
            }
        },
        ApiMode::Rest => (host.review_comments(pr)?, ThreadStatus::Unknown),
    };

    Ok(PrState {
        number: pr,
        head_ref: view.head_ref,
        base_ref: view.base_ref,
        merge_state: view.merge_state,
        check_status: CheckStatus::aggregate(&check_details),
        check_details,
        pending_reviewers: view.pending_reviewers,
        reviews: view.reviews,
        review_comments,
        unresolved_threads,
    })
}
