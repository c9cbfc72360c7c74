//! Duplicate thread resolution after a rebase.
//!
//! Some review tools re-post their earlier comments when a PR's commits are
//! rewritten. Before rebasing, the monitor records the content hashes of
//! the threads that are already resolved. On the first poll after the
//! rebase, any unresolved thread with one of those hashes is a re-post of
//! something already addressed and is resolved automatically.

use std::collections::BTreeSet;

use crate::github::ReviewHost;
use crate::types::{ContentHash, PrState, ReviewThread, ThreadId, ThreadStatus};

/// Hashes of the resolved threads in `threads`.
pub fn resolved_hashes(threads: &[ReviewThread]) -> BTreeSet<ContentHash> {
    threads
        .iter()
        .filter(|t| t.is_resolved)
        .filter_map(ReviewThread::content_hash)
        .collect()
}

/// Unresolved threads whose content matches a previously resolved one.
///
/// Each thread id appears at most once even if the listing repeats it.
pub fn find_duplicates<'a>(
    resolved_before: &BTreeSet<ContentHash>,
    threads: &'a [ReviewThread],
) -> Vec<&'a ReviewThread> {
    let mut seen: BTreeSet<&ThreadId> = BTreeSet::new();
    threads
        .iter()
        .filter(|t| !t.is_resolved)
        .filter(|t| {
            t.content_hash()
                .is_some_and(|h| resolved_before.contains(&h))
        })
        .filter(|t| seen.insert(&t.id))
        .collect()
}

/// What one resolution pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DuplicateResolution {
    pub threads: BTreeSet<ThreadId>,
    pub hashes: BTreeSet<ContentHash>,
}

impl DuplicateResolution {
    pub fn count(&self) -> usize {
        self.threads.len()
    }

    /// `state` without the resolved threads and their comments.
    pub fn exclude_from(&self, state: PrState) -> PrState {
        if self.threads.is_empty() {
            return state;
        }
        let review_comments = state
            .review_comments
            .into_iter()
            .filter(|c| !self.threads.contains(&c.thread_id))
            .collect();
        let unresolved_threads = match state.unresolved_threads {
            ThreadStatus::Values(threads) => ThreadStatus::from_threads(
                threads
                    .into_iter()
                    .filter(|t| !self.threads.contains(&t.id))
                    .collect(),
            ),
            other => other,
        };
        PrState {
            review_comments,
            unresolved_threads,
            ..state
        }
    }
}

/// Resolves every duplicate among `threads`.
///
/// A thread whose resolve call fails is left out of the result and stays
/// visible as a new comment.
pub fn resolve_duplicates(
    host: &dyn ReviewHost,
    resolved_before: &BTreeSet<ContentHash>,
    threads: &[ReviewThread],
) -> DuplicateResolution {
    let mut resolution = DuplicateResolution::default();
    for thread in find_duplicates(resolved_before, threads) {
        match host.resolve_thread(&thread.id) {
            Ok(()) => {
                tracing::info!(thread = %thread.id, "auto-resolved duplicate review thread");
                resolution.threads.insert(thread.id.clone());
                if let Some(hash) = thread.content_hash() {
                    resolution.hashes.insert(hash);
                }
            }
            Err(e) => {
                tracing::warn!(thread = %thread.id, error = %e, "failed to resolve duplicate thread");
            }
        }
    }
    resolution
}
