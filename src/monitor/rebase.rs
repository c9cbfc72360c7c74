//! Rebase coordination for PRs that fall behind their base branch.
//!
//! One call to [`handle_behind`] makes one decision:
//!
//! 1. A dirty local checkout postpones the rebase for a bounded number of
//!    short waits, then gives up.
//! 2. At the rebase cap, the base branch gets one chance to go quiet; if it
//!    does, the counter resets, otherwise monitoring stops.
//! 3. Resolved-thread hashes and the changed-file count are captured.
//! 4. The remote rebase runs. Its result alone decides success; syncing the
//!    local clone afterwards is best effort.

use std::collections::BTreeSet;
use std::time::Duration;

use super::config::MonitorConfig;
use super::context::LoopContext;
use super::duplicates::resolved_hashes;
use crate::clock::{Clock, elapsed_between};
use crate::git::LocalRepo;
use crate::github::ReviewHost;
use crate::types::{FinalState, MonitorResult, PrState};

/// What the loop should do after a rebase decision.
#[derive(Debug, Clone, PartialEq)]
pub enum RebaseOutcome {
    /// The remote branch was rebased; poll again.
    Rebased,
    /// Local changes block the rebase; sleep and poll again.
    Waiting(Duration),
    /// Monitoring ends.
    Finished(MonitorResult),
}

/// Handles one poll that observed `BEHIND`.
///
/// `remaining` is what is left of the overall timeout; the stability wait
/// never runs past it.
pub fn handle_behind(
    host: &dyn ReviewHost,
    repo: &dyn LocalRepo,
    clock: &dyn Clock,
    config: &MonitorConfig,
    ctx: &mut LoopContext,
    state: &PrState,
    remaining: Duration,
) -> RebaseOutcome {
    let pr = state.number;

    let sync_local = match repo.has_uncommitted_changes() {
        Ok(true) => {
            ctx.dirty_wait_cycles += 1;
            if ctx.dirty_wait_cycles > config.dirty_wait_cycles {
                return RebaseOutcome::Finished(MonitorResult::failure(
                    FinalState::LocalChanges,
                    format!(
                        "PR is behind {} but the local checkout has uncommitted changes; \
                         gave up after {} checks. Commit or stash them and re-run.",
                        state.base_ref, config.dirty_wait_cycles
                    ),
                ));
            }
            tracing::info!(
                pr = %pr,
                cycle = ctx.dirty_wait_cycles,
                max_cycles = config.dirty_wait_cycles,
                "uncommitted local changes, postponing rebase"
            );
            return RebaseOutcome::Waiting(config.dirty_wait_interval);
        }
        Ok(false) => {
            ctx.dirty_wait_cycles = 0;
            true
        }
        Err(e) => {
            tracing::warn!(pr = %pr, error = %e, "could not check local changes, skipping local sync");
            ctx.dirty_wait_cycles = 0;
            false
        }
    };

    if ctx.rebase_count >= config.max_rebases {
        if ctx.stability_resets >= config.stability_resets
            || !wait_for_base_stability(host, clock, config, &state.base_ref, remaining)
        {
            return RebaseOutcome::Finished(
                MonitorResult::failure(
                    FinalState::RebaseLimit,
                    format!(
                        "Reached the maximum of {} rebases and {} did not settle",
                        config.max_rebases, state.base_ref
                    ),
                )
                .with_detail("max_rebases", config.max_rebases),
            );
        }
        tracing::info!(pr = %pr, base = %state.base_ref, "base branch settled, resetting rebase counter");
        ctx.stability_resets += 1;
        ctx.rebase_count = 0;
    }

    ctx.resolved_before_rebase = match host.review_threads(pr) {
        Ok(threads) => Some(resolved_hashes(&threads)),
        Err(e) => {
            tracing::warn!(pr = %pr, error = %e, "could not snapshot resolved threads before rebase");
            None
        }
    };
    let files_before = changed_file_count(host, state);

    tracing::info!(pr = %pr, attempt = ctx.rebase_count + 1, "PR is behind, rebasing");
    let result = host.rebase(pr);
    if !result.success {
        let detail = result
            .error_message
            .clone()
            .unwrap_or_else(|| "no output".to_string());
        ctx.resolved_before_rebase = None;
        let (final_state, message) = if result.conflict {
            (FinalState::RebaseConflict, format!("Rebase failed with conflicts: {}", detail))
        } else {
            (FinalState::RebaseFailed, format!("Rebase failed: {}", detail))
        };
        tracing::error!(pr = %pr, conflict = result.conflict, error = %detail, "rebase failed");
        return RebaseOutcome::Finished(MonitorResult::failure(final_state, message));
    }

    ctx.rebase_count += 1;
    ctx.recheck_done = false;
    ctx.recheck_refreshes = 0;
    tracing::info!(pr = %pr, rebase_count = ctx.rebase_count, "rebase succeeded");

    let files_after = changed_file_count(host, state);
    if file_count_grew(files_before, files_after) {
        tracing::warn!(
            pr = %pr,
            before = files_before.unwrap_or_default(),
            after = files_after.unwrap_or_default(),
            "changed-file count grew after rebase; unrelated changes may have been folded in"
        );
        ctx.file_drift_warnings += 1;
    }

    if sync_local {
        sync_local_clone(repo, state);
    }

    RebaseOutcome::Rebased
}

fn changed_file_count(host: &dyn ReviewHost, state: &PrState) -> Option<usize> {
    match host.changed_files(state.number) {
        Ok(files) => Some(files.into_iter().collect::<BTreeSet<_>>().len()),
        Err(e) => {
            tracing::debug!(pr = %state.number, error = %e, "changed-file query failed");
            None
        }
    }
}

/// Only a strict increase from a known, non-zero baseline counts.
pub fn file_count_grew(before: Option<usize>, after: Option<usize>) -> bool {
    matches!((before, after), (Some(b), Some(a)) if b > 0 && a > b)
}

/// Brings the local checkout in line with the rebased remote branch.
///
/// Only acts when the checkout is on the PR branch. Every failure is logged
/// and swallowed.
pub fn sync_local_clone(repo: &dyn LocalRepo, state: &PrState) -> bool {
    let branch = &state.head_ref;
    match repo.current_branch() {
        Ok(Some(current)) if current == *branch => {}
        Ok(current) => {
            tracing::info!(
                branch = %branch,
                current = current.as_deref().unwrap_or("(detached)"),
                "local checkout is not on the PR branch, leaving it alone"
            );
            return false;
        }
        Err(e) => {
            tracing::warn!(error = %e, "could not read current branch, skipping local sync");
            return false;
        }
    }

    if let Err(e) = repo.fetch_branch(branch) {
        tracing::warn!(branch = %branch, error = %e, "fetch failed, local clone not synced");
        return false;
    }
    let head = match repo.remote_head(branch) {
        Ok(head) => head,
        Err(e) => {
            tracing::warn!(branch = %branch, error = %e, "could not read fetched head, local clone not synced");
            return false;
        }
    };
    if let Err(e) = repo.reset_to_remote(branch) {
        tracing::warn!(branch = %branch, error = %e, "reset failed, local clone not synced");
        return false;
    }
    tracing::info!(branch = %branch, head = %head.short(), "local clone synced to rebased branch");
    true
}

/// Waits for `base` to go `stability_window` without a new commit.
///
/// Returns false if it is still moving after `stability_max_wait`, or
/// after `budget` if that is shorter.
pub fn wait_for_base_stability(
    host: &dyn ReviewHost,
    clock: &dyn Clock,
    config: &MonitorConfig,
    base: &str,
    budget: Duration,
) -> bool {
    let max_wait = config.stability_max_wait.min(budget);
    let started = clock.now();
    loop {
        let now = clock.now();
        match host.branch_last_commit(base) {
            Ok(last) if elapsed_between(last, now) >= config.stability_window => return true,
            Ok(last) => {
                tracing::info!(
                    base,
                    quiet_secs = elapsed_between(last, now).as_secs(),
                    window_secs = config.stability_window.as_secs(),
                    "waiting for base branch to settle"
                );
            }
            Err(e) => tracing::warn!(base, error = %e, "could not read base branch head"),
        }

        if elapsed_between(started, now) + config.stability_poll_interval > max_wait {
            return false;
        }
        clock.sleep(config.stability_poll_interval);
    }
}
