//! The PR monitor.
//!
//! [`Monitor`] polls a PR until CI has passed and every AI reviewer has
//! finished, rebasing when the branch falls behind, re-requesting reviews
//! that errored, and recreating the PR when a review is stuck. The pieces
//! it coordinates live in their own modules:
//!
//! - [`fetch`]: one consistent [`PrState`](crate::types::PrState) snapshot
//! - [`rebase`]: the `BEHIND` handler, local sync and base stability wait
//! - [`review`]: per-reviewer retry tracking
//! - [`duplicates`]: re-resolving threads a rebase re-posted
//! - [`recovery`]: close-and-recreate with rollback
//! - [`comments`]: scope classification and tone tracking for the report

pub mod comments;
pub mod config;
pub mod context;
pub mod duplicates;
pub mod fetch;
pub mod rebase;
pub mod recovery;
pub mod review;
mod run;


pub use config::{MonitorConfig, MonitorOptions, STATE_DIR_ENV};
pub use context::LoopContext;
pub use run::{Monitor, THREAD_STATUS_UNKNOWN};
