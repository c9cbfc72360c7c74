//! Core domain types for the PR monitor.
//!
//! This module contains the fundamental types used throughout the crate,
//! designed to encode invariants via the type system (e.g. [`ThreadStatus`]
//! keeps "query failed" apart from "nothing unresolved").

pub mod ids;
pub mod pr;
pub mod result;

// Re-export commonly used types at the module level
pub use ids::{ContentHash, PrNumber, Sha, ThreadId};
pub use pr::{
    CheckDetail, CheckState, CheckStatus, MergeState, PrMetadata, PrState, Review, ReviewComment,
    ReviewThread, ThreadStatus,
};
pub use result::{FinalState, MonitorResult, RebaseResult};
