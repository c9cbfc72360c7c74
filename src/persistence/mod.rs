//! Files the monitor shares with other processes.
//!
//! # File Layout
//!
//! ```text
//! <state_dir>/
//!   pr-<n>.json        # progress record for PR n, overwritten every poll
//!   rate-limit.json    # last quota observation, shared by all monitors
//! ```
//!
//! Neither file is locked. One monitor per PR is supported; the rate-limit
//! cache is advisory, so a lost update only costs an extra quota query.
//! All writes are atomic (see [`atomic`]).

pub mod atomic;
pub mod state_file;

use std::io;

use thiserror::Error;

pub use atomic::{fsync_dir, fsync_file, write_json_atomic};
pub use state_file::{
    MonitorStateRecord, MonitorStatus, RecoveryRecord, load_record, save_record, state_path,
    try_load_record,
};

/// Errors reading or writing persisted files.
#[derive(Debug, Error)]
pub enum StateFileError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
