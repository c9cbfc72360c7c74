//! Per-PR monitor state file.
//!
//! The monitor overwrites `<state_dir>/pr-<n>.json` at the start of every
//! poll so that external tools (including `pr-monitor --result`) can see
//! progress. The file is owned by exactly one monitor process; readers never
//! write it.
//!
//! # File Format
//!
//! ```json
//! {
//!   "pr": 123,
//!   "status": "monitoring",
//!   "rebase_count": 1,
//!   "elapsed_seconds": 420,
//!   "timeout_seconds": 1800,
//!   "poll_iteration": 14,
//!   "rate_limit": { "remaining": 4200, "limit": 5000, "reset": 1700000000 },
//!   "updated_at": "2025-01-01T12:00:00Z"
//! }
//! ```
//!
//! `result` is added once the monitor finishes, `recovery` when a PR
//! recreation left things in a state a human has to repair.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::StateFileError;
use super::atomic::write_json_atomic;
use crate::rate_limit::RateLimitStatus;
use crate::types::{MonitorResult, PrNumber};

/// Lifecycle of one monitor invocation, as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorStatus {
    Monitoring,
    Succeeded,
    Failed,
    /// The PR was closed, recreation failed, and reopening failed too.
    RecoveryNeeded,
}

impl MonitorStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, MonitorStatus::Monitoring)
    }
}

/// What a human needs to repair a half-finished recreation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryRecord {
    /// The PR that was closed and could not be reopened.
    pub original_pr: PrNumber,
    pub head_ref: String,
    pub base_ref: String,
    pub title: String,
    /// Why creating the replacement failed.
    pub create_error: String,
    /// Why reopening the original failed on the last attempt.
    pub reopen_error: String,
    pub reopen_attempts: u32,
}

/// The persisted progress record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorStateRecord {
    pub pr: PrNumber,
    pub status: MonitorStatus,
    pub rebase_count: u32,
    pub elapsed_seconds: u64,
    pub timeout_seconds: u64,
    pub poll_iteration: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitStatus>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<MonitorResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery: Option<RecoveryRecord>,
}


/// Path of the state file for `pr` under `state_dir`.
pub fn state_path(state_dir: &Path, pr: PrNumber) -> PathBuf {
    state_dir.join(format!("pr-{}.json", pr.0))
}

/// Overwrites the record atomically.
pub fn save_record(path: &Path, record: &MonitorStateRecord) -> Result<(), StateFileError> {
    write_json_atomic(path, record)
}

/// Loads a record.
///
/// # Errors
///
/// Returns an error if the file is missing, unreadable or malformed.
pub fn load_record(path: &Path) -> Result<MonitorStateRecord, StateFileError> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Loads a record, returning `None` if no monitor has written one yet.
pub fn try_load_record(path: &Path) -> Result<Option<MonitorStateRecord>, StateFileError> {
    match load_record(path) {
        Ok(record) => Ok(Some(record)),
        Err(StateFileError::Io(e)) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
