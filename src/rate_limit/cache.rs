//! Two-tier storage for rate-limit observations.
//!
//! The in-process [`MemoryCache`] is consulted first; the [`FileCache`] lets
//! back-to-back monitor invocations share one observation. Both store the
//! same [`CacheEntry`] and expire on the same TTL, but independently: a fresh
//! file entry does not refresh a stale memory entry's timestamp.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::RateLimitStatus;
use crate::persistence::write_json_atomic;

/// One cached quota observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub remaining: u64,
    pub limit: u64,
    /// Unix seconds at which the quota resets.
    pub reset: i64,
    /// Unix seconds at which the observation was made.
    #[serde(rename = "cachedAt")]
    pub cached_at: i64,
}

impl CacheEntry {
    pub fn new(status: RateLimitStatus, cached_at: i64) -> Self {
        CacheEntry {
            remaining: status.remaining,
            limit: status.limit,
            reset: status.reset,
            cached_at,
        }
    }

    pub fn status(&self) -> RateLimitStatus {
        RateLimitStatus {
            remaining: self.remaining,
            limit: self.limit,
            reset: self.reset,
        }
    }

    /// Whether the entry may be used instead of a live query at `now`.
    ///
    /// A negative or future `cached_at` is treated as corrupt, whatever its
    /// distance from `now`.
    pub fn is_valid(&self, now: i64, ttl: Duration) -> bool {
        if self.cached_at < 0 || self.cached_at > now {
            return false;
        }
        let age = (now - self.cached_at) as u64;
        age < ttl.as_secs()
    }
}

/// A place to keep the last observation.
pub trait RateLimitCache {
    /// The stored entry, valid or not. `None` if absent or unreadable.
    fn load(&mut self) -> Option<CacheEntry>;

    fn store(&mut self, entry: CacheEntry);
}

/// Process-local cache.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entry: Option<CacheEntry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateLimitCache for MemoryCache {
    fn load(&mut self) -> Option<CacheEntry> {
        self.entry
    }

    fn store(&mut self, entry: CacheEntry) {
        self.entry = Some(entry);
    }
}

/// JSON file shared between invocations.
///
/// Read and write failures are logged and otherwise ignored: a broken cache
/// file only costs a live query.
#[derive(Debug, Clone)]
pub struct FileCache {
    path: PathBuf,
}

impl FileCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileCache { path: path.into() }
    }

    /// `<state_dir>/rate-limit.json`.
    pub fn in_dir(state_dir: &Path) -> Self {
        Self::new(state_dir.join("rate-limit.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RateLimitCache for FileCache {
    fn load(&mut self) -> Option<CacheEntry> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "rate-limit cache unreadable");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "rate-limit cache corrupt");
                None
            }
        }
    }

    fn store(&mut self, entry: CacheEntry) {
        if let Err(e) = write_json_atomic(&self.path, &entry) {
            tracing::debug!(path = %self.path.display(), error = %e, "failed to write rate-limit cache");
        }
    }
}
