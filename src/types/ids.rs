//! Newtype wrappers for domain identifiers.
//!
//! These types prevent accidental mixing of different ID types (e.g., passing a
//! review-thread node ID where a content hash is expected) and make the code
//! more self-documenting.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A pull request number within a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrNumber(pub u64);

impl PrNumber {
    /// Parses a PR number from user input, accepting an optional leading `#`.
    pub fn parse(s: &str) -> Option<Self> {
        let digits = s.trim().trim_start_matches('#');
        digits.parse::<u64>().ok().filter(|n| *n > 0).map(PrNumber)
    }

    /// Extracts the PR number from `gh pr create` output.
    ///
    /// `gh` prints the new PR's URL (`https://github.com/o/r/pull/456`) as the
    /// last line of stdout. Returns `None` if no line has that shape.
    pub fn from_pr_url_output(output: &str) -> Option<Self> {
        output.lines().rev().find_map(|line| {
            let (_, tail) = line.trim().rsplit_once("/pull/")?;
            let digits: String = tail.chars().take_while(|c| c.is_ascii_digit()).collect();
            Self::parse(&digits)
        })
    }

    /// Returns the number as passed to `gh` subcommands.
    pub fn as_arg(&self) -> String {
        self.0.to_string()
    }
}

impl fmt::Display for PrNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for PrNumber {
    fn from(n: u64) -> Self {
        PrNumber(n)
    }
}

/// A git commit SHA as reported by the review tool or `git rev-parse`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sha(pub String);

impl Sha {
    /// Creates a new Sha from a string, trimming surrounding whitespace.
    ///
    /// Note: This does not validate the format.
    pub fn new(s: impl Into<String>) -> Self {
        Sha(s.into().trim().to_string())
    }

    /// Returns the SHA as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a short (7-character) version of the SHA for display.
    pub fn short(&self) -> &str {
        self.0.get(..7).unwrap_or(&self.0)
    }
}

impl fmt::Display for Sha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A review thread identifier (GraphQL node ID, or a REST comment ID rendered
/// as a string when threads are unavailable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(pub String);

impl ThreadId {
    pub fn new(s: impl Into<String>) -> Self {
        ThreadId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hex-encoded SHA-256 of a review thread's content.
///
/// Two threads with the same hash carry the same first comment (author, file
/// and body), which is how re-posted duplicates are recognised after a rebase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(pub String);

impl ContentHash {
    /// Hashes the identifying content of a comment.
    ///
    /// Body whitespace at either end is ignored so that a re-post with a
    /// trailing newline still matches.
    pub fn of_comment(author: &str, path: Option<&str>, body: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(author.as_bytes());
        hasher.update(b"\n");
        hasher.update(path.unwrap_or("").as_bytes());
        hasher.update(b"\n");
        hasher.update(body.trim().as_bytes());
        ContentHash(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.get(..12).unwrap_or(&self.0))
    }
}
