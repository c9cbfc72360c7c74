//! Local clone operations.
//!
//! After a remote rebase the user's checkout of the PR branch is stale. The
//! monitor brings it back in line with four operations, all scoped to one
//! branch: detect uncommitted work, read the current branch, fetch the PR
//! branch, and hard-reset to the fetched remote ref. Nothing here ever
//! touches a branch other than the one it is given.
//!
//! The monitor depends on the [`LocalRepo`] trait; [`GitCli`] implements it
//! with the `git` binary.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use thiserror::Error;

use crate::process::{self, CommandError};
use crate::types::Sha;

/// Default timeout for local git commands. Fetch is the slow one.
pub const DEFAULT_GIT_TIMEOUT: Duration = Duration::from_secs(120);

/// Errors from git operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// The command could not be run to completion (spawn failure or timeout).
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Git ran and reported failure.
    #[error("git command failed: {command}\nstderr: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// Git printed something that is not a commit id.
    #[error("invalid SHA: {0}")]
    InvalidSha(String),
}

/// Result type for git operations.
pub type GitResult<T> = Result<T, GitError>;

/// The local clone the user is working in.
pub trait LocalRepo {
    /// True if tracked files have staged or unstaged modifications.
    fn has_uncommitted_changes(&self) -> GitResult<bool>;

    /// The checked-out branch, or `None` on a detached HEAD.
    fn current_branch(&self) -> GitResult<Option<String>>;

    /// Updates `refs/remotes/origin/<branch>` from the remote.
    fn fetch_branch(&self, branch: &str) -> GitResult<()>;

    /// Commit at `refs/remotes/origin/<branch>`.
    fn remote_head(&self, branch: &str) -> GitResult<Sha>;

    /// Hard-resets the current checkout to `origin/<branch>`.
    fn reset_to_remote(&self, branch: &str) -> GitResult<()>;
}

/// Create a git Command for `workdir` that never prompts.
///
/// User configuration is left intact: fetches from the user's clone need
/// their credential helpers.
pub(crate) fn git_command(workdir: &Path) -> Command {
    let mut cmd = Command::new("git");
    cmd.current_dir(workdir);
    cmd.env("GIT_TERMINAL_PROMPT", "0");
    cmd.env("LC_ALL", "C");
    cmd
}

/// `git` binary implementation of [`LocalRepo`].
#[derive(Debug, Clone)]
pub struct GitCli {
    workdir: PathBuf,
    timeout: Duration,
}

impl GitCli {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        GitCli {
            workdir: workdir.into(),
            timeout: DEFAULT_GIT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Runs git and returns trimmed stdout, failing on non-zero exit.
    fn run_stdout(&self, args: &[&str]) -> GitResult<String> {
        let mut cmd = git_command(&self.workdir);
        cmd.args(args);
        let output = process::run(cmd, self.timeout)?;
        if output.success {
            Ok(output.stdout.trim().to_string())
        } else {
            Err(GitError::CommandFailed {
                command: output.command,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }
}

fn remote_ref(branch: &str) -> String {
    format!("refs/remotes/origin/{}", branch)
}

impl LocalRepo for GitCli {
    fn has_uncommitted_changes(&self) -> GitResult<bool> {
        let status = self.run_stdout(&["status", "--porcelain", "--untracked-files=no"])?;
        Ok(!status.is_empty())
    }

    fn current_branch(&self) -> GitResult<Option<String>> {
        let name = self.run_stdout(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        if name == "HEAD" || name.is_empty() {
            Ok(None)
        } else {
            Ok(Some(name))
        }
    }

    fn fetch_branch(&self, branch: &str) -> GitResult<()> {
        let refspec = format!("+refs/heads/{}:{}", branch, remote_ref(branch));
        self.run_stdout(&["fetch", "--no-tags", "origin", &refspec])?;
        Ok(())
    }

    fn remote_head(&self, branch: &str) -> GitResult<Sha> {
        let out = self.run_stdout(&["rev-parse", "--verify", &remote_ref(branch)])?;
        if out.len() == 40 && out.chars().all(|c| c.is_ascii_hexdigit()) {
            Ok(Sha::new(out))
        } else {
            Err(GitError::InvalidSha(out))
        }
    }

    fn reset_to_remote(&self, branch: &str) -> GitResult<()> {
        self.run_stdout(&["reset", "--hard", &remote_ref(branch)])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn git(dir: &Path, args: &[&str]) -> String {
        let output = git_command(dir)
            .args(["-c", "user.name=Test", "-c", "user.email=test@test.com"])
            .args(args)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    fn commit_file(dir: &Path, name: &str, content: &str) -> String {
        std::fs::write(dir.join(name), content).unwrap();
        git(dir, &["add", name]);
        git(dir, &["commit", "-q", "-m", name]);
        git(dir, &["rev-parse", "HEAD"])
    }

    /// A bare origin with a `feature` branch, and a clone of it checked out
    /// on `feature`.
    fn create_clone() -> (TempDir, PathBuf, PathBuf) {
        let temp = TempDir::new().unwrap();
        let origin = temp.path().join("origin.git");
        let seed = temp.path().join("seed");
        let clone = temp.path().join("clone");

        std::fs::create_dir_all(&origin).unwrap();
        git(&origin, &["init", "-q", "--bare"]);

        std::fs::create_dir_all(&seed).unwrap();
        git(&seed, &["init", "-q"]);
        git(&seed, &["checkout", "-q", "-b", "feature"]);
        commit_file(&seed, "README.md", "hello\n");
        git(&seed, &["remote", "add", "origin", origin.to_str().unwrap()]);
        git(&seed, &["push", "-q", "origin", "feature"]);

        git(
            temp.path(),
            &["clone", "-q", "-b", "feature", origin.to_str().unwrap(), "clone"],
        );

        (temp, seed, clone)
    }

    #[test]
    fn current_branch_and_detached_head() {
        let (_temp, _seed, clone) = create_clone();
        let repo = GitCli::new(&clone);
        assert_eq!(repo.current_branch().unwrap().as_deref(), Some("feature"));

        git(&clone, &["checkout", "-q", "--detach"]);
        assert_eq!(repo.current_branch().unwrap(), None);
    }

    #[test]
    fn detects_tracked_modifications_only() {
        let (_temp, _seed, clone) = create_clone();
        let repo = GitCli::new(&clone);
        assert!(!repo.has_uncommitted_changes().unwrap());

        std::fs::write(clone.join("untracked.txt"), "x").unwrap();
        assert!(!repo.has_uncommitted_changes().unwrap());

        std::fs::write(clone.join("README.md"), "changed\n").unwrap();
        assert!(repo.has_uncommitted_changes().unwrap());
    }

    #[test]
    fn fetch_then_reset_follows_remote() {
        let (_temp, seed, clone) = create_clone();
        let repo = GitCli::new(&clone);

        // Rewrite history upstream, as a remote rebase would.
        git(&seed, &["commit", "-q", "--amend", "-m", "rebased"]);
        let new_head = git(&seed, &["rev-parse", "HEAD"]);
        git(&seed, &["push", "-q", "--force", "origin", "feature"]);

        repo.fetch_branch("feature").unwrap();
        assert_eq!(repo.remote_head("feature").unwrap().as_str(), new_head);

        repo.reset_to_remote("feature").unwrap();
        assert_eq!(git(&clone, &["rev-parse", "HEAD"]), new_head);
    }

    #[test]
    fn fetching_missing_branch_fails() {
        let (_temp, _seed, clone) = create_clone();
        let err = GitCli::new(&clone).fetch_branch("no-such-branch").unwrap_err();
        assert!(matches!(err, GitError::CommandFailed { .. }));
    }
}
