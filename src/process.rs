//! Bounded subprocess execution.
//!
//! Every call to `gh` or `git` goes through [`run`], which enforces a
//! per-call timeout. The calling thread keeps ownership of the `Child` and
//! polls `try_wait`; stdout and stderr are drained on helper threads so a
//! chatty child can never block on a full pipe. On timeout the child is
//! killed and reaped before returning.

use std::io::Read;
use std::process::{Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use thiserror::Error;

/// How often the child is polled for exit.
const POLL_STEP: Duration = Duration::from_millis(25);

/// Errors from running a subprocess.
///
/// A non-zero exit is *not* an error here: callers decide what a failed
/// exit means (e.g. `gh pr checks` exits non-zero while checks are pending).
#[derive(Debug, Error)]
pub enum CommandError {
    /// The program could not be started.
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The program did not exit within its timeout and was killed.
    #[error("`{command}` timed out after {}s", timeout.as_secs())]
    TimedOut { command: String, timeout: Duration },

    /// Waiting on the child failed.
    #[error("failed waiting for `{command}`: {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Captured output of a finished subprocess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// The command line, for error messages.
    pub command: String,
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// stderr if non-empty, else stdout, trimmed.
    pub fn error_text(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }
}

/// Renders a command as `program arg1 arg2 ...` for logs and errors.
pub fn describe(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().into_owned()];
    parts.extend(cmd.get_args().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}

/// Runs `cmd` to completion or until `timeout` elapses.
pub fn run(mut cmd: Command, timeout: Duration) -> Result<CommandOutput, CommandError> {
    let command = describe(&cmd);

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|source| CommandError::Spawn {
        command: command.clone(),
        source,
    })?;

    let stdout_reader = child.stdout.take().map(spawn_reader);
    let stderr_reader = child.stderr.take().map(spawn_reader);

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(source) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(CommandError::Wait { command, source });
            }
        }

        if Instant::now() >= deadline {
            // Killing closes the child's pipe ends, so the reader threads
            // finish on their own; they are detached rather than joined.
            let _ = child.kill();
            let _ = child.wait();
            tracing::warn!(command = %command, timeout_secs = timeout.as_secs(), "command timed out");
            return Err(CommandError::TimedOut { command, timeout });
        }

        std::thread::sleep(POLL_STEP);
    };

    Ok(CommandOutput {
        command,
        success: status.success(),
        code: status.code(),
        stdout: join_reader(stdout_reader),
        stderr: join_reader(stderr_reader),
    })
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn join_reader(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}
