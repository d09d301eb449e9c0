//! Bounded execution of external processes.
//!
//! Every external tool invocation in the pipeline runs through
//! [`run_with_timeout`] so a hung disc read or encoder cannot hold the
//! workspace lock forever.

use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Error type for bounded process execution.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The process exceeded its deadline and was killed.
    #[error("process timed out after {0:?}")]
    TimedOut(Duration),

    /// The process was killed because shutdown was requested.
    #[error("process cancelled by shutdown request")]
    Cancelled,

    /// IO error spawning or waiting for the process.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Captured output of a completed process.
#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    /// stdout and stderr concatenated, for tools that interleave diagnostics.
    pub fn combined(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

/// Runs a command to completion with a hard deadline.
///
/// stdout/stderr are drained on background threads while the child is
/// polled, so a chatty tool cannot deadlock on a full pipe. On timeout the
/// child is killed and reaped before returning.
pub fn run_with_timeout(
    cmd: Command,
    timeout: Duration,
) -> Result<ProcessOutput, ProcessError> {
    run_bounded(cmd, timeout, None)
}

/// Like [`run_with_timeout`], but also kills the child as soon as `cancel`
/// is set. Long-running rips and transcodes run through this so a shutdown
/// request does not wait hours for the current title.
pub fn run_with_cancellation(
    cmd: Command,
    timeout: Duration,
    cancel: &AtomicBool,
) -> Result<ProcessOutput, ProcessError> {
    run_bounded(cmd, timeout, Some(cancel))
}

fn run_bounded(
    mut cmd: Command,
    timeout: Duration,
    cancel: Option<&AtomicBool>,
) -> Result<ProcessOutput, ProcessError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn()?;

    let stdout_reader = child.stdout.take().map(|mut pipe| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    });
    let stderr_reader = child.stderr.take().map(|mut pipe| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    });

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if cancel.map(|c| c.load(Ordering::Relaxed)).unwrap_or(false) {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ProcessError::Cancelled);
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ProcessError::TimedOut(timeout));
        }
        std::thread::sleep(Duration::from_millis(100));
    };

    let stdout = stdout_reader
        .and_then(|h| h.join().ok())
        .unwrap_or_default();
    let stderr = stderr_reader
        .and_then(|h| h.join().ok())
        .unwrap_or_default();

    Ok(ProcessOutput {
        status,
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_captures_stdout() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo hello"]);

        let output = run_with_timeout(cmd, Duration::from_secs(5)).expect("should run");
        assert!(output.status.success());
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[test]
    fn test_run_captures_stderr_and_failure_status() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo oops >&2; exit 3"]);

        let output = run_with_timeout(cmd, Duration::from_secs(5)).expect("should run");
        assert!(!output.status.success());
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(output.stderr.trim(), "oops");
        assert!(output.combined().contains("oops"));
    }

    #[test]
    fn test_run_kills_on_timeout() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30");

        let start = Instant::now();
        let result = run_with_timeout(cmd, Duration::from_millis(300));
        assert!(matches!(result, Err(ProcessError::TimedOut(_))));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_cancellation_kills_the_child() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30");

        let cancel = AtomicBool::new(true);
        let start = Instant::now();
        let result = run_with_cancellation(cmd, Duration::from_secs(30), &cancel);

        assert!(matches!(result, Err(ProcessError::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_cancellation_unset_lets_the_child_finish() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo done"]);

        let cancel = AtomicBool::new(false);
        let output = run_with_cancellation(cmd, Duration::from_secs(5), &cancel).unwrap();
        assert!(output.status.success());
        assert_eq!(output.stdout.trim(), "done");
    }

    #[test]
    fn test_missing_binary_is_io_error() {
        let cmd = Command::new("/nonexistent/binary/for/sure");
        let result = run_with_timeout(cmd, Duration::from_secs(1));
        assert!(matches!(result, Err(ProcessError::Io(_))));
    }
}
