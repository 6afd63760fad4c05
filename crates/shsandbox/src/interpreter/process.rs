//! External program runner
//!
//! Whitelisted programs run as real child processes with a cleared
//! environment. The child is raced against the run's cancellation handle and
//! deadline; losing the race drops the child, which kills it.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::Instant;

use super::ExecResult;
use crate::cancel::{CancelHandle, CancelReason};
use crate::error::{Error, Result};

/// Everything needed to spawn one external command.
pub(crate) struct Spawn<'a> {
    pub program: &'a str,
    pub args: &'a [String],
    /// Complete child environment
    pub env: Vec<(String, String)>,
    pub cwd: &'a Path,
    pub stdin: Option<String>,
}

/// How long the run may go on and who may stop it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Watch<'a> {
    pub cancel: &'a CancelHandle,
    pub deadline: Instant,
    pub timeout: Duration,
}

impl Watch<'_> {
    /// Fail with the reason the run has to stop, if it has to.
    pub(crate) fn check(&self) -> Result<()> {
        let reason = if self.cancel.is_cancelled() {
            CancelReason::Requested
        } else if Instant::now() >= self.deadline {
            CancelReason::Timeout(self.timeout)
        } else {
            return Ok(());
        };
        #[cfg(feature = "logging")]
        tracing::warn!(reason = %reason, "run cancelled");
        Err(Error::Cancelled(reason))
    }
}

/// Run `spawn` to completion and capture its output.
///
/// A program that cannot be found is a failed status (127), not an error.
pub(crate) async fn run_external(spawn: Spawn<'_>, watch: Watch<'_>) -> Result<ExecResult> {
    let mut cmd = Command::new(spawn.program);
    cmd.args(spawn.args)
        .env_clear()
        .envs(spawn.env)
        .current_dir(spawn.cwd)
        .stdin(if spawn.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(ExecResult::err(
                format!("{}: command not found\n", spawn.program),
                127,
            ));
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Ok(ExecResult::err(
                format!("{}: permission denied\n", spawn.program),
                126,
            ));
        }
        Err(e) => return Err(e.into()),
    };

    // Feed stdin concurrently so a child that fills its stdout pipe before
    // reading all input cannot deadlock us.
    if let (Some(data), Some(mut pipe)) = (spawn.stdin, child.stdin.take()) {
        tokio::spawn(async move {
            // The child may exit without reading everything
            let _ = pipe.write_all(data.as_bytes()).await;
        });
    }

    let output = tokio::select! {
        output = child.wait_with_output() => output?,
        _ = watch.cancel.cancelled() => {
            return Err(Error::Cancelled(CancelReason::Requested));
        }
        _ = tokio::time::sleep_until(watch.deadline) => {
            return Err(Error::Cancelled(CancelReason::Timeout(watch.timeout)));
        }
    };

    Ok(ExecResult {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: exit_code(&output.status),
        ..ExecResult::default()
    })
}

#[cfg(unix)]
fn exit_code(status: &std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(1)
}

#[cfg(not(unix))]
fn exit_code(status: &std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}
