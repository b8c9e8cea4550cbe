//! # Command Execution
//!
//! The execution capability used by probes and launches. A command that runs and
//! exits nonzero is reported through [`ExitReport`]; only a command that cannot be
//! started at all is an error.
//!
//! A command with a time limit runs in its own process group. When the limit
//! passes, the whole group is killed and reaped before `run` returns, so nothing
//! the command started outlives it.

use crate::fitting::command::LaunchCommand;
use crate::fitting::errors::{FitError, FitResult};
use crate::fitting::types::{ExecutionMode, ExitReport, OutputMode};
use async_trait::async_trait;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, Command};
use tracing::{debug, info, warn};

/// Number of stderr lines kept from a suppressed command.
const STDERR_TAIL_LINES: usize = 20;

/// Runs a command line to completion.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` and wait for it to exit.
    ///
    /// With a `timeout`, a command still running when it passes is stopped,
    /// together with every process it started, before this returns
    /// [`ExitReport::timed_out`].
    ///
    /// # Errors
    ///
    /// Returns an error if the command is malformed or the process cannot be
    /// spawned. A nonzero exit or a timeout is not an error.
    async fn run(
        &self,
        command: &str,
        output: OutputMode,
        mode: ExecutionMode,
        timeout: Option<Duration>,
    ) -> FitResult<ExitReport>;
}

/// Spawns real processes with `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        command: &str,
        output: OutputMode,
        mode: ExecutionMode,
        timeout: Option<Duration>,
    ) -> FitResult<ExitReport> {
        let parsed = LaunchCommand::parse(command)?;
        match output {
            OutputMode::Inherit => info!(command, "running"),
            OutputMode::Suppress => debug!(command, "running quietly"),
        }

        if mode == ExecutionMode::DryRun {
            info!(command, "dry run, not executing");
            return Ok(ExitReport::succeeded());
        }

        let mut cmd = Command::new(parsed.program());
        cmd.args(parsed.args()).kill_on_drop(true);
        if timeout.is_some() {
            own_process_group(&mut cmd);
        }
        if output == OutputMode::Suppress {
            cmd.stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::piped());
        }

        let mut child = cmd.spawn().map_err(|e| FitError::spawn(command, e))?;
        let stderr = child.stderr.take();
        let (waited, captured) = tokio::join!(
            wait_with_limit(&mut child, timeout),
            read_stderr(stderr)
        );

        let report = match waited? {
            Some(status) => ExitReport::from_status(status),
            None => {
                warn!(
                    command,
                    timeout_secs = timeout.map(|limit| limit.as_secs_f64()),
                    "command timed out, stopped it and everything it started"
                );
                ExitReport::timed_out()
            }
        };
        Ok(report.with_stderr_tail(stderr_tail(&captured)))
    }
}

/// Wait for `child`, or stop its process group once `timeout` passes.
/// Returns `None` when the limit was hit.
async fn wait_with_limit(
    child: &mut Child,
    timeout: Option<Duration>,
) -> io::Result<Option<ExitStatus>> {
    let Some(limit) = timeout else {
        return child.wait().await.map(Some);
    };

    let waited = tokio::time::timeout(limit, child.wait()).await;
    if let Ok(status) = waited {
        return status.map(Some);
    }

    kill_group(child);
    child.wait().await?;
    Ok(None)
}

#[cfg(unix)]
fn own_process_group(cmd: &mut Command) {
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_cmd: &mut Command) {}

#[cfg(unix)]
fn kill_group(child: &mut Child) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    // Spawned with `process_group(0)`, so the group id is the child's pid.
    let killed = child
        .id()
        .and_then(|id| i32::try_from(id).ok())
        .map(|pid| killpg(Pid::from_raw(pid), Signal::SIGKILL));
    match killed {
        Some(Ok(())) => {}
        Some(Err(error)) => {
            debug!(%error, "could not signal process group");
            start_kill(child);
        }
        None => start_kill(child),
    }
}

#[cfg(not(unix))]
fn kill_group(child: &mut Child) {
    start_kill(child);
}

fn start_kill(child: &mut Child) {
    if let Err(error) = child.start_kill() {
        debug!(%error, "could not kill child process");
    }
}

async fn read_stderr(stderr: Option<ChildStderr>) -> Vec<u8> {
    let mut buffer = Vec::new();
    if let Some(mut stderr) = stderr
        && let Err(error) = stderr.read_to_end(&mut buffer).await
    {
        debug!(%error, "could not read stderr");
    }
    buffer
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn run_quietly(command: &str) -> FitResult<ExitReport> {
        ProcessRunner
            .run(command, OutputMode::Suppress, ExecutionMode::Live, None)
            .await
    }

    #[tokio::test]
    async fn test_successful_command() {
        let report = run_quietly("true").await.unwrap();
        assert!(report.success());
        assert!(!report.is_timed_out());
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_not_an_error() {
        let report = run_quietly("sh -c 'echo out of memory >&2; exit 3'")
            .await
            .unwrap();
        assert!(!report.success());
        assert_eq!(report.code(), Some(3));
        assert_eq!(report.stderr_tail(), Some("out of memory"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_a_spawn_error() {
        let error = run_quietly("definitely-not-a-real-binary-4711 --help")
            .await
            .unwrap_err();
        assert!(matches!(error, FitError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_dry_run_never_spawns() {
        let report = ProcessRunner
            .run(
                "definitely-not-a-real-binary-4711",
                OutputMode::Inherit,
                ExecutionMode::DryRun,
                None,
            )
            .await
            .unwrap();
        assert!(report.success());
    }

    #[tokio::test]
    async fn test_malformed_command_fails_before_spawning() {
        let error = ProcessRunner
            .run(
                "sh -c 'exit 0",
                OutputMode::Suppress,
                ExecutionMode::DryRun,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(error, FitError::CommandMalformed { .. }));
    }

    #[tokio::test]
    async fn test_command_within_limit_reports_its_status() {
        let report = ProcessRunner
            .run(
                "sh -c 'echo cuda oom >&2; exit 4'",
                OutputMode::Suppress,
                ExecutionMode::Live,
                Some(Duration::from_secs(10)),
            )
            .await
            .unwrap();
        assert_eq!(report.code(), Some(4));
        assert!(!report.is_timed_out());
        assert_eq!(report.stderr_tail(), Some("cuda oom"));
    }

    #[tokio::test]
    async fn test_timeout_stops_everything_the_command_started() {
        let temp_dir = TempDir::new().unwrap();
        let marker = temp_dir.path().join("still-running");
        let command = format!(
            "sh -c 'sh -c \"sleep 1; touch {}\"; true'",
            marker.display()
        );

        let report = ProcessRunner
            .run(
                &command,
                OutputMode::Suppress,
                ExecutionMode::Live,
                Some(Duration::from_millis(200)),
            )
            .await
            .unwrap();

        assert!(report.is_timed_out());
        assert!(!report.success());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(
            !marker.exists(),
            "a process started by the timed-out command kept running"
        );
    }

    #[test]
    fn test_stderr_tail_keeps_last_lines() {
        let stderr: String = (0..30).map(|i| format!("line {i}\n")).collect();
        let tail = stderr_tail(stderr.as_bytes());
        assert!(tail.starts_with("line 10"));
        assert!(tail.ends_with("line 29"));
    }
}
