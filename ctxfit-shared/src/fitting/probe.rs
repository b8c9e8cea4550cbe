//! # Trial Launch Probe
//!
//! A probe answers one question: does the model start with this context length?
//! It runs a tiny generation with `llama.cpp`'s CLI, output suppressed, and maps
//! the exit status to `true`/`false`. Failures, including out-of-memory aborts,
//! are the expected answer for oversized values and are never raised.

use crate::fitting::command::LaunchCommand;
use crate::fitting::errors::FitResult;
use crate::fitting::runner::CommandRunner;
use crate::fitting::types::{ExecutionMode, OutputMode, Quantization};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Decides whether a candidate value fits.
#[async_trait]
pub trait Assessor: Send + Sync {
    /// `true` if `candidate` works
    async fn assess(&self, candidate: u32) -> bool;
}

/// Adapts a plain predicate into an [`Assessor`].
#[derive(Debug, Clone, Copy)]
pub struct FnAssessor<F>(pub F);

#[async_trait]
impl<F> Assessor for FnAssessor<F>
where
    F: Fn(u32) -> bool + Send + Sync,
{
    async fn assess(&self, candidate: u32) -> bool {
        (self.0)(candidate)
    }
}

/// How trial launches are built
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ProbeSettings {
    /// Base smoke-test command; model and context flags are appended to it
    pub command: String,

    /// Flag that takes the model path
    pub model_flag: String,

    /// Flag that takes the context length
    pub context_flag: String,

    /// Give up on a probe after this many seconds and count it as a failure
    pub timeout_secs: Option<u64>,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            command: "llama-cli --predict 5 -ngl 999 --log-disable".to_string(),
            model_flag: "-m".to_string(),
            context_flag: "--ctx-size".to_string(),
            timeout_secs: None,
        }
    }
}

/// Runs trial launches through a [`CommandRunner`].
pub struct Probe<'a, R: ?Sized> {
    runner: &'a R,
    base: LaunchCommand,
    context_flag: String,
    timeout: Option<Duration>,
    mode: ExecutionMode,
}

impl<R: ?Sized> fmt::Debug for Probe<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Probe")
            .field("base", &self.base)
            .field("context_flag", &self.context_flag)
            .field("timeout", &self.timeout)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl<'a, R: CommandRunner + ?Sized> Probe<'a, R> {
    /// Build a probe for `model` with the given cache precision.
    ///
    /// # Errors
    ///
    /// Returns [`crate::fitting::FitError::CommandMalformed`] if the probe
    /// command cannot be tokenized or rendered, before anything is run.
    pub fn new(
        runner: &'a R,
        settings: &ProbeSettings,
        model: &Path,
        quantization: Quantization,
        mode: ExecutionMode,
    ) -> FitResult<Self> {
        let mut base = LaunchCommand::parse(&settings.command)?;
        base.replace_argument(&settings.model_flag, model.display());
        if let Some(cache_type) = quantization.cache_type() {
            base.ensure_flag("--flash-attn");
            base.replace_argument("--cache-type-k", cache_type);
            base.replace_argument("--cache-type-v", cache_type);
        }
        base.render()?;

        Ok(Self {
            runner,
            base,
            context_flag: settings.context_flag.clone(),
            timeout: settings.timeout_secs.map(Duration::from_secs),
            mode,
        })
    }

    /// The command line a probe at `candidate` runs.
    ///
    /// # Errors
    ///
    /// Returns [`crate::fitting::FitError::CommandMalformed`] if the command
    /// cannot be rendered.
    pub fn command_for(&self, candidate: u32) -> FitResult<String> {
        let mut command = self.base.clone();
        command.replace_argument(&self.context_flag, candidate);
        command.render()
    }
}

#[async_trait]
impl<R: CommandRunner + ?Sized> Assessor for Probe<'_, R> {
    async fn assess(&self, candidate: u32) -> bool {
        info!(context_length = candidate, "trying context size");
        let command = match self.command_for(candidate) {
            Ok(command) => command,
            Err(error) => {
                warn!(%error, "could not build probe command");
                return false;
            }
        };

        let result = self
            .runner
            .run(&command, OutputMode::Suppress, self.mode, self.timeout)
            .await;

        match result {
            Ok(report) if report.is_timed_out() => {
                warn!(
                    context_length = candidate,
                    timeout_secs = self.timeout.map(|limit| limit.as_secs()),
                    "probe timed out, decreasing size"
                );
                false
            }
            Ok(report) if report.success() => {
                info!(context_length = candidate, "probe succeeded, increasing size");
                true
            }
            Ok(report) => {
                info!(context_length = candidate, %report, "probe failed, decreasing size");
                if let Some(tail) = report.stderr_tail() {
                    debug!(stderr = tail, "probe stderr");
                }
                false
            }
            Err(error) => {
                warn!(%error, "probe could not run");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fitting::FitError;
    use crate::fitting::clock::Clock;
    use crate::fitting::test_support::{ManualClock, ScriptedRunner, context_of};
    use chrono::TimeDelta;

    fn runner_fitting_up_to(limit: u32) -> ScriptedRunner {
        ScriptedRunner::new(ManualClock::default(), move |command| {
            let fits = context_of(command, "--ctx-size").is_some_and(|ctx| ctx <= limit);
            (i32::from(!fits), TimeDelta::seconds(5))
        })
    }

    #[test]
    fn test_probe_command_without_quantization() {
        let runner = runner_fitting_up_to(0);
        let probe = Probe::new(
            &runner,
            &ProbeSettings::default(),
            Path::new("/models/tiny llama.gguf"),
            Quantization::None,
            ExecutionMode::Live,
        )
        .unwrap();

        let command = LaunchCommand::parse(&probe.command_for(2048).unwrap()).unwrap();
        assert_eq!(command.program(), "llama-cli");
        assert_eq!(
            command.args(),
            [
                "--predict",
                "5",
                "-ngl",
                "999",
                "--log-disable",
                "-m",
                "/models/tiny llama.gguf",
                "--ctx-size",
                "2048"
            ]
        );
    }

    #[test]
    fn test_probe_command_with_quantized_cache() {
        let runner = runner_fitting_up_to(0);
        let probe = Probe::new(
            &runner,
            &ProbeSettings::default(),
            Path::new("/models/m.gguf"),
            Quantization::Q8,
            ExecutionMode::Live,
        )
        .unwrap();

        let command = LaunchCommand::parse(&probe.command_for(512).unwrap()).unwrap();
        assert!(command.has_flag("--flash-attn"));
        assert_eq!(command.argument("--cache-type-k"), Some("q8_0"));
        assert_eq!(command.argument("--cache-type-v"), Some("q8_0"));
        assert_eq!(command.argument("--ctx-size"), Some("512"));

        let q4 = Probe::new(
            &runner,
            &ProbeSettings::default(),
            Path::new("/models/m.gguf"),
            Quantization::Q4,
            ExecutionMode::Live,
        )
        .unwrap();
        let command = LaunchCommand::parse(&q4.command_for(512).unwrap()).unwrap();
        assert_eq!(command.argument("--cache-type-k"), Some("q4_0"));
    }

    #[test]
    fn test_malformed_probe_template_fails_fast() {
        let runner = runner_fitting_up_to(0);
        let settings = ProbeSettings {
            command: "llama-cli --predict '5".to_string(),
            ..ProbeSettings::default()
        };
        let error = Probe::new(
            &runner,
            &settings,
            Path::new("/models/m.gguf"),
            Quantization::None,
            ExecutionMode::Live,
        )
        .unwrap_err();

        assert!(matches!(error, FitError::CommandMalformed { .. }));
        assert!(runner.commands().is_empty());
    }

    #[tokio::test]
    async fn test_assess_maps_exit_status_to_bool() {
        let runner = runner_fitting_up_to(4000);
        let probe = Probe::new(
            &runner,
            &ProbeSettings::default(),
            Path::new("/models/m.gguf"),
            Quantization::None,
            ExecutionMode::Live,
        )
        .unwrap();

        assert!(probe.assess(4000).await);
        assert!(!probe.assess(4001).await);

        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert!(
            calls
                .iter()
                .all(|(_, output, mode)| *output == OutputMode::Suppress
                    && *mode == ExecutionMode::Live)
        );
    }

    #[tokio::test]
    async fn test_assess_passes_execution_mode_through() {
        let runner = runner_fitting_up_to(0);
        let probe = Probe::new(
            &runner,
            &ProbeSettings::default(),
            Path::new("/models/m.gguf"),
            Quantization::None,
            ExecutionMode::DryRun,
        )
        .unwrap();

        probe.assess(128).await;

        assert_eq!(runner.calls()[0].2, ExecutionMode::DryRun);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_failure_counts_as_failed_probe() {
        let settings = ProbeSettings {
            command: "definitely-not-a-real-binary-4711".to_string(),
            ..ProbeSettings::default()
        };
        let runner = crate::fitting::ProcessRunner;
        let probe = Probe::new(
            &runner,
            &settings,
            Path::new("/models/m.gguf"),
            Quantization::None,
            ExecutionMode::Live,
        )
        .unwrap();

        assert!(!probe.assess(128).await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timed_out_trial_is_stopped_before_assess_returns() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let marker = temp_dir.path().join("trial-still-running");
        let settings = ProbeSettings {
            command: format!(
                "sh -c 'sh -c \"sleep 1; touch {}\"; true'",
                marker.display()
            ),
            timeout_secs: Some(0),
            ..ProbeSettings::default()
        };
        let runner = crate::fitting::ProcessRunner;
        let probe = Probe::new(
            &runner,
            &settings,
            Path::new("/models/m.gguf"),
            Quantization::None,
            ExecutionMode::Live,
        )
        .unwrap();

        assert!(!probe.assess(128).await);

        tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
        assert!(
            !marker.exists(),
            "the timed-out trial kept running after assess returned"
        );
    }

    #[tokio::test]
    async fn test_trial_running_past_its_limit_counts_as_failure() {
        let clock = ManualClock::default();
        let start = clock.now();
        let runner = ScriptedRunner::new(clock.clone(), |_| (0, TimeDelta::seconds(300)));
        let settings = ProbeSettings {
            timeout_secs: Some(30),
            ..ProbeSettings::default()
        };
        let probe = Probe::new(
            &runner,
            &settings,
            Path::new("/models/m.gguf"),
            Quantization::None,
            ExecutionMode::Live,
        )
        .unwrap();

        assert!(!probe.assess(4096).await);
        assert_eq!(clock.now() - start, TimeDelta::seconds(30));
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_fn_assessor_wraps_predicate() {
        let assessor = FnAssessor(|value| value % 2 == 0);
        assert!(assessor.assess(4).await);
        assert!(!assessor.assess(5).await);
    }
}
