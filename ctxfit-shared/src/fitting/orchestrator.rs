//! # Fallback Orchestration
//!
//! Drives a serving launch end to end:
//!
//! ```text
//! primary launch ──ok──────────────────────────────────────────▶ done
//!       │ failed within the retry window      failed later ──▶ LateLaunchFailure
//!       ▼
//! search [floor, requested] ──nothing fits──▶ SearchExhausted
//!       │ found
//!       ▼
//! round down, rewrite context flag, relaunch once ──failed──▶ FallbackLaunchFailed
//! ```
//!
//! A launch that dies quickly is assumed to have failed while allocating memory
//! for the context, which the search can fix. One that dies after the retry
//! window is treated as unrelated to the context length and returned unchanged.

use crate::fitting::clock::Clock;
use crate::fitting::command::LaunchCommand;
use crate::fitting::errors::{FitError, FitResult};
use crate::fitting::probe::{Probe, ProbeSettings};
use crate::fitting::runner::CommandRunner;
use crate::fitting::search::{round_down, search};
use crate::fitting::types::{ExecutionMode, LaunchSpec, OutputMode, Quantization, SearchRange};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Tuning knobs for the fallback flow
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct FallbackSettings {
    /// A primary launch failing within this many seconds triggers the search
    pub retry_window_secs: u64,

    /// Discovered context lengths are rounded down to a multiple of this
    pub granularity: u32,

    /// Smallest context length the search tries
    pub search_floor: u32,

    /// Launch command flag that takes the context length
    pub context_arg: String,

    /// Launch command flag that takes the model path
    pub model_arg: String,

    /// Launch command flag that takes the KV cache level (`1` or `2`)
    pub quant_arg: String,

    /// Launch command flag required alongside a quantized cache
    pub flash_attention_flag: String,

    /// Launch command flag that takes the listening port
    pub port_arg: String,
}

impl Default for FallbackSettings {
    fn default() -> Self {
        Self {
            retry_window_secs: 120,
            granularity: 128,
            search_floor: 128,
            context_arg: "--contextsize".to_string(),
            model_arg: "--model".to_string(),
            quant_arg: "--quantkv".to_string(),
            flash_attention_flag: "--flashattention".to_string(),
            port_arg: "--port".to_string(),
        }
    }
}

/// Which launch ended up serving
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchPath {
    /// The requested context length worked
    Primary,
    /// The relaunch after a search
    Fallback {
        /// Largest value the probes accepted
        discovered: u32,
        /// `discovered` rounded down to the granularity
        rounded: u32,
    },
}

/// Result of a successful bootstrap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchReport {
    /// Final launch command
    pub command: String,
    /// Context length carried by `command`
    pub context_length: u32,
    /// How `command` was reached
    pub path: LaunchPath,
}

/// How a failed primary launch is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailureClass {
    Retriable,
    Fatal,
}

pub(crate) fn classify(elapsed: TimeDelta, window: TimeDelta) -> FailureClass {
    if elapsed > window {
        FailureClass::Fatal
    } else {
        FailureClass::Retriable
    }
}

/// Runs the primary launch and, on an early failure, the search and relaunch.
#[derive(Debug)]
pub struct FallbackOrchestrator<R, C> {
    runner: R,
    clock: C,
    settings: FallbackSettings,
    probe: ProbeSettings,
}

impl<R: CommandRunner, C: Clock> FallbackOrchestrator<R, C> {
    /// Create an orchestrator.
    #[must_use]
    pub fn new(runner: R, clock: C, settings: FallbackSettings, probe: ProbeSettings) -> Self {
        Self {
            runner,
            clock,
            settings,
            probe,
        }
    }

    /// The command runner
    #[must_use]
    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// The primary launch command: the [`LaunchSpec`] template with the model, the
    /// requested context length and the port (when the spec has one) set. A quantized
    /// cache also sets the cache level and makes sure flash attention is on.
    ///
    /// # Errors
    ///
    /// Returns [`FitError::CommandMalformed`] if the template cannot be tokenized.
    pub fn primary_command(&self, spec: &LaunchSpec) -> FitResult<String> {
        let mut command = LaunchCommand::parse(spec.command())?;
        command.replace_argument(&self.settings.model_arg, spec.model().display());
        command.replace_argument(&self.settings.context_arg, spec.context_length());
        if let Some(port) = spec.port() {
            command.replace_argument(&self.settings.port_arg, port);
        }
        if spec.quantization() != Quantization::None {
            command.ensure_flag(&self.settings.flash_attention_flag);
            command.replace_argument(&self.settings.quant_arg, spec.quantization().level());
        }
        command.render()
    }

    /// Launch the model, falling back to the largest context length that fits
    /// when the primary launch fails early.
    ///
    /// # Errors
    ///
    /// - [`FitError::CommandMalformed`] before anything runs
    /// - [`FitError::LateLaunchFailure`] when the primary launch fails after the
    ///   retry window
    /// - [`FitError::SearchExhausted`] when no context length fits
    /// - [`FitError::FallbackLaunchFailed`] when the relaunch fails too
    /// - [`FitError::Spawn`] when a launch cannot be started at all
    pub async fn launch(&self, spec: &LaunchSpec, mode: ExecutionMode) -> FitResult<LaunchReport> {
        let primary = self.primary_command(spec)?;
        let probe = self.probe_for(spec, mode)?;

        let started = self.clock.now();
        let status = self
            .runner
            .run(&primary, OutputMode::Inherit, mode, None)
            .await?;
        if status.success() {
            return Ok(LaunchReport {
                command: primary,
                context_length: spec.context_length(),
                path: LaunchPath::Primary,
            });
        }

        let elapsed = self.clock.now() - started;
        let window = i64::try_from(self.settings.retry_window_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX);
        if classify(elapsed, window) == FailureClass::Fatal {
            error!(
                elapsed_secs = elapsed.num_seconds(),
                %status,
                "launch failed after running for a while, not retrying"
            );
            return Err(FitError::LateLaunchFailure {
                elapsed_secs: elapsed.num_seconds(),
                status,
            });
        }

        warn!(
            context_length = spec.context_length(),
            %status,
            "failed to launch model serving"
        );
        info!("searching for the largest context size that fits into GPU memory");
        let discovered = self.search_with(&probe, spec).await?;
        let rounded = round_down(discovered, self.settings.granularity);
        if rounded != discovered {
            info!(
                from = discovered,
                to = rounded,
                granularity = self.settings.granularity,
                "rounding discovered context size down"
            );
        }
        if rounded == 0 {
            return Err(FitError::SearchExhausted {
                low: self.settings.search_floor,
                high: spec.context_length(),
            });
        }

        let mut fallback = LaunchCommand::parse(&primary)?;
        fallback.replace_argument(&self.settings.context_arg, rounded);
        let fallback = fallback.render()?;

        info!(context_length = rounded, "launching a second time");
        let status = self
            .runner
            .run(&fallback, OutputMode::Inherit, mode, None)
            .await?;
        if !status.success() {
            error!(context_length = rounded, %status, "fallback launch failed");
            return Err(FitError::FallbackLaunchFailed {
                context_length: rounded,
                status,
            });
        }

        Ok(LaunchReport {
            command: fallback,
            context_length: rounded,
            path: LaunchPath::Fallback {
                discovered,
                rounded,
            },
        })
    }

    /// Search `[search_floor, requested]` for the largest context length whose
    /// probe succeeds. The result is not rounded.
    ///
    /// # Errors
    ///
    /// - [`FitError::CommandMalformed`] if the probe command is malformed
    /// - [`FitError::InvalidRange`] if the requested length is below the floor
    /// - [`FitError::SearchExhausted`] if nothing fits
    pub async fn discover(&self, spec: &LaunchSpec, mode: ExecutionMode) -> FitResult<u32> {
        let probe = self.probe_for(spec, mode)?;
        self.search_with(&probe, spec).await
    }

    fn probe_for(&self, spec: &LaunchSpec, mode: ExecutionMode) -> FitResult<Probe<'_, R>> {
        Probe::new(
            &self.runner,
            &self.probe,
            spec.model(),
            spec.quantization(),
            mode,
        )
    }

    async fn search_with(&self, probe: &Probe<'_, R>, spec: &LaunchSpec) -> FitResult<u32> {
        let range = SearchRange::new(self.settings.search_floor, spec.context_length())?;

        search(range, probe).await.ok_or_else(|| {
            error!("failed to find any context size that fits into GPU memory");
            FitError::SearchExhausted {
                low: range.low(),
                high: range.high(),
            }
        })
    }
}
