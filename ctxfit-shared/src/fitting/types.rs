//! # Fitting Types
//!
//! Value types shared by the command builder, probe, searcher and orchestrator.

use crate::fitting::errors::{FitError, FitResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use strum::{Display, EnumString};

/// KV cache precision requested for the model
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum Quantization {
    /// Full-precision cache, no extra flags
    #[default]
    #[strum(to_string = "none", serialize = "0", serialize = "f16")]
    None,
    /// 8-bit cache
    #[strum(to_string = "q8", serialize = "1", serialize = "q8_0", serialize = "8bit")]
    Q8,
    /// 4-bit cache
    #[strum(to_string = "q4", serialize = "2", serialize = "q4_0", serialize = "4bit")]
    Q4,
}

impl Quantization {
    /// The `llama.cpp` cache type name for this precision, or `None` when no
    /// cache flags should be passed.
    #[must_use]
    pub fn cache_type(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Q8 => Some("q8_0"),
            Self::Q4 => Some("q4_0"),
        }
    }

    /// Numeric level understood by koboldcpp's `--quantkv`
    #[must_use]
    pub fn level(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Q8 => 1,
            Self::Q4 => 2,
        }
    }
}

/// Whether commands are actually executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Spawn processes and wait for them
    #[default]
    Live,
    /// Log commands and report success without spawning anything
    DryRun,
}

impl ExecutionMode {
    /// Map a `--dry-run` style flag to a mode.
    #[must_use]
    pub fn from_dry_run(dry_run: bool) -> Self {
        if dry_run { Self::DryRun } else { Self::Live }
    }
}

/// What happens to a command's stdout and stderr
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Forward output to the terminal
    Inherit,
    /// Capture output and discard it; the stderr tail is kept for diagnostics
    Suppress,
}

/// Outcome of a finished process
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExitReport {
    code: Option<i32>,
    timed_out: bool,
    stderr_tail: Option<String>,
}

impl ExitReport {
    /// A successful exit
    #[must_use]
    pub fn succeeded() -> Self {
        Self::with_code(0)
    }

    /// An exit with the given code
    #[must_use]
    pub fn with_code(code: i32) -> Self {
        Self {
            code: Some(code),
            ..Self::default()
        }
    }

    /// A command stopped because it ran past its time limit
    #[must_use]
    pub fn timed_out() -> Self {
        Self {
            timed_out: true,
            ..Self::default()
        }
    }

    /// Build a report from a process status
    #[must_use]
    pub fn from_status(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            ..Self::default()
        }
    }

    /// Attach the last lines of captured stderr
    #[must_use]
    pub fn with_stderr_tail(mut self, tail: impl Into<String>) -> Self {
        let tail = tail.into();
        self.stderr_tail = (!tail.is_empty()).then_some(tail);
        self
    }

    /// Exit code, absent when the process was killed by a signal
    #[must_use]
    pub fn code(&self) -> Option<i32> {
        self.code
    }

    /// Whether the command was stopped at its time limit
    #[must_use]
    pub fn is_timed_out(&self) -> bool {
        self.timed_out
    }

    /// Last lines of captured stderr
    #[must_use]
    pub fn stderr_tail(&self) -> Option<&str> {
        self.stderr_tail.as_deref()
    }

    /// True iff the process exited with status zero
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for ExitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {code}"),
            None if self.timed_out => write!(f, "timeout"),
            None => write!(f, "termination by signal"),
        }
    }
}

/// Everything the fitting core needs to know about one bootstrap attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    command: String,
    model: PathBuf,
    context_length: u32,
    quantization: Quantization,
    port: Option<u16>,
}

impl LaunchSpec {
    /// Create a spec for `command` serving `model` at `context_length`.
    #[must_use]
    pub fn new(command: impl Into<String>, model: impl Into<PathBuf>, context_length: u32) -> Self {
        Self {
            command: command.into(),
            model: model.into(),
            context_length,
            quantization: Quantization::None,
            port: None,
        }
    }

    /// Set the KV cache precision.
    #[must_use]
    pub fn with_quantization(mut self, quantization: Quantization) -> Self {
        self.quantization = quantization;
        self
    }

    /// Set the port the server listens on.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Base launch command template
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Model file reference
    #[must_use]
    pub fn model(&self) -> &Path {
        &self.model
    }

    /// Requested context length
    #[must_use]
    pub fn context_length(&self) -> u32 {
        self.context_length
    }

    /// KV cache precision
    #[must_use]
    pub fn quantization(&self) -> Quantization {
        self.quantization
    }

    /// Listening port, when set on the spec rather than left to the command
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.port
    }
}

/// Inclusive integer bounds with `low <= high`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchRange {
    low: u32,
    high: u32,
}

impl SearchRange {
    /// Create a range.
    ///
    /// # Errors
    ///
    /// Returns [`FitError::InvalidRange`] when `low > high`.
    pub fn new(low: u32, high: u32) -> FitResult<Self> {
        if low > high {
            return Err(FitError::InvalidRange { low, high });
        }
        Ok(Self { low, high })
    }

    /// Lower bound
    #[must_use]
    pub fn low(&self) -> u32 {
        self.low
    }

    /// Upper bound
    #[must_use]
    pub fn high(&self) -> u32 {
        self.high
    }
}
