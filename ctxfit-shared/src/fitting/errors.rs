//! # Fitting Error Types
//!
//! This module defines error types for launching and fitting operations.
//!
//! A failing probe is not an error: probes report `false`. Errors are reserved
//! for malformed input, processes that cannot be started at all, and the fatal
//! outcomes of the fallback flow.

use crate::fitting::types::ExitReport;
use thiserror::Error;

/// Result type alias for fitting operations
pub type FitResult<T> = Result<T, FitError>;

/// Error type for fitting and launch operations
#[derive(Error, Debug)]
pub enum FitError {
    /// The command line could not be tokenized or rendered
    #[error("Malformed command: {details}")]
    CommandMalformed { details: String },

    /// The process could not be started at all
    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// A search range with its bounds reversed
    #[error("Invalid search range: low {low} is greater than high {high}")]
    InvalidRange { low: u32, high: u32 },

    /// The primary launch failed after the retry window; not caused by the context length
    #[error("Launch failed after {elapsed_secs} seconds with {status}")]
    LateLaunchFailure { elapsed_secs: i64, status: ExitReport },

    /// No context length in the searched range fits
    #[error("No context length between {low} and {high} fits into GPU memory")]
    SearchExhausted { low: u32, high: u32 },

    /// The relaunch with the discovered context length failed too
    #[error("Fallback launch with context length {context_length} failed with {status}")]
    FallbackLaunchFailed {
        context_length: u32,
        status: ExitReport,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {field} - {message}")]
    InvalidConfiguration { field: String, message: String },

    /// IO related errors
    #[error("IO error: {message}")]
    IoError { message: String },
}

impl FitError {
    /// Create a new malformed command error
    #[must_use]
    pub fn malformed<T: Into<String>>(details: T) -> Self {
        Self::CommandMalformed {
            details: details.into(),
        }
    }

    /// Create a new invalid configuration error
    #[must_use]
    pub fn invalid_config<T: Into<String>, U: Into<String>>(field: T, message: U) -> Self {
        Self::InvalidConfiguration {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new spawn error for `command`
    #[must_use]
    pub fn spawn<T: Into<String>>(command: T, source: std::io::Error) -> Self {
        Self::Spawn {
            command: command.into(),
            source,
        }
    }

    /// Exit report of the launch that caused this error, if any
    #[must_use]
    pub fn exit_report(&self) -> Option<&ExitReport> {
        match self {
            Self::LateLaunchFailure { status, .. } | Self::FallbackLaunchFailed { status, .. } => {
                Some(status)
            }
            _ => None,
        }
    }
}

impl From<std::io::Error> for FitError {
    fn from(error: std::io::Error) -> Self {
        Self::IoError {
            message: error.to_string(),
        }
    }
}

impl From<serde_json::Error> for FitError {
    fn from(error: serde_json::Error) -> Self {
        Self::invalid_config("json", error.to_string())
    }
}

impl From<serde_yml::Error> for FitError {
    fn from(error: serde_yml::Error) -> Self {
        Self::invalid_config("yaml", error.to_string())
    }
}
