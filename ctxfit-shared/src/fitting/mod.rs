//! # Context-Length Fitting
//!
//! This module discovers the largest context length a model can be served with
//! on the current GPU when the requested value fails at launch.
//!
//! ## Architecture
//!
//! The pieces are layered leaf-first:
//! - [`LaunchCommand`] - tokenizes a command line and rewrites single arguments
//! - [`Probe`] - runs a short trial launch and reduces it to pass/fail
//! - [`search`] - finds the largest passing value in an inclusive range
//! - [`FallbackOrchestrator`] - runs the primary launch, classifies its failure,
//!   searches, and relaunches once with the discovered value
//!
//! Every process goes through a [`CommandRunner`], and the retriable/fatal
//! classification reads time from a [`Clock`], so both can be replaced in tests.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use shared::fitting::{
//!     ExecutionMode, FallbackOrchestrator, FallbackSettings, LaunchSpec, ProbeSettings,
//!     ProcessRunner, Quantization, SystemClock,
//! };
//!
//! let spec = LaunchSpec::new("koboldcpp --port 5002", "/models/model.gguf", 8192)
//!     .with_quantization(Quantization::Q8);
//! let orchestrator = FallbackOrchestrator::new(
//!     ProcessRunner,
//!     SystemClock,
//!     FallbackSettings::default(),
//!     ProbeSettings::default(),
//! );
//! let report = orchestrator.launch(&spec, ExecutionMode::Live).await?;
//! ```

pub mod clock;
pub mod command;
pub mod errors;
pub mod orchestrator;
pub mod probe;
pub mod runner;
pub mod search;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use clock::{Clock, SystemClock};
pub use command::{LaunchCommand, replace_argument};
pub use errors::{FitError, FitResult};
pub use orchestrator::{FallbackOrchestrator, FallbackSettings, LaunchPath, LaunchReport};
pub use probe::{Assessor, FnAssessor, Probe, ProbeSettings};
pub use runner::{CommandRunner, ProcessRunner};
pub use search::{SearchOutcome, round_down, search};
pub use types::{ExecutionMode, ExitReport, LaunchSpec, OutputMode, Quantization, SearchRange};
