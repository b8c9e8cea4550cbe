//! Subcommand implementations for the ctxfit CLI.

pub mod completion;
pub mod config;
pub mod fit;
pub mod launch;
