#![cfg_attr(not(test), forbid(unsafe_code))]
#![deny(warnings, clippy::pedantic)]
#![allow(clippy::multiple_crate_versions)] // TODO(deps-001): remove once transitive dependencies converge.

//! Shared building blocks for `ctxfit`: the bootstrap configuration and the
//! context-length fitting core.

pub mod config;
pub mod fitting;
