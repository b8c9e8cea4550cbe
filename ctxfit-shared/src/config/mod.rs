//! # Configuration
//!
//! This module contains the bootstrap configuration and its loading rules.

pub mod bootstrap;
