//! # Launch Command Rewriting
//!
//! Launch commands arrive as single shell-style strings. They are tokenized with
//! `shlex`, edited as a token list and rendered back with every token quoted as
//! needed, so values with spaces or shell metacharacters never leak into the
//! command line unescaped.

use crate::fitting::errors::{FitError, FitResult};
use std::fmt::Display;

/// A tokenized command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    tokens: Vec<String>,
}

impl LaunchCommand {
    /// Tokenize `command` using shell quoting rules.
    ///
    /// # Errors
    ///
    /// Returns [`FitError::CommandMalformed`] when the quoting is unbalanced or
    /// the command is empty.
    pub fn parse(command: &str) -> FitResult<Self> {
        let tokens = shlex::split(command)
            .ok_or_else(|| FitError::malformed(format!("unbalanced quoting in `{command}`")))?;
        if tokens.is_empty() {
            return Err(FitError::malformed("empty command"));
        }
        Ok(Self { tokens })
    }

    /// The executable
    #[must_use]
    pub fn program(&self) -> &str {
        &self.tokens[0]
    }

    /// Everything after the executable
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.tokens[1..]
    }

    /// Value following the last occurrence of `name` after the executable, if any.
    #[must_use]
    pub fn argument(&self, name: &str) -> Option<&str> {
        let position = self
            .tokens
            .iter()
            .rposition(|token| token == name)
            .filter(|&position| position > 0)?;
        self.tokens.get(position + 1).map(String::as_str)
    }

    /// Whether the bare flag `name` occurs anywhere in the command.
    #[must_use]
    pub fn has_flag(&self, name: &str) -> bool {
        self.tokens.iter().skip(1).any(|token| token == name)
    }

    /// Remove every `name <value>` pair and append `name value` at the end.
    pub fn replace_argument(&mut self, name: &str, value: impl Display) {
        let mut kept = Vec::with_capacity(self.tokens.len() + 2);
        let mut tokens = std::mem::take(&mut self.tokens).into_iter();
        if let Some(program) = tokens.next() {
            kept.push(program);
        }
        while let Some(token) = tokens.next() {
            if token == name {
                tokens.next();
            } else {
                kept.push(token);
            }
        }
        kept.push(name.to_string());
        kept.push(value.to_string());
        self.tokens = kept;
    }

    /// Append the bare flag `name` unless it is already present.
    pub fn ensure_flag(&mut self, name: &str) {
        if !self.has_flag(name) {
            self.tokens.push(name.to_string());
        }
    }

    /// Render the command back into a single string, quoting tokens as needed.
    ///
    /// # Errors
    ///
    /// Returns [`FitError::CommandMalformed`] if a token cannot be quoted
    /// (it contains a NUL byte).
    pub fn render(&self) -> FitResult<String> {
        shlex::try_join(self.tokens.iter().map(String::as_str))
            .map_err(|error| FitError::malformed(error.to_string()))
    }
}

/// Replace the value of `name` in `command` with `value`.
///
/// Any existing `name <value>` pairs are removed and a single `name value` pair
/// is appended, so the result always carries exactly one occurrence.
///
/// # Errors
///
/// Returns [`FitError::CommandMalformed`] if `command` cannot be tokenized.
pub fn replace_argument(command: &str, name: &str, value: impl Display) -> FitResult<String> {
    let mut parsed = LaunchCommand::parse(command)?;
    parsed.replace_argument(name, value);
    parsed.render()
}
