//! Scripted stand-ins for process execution and time used by the fitting tests.

use crate::fitting::clock::Clock;
use crate::fitting::command::LaunchCommand;
use crate::fitting::errors::FitResult;
use crate::fitting::runner::CommandRunner;
use crate::fitting::types::{ExecutionMode, ExitReport, OutputMode};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub(crate) struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Move the clock forward by `delta`.
    pub(crate) fn advance(&self, delta: TimeDelta) {
        *self.now.lock().unwrap() += delta;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            now: Arc::new(Mutex::new(DateTime::<Utc>::default())),
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// How a scripted command behaves: its exit code and how long it "runs".
pub(crate) type Script = dyn Fn(&LaunchCommand) -> (i32, TimeDelta) + Send + Sync;

/// A runner that answers from a script and advances a [`ManualClock`] by the
/// scripted run time of every command, cut short at the command's time limit.
pub(crate) struct ScriptedRunner {
    clock: ManualClock,
    script: Box<Script>,
    calls: Arc<Mutex<Vec<(String, OutputMode, ExecutionMode)>>>,
}

impl ScriptedRunner {
    pub(crate) fn new(
        clock: ManualClock,
        script: impl Fn(&LaunchCommand) -> (i32, TimeDelta) + Send + Sync + 'static,
    ) -> Self {
        Self {
            clock,
            script: Box::new(script),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every command line this runner was asked to execute, in order.
    pub(crate) fn commands(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(command, _, _)| command.clone())
            .collect()
    }

    /// Every call with its output and execution modes, in order.
    pub(crate) fn calls(&self) -> Vec<(String, OutputMode, ExecutionMode)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        command: &str,
        output: OutputMode,
        mode: ExecutionMode,
        timeout: Option<Duration>,
    ) -> FitResult<ExitReport> {
        let parsed = LaunchCommand::parse(command)?;
        self.calls
            .lock()
            .unwrap()
            .push((command.to_string(), output, mode));
        let (code, duration) = (self.script)(&parsed);

        if let Some(limit) = timeout.map(|limit| TimeDelta::from_std(limit).unwrap())
            && duration > limit
        {
            self.clock.advance(limit);
            return Ok(ExitReport::timed_out());
        }
        self.clock.advance(duration);
        Ok(ExitReport::with_code(code))
    }
}

/// Context length a parsed command was asked to run with, if any.
pub(crate) fn context_of(command: &LaunchCommand, flag: &str) -> Option<u32> {
    command.argument(flag).and_then(|value| value.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances_shared_time() {
        let clock = ManualClock::default();
        let observer = clock.clone();
        let start = observer.now();

        clock.advance(TimeDelta::seconds(90));

        assert_eq!(observer.now() - start, TimeDelta::seconds(90));
    }
}
