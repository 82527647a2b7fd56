//! Run context and lifecycle

use super::RunError;
use crate::control::AveragingPeriod;
use std::fmt;
use std::path::{Path, PathBuf};

/// Lifecycle of one run unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    /// Inputs and control file are in the sandbox
    Staged,
    /// Engine process is executing
    Running,
    /// Primary outputs were found and relocated
    Succeeded,
    /// Control file could not be written, or primary outputs were
    /// missing after the run; sandbox and log kept
    Failed,
}

impl RunState {
    fn can_become(self, next: RunState) -> bool {
        matches!(
            (self, next),
            (RunState::Staged, RunState::Running | RunState::Failed)
                | (RunState::Running, RunState::Succeeded | RunState::Failed)
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Staged => "STAGED",
            RunState::Running => "RUNNING",
            RunState::Succeeded => "SUCCEEDED",
            RunState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Everything known about one engine invocation
#[derive(Debug, Clone, PartialEq)]
pub struct RunContext {
    year: i32,
    pollutant: Option<String>,
    periods: Vec<AveragingPeriod>,
    sandbox: PathBuf,
    log_path: PathBuf,
    inputs: Vec<String>,
    outputs: Vec<PathBuf>,
    state: RunState,
}

impl RunContext {
    /// Context for a unit whose inputs are already in `sandbox`
    #[must_use]
    pub fn staged(year: i32, sandbox: &Path, log_path: PathBuf, inputs: Vec<String>) -> Self {
        Self {
            year,
            pollutant: None,
            periods: Vec::new(),
            sandbox: sandbox.to_path_buf(),
            log_path,
            inputs,
            outputs: Vec::new(),
            state: RunState::Staged,
        }
    }

    /// Attach the pollutant and averaging periods of a dispersion run
    #[must_use]
    pub fn with_pollutant(mut self, pollutant: &str, periods: &[AveragingPeriod]) -> Self {
        self.pollutant = Some(pollutant.to_string());
        self.periods = periods.to_vec();
        self
    }

    fn transition(&mut self, next: RunState) -> Result<(), RunError> {
        if !self.state.can_become(next) {
            return Err(RunError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// `STAGED → RUNNING`
    ///
    /// # Errors
    /// Returns [`RunError::InvalidTransition`] from any other state.
    pub fn start(&mut self) -> Result<(), RunError> {
        self.transition(RunState::Running)
    }

    /// `RUNNING → SUCCEEDED`, recording the relocated outputs
    ///
    /// # Errors
    /// Returns [`RunError::InvalidTransition`] from any other state.
    pub fn succeed(&mut self, outputs: Vec<PathBuf>) -> Result<(), RunError> {
        self.transition(RunState::Succeeded)?;
        self.outputs = outputs;
        Ok(())
    }

    /// `RUNNING → FAILED`, or `STAGED → FAILED` when the run never started
    ///
    /// # Errors
    /// Returns [`RunError::InvalidTransition`] from a final state.
    pub fn fail(&mut self) -> Result<(), RunError> {
        self.transition(RunState::Failed)
    }

    /// Processing year
    #[must_use]
    pub fn year(&self) -> i32 {
        self.year
    }

    /// Pollutant of a dispersion run
    #[must_use]
    pub fn pollutant(&self) -> Option<&str> {
        self.pollutant.as_deref()
    }

    /// Averaging periods of a dispersion run
    #[must_use]
    pub fn periods(&self) -> &[AveragingPeriod] {
        &self.periods
    }

    /// Sandbox directory
    #[must_use]
    pub fn sandbox(&self) -> &Path {
        &self.sandbox
    }

    /// Combined engine output log
    #[must_use]
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Files staged into the sandbox
    #[must_use]
    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    /// Relocated result files
    #[must_use]
    pub fn outputs(&self) -> &[PathBuf] {
        &self.outputs
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> RunState {
        self.state
    }
}

/// Final context of a run unit and, when it did not succeed, why
#[derive(Debug)]
pub struct RunRecord {
    /// Context in its final state
    pub context: RunContext,
    /// Failure cause
    pub error: Option<RunError>,
}

impl RunRecord {
    /// Whether the unit succeeded
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.context.state() == RunState::Succeeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> RunContext {
        RunContext::staged(2024, Path::new("/run"), PathBuf::from("/run/aermod_SO2.log"), vec![])
            .with_pollutant("SO2", &[AveragingPeriod::Hours(1)])
    }

    #[test]
    fn test_happy_path() {
        let mut ctx = context();
        assert_eq!(ctx.state(), RunState::Staged);
        ctx.start().unwrap();
        ctx.succeed(vec![PathBuf::from("/out/AERMOD_2024_SO2.out")]).unwrap();
        assert_eq!(ctx.state(), RunState::Succeeded);
        assert_eq!(ctx.outputs().len(), 1);
        assert_eq!(ctx.pollutant(), Some("SO2"));
    }

    #[test]
    fn test_rejected_transitions() {
        let mut ctx = context();
        assert!(matches!(
            ctx.succeed(vec![]),
            Err(RunError::InvalidTransition {
                from: RunState::Staged,
                to: RunState::Succeeded
            })
        ));
        ctx.start().unwrap();
        ctx.fail().unwrap();
        assert!(ctx.start().is_err());
        assert!(ctx.succeed(vec![]).is_err());
        assert_eq!(ctx.state(), RunState::Failed);
    }
}
