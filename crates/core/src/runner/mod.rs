//! Execution orchestration
//!
//! Each run unit (one preprocessor year, or one dispersion year and
//! pollutant) is staged into its own sandbox, executed as a blocking
//! process and judged only by the files it leaves behind:
//!
//! ```text
//! STAGED ──start──▶ RUNNING ──outputs present──▶ SUCCEEDED
//!    │                  └────outputs missing───▶ FAILED
//!    └──control file rejected──────────────────▶ FAILED
//! ```
//!
//! A failed unit keeps its sandbox and log for inspection; the next unit
//! still runs.

mod context;
pub mod dispersion;
mod engine;
pub mod layout;
pub mod preprocessor;
pub mod sandbox;

pub use context::{RunContext, RunRecord, RunState};
pub use dispersion::DispersionRunner;
pub use engine::{Engine, ExternalEngine};
pub use layout::DataLayout;
pub use preprocessor::{import_reanalysis, prepare_met_inputs, ImportedTables, MetInputs, PreprocessorRunner};
pub use sandbox::Sandbox;

use crate::control::ProtocolError;
use crate::met::MetError;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Lines of engine diagnostics forwarded in a failure
const DIAGNOSTIC_LINES: usize = 20;

/// Errors raised while staging, executing or harvesting a run
#[derive(Debug)]
pub enum RunError {
    /// Filesystem operation failed
    Io {
        /// Path involved
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },
    /// A required input file is absent
    MissingInput(PathBuf),
    /// Engine executable is absent
    EngineNotFound(PathBuf),
    /// Control file failed validation
    Protocol(ProtocolError),
    /// Meteorological input could not be read or encoded
    Met(MetError),
    /// Engine exited without producing its primary outputs
    EngineFailed {
        /// Engine name
        engine: String,
        /// Combined output log
        log_path: PathBuf,
        /// Exit code, `None` if killed by a signal
        exit_code: Option<i32>,
        /// Expected outputs that were not found
        missing: Vec<String>,
        /// Tail of the engine's error or message file, if any
        diagnostic: Option<String>,
    },
    /// Illegal lifecycle transition
    InvalidTransition {
        /// State before
        from: RunState,
        /// Requested state
        to: RunState,
    },
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunError::Io { path, source } => write!(f, "I/O error on {}: {source}", path.display()),
            RunError::MissingInput(path) => write!(f, "Required input {} not found", path.display()),
            RunError::EngineNotFound(path) => write!(f, "Executable not found at {}", path.display()),
            RunError::Protocol(e) => write!(f, "Control file rejected: {e}"),
            RunError::Met(e) => write!(f, "Meteorological input error: {e}"),
            RunError::EngineFailed {
                engine,
                log_path,
                exit_code,
                missing,
                diagnostic,
            } => {
                write!(f, "{engine} produced no {}", missing.join(", "))?;
                if let Some(code) = exit_code {
                    write!(f, " (exit code {code})")?;
                }
                write!(f, "; see {}", log_path.display())?;
                match diagnostic {
                    Some(text) if f.alternate() => write!(f, "\n{text}"),
                    _ => Ok(()),
                }
            }
            RunError::InvalidTransition { from, to } => {
                write!(f, "Run cannot move from {from} to {to}")
            }
        }
    }
}

impl RunError {
    /// Engine diagnostic text carried by [`RunError::EngineFailed`]
    #[must_use]
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            RunError::EngineFailed { diagnostic, .. } => diagnostic.as_deref(),
            _ => None,
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunError::Io { source, .. } => Some(source),
            RunError::Protocol(e) => Some(e),
            RunError::Met(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ProtocolError> for RunError {
    fn from(e: ProtocolError) -> Self {
        RunError::Protocol(e)
    }
}

impl From<MetError> for RunError {
    fn from(e: MetError) -> Self {
        RunError::Met(e)
    }
}

/// Last lines of the first readable, non-empty file among `candidates`
pub(crate) fn diagnostic_tail(candidates: &[&Path]) -> Option<String> {
    candidates.iter().find_map(|path| {
        let text = fs::read_to_string(path).ok()?;
        let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
        if lines.is_empty() {
            return None;
        }
        let start = lines.len().saturating_sub(DIAGNOSTIC_LINES);
        Some(lines[start..].join("\n"))
    })
}
