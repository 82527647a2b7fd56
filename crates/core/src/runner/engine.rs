//! External executables behind a trait
//!
//! Runners only need "run this control file in this directory and send all
//! output to this log". [`ExternalEngine`] does that with a blocking child
//! process; tests substitute in-process fakes.

use super::RunError;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

/// A program that consumes a control file inside a sandbox
pub trait Engine {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Run to completion with `sandbox` as working directory
    ///
    /// Standard output and standard error both go to `log`. Returns the exit
    /// code, `None` when the process was terminated by a signal. The exit
    /// code is informational; success is judged from the files left behind.
    ///
    /// # Errors
    /// Returns an I/O error when the program cannot be started.
    fn invoke(&self, sandbox: &Path, control_file: &str, log: File) -> io::Result<Option<i32>>;
}

/// Engine backed by an executable on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalEngine {
    executable: PathBuf,
    name: String,
}

impl ExternalEngine {
    /// Engine for `executable`, which must exist
    ///
    /// # Errors
    /// Returns [`RunError::EngineNotFound`] when the file is missing.
    pub fn locate(executable: &Path) -> Result<Self, RunError> {
        if !executable.is_file() {
            return Err(RunError::EngineNotFound(executable.to_path_buf()));
        }
        let name = executable
            .file_stem()
            .map_or_else(|| "engine".to_string(), |s| s.to_string_lossy().into_owned());
        Ok(Self {
            executable: executable.to_path_buf(),
            name,
        })
    }

    /// Executable path
    #[must_use]
    pub fn executable(&self) -> &Path {
        &self.executable
    }
}

impl Engine for ExternalEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, sandbox: &Path, control_file: &str, log: File) -> io::Result<Option<i32>> {
        debug!(
            "Running {} {} in {}",
            self.executable.display(),
            control_file,
            sandbox.display()
        );
        let status = Command::new(&self.executable)
            .arg(control_file)
            .current_dir(sandbox)
            .stdin(Stdio::null())
            .stdout(log.try_clone()?)
            .stderr(log)
            .status()?;
        Ok(status.code())
    }
}
