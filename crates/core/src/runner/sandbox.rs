//! Run sandbox: one working directory per run unit
//!
//! Files are never visible under their final name while partially written.
//! New content goes to a hidden temporary sibling and is renamed into
//! place; moves across devices fall back to copy, rename and delete.

use super::RunError;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> RunError + '_ {
    move |source| RunError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn temporary_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map_or_else(|| "file".into(), |n| n.to_string_lossy().into_owned());
    path.with_file_name(format!(".{name}.partial"))
}

/// Write `contents` to `path` through a temporary sibling and a rename
///
/// # Errors
/// Returns [`RunError::Io`] if the temporary file cannot be written or
/// renamed; the temporary file is removed on failure.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), RunError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    let temp = temporary_sibling(path);
    let written = fs::File::create(&temp).and_then(|mut file| {
        file.write_all(contents)?;
        file.sync_all()
    });
    if let Err(source) = written.and_then(|()| fs::rename(&temp, path)) {
        let _ = fs::remove_file(&temp);
        return Err(RunError::Io {
            path: path.to_path_buf(),
            source,
        });
    }
    Ok(())
}

/// Copy `source` to `dest` through a temporary sibling of `dest`
///
/// # Errors
/// Returns [`RunError::Io`] if the copy or rename fails.
pub fn copy_atomic(source: &Path, dest: &Path) -> Result<(), RunError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    let temp = temporary_sibling(dest);
    if let Err(err) = fs::copy(source, &temp).and_then(|_| fs::rename(&temp, dest)) {
        let _ = fs::remove_file(&temp);
        return Err(RunError::Io {
            path: source.to_path_buf(),
            source: err,
        });
    }
    Ok(())
}

/// Move `source` to `dest`, replacing any existing file
///
/// Tries a rename first and falls back to [`copy_atomic`] followed by
/// deleting the source when the rename fails (for example across devices).
///
/// # Errors
/// Returns [`RunError::Io`] if neither strategy succeeds.
pub fn move_file(source: &Path, dest: &Path) -> Result<(), RunError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    if fs::rename(source, dest).is_ok() {
        return Ok(());
    }
    debug!("Rename of {} failed, copying instead", source.display());
    copy_atomic(source, dest)?;
    fs::remove_file(source).map_err(io_error(source))
}

/// Remove a file, treating an absent file as already removed
///
/// # Errors
/// Returns [`RunError::Io`] for any other failure.
pub fn remove_if_present(path: &Path) -> Result<(), RunError> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(RunError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
        _ => Ok(()),
    }
}

/// Working directory of one run unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sandbox {
    dir: PathBuf,
}

impl Sandbox {
    /// Open `dir` as a sandbox, creating it when needed
    ///
    /// # Errors
    /// Returns [`RunError::Io`] if the directory cannot be created.
    pub fn create(dir: &Path) -> Result<Self, RunError> {
        fs::create_dir_all(dir).map_err(io_error(dir))?;
        Ok(Self { dir: dir.to_path_buf() })
    }

    /// Sandbox directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of `name` inside the sandbox
    #[must_use]
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Whether `name` exists in the sandbox
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.path(name).is_file()
    }

    /// Write `name` atomically
    ///
    /// # Errors
    /// See [`write_atomic`].
    pub fn write(&self, name: &str, contents: &str) -> Result<PathBuf, RunError> {
        let path = self.path(name);
        write_atomic(&path, contents.as_bytes())?;
        debug!("Wrote {}", path.display());
        Ok(path)
    }

    /// Copy an input file into the sandbox under its own name
    ///
    /// # Errors
    /// Returns [`RunError::MissingInput`] when `source` does not exist and
    /// [`RunError::Io`] when the copy fails.
    pub fn stage(&self, source: &Path) -> Result<String, RunError> {
        if !source.is_file() {
            return Err(RunError::MissingInput(source.to_path_buf()));
        }
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| RunError::MissingInput(source.to_path_buf()))?;
        copy_atomic(source, &self.path(&name))?;
        debug!("Staged {} into {}", name, self.dir.display());
        Ok(name)
    }

    /// Remove `name` from the sandbox if present
    ///
    /// # Errors
    /// See [`remove_if_present`].
    pub fn remove(&self, name: &str) -> Result<(), RunError> {
        remove_if_present(&self.path(name))
    }

    /// Move `name` out of the sandbox to `dest`
    ///
    /// # Errors
    /// See [`move_file`].
    pub fn relocate(&self, name: &str, dest: &Path) -> Result<(), RunError> {
        move_file(&self.path(name), dest)?;
        debug!("Moved {name} to {}", dest.display());
        Ok(())
    }
}
