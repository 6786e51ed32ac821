//! PID File
//!
//! Writes the process id at startup so an external scheduler can stop the
//! process with SIGINT. The file is removed when the guard is dropped.

use std::path::{Path, PathBuf};

/// PID file errors.
#[derive(Debug, thiserror::Error)]
pub enum PidFileError {
    /// The file could not be written.
    #[error("failed to write PID file {path}: {source}")]
    Write {
        /// Target path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Guard that removes the PID file on drop.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Write the current process id to `path`, replacing any stale file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, PidFileError> {
        let path = path.into();
        let pid = std::process::id();
        std::fs::write(&path, format!("{pid}\n")).map_err(|source| PidFileError::Write {
            path: path.clone(),
            source,
        })?;
        tracing::info!(pid, path = %path.display(), "PID file written");
        Ok(Self { path })
    }

    /// Path of the PID file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "PID file removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(error = %e, path = %self.path.display(), "Failed to remove PID file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_pid_and_removes_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quote-snapshotter.pid");

        let guard = PidFile::create(&path).unwrap();
        let contents = std::fs::read_to_string(guard.path()).unwrap();
        assert_eq!(contents.trim(), std::process::id().to_string());

        drop(guard);
        assert!(!path.exists());
    }

    #[test]
    fn replaces_stale_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.pid");
        std::fs::write(&path, "999999\n").unwrap();

        let _guard = PidFile::create(&path).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap().trim(),
            std::process::id().to_string()
        );
    }

    #[test]
    fn unwritable_location_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("x.pid");
        assert!(matches!(
            PidFile::create(path),
            Err(PidFileError::Write { .. })
        ));
    }
}
