//! Temporary download file management
//!
//! This module provides RAII-based handling of the `.temp` file a transfer
//! writes into. The file is removed automatically unless it is promoted to
//! its final name.

use std::fs::{self, File};
use std::io;
use std::ops::Deref;
use std::path::{Path, PathBuf};

/// Guard for an in-progress download file that removes it on drop
///
/// Removal on drop is best-effort cleanup: errors are ignored because the
/// caller is already on a failure path and has a more relevant error to
/// report.
#[derive(Debug)]
pub(crate) struct TempGuard {
    path: PathBuf,
    persisted: bool,
}

impl TempGuard {
    /// Creates (or truncates) the file at `path` and returns it with its guard
    pub(crate) fn create(path: &Path) -> io::Result<(Self, File)> {
        let file = File::create(path)?;
        let guard = Self {
            path: path.to_path_buf(),
            persisted: false,
        };
        Ok((guard, file))
    }

    /// Get the path to the temporary file
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically renames the temporary file to `final_path`
    ///
    /// A single rename replaces any existing file, so readers never observe
    /// a partially written file under the final name. If the rename fails
    /// the guard is dropped and the temporary file removed.
    pub(crate) fn persist(mut self, final_path: &Path) -> io::Result<()> {
        fs::rename(&self.path, final_path)?;
        self.persisted = true;
        Ok(())
    }
}

impl Drop for TempGuard {
    fn drop(&mut self) {
        if !self.persisted {
            let _ = fs::remove_file(&self.path);
        }
    }
}

impl Deref for TempGuard {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        self.path()
    }
}
