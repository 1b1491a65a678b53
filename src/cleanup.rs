//! Removal of leftover temporary files
//!
//! A crashed or killed run can leave `.temp` files behind in the download
//! directory. This module finds them (recursively) and deletes them.

use crate::file_operations::TEMP_SUFFIX;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur while scanning for leftover files
#[derive(Debug, Error)]
pub enum CleanupError {
    /// Failed to read directory
    #[error("Failed to read directory {path}: {source}")]
    ReadDirectoryFailed { path: PathBuf, source: io::Error },

    /// Failed to read directory entry
    #[error("Failed to read directory entry: {0}")]
    ReadEntryFailed(#[from] io::Error),
}

/// A leftover temporary file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeftoverFile {
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
}

/// What a cleanup run removed
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub deleted: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

/// Finds all `.temp` files below `download_dir`
///
/// A directory that does not exist yields an empty list. Results are sorted
/// by path.
pub fn find_leftover_temp_files(download_dir: &Path) -> Result<Vec<LeftoverFile>, CleanupError> {
    let mut leftovers = Vec::new();
    if download_dir.is_dir() {
        scan_directory_recursive(download_dir, &mut leftovers)?;
    }
    leftovers.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(leftovers)
}

fn scan_directory_recursive(
    dir_path: &Path,
    leftovers: &mut Vec<LeftoverFile>,
) -> Result<(), CleanupError> {
    for entry in fs::read_dir(dir_path).map_err(|e| CleanupError::ReadDirectoryFailed {
        path: dir_path.to_path_buf(),
        source: e,
    })? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            scan_directory_recursive(&path, leftovers)?;
        } else if file_type.is_file() && is_temp_file(&path) {
            let size = entry.metadata()?.len();
            leftovers.push(LeftoverFile { path, size });
        }
    }

    Ok(())
}

fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.ends_with(TEMP_SUFFIX) && name.len() > TEMP_SUFFIX.len())
}

/// Deletes `files`, continuing past individual failures
pub fn remove_leftovers(files: &[LeftoverFile]) -> CleanupReport {
    let mut report = CleanupReport::default();

    for file in files {
        match fs::remove_file(&file.path) {
            Ok(()) => {
                debug!(path = %file.path.display(), "Removed leftover file");
                report.deleted.push(file.path.clone());
            }
            Err(e) => {
                warn!(path = %file.path.display(), error = %e, "Failed to remove leftover file");
                report.failed.push((file.path.clone(), e.to_string()));
            }
        }
    }

    report
}
