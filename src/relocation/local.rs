//! In-process mover for local destinations

use super::{Destination, Mover, RelocationError};
use crate::file_operations::TEMP_SUFFIX;
use crate::temp::TempGuard;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Moves files between local directories
///
/// Tries a rename first and falls back to copy-then-delete when the rename
/// fails (for example across filesystems). The copy is written to a `.temp`
/// sibling and renamed over the target, so a failed copy leaves both the
/// source and any file already at the target untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalMover;

impl Mover for LocalMover {
    fn move_path(&self, source: &Path, destination: &Destination) -> Result<(), RelocationError> {
        let dir = match destination {
            Destination::Local(dir) => dir,
            Destination::Remote(remote) => {
                return Err(RelocationError::RemoteUnsupported(remote.clone()));
            }
        };

        let file_name = source
            .file_name()
            .ok_or_else(|| RelocationError::SourceMissing(source.to_path_buf()))?;
        let target = dir.join(file_name);

        match fs::rename(source, &target) {
            Ok(()) => return Ok(()),
            Err(e) => {
                debug!(error = %e, "Rename failed, copying instead");
            }
        }

        copy_into_place(source, &target)?;

        fs::remove_file(source).map_err(|e| RelocationError::Io {
            path: source.to_path_buf(),
            source: e,
        })
    }
}

fn copy_into_place(source: &Path, target: &Path) -> Result<(), RelocationError> {
    let io_error = |path: &Path, source: io::Error| RelocationError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut temp_name = target.as_os_str().to_owned();
    temp_name.push(TEMP_SUFFIX);
    let temp_path = PathBuf::from(temp_name);

    let mut input = File::open(source).map_err(|e| io_error(source, e))?;
    let (guard, mut output) =
        TempGuard::create(&temp_path).map_err(|e| io_error(&temp_path, e))?;
    io::copy(&mut input, &mut output).map_err(|e| io_error(&temp_path, e))?;
    output.sync_all().map_err(|e| io_error(&temp_path, e))?;
    drop(output);

    guard.persist(target).map_err(|e| io_error(target, e))
}
