//! rclone-based mover
//!
//! This module provides an implementation of the Mover trait that runs
//! `rclone move --progress <source> <destination>`. rclone's own progress
//! output goes straight to the terminal while it runs.

use super::{Destination, Mover, RelocationError};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

/// Mover using the rclone CLI
pub struct RcloneMover {
    binary_path: PathBuf,
}

impl RcloneMover {
    /// Creates a mover with an explicit binary path
    pub fn new(binary_path: PathBuf) -> Self {
        Self { binary_path }
    }

    /// Attempts to find rclone in PATH
    ///
    /// Uses the `which` crate to search for the `rclone` binary.
    pub fn from_path() -> Option<Self> {
        which::which("rclone").ok().map(Self::new)
    }

    fn command(&self, source: &Path, destination: &Destination) -> Command {
        let mut command = Command::new(&self.binary_path);
        command
            .arg("move")
            .arg("--progress")
            .arg(source)
            .arg(destination.to_string());
        command
    }
}

impl Mover for RcloneMover {
    fn move_path(&self, source: &Path, destination: &Destination) -> Result<(), RelocationError> {
        debug!(
            binary = %self.binary_path.display(),
            source = %source.display(),
            destination = %destination,
            "Running rclone move"
        );

        // Inherit stdio so rclone's progress is shown live instead of buffered
        let status = self
            .command(source, destination)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => {
                    RelocationError::MoverNotFound(self.binary_path.display().to_string())
                }
                _ => RelocationError::Io {
                    path: self.binary_path.clone(),
                    source: e,
                },
            })?;

        if !status.success() {
            return Err(RelocationError::MoverFailed {
                code: status.code(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_command_arguments() {
        let mover = RcloneMover::new(PathBuf::from("/usr/bin/rclone"));
        let command = mover.command(
            Path::new("/downloads/Arrival (2016).mkv"),
            &Destination::parse("mynas:media"),
        );

        let args: Vec<_> = command
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(command.get_program(), "/usr/bin/rclone");
        assert_eq!(
            args,
            vec!["move", "--progress", "/downloads/Arrival (2016).mkv", "mynas:media"]
        );
    }

    #[test]
    fn test_missing_binary_is_reported_as_not_found() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("file.mkv");
        fs::write(&source, b"data").unwrap();
        let mover = RcloneMover::new(dir.path().join("nonexistent-rclone-binary"));

        let result = mover.move_path(&source, &Destination::parse("mynas:media"));

        assert!(matches!(result, Err(RelocationError::MoverNotFound(_))));
        assert!(source.exists());
    }

    #[test]
    fn test_from_path_consistent_with_which() {
        let which_result = which::which("rclone");
        assert_eq!(RcloneMover::from_path().is_some(), which_result.is_ok());
    }
}
