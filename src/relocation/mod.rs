//! Relocation of finished downloads to secondary storage
//!
//! This module hands a finished file to its long-term home: either a local
//! directory or a remote target addressed as `label:path`. The external
//! sync tool (rclone) is used when installed; without it, local targets are
//! served by an in-process move and remote targets cannot be reached.

mod local;
mod rclone;

pub use local::LocalMover;
pub use rclone::RcloneMover;

use crate::{ProgressEvent, Reporter};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur while relocating a file
#[derive(Debug, Error)]
pub enum RelocationError {
    /// The file to relocate does not exist
    #[error("Source not found: {0}")]
    SourceMissing(PathBuf),

    /// The external mover binary could not be started because it is missing
    #[error("Mover binary not found: {0}")]
    MoverNotFound(String),

    /// The external mover ran and reported failure
    #[error("Mover failed with exit code {code:?}")]
    MoverFailed { code: Option<i32> },

    /// A remote target was requested but no external mover is available
    #[error("Cannot move to remote destination '{0}' without rclone")]
    RemoteUnsupported(String),

    /// A local filesystem operation failed
    #[error("Filesystem error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

/// Where finished files are moved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// A local directory
    Local(PathBuf),
    /// A remote target in `label:path` form
    Remote(String),
}

impl Destination {
    /// Classifies a configured destination string
    ///
    /// A string is remote when it contains a `:` that is neither a drive
    /// letter separator (`C:\media`) nor part of a path starting with a
    /// separator (`/mnt/a:b`).
    ///
    /// # Examples
    ///
    /// ```
    /// use plex_downloader::Destination;
    ///
    /// assert!(Destination::parse("mynas:media").is_remote());
    /// assert!(!Destination::parse("/mnt/media").is_remote());
    /// assert!(!Destination::parse("C:\\media").is_remote());
    /// ```
    pub fn parse(value: &str) -> Self {
        let starts_with_separator = value.starts_with('/') || value.starts_with('\\');
        let drive_letter = value.chars().nth(1) == Some(':');

        if value.contains(':') && !starts_with_separator && !drive_letter {
            Destination::Remote(value.to_string())
        } else {
            Destination::Local(PathBuf::from(value))
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Destination::Remote(_))
    }

    /// Returns the destination for a subdirectory named `name`
    pub fn join(&self, name: &str) -> Self {
        match self {
            Destination::Local(path) => Destination::Local(path.join(name)),
            Destination::Remote(remote) => {
                let base = remote.trim_end_matches('/');
                if base.ends_with(':') {
                    Destination::Remote(format!("{}{}", base, name))
                } else {
                    Destination::Remote(format!("{}/{}", base, name))
                }
            }
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Local(path) => write!(f, "{}", path.display()),
            Destination::Remote(remote) => f.write_str(remote),
        }
    }
}

/// Trait for tools that move a file into a destination directory
pub trait Mover {
    /// Moves `source` into `destination`, keeping its file name
    ///
    /// Implementors must leave `source` in place when they fail.
    fn move_path(&self, source: &Path, destination: &Destination) -> Result<(), RelocationError>;
}

/// Result of a relocation attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelocationOutcome {
    /// The file now lives at the destination
    Moved { destination: String },
    /// The file is still at its local path
    Failed { reason: String },
}

/// Moves finished downloads to their destination
///
/// Prefers the external mover and falls back to an in-process move for
/// local destinations when the external mover is missing.
pub struct Relocator {
    external: Option<Box<dyn Mover>>,
    local: LocalMover,
}

impl Relocator {
    /// Creates a relocator using `rclone` from `PATH`, if installed
    pub fn from_path() -> Self {
        let external = RcloneMover::from_path().map(|m| Box::new(m) as Box<dyn Mover>);
        if external.is_none() {
            debug!("rclone not found in PATH, relocation falls back to local moves");
        }
        Self::new(external)
    }

    /// Creates a relocator with an explicit external mover
    pub fn new(external: Option<Box<dyn Mover>>) -> Self {
        Self {
            external,
            local: LocalMover,
        }
    }

    /// Moves `source` into `destination`
    ///
    /// Never deletes or alters `source` on failure.
    pub fn relocate(
        &self,
        source: &Path,
        destination: &Destination,
        reporter: &mut dyn Reporter,
    ) -> RelocationOutcome {
        reporter.report(ProgressEvent::Relocating {
            source: source.to_path_buf(),
            destination: destination.to_string(),
        });

        match self.try_relocate(source, destination, reporter) {
            Ok(()) => {
                reporter.report(ProgressEvent::Relocated {
                    source: source.to_path_buf(),
                    destination: destination.to_string(),
                });
                RelocationOutcome::Moved {
                    destination: destination.to_string(),
                }
            }
            Err(e) => {
                warn!(source = %source.display(), error = %e, "Relocation failed");
                reporter.report(ProgressEvent::RelocationFailed {
                    source: source.to_path_buf(),
                    reason: e.to_string(),
                });
                RelocationOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    fn try_relocate(
        &self,
        source: &Path,
        destination: &Destination,
        reporter: &mut dyn Reporter,
    ) -> Result<(), RelocationError> {
        if !source.exists() {
            return Err(RelocationError::SourceMissing(source.to_path_buf()));
        }

        if let Destination::Local(dir) = destination {
            std::fs::create_dir_all(dir).map_err(|e| RelocationError::Io {
                path: dir.clone(),
                source: e,
            })?;
        }

        if let Some(external) = &self.external {
            match external.move_path(source, destination) {
                Err(RelocationError::MoverNotFound(binary)) => {
                    debug!(binary = %binary, "External mover disappeared, using fallback");
                }
                result => return result,
            }
        }

        reporter.report(ProgressEvent::MoverUnavailable);
        match destination {
            Destination::Local(_) => self.local.move_path(source, destination),
            Destination::Remote(remote) => Err(RelocationError::RemoteUnsupported(remote.clone())),
        }
    }
}
