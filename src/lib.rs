//! Plex Downloader - fetch original-quality media from a Plex server
//!
//! This library provides the download-and-relocation pipeline: it turns a
//! selected catalog item (movie, episode, or a run of episodes) into a
//! finished local file, and optionally hands that file off to a secondary
//! storage location.

mod batch;
mod catalog;
mod cleanup;
mod config;
mod fetcher;
mod file_operations;
mod interrupt;
mod relocation;
mod schedule;
mod temp;
mod transfer;

#[cfg(test)]
mod test_support;

// Re-export error types
pub use batch::BatchError;
pub use catalog::CatalogError;
pub use cleanup::CleanupError;
pub use config::ConfigError;
pub use fetcher::FetchError;
pub use interrupt::Interrupted;
pub use relocation::RelocationError;

// Re-export pipeline types
pub use batch::{BatchReport, show_directory, transfer_range, transfer_show};
pub use catalog::{
    Catalog, CatalogItem, Episode, Media, MediaKind, MediaPart, Movie, PlexAccount, PlexServer,
    ServerHandle, ServerResource, Season, Show,
};
pub use cleanup::{CleanupReport, LeftoverFile, find_leftover_temp_files, remove_leftovers};
pub use config::{Config, ConfigStore, ResolvedConfig, expand_home};
pub use fetcher::{CHUNK_SIZE, HttpTransport, Transport, TransportResponse, fetch};
pub use file_operations::{
    ConflictDecision, TEMP_SUFFIX, TransferTarget, episode_filename, episode_token,
    movie_filename, resolve_conflict, sanitize_filename,
};
pub use interrupt::{InterruptFlag, InterruptResponse};
pub use relocation::{
    Destination, LocalMover, Mover, RcloneMover, RelocationOutcome, Relocator,
};
pub use schedule::{next_start, wait_until};
pub use transfer::{Downloader, TransferFailure, TransferOutcome};

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Progress event emitted while transferring media
///
/// These events allow library users to track progress and provide feedback
/// during downloads, relocations and batch runs.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A batch over a show is starting
    ShowStarted {
        show_title: String,
        season_count: usize,
        episode_count: usize,
    },

    /// Processing a specific episode of a batch
    EpisodeStarted {
        index: usize,
        total: usize,
        episode: String,
    },

    /// The response headers arrived and bytes are about to be written
    DownloadStarted {
        filename: String,
        destination: PathBuf,
        total_bytes: Option<u64>,
    },

    /// Cumulative bytes written so far
    DownloadProgress {
        filename: String,
        downloaded: u64,
        total_bytes: Option<u64>,
    },

    /// The file has been written and renamed into place
    DownloadFinished {
        filename: String,
        path: PathBuf,
        bytes: u64,
    },

    /// The download failed; nothing was left behind under the final name
    DownloadFailed { filename: String, error: String },

    /// The download was interrupted by the user
    DownloadInterrupted { filename: String },

    /// The file already exists and was left untouched
    Skipped { filename: String, path: PathBuf },

    /// The catalog item has no downloadable media
    NoMedia { title: String },

    /// Handing a finished file to the secondary storage
    Relocating {
        source: PathBuf,
        destination: String,
    },

    /// The external mover is missing, falling back to a local move
    MoverUnavailable,

    /// The file was moved to the secondary storage
    Relocated {
        source: PathBuf,
        destination: String,
    },

    /// The move failed; the file stays at its local path
    RelocationFailed { source: PathBuf, reason: String },

    /// A batch finished
    BatchComplete { report: BatchReport },
}

/// Capability through which the pipeline talks to its user
///
/// Progress is pushed through [`Reporter::report`]; the only question the
/// pipeline ever asks is whether an existing file may be overwritten.
///
/// Any `FnMut(ProgressEvent)` closure is a reporter that never agrees to
/// overwrite, which is convenient for silent or scripted operation.
pub trait Reporter {
    /// Receives a progress event
    fn report(&mut self, event: ProgressEvent);

    /// Asks whether the existing file at `path` should be overwritten
    fn confirm_overwrite(&mut self, _path: &Path) -> bool {
        false
    }
}

impl<F> Reporter for F
where
    F: FnMut(ProgressEvent),
{
    fn report(&mut self, event: ProgressEvent) {
        self(event)
    }
}

/// Top-level error type for Plex Downloader operations
#[derive(Debug, Error)]
pub enum PlexDownloaderError {
    /// Error talking to the Plex catalog
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Error loading or saving the configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Error during a batch run
    #[error("Batch error: {0}")]
    Batch(#[from] BatchError),

    /// Error while cleaning up leftover files
    #[error("Cleanup error: {0}")]
    Cleanup(#[from] CleanupError),

    /// Error creating the download transport
    #[error("Transport error: {0}")]
    Fetch(#[from] FetchError),

    /// The user interrupted a transfer
    #[error(transparent)]
    Interrupted(#[from] Interrupted),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}
