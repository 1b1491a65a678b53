//! Batch transfers over the episodes of a show
//!
//! Episodes are transferred one at a time in catalog order. Every episode
//! runs in batch mode, so existing files are skipped without prompting and
//! an unattended run never stalls. Single failures are counted and the batch
//! moves on; a user interrupt ends the batch immediately.

use crate::catalog::{Catalog, CatalogError, Episode, Season, Show};
use crate::fetcher::Transport;
use crate::file_operations::sanitize_filename;
use crate::interrupt::Interrupted;
use crate::relocation::Destination;
use crate::transfer::{Downloader, TransferOutcome};
use crate::{ProgressEvent, Reporter};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Errors that end a batch early
#[derive(Debug, Error)]
pub enum BatchError {
    /// The user interrupted a transfer; no further episodes were attempted
    #[error(transparent)]
    Interrupted(#[from] Interrupted),

    /// The episode list could not be retrieved
    #[error("Failed to list episodes: {0}")]
    Catalog(#[from] CatalogError),

    /// The show directory could not be created
    #[error("Failed to create directory {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

/// Per-batch counters
///
/// Every attempted episode ends up in exactly one of `succeeded`, `skipped`
/// or `failed`. A download that succeeded but could not be relocated still
/// counts as succeeded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BatchReport {
    fn record(&mut self, outcome: &TransferOutcome) {
        self.attempted += 1;
        match outcome {
            TransferOutcome::Succeeded { .. } => self.succeeded += 1,
            TransferOutcome::Skipped { .. } => self.skipped += 1,
            TransferOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

/// Returns the per-show download directory, creating it if needed
///
/// All episodes of a show land in `output_dir/{sanitized show title}`,
/// regardless of season.
pub fn show_directory(output_dir: &Path, show: &Show) -> Result<PathBuf, BatchError> {
    let dir = output_dir.join(sanitize_filename(&show.title));
    fs::create_dir_all(&dir).map_err(|e| BatchError::Io {
        path: dir.clone(),
        source: e,
    })?;
    Ok(dir)
}

/// Transfers every episode of `show`, season by season
///
/// The full episode list is retrieved before the first download starts, so
/// a catalog failure never leaves a half-finished batch behind.
pub fn transfer_show<C, T>(
    downloader: &Downloader<T>,
    catalog: &C,
    show: &Show,
    output_dir: &Path,
    destination: Option<&Destination>,
    reporter: &mut dyn Reporter,
) -> Result<BatchReport, BatchError>
where
    C: Catalog + ?Sized,
    T: Transport,
{
    let seasons = catalog.seasons(show)?;

    let mut episodes = Vec::new();
    for season in &seasons {
        episodes.extend(catalog.episodes(season)?);
    }

    debug!(
        show = %show.title,
        seasons = seasons.len(),
        episodes = episodes.len(),
        "Episode list complete"
    );
    reporter.report(ProgressEvent::ShowStarted {
        show_title: show.title.clone(),
        season_count: seasons.len(),
        episode_count: episodes.len(),
    });

    let show_dir = show_directory(output_dir, show)?;
    run(downloader, show, &episodes, &show_dir, destination, reporter)
}

/// Transfers the episodes of `season` from position `start_index` (0-based)
/// to the end of the season
///
/// A `start_index` past the end of the season results in an empty batch.
#[allow(clippy::too_many_arguments)]
pub fn transfer_range<C, T>(
    downloader: &Downloader<T>,
    catalog: &C,
    show: &Show,
    season: &Season,
    start_index: usize,
    output_dir: &Path,
    destination: Option<&Destination>,
    reporter: &mut dyn Reporter,
) -> Result<BatchReport, BatchError>
where
    C: Catalog + ?Sized,
    T: Transport,
{
    let episodes: Vec<Episode> = catalog
        .episodes(season)?
        .into_iter()
        .skip(start_index)
        .collect();

    let show_dir = show_directory(output_dir, show)?;
    run(downloader, show, &episodes, &show_dir, destination, reporter)
}

fn run<T: Transport>(
    downloader: &Downloader<T>,
    show: &Show,
    episodes: &[Episode],
    show_dir: &Path,
    destination: Option<&Destination>,
    reporter: &mut dyn Reporter,
) -> Result<BatchReport, BatchError> {
    let mut report = BatchReport::default();

    for (index, episode) in episodes.iter().enumerate() {
        reporter.report(ProgressEvent::EpisodeStarted {
            index,
            total: episodes.len(),
            episode: format!("{} - {}", episode.token(), episode.title),
        });

        let outcome =
            downloader.transfer_episode(episode, show, show_dir, true, destination, reporter)?;
        report.record(&outcome);
    }

    info!(
        show = %show.title,
        attempted = report.attempted,
        succeeded = report.succeeded,
        skipped = report.skipped,
        failed = report.failed,
        "Batch complete"
    );
    reporter.report(ProgressEvent::BatchComplete { report });

    Ok(report)
}
