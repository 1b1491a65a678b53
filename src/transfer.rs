//! Transfer of single catalog items
//!
//! This module composes the pipeline for one movie or one episode: check the
//! item is downloadable, derive its file name and paths, resolve an existing
//! file, stream the download, and optionally relocate the result.

use crate::catalog::{Episode, MediaPart, Movie, ServerHandle, Show};
use crate::fetcher::{FetchError, HttpTransport, Transport, fetch};
use crate::file_operations::{
    ConflictDecision, TransferTarget, episode_filename, movie_filename, resolve_conflict,
    sanitize_filename,
};
use crate::interrupt::{InterruptFlag, Interrupted};
use crate::relocation::{Destination, RelocationOutcome, Relocator};
use crate::{ProgressEvent, Reporter};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Why a single transfer did not produce a file
#[derive(Debug)]
pub enum TransferFailure {
    /// The item has no media or no parts; it can never be downloaded
    NoMedia,
    /// The download URL could not be built
    InvalidUrl(String),
    /// Streaming the file failed
    Fetch(FetchError),
}

impl fmt::Display for TransferFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferFailure::NoMedia => f.write_str("no media file available"),
            TransferFailure::InvalidUrl(reason) => write!(f, "invalid download URL: {}", reason),
            TransferFailure::Fetch(e) => write!(f, "{}", e),
        }
    }
}

/// Result of transferring one item
#[derive(Debug)]
pub enum TransferOutcome {
    /// The file was downloaded
    ///
    /// `relocation` is `None` when no destination was configured. A failed
    /// relocation leaves the file at `path`.
    Succeeded {
        path: PathBuf,
        relocation: Option<RelocationOutcome>,
    },
    /// An existing file was kept
    Skipped { path: PathBuf },
    /// Nothing was downloaded
    Failed { reason: TransferFailure },
}

/// What is being downloaded, reduced to what the pipeline needs
struct TransferItem<'a> {
    title: &'a str,
    part: Option<&'a MediaPart>,
    filename: Option<String>,
}

/// Downloads catalog items from one server
pub struct Downloader<T: Transport = HttpTransport> {
    server: ServerHandle,
    transport: T,
    relocator: Relocator,
    interrupt: InterruptFlag,
}

impl Downloader<HttpTransport> {
    /// Creates a downloader using HTTP and rclone from `PATH`
    pub fn connect(server: ServerHandle, interrupt: InterruptFlag) -> Result<Self, FetchError> {
        Ok(Self::new(
            server,
            HttpTransport::new()?,
            Relocator::from_path(),
            interrupt,
        ))
    }
}

impl<T: Transport> Downloader<T> {
    pub fn new(
        server: ServerHandle,
        transport: T,
        relocator: Relocator,
        interrupt: InterruptFlag,
    ) -> Self {
        Self {
            server,
            transport,
            relocator,
            interrupt,
        }
    }

    /// Downloads a movie to `output_dir/{title} ({year}).{container}`
    ///
    /// An existing file is only overwritten if the reporter confirms it.
    /// With a destination, the finished file is moved to the destination
    /// root.
    pub fn transfer_movie(
        &self,
        movie: &Movie,
        output_dir: &Path,
        destination: Option<&Destination>,
        reporter: &mut dyn Reporter,
    ) -> Result<TransferOutcome, Interrupted> {
        let part = movie.primary_part();
        let item = TransferItem {
            title: &movie.title,
            part,
            filename: part.map(|p| movie_filename(&movie.title, movie.year, &p.container)),
        };

        self.transfer(item, output_dir, false, destination.cloned(), reporter)
    }

    /// Downloads an episode to
    /// `output_dir/{show} - SxxEyy - {title}.{container}`
    ///
    /// In batch mode an existing file is skipped without asking. With a
    /// destination, the finished file is moved to a subdirectory named
    /// after the show.
    pub fn transfer_episode(
        &self,
        episode: &Episode,
        show: &Show,
        output_dir: &Path,
        batch_mode: bool,
        destination: Option<&Destination>,
        reporter: &mut dyn Reporter,
    ) -> Result<TransferOutcome, Interrupted> {
        let part = episode.primary_part();
        let item = TransferItem {
            title: &episode.title,
            part,
            filename: part.map(|p| {
                episode_filename(
                    &show.title,
                    episode.season_number,
                    episode.index,
                    &episode.title,
                    &p.container,
                )
            }),
        };
        let destination = destination.map(|d| d.join(&sanitize_filename(&show.title)));

        self.transfer(item, output_dir, batch_mode, destination, reporter)
    }

    fn transfer(
        &self,
        item: TransferItem<'_>,
        output_dir: &Path,
        batch_mode: bool,
        destination: Option<Destination>,
        reporter: &mut dyn Reporter,
    ) -> Result<TransferOutcome, Interrupted> {
        let (part, filename) = match (item.part, item.filename) {
            (Some(part), Some(filename)) => (part, filename),
            _ => {
                warn!(title = %item.title, "No media file found");
                reporter.report(ProgressEvent::NoMedia {
                    title: item.title.to_string(),
                });
                return Ok(TransferOutcome::Failed {
                    reason: TransferFailure::NoMedia,
                });
            }
        };

        let target = TransferTarget::new(output_dir, filename);

        let decision = resolve_conflict(&target.final_path, batch_mode, |path| {
            reporter.confirm_overwrite(path)
        });
        if decision == ConflictDecision::Skip {
            debug!(path = %target.final_path.display(), "Keeping existing file");
            reporter.report(ProgressEvent::Skipped {
                filename: target.filename.clone(),
                path: target.final_path.clone(),
            });
            return Ok(TransferOutcome::Skipped {
                path: target.final_path,
            });
        }

        let url = match self.server.download_url(&part.key) {
            Ok(url) => url,
            Err(e) => {
                reporter.report(ProgressEvent::DownloadFailed {
                    filename: target.filename.clone(),
                    error: e.to_string(),
                });
                return Ok(TransferOutcome::Failed {
                    reason: TransferFailure::InvalidUrl(e.to_string()),
                });
            }
        };

        let fetched = fetch(
            &self.transport,
            &url,
            &target.temp_path,
            &target.final_path,
            &target.filename,
            &self.interrupt,
            reporter,
        );

        match fetched {
            Ok(_) => {}
            Err(FetchError::Interrupted) => {
                reporter.report(ProgressEvent::DownloadInterrupted {
                    filename: target.filename.clone(),
                });
                return Err(Interrupted);
            }
            Err(e) => {
                warn!(file = %target.filename, error = %e, "Download failed");
                reporter.report(ProgressEvent::DownloadFailed {
                    filename: target.filename.clone(),
                    error: e.to_string(),
                });
                return Ok(TransferOutcome::Failed {
                    reason: TransferFailure::Fetch(e),
                });
            }
        }

        let relocation = destination
            .map(|destination| self.relocator.relocate(&target.final_path, &destination, reporter));

        Ok(TransferOutcome::Succeeded {
            path: target.final_path,
            relocation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        FailingTransport, FakeMover, InterruptingTransport, MemoryTransport, RecordingReporter,
        episode, movie, server, show,
    };
    use std::fs;
    use tempfile::TempDir;

    fn downloader<T: Transport>(transport: T) -> Downloader<T> {
        Downloader::new(server(), transport, Relocator::new(None), InterruptFlag::new())
    }

    #[test]
    fn test_movie_download() {
        let dir = TempDir::new().unwrap();
        let transport = MemoryTransport::new(b"movie bytes".to_vec());
        let requests = transport.requests();
        let downloader = downloader(transport);

        let outcome = downloader
            .transfer_movie(
                &movie("Arrival", Some(2016), "mkv"),
                dir.path(),
                None,
                &mut RecordingReporter::default(),
            )
            .unwrap();

        let expected = dir.path().join("Arrival (2016).mkv");
        match outcome {
            TransferOutcome::Succeeded { path, relocation } => {
                assert_eq!(path, expected);
                assert!(relocation.is_none());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(fs::read(&expected).unwrap(), b"movie bytes");
        assert!(!dir.path().join("Arrival (2016).mkv.temp").exists());
        assert_eq!(
            requests.borrow().as_slice(),
            &["http://10.0.0.2:32400/library/parts/Arrival/file.mkv?download=1&X-Plex-Token=secret"
                .to_string()]
        );
    }

    #[test]
    fn test_movie_without_media_fails_without_side_effects() {
        let dir = TempDir::new().unwrap();
        let transport = MemoryTransport::new(b"unused".to_vec());
        let requests = transport.requests();
        let mut no_media = movie("Arrival", Some(2016), "mkv");
        no_media.media.clear();

        let outcome = downloader(transport)
            .transfer_movie(&no_media, dir.path(), None, &mut RecordingReporter::default())
            .unwrap();

        assert!(matches!(
            outcome,
            TransferOutcome::Failed {
                reason: TransferFailure::NoMedia
            }
        ));
        assert!(requests.borrow().is_empty());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_existing_movie_declined_is_skipped() {
        let dir = TempDir::new().unwrap();
        let existing = dir.path().join("Arrival (2016).mkv");
        fs::write(&existing, b"old").unwrap();
        let mut reporter = RecordingReporter::answering(false);

        let outcome = downloader(MemoryTransport::new(b"new".to_vec()))
            .transfer_movie(&movie("Arrival", Some(2016), "mkv"), dir.path(), None, &mut reporter)
            .unwrap();

        assert!(matches!(outcome, TransferOutcome::Skipped { .. }));
        assert_eq!(reporter.overwrite_questions, vec![existing.clone()]);
        assert_eq!(fs::read(&existing).unwrap(), b"old");
    }

    #[test]
    fn test_existing_movie_confirmed_is_overwritten() {
        let dir = TempDir::new().unwrap();
        let existing = dir.path().join("Arrival (2016).mkv");
        fs::write(&existing, b"old").unwrap();

        let outcome = downloader(MemoryTransport::new(b"new".to_vec()))
            .transfer_movie(
                &movie("Arrival", Some(2016), "mkv"),
                dir.path(),
                None,
                &mut RecordingReporter::answering(true),
            )
            .unwrap();

        assert!(matches!(outcome, TransferOutcome::Succeeded { .. }));
        assert_eq!(fs::read(&existing).unwrap(), b"new");
    }

    #[test]
    fn test_episode_batch_mode_skips_existing_without_asking() {
        let dir = TempDir::new().unwrap();
        let existing = dir.path().join("The Wire - S01E03 - The Buys.mkv");
        fs::write(&existing, b"old").unwrap();
        let mut reporter = RecordingReporter::answering(true);

        let outcome = downloader(MemoryTransport::new(b"new".to_vec()))
            .transfer_episode(
                &episode(1, 3, "The Buys"),
                &show("The Wire"),
                dir.path(),
                true,
                None,
                &mut reporter,
            )
            .unwrap();

        assert!(matches!(outcome, TransferOutcome::Skipped { .. }));
        assert!(reporter.overwrite_questions.is_empty());
        assert_eq!(fs::read(&existing).unwrap(), b"old");
    }

    #[test]
    fn test_network_failure_is_reported_not_propagated() {
        let dir = TempDir::new().unwrap();
        let mut reporter = RecordingReporter::default();

        let outcome = downloader(FailingTransport::status(500))
            .transfer_episode(
                &episode(1, 1, "The Target"),
                &show("The Wire"),
                dir.path(),
                true,
                None,
                &mut reporter,
            )
            .unwrap();

        assert!(matches!(
            outcome,
            TransferOutcome::Failed {
                reason: TransferFailure::Fetch(FetchError::Status { status: 500 })
            }
        ));
        assert!(
            reporter
                .events
                .iter()
                .any(|e| matches!(e, ProgressEvent::DownloadFailed { .. }))
        );
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_interrupt_propagates() {
        let dir = TempDir::new().unwrap();
        let interrupt = InterruptFlag::new();
        let downloader = Downloader::new(
            server(),
            InterruptingTransport::new(interrupt.clone(), 4 * crate::CHUNK_SIZE),
            Relocator::new(None),
            interrupt,
        );

        let result = downloader.transfer_movie(
            &movie("Arrival", Some(2016), "mkv"),
            dir.path(),
            None,
            &mut RecordingReporter::default(),
        );

        assert_eq!(result.unwrap_err(), Interrupted);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_episode_relocates_into_show_directory() {
        let dir = TempDir::new().unwrap();
        let downloads = dir.path().join("downloads");
        let media = dir.path().join("media");
        fs::create_dir(&downloads).unwrap();

        let outcome = downloader(MemoryTransport::new(b"episode".to_vec()))
            .transfer_episode(
                &episode(1, 3, "The Buys"),
                &show("The Wire: Baltimore"),
                &downloads,
                false,
                Some(&Destination::Local(media.clone())),
                &mut RecordingReporter::default(),
            )
            .unwrap();

        let moved = media
            .join("The Wire- Baltimore")
            .join("The Wire- Baltimore - S01E03 - The Buys.mkv");
        match outcome {
            TransferOutcome::Succeeded {
                relocation: Some(RelocationOutcome::Moved { .. }),
                ..
            } => {}
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(fs::read(moved).unwrap(), b"episode");
    }

    #[test]
    fn test_movie_relocates_to_destination_root() {
        let dir = TempDir::new().unwrap();
        let mover = FakeMover::succeeding();
        let calls = mover.calls();
        let downloader = Downloader::new(
            server(),
            MemoryTransport::new(b"movie".to_vec()),
            Relocator::new(Some(Box::new(mover))),
            InterruptFlag::new(),
        );

        downloader
            .transfer_movie(
                &movie("Arrival", Some(2016), "mkv"),
                dir.path(),
                Some(&Destination::parse("mynas:movies")),
                &mut RecordingReporter::default(),
            )
            .unwrap();

        assert_eq!(
            calls.borrow().as_slice(),
            &[(
                dir.path().join("Arrival (2016).mkv"),
                "mynas:movies".to_string()
            )]
        );
    }

    #[test]
    fn test_failed_relocation_keeps_success_and_file() {
        let dir = TempDir::new().unwrap();
        let downloader = Downloader::new(
            server(),
            MemoryTransport::new(b"movie".to_vec()),
            Relocator::new(Some(Box::new(FakeMover::failing()))),
            InterruptFlag::new(),
        );

        let outcome = downloader
            .transfer_movie(
                &movie("Arrival", Some(2016), "mkv"),
                dir.path(),
                Some(&Destination::parse("mynas:movies")),
                &mut RecordingReporter::default(),
            )
            .unwrap();

        let local = dir.path().join("Arrival (2016).mkv");
        match outcome {
            TransferOutcome::Succeeded {
                path,
                relocation: Some(RelocationOutcome::Failed { .. }),
            } => assert_eq!(path, local),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(fs::read(&local).unwrap(), b"movie");
    }
}
