//! Fakes and fixtures shared by the unit tests

use crate::catalog::{
    Catalog, CatalogError, CatalogItem, Episode, Media, MediaKind, MediaPart, Movie, Season,
    ServerHandle, Show,
};
use crate::fetcher::{FetchError, Transport, TransportResponse};
use crate::interrupt::InterruptFlag;
use crate::relocation::{Destination, Mover, RelocationError};
use crate::{ProgressEvent, Reporter};
use std::cell::RefCell;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::{Mutex, mpsc};
use std::time::Duration;

pub(crate) fn server() -> ServerHandle {
    ServerHandle {
        name: "Home".into(),
        base_url: "http://10.0.0.2:32400".into(),
        token: "secret".into(),
    }
}

fn media(key: String, container: &str) -> Vec<Media> {
    vec![Media {
        video_resolution: Some("1080".into()),
        parts: vec![MediaPart {
            key,
            container: container.into(),
            size: None,
        }],
    }]
}

pub(crate) fn movie(title: &str, year: Option<u32>, container: &str) -> Movie {
    Movie {
        rating_key: format!("movie-{}", title),
        title: title.into(),
        year,
        media: media(format!("/library/parts/{}/file.{}", title, container), container),
    }
}

pub(crate) fn show(title: &str) -> Show {
    Show {
        rating_key: "show-1".into(),
        title: title.into(),
        year: None,
        season_count: None,
    }
}

pub(crate) fn episode(season_number: u32, index: u32, title: &str) -> Episode {
    Episode {
        rating_key: format!("ep-{}-{}", season_number, index),
        title: title.into(),
        season_number,
        index,
        media: media(
            format!("/library/parts/{}{:02}/file.mkv", season_number, index),
            "mkv",
        ),
    }
}

/// Serves the same in-memory body for every request and records the URLs
pub(crate) struct MemoryTransport {
    body: Vec<u8>,
    declare_length: bool,
    fail_after: Option<usize>,
    requests: Rc<RefCell<Vec<String>>>,
}

impl MemoryTransport {
    pub(crate) fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            declare_length: true,
            fail_after: None,
            requests: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Omits the content length from responses
    pub(crate) fn without_length(mut self) -> Self {
        self.declare_length = false;
        self
    }

    /// Breaks the body stream after `bytes` bytes
    pub(crate) fn failing_after(mut self, bytes: usize) -> Self {
        self.fail_after = Some(bytes);
        self
    }

    pub(crate) fn requests(&self) -> Rc<RefCell<Vec<String>>> {
        Rc::clone(&self.requests)
    }
}

impl Transport for MemoryTransport {
    fn open(&self, url: &str) -> Result<TransportResponse, FetchError> {
        self.requests.borrow_mut().push(url.to_string());

        let content_length = self.declare_length.then_some(self.body.len() as u64);
        let body: Box<dyn Read + Send> = match self.fail_after {
            Some(limit) => Box::new(BrokenReader {
                inner: Cursor::new(self.body[..limit.min(self.body.len())].to_vec()),
            }),
            None => Box::new(Cursor::new(self.body.clone())),
        };

        Ok(TransportResponse {
            content_length,
            body,
        })
    }
}

/// Yields its data and then fails instead of signalling end of stream
struct BrokenReader {
    inner: Cursor<Vec<u8>>,
}

impl Read for BrokenReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.read(buf)? {
            0 => Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            )),
            n => Ok(n),
        }
    }
}

/// Fails every request
pub(crate) struct FailingTransport {
    status: Option<u16>,
    message: String,
}

impl FailingTransport {
    pub(crate) fn status(status: u16) -> Self {
        Self {
            status: Some(status),
            message: String::new(),
        }
    }

    pub(crate) fn network(message: &str) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }
}

impl Transport for FailingTransport {
    fn open(&self, _url: &str) -> Result<TransportResponse, FetchError> {
        match self.status {
            Some(status) => Err(FetchError::Status { status }),
            None => Err(FetchError::Network(self.message.clone())),
        }
    }
}

/// Serves zeroes and requests an interrupt while the body is read
pub(crate) struct InterruptingTransport {
    flag: InterruptFlag,
    length: usize,
    at_end: bool,
}

impl InterruptingTransport {
    /// Requests an interrupt after every read
    pub(crate) fn new(flag: InterruptFlag, length: usize) -> Self {
        Self {
            flag,
            length,
            at_end: false,
        }
    }

    /// Requests an interrupt only during the read that reaches the end
    pub(crate) fn at_end(flag: InterruptFlag, length: usize) -> Self {
        Self {
            flag,
            length,
            at_end: true,
        }
    }
}

impl Transport for InterruptingTransport {
    fn open(&self, _url: &str) -> Result<TransportResponse, FetchError> {
        Ok(TransportResponse {
            content_length: Some(self.length as u64),
            body: Box::new(InterruptingReader {
                flag: self.flag.clone(),
                inner: Cursor::new(vec![0u8; self.length]),
                at_end: self.at_end,
            }),
        })
    }
}

struct InterruptingReader {
    flag: InterruptFlag,
    inner: Cursor<Vec<u8>>,
    at_end: bool,
}

impl Read for InterruptingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0 || !self.at_end {
            self.flag.request();
        }
        Ok(n)
    }
}

/// A server that sends part of the body and then stalls until released
pub(crate) struct StallingTransport {
    body: Mutex<Option<StallingReader>>,
}

/// Controls a [`StallingTransport`] from the test thread
pub(crate) struct Stall {
    reached: mpsc::Receiver<()>,
    release: mpsc::Sender<()>,
}

impl Stall {
    /// Blocks until the body read is stuck
    pub(crate) fn wait_until_stalled(&self) {
        self.reached
            .recv_timeout(Duration::from_secs(5))
            .expect("download never stalled");
    }

    /// Lets the stuck read return end of body
    pub(crate) fn release(&self) {
        let _ = self.release.send(());
    }
}

impl StallingTransport {
    pub(crate) fn new(prefix: &[u8]) -> (Self, Stall) {
        let (release, released) = mpsc::channel();
        let (reached_tx, reached) = mpsc::channel();
        let reader = StallingReader {
            prefix: Cursor::new(prefix.to_vec()),
            reached: reached_tx,
            released,
        };
        (
            Self {
                body: Mutex::new(Some(reader)),
            },
            Stall { reached, release },
        )
    }
}

impl Transport for StallingTransport {
    fn open(&self, _url: &str) -> Result<TransportResponse, FetchError> {
        let reader = self
            .body
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| FetchError::Network("already opened".into()))?;
        Ok(TransportResponse {
            content_length: None,
            body: Box::new(reader),
        })
    }
}

struct StallingReader {
    prefix: Cursor<Vec<u8>>,
    reached: mpsc::Sender<()>,
    released: mpsc::Receiver<()>,
}

impl Read for StallingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.prefix.read(buf)?;
        if n > 0 {
            return Ok(n);
        }
        let _ = self.reached.send(());
        let _ = self.released.recv();
        Ok(0)
    }
}

/// Records every event and answers overwrite questions with a fixed value
#[derive(Default)]
pub(crate) struct RecordingReporter {
    pub(crate) events: Vec<ProgressEvent>,
    pub(crate) overwrite_questions: Vec<PathBuf>,
    overwrite: bool,
}

impl RecordingReporter {
    pub(crate) fn answering(overwrite: bool) -> Self {
        Self {
            overwrite,
            ..Self::default()
        }
    }

    /// Labels of the `EpisodeStarted` events, in order
    pub(crate) fn started_episodes(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::EpisodeStarted { episode, .. } => Some(episode.clone()),
                _ => None,
            })
            .collect()
    }
}

impl Reporter for RecordingReporter {
    fn report(&mut self, event: ProgressEvent) {
        self.events.push(event);
    }

    fn confirm_overwrite(&mut self, path: &Path) -> bool {
        self.overwrite_questions.push(path.to_path_buf());
        self.overwrite
    }
}

#[derive(Clone, Copy)]
enum FakeBehavior {
    Succeed,
    Fail,
    Missing,
}

/// Mover that records its calls without touching the filesystem
pub(crate) struct FakeMover {
    behavior: FakeBehavior,
    calls: Rc<RefCell<Vec<(PathBuf, String)>>>,
}

impl FakeMover {
    fn with(behavior: FakeBehavior) -> Self {
        Self {
            behavior,
            calls: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub(crate) fn succeeding() -> Self {
        Self::with(FakeBehavior::Succeed)
    }

    pub(crate) fn failing() -> Self {
        Self::with(FakeBehavior::Fail)
    }

    /// Behaves like a mover whose binary vanished
    pub(crate) fn missing() -> Self {
        Self::with(FakeBehavior::Missing)
    }

    pub(crate) fn calls(&self) -> Rc<RefCell<Vec<(PathBuf, String)>>> {
        Rc::clone(&self.calls)
    }
}

impl Mover for FakeMover {
    fn move_path(&self, source: &Path, destination: &Destination) -> Result<(), RelocationError> {
        self.calls
            .borrow_mut()
            .push((source.to_path_buf(), destination.to_string()));

        match self.behavior {
            FakeBehavior::Succeed => Ok(()),
            FakeBehavior::Fail => Err(RelocationError::MoverFailed { code: Some(1) }),
            FakeBehavior::Missing => Err(RelocationError::MoverNotFound("rclone".into())),
        }
    }
}

/// Catalog with canned seasons, listed in insertion order
#[derive(Default)]
pub(crate) struct FakeCatalog {
    seasons: Vec<(Season, Vec<Episode>)>,
    unauthorized: bool,
}

impl FakeCatalog {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn unauthorized() -> Self {
        Self {
            unauthorized: true,
            ..Self::default()
        }
    }

    pub(crate) fn with_season(mut self, number: u32, episodes: Vec<Episode>) -> Self {
        let season = Season {
            rating_key: format!("season-{}", number),
            title: format!("Season {}", number),
            index: Some(number),
        };
        self.seasons.push((season, episodes));
        self
    }

    pub(crate) fn season(&self, number: u32) -> Season {
        self.seasons
            .iter()
            .map(|(season, _)| season)
            .find(|season| season.index == Some(number))
            .cloned()
            .unwrap()
    }
}

impl Catalog for FakeCatalog {
    fn search(&self, _query: &str, _kind: MediaKind) -> Result<Vec<CatalogItem>, CatalogError> {
        Ok(Vec::new())
    }

    fn seasons(&self, _show: &Show) -> Result<Vec<Season>, CatalogError> {
        if self.unauthorized {
            return Err(CatalogError::Unauthorized);
        }
        Ok(self.seasons.iter().map(|(season, _)| season.clone()).collect())
    }

    fn episodes(&self, season: &Season) -> Result<Vec<Episode>, CatalogError> {
        if self.unauthorized {
            return Err(CatalogError::Unauthorized);
        }
        Ok(self
            .seasons
            .iter()
            .find(|(s, _)| s.rating_key == season.rating_key)
            .map(|(_, episodes)| episodes.clone())
            .unwrap_or_default())
    }
}
