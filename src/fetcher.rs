//! Streaming download of a single file
//!
//! Bytes are streamed into a `.temp` sibling of the final path and the file
//! is renamed into place only once the whole body has been written. Every
//! failure path, including a user interrupt, removes the temporary file.

use crate::interrupt::InterruptFlag;
use crate::temp::TempGuard;
use crate::{ProgressEvent, Reporter};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Size of the buffer each read from the response body fills (1 MiB)
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Errors that can occur while fetching a file
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request could not be sent or the body could not be read
    #[error("Network error: {0}")]
    Network(String),

    /// The server answered with a non-success status
    #[error("Server responded with HTTP {status}")]
    Status { status: u16 },

    /// Writing or renaming the local file failed
    #[error("Filesystem error at {path}: {source}")]
    Filesystem { path: PathBuf, source: io::Error },

    /// The user interrupted the transfer
    #[error("Download interrupted by user")]
    Interrupted,
}

/// An opened download: the declared size and a readable body
pub struct TransportResponse {
    /// Declared body length, if the server sent one
    pub content_length: Option<u64>,
    /// The response body
    pub body: Box<dyn Read + Send>,
}

/// Trait for transports that can open a streaming GET request
///
/// Implementors must fail with [`FetchError::Status`] for non-success
/// responses before any body is handed out.
pub trait Transport {
    /// Opens `url` for streaming
    fn open(&self, url: &str) -> Result<TransportResponse, FetchError>;
}

/// HTTP transport backed by a blocking reqwest client
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    /// Creates a transport without an overall request timeout
    ///
    /// Media files can take hours to download, so only establishing the
    /// connection is bounded.
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(None::<Duration>)
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;

        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn open(&self, url: &str) -> Result<TransportResponse, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| FetchError::Network(e.without_url().to_string()))?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                status: response.status().as_u16(),
            });
        }

        Ok(TransportResponse {
            content_length: response.content_length(),
            body: Box::new(response),
        })
    }
}

/// Removes the `X-Plex-Token` value from a URL before it is logged
pub(crate) fn redact_token(url: &str) -> String {
    match url.find("X-Plex-Token=") {
        Some(start) => {
            let value_start = start + "X-Plex-Token=".len();
            let value_end = url[value_start..]
                .find('&')
                .map(|offset| value_start + offset)
                .unwrap_or(url.len());
            format!("{}REDACTED{}", &url[..value_start], &url[value_end..])
        }
        None => url.to_string(),
    }
}

/// Streams `url` into `temp_path` and promotes it to `final_path`
///
/// Progress is reported against the declared content length (if any). On
/// success the temporary file is renamed to the final path in a single
/// rename and the number of bytes written is returned. On any error, or
/// when `interrupt` is requested before the rename, the temporary file is
/// removed and the final path is left untouched.
pub fn fetch(
    transport: &dyn Transport,
    url: &str,
    temp_path: &Path,
    final_path: &Path,
    display_name: &str,
    interrupt: &InterruptFlag,
    reporter: &mut dyn Reporter,
) -> Result<u64, FetchError> {
    let _active = interrupt.begin_transfer(temp_path);
    if interrupt.is_requested() {
        return Err(FetchError::Interrupted);
    }

    debug!(url = %redact_token(url), temp = %temp_path.display(), "Opening download");
    let mut response = transport.open(url)?;
    let total_bytes = response.content_length;

    reporter.report(ProgressEvent::DownloadStarted {
        filename: display_name.to_string(),
        destination: final_path.to_path_buf(),
        total_bytes,
    });

    let filesystem_error = |path: &Path, source: io::Error| FetchError::Filesystem {
        path: path.to_path_buf(),
        source,
    };

    let (guard, mut file) =
        TempGuard::create(temp_path).map_err(|e| filesystem_error(temp_path, e))?;

    let mut downloaded: u64 = 0;
    let mut buffer = vec![0u8; CHUNK_SIZE];

    loop {
        if interrupt.is_requested() {
            debug!(path = %guard.display(), "Interrupt requested, discarding partial download");
            return Err(FetchError::Interrupted);
        }

        let bytes_read = match response.body.read(&mut buffer) {
            Ok(0) => break, // EOF
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(FetchError::Network(e.to_string())),
        };

        file.write_all(&buffer[..bytes_read])
            .map_err(|e| filesystem_error(temp_path, e))?;

        downloaded += bytes_read as u64;
        reporter.report(ProgressEvent::DownloadProgress {
            filename: display_name.to_string(),
            downloaded,
            total_bytes,
        });
    }

    file.flush().map_err(|e| filesystem_error(temp_path, e))?;
    drop(file);

    // The request may have arrived during the final read
    if interrupt.is_requested() {
        debug!(path = %guard.display(), "Interrupt requested, discarding finished download");
        return Err(FetchError::Interrupted);
    }

    guard
        .persist(final_path)
        .map_err(|e| filesystem_error(final_path, e))?;

    info!(path = %final_path.display(), bytes = downloaded, "Download complete");
    reporter.report(ProgressEvent::DownloadFinished {
        filename: display_name.to_string(),
        path: final_path.to_path_buf(),
        bytes: downloaded,
    });

    Ok(downloaded)
}
