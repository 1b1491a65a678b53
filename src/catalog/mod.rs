/// Data structures and traits for browsing a media server catalog.
///
/// This module provides structures to represent movies, shows, seasons, and
/// episodes together with the downloadable parts behind them, as well as the
/// trait the download pipeline uses to walk a show.
mod plex;
mod plex_types;

pub use plex::{PlexAccount, PlexServer, ServerResource};

use thiserror::Error;

/// Errors that can occur while talking to the catalog provider.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The token or credentials were rejected
    #[error("Unauthorized: the Plex token or credentials were rejected")]
    Unauthorized,

    /// Request to the provider failed
    #[error("Request failed: {0}")]
    RequestError(String),

    /// Failed to parse the provider's JSON response
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// No server with the configured name is available to the account
    #[error("Server not found: {0}")]
    ServerNotFound(String),

    /// None of the server's advertised addresses answered
    #[error("Could not reach server '{0}' on any of its addresses")]
    NoReachableConnection(String),

    /// A download URL could not be built
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// The kind of catalog item to search for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Movie,
    Show,
}

/// The smallest downloadable file backing a movie or episode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPart {
    /// Server path the file is fetched from
    pub key: String,
    /// Container format, used as the file extension
    pub container: String,
    /// Size in bytes, if the server reports it
    pub size: Option<u64>,
}

/// One rendition of a movie or episode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Media {
    /// Resolution label such as `1080` or `4k`
    pub video_resolution: Option<String>,
    /// Files making up this rendition
    pub parts: Vec<MediaPart>,
}

/// Returns the part that gets downloaded: the first part of the first media.
///
/// `None` means the item is not downloadable.
pub(crate) fn primary_part(media: &[Media]) -> Option<&MediaPart> {
    media.first()?.parts.first()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Movie {
    pub rating_key: String,
    pub title: String,
    pub year: Option<u32>,
    pub media: Vec<Media>,
}

impl Movie {
    /// The part that a download of this movie fetches
    pub fn primary_part(&self) -> Option<&MediaPart> {
        primary_part(&self.media)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Show {
    pub rating_key: String,
    pub title: String,
    pub year: Option<u32>,
    /// Number of seasons, if included in the search result
    pub season_count: Option<usize>,
}

/// A season of a show, in the order the catalog lists them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Season {
    pub rating_key: String,
    pub title: String,
    /// Season number
    pub index: Option<u32>,
}

/// A single episode of a show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Episode {
    pub rating_key: String,
    /// The episode title
    pub title: String,
    /// The season number this episode belongs to
    pub season_number: u32,
    /// The episode number within the season
    pub index: u32,
    pub media: Vec<Media>,
}

impl Episode {
    /// The part that a download of this episode fetches
    pub fn primary_part(&self) -> Option<&MediaPart> {
        primary_part(&self.media)
    }

    /// The canonical `SxxEyy` label of this episode
    pub fn token(&self) -> String {
        crate::file_operations::episode_token(self.season_number, self.index)
    }
}

/// A search result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogItem {
    Movie(Movie),
    Show(Show),
}

impl CatalogItem {
    pub fn title(&self) -> &str {
        match self {
            CatalogItem::Movie(movie) => &movie.title,
            CatalogItem::Show(show) => &show.title,
        }
    }

    pub fn year(&self) -> Option<u32> {
        match self {
            CatalogItem::Movie(movie) => movie.year,
            CatalogItem::Show(show) => show.year,
        }
    }

    pub fn kind(&self) -> MediaKind {
        match self {
            CatalogItem::Movie(_) => MediaKind::Movie,
            CatalogItem::Show(_) => MediaKind::Show,
        }
    }
}

/// Addressing details of a connected server.
///
/// Everything needed to turn a part key into a download URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHandle {
    /// Server name as shown in the account
    pub name: String,
    /// Base URL of the reachable connection, e.g. `http://10.0.0.2:32400`
    pub base_url: String,
    /// Access token for this server
    pub token: String,
}

impl ServerHandle {
    /// Builds the URL that streams the original file behind `part_key`.
    ///
    /// The token travels as the `X-Plex-Token` query credential.
    pub fn download_url(&self, part_key: &str) -> Result<String, CatalogError> {
        let base = reqwest::Url::parse(&self.base_url)
            .map_err(|e| CatalogError::InvalidUrl(format!("{}: {}", self.base_url, e)))?;
        let mut url = base
            .join(part_key)
            .map_err(|e| CatalogError::InvalidUrl(format!("{}: {}", part_key, e)))?;

        url.query_pairs_mut()
            .append_pair("download", "1")
            .append_pair("X-Plex-Token", &self.token);

        Ok(url.into())
    }
}

/// Trait for catalog providers that can be searched and walked.
///
/// Implementors of this trait return items in the order the provider lists
/// them; the batch pipeline relies on that order.
pub trait Catalog {
    /// Searches for movies or shows matching `query`.
    fn search(&self, query: &str, kind: MediaKind) -> Result<Vec<CatalogItem>, CatalogError>;

    /// Returns the seasons of a show in season order.
    fn seasons(&self, show: &Show) -> Result<Vec<Season>, CatalogError>;

    /// Returns the episodes of a season in episode order.
    fn episodes(&self, season: &Season) -> Result<Vec<Episode>, CatalogError>;
}
