//! Plex catalog provider implementation.
use super::plex_types::{
    PlexHubContainer, PlexMedia, PlexMetadata, PlexMetadataContainer, PlexResource,
    PlexResponse, PlexSignIn,
};
use super::{
    Catalog, CatalogError, CatalogItem, Episode, Media, MediaKind, MediaPart, Movie, Season,
    ServerHandle, Show,
};
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

const PLEX_TV_URL: &str = "https://plex.tv";
const PRODUCT: &str = "plex-downloader";
const SERVER_PRODUCT: &str = "Plex Media Server";
const SEARCH_LIMIT: &str = "50";

/// Time allowed for a candidate connection to answer `/identity`
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

fn build_client() -> Result<Client, CatalogError> {
    Client::builder()
        .timeout(Duration::from_secs(60))
        .build()
        .map_err(|e| CatalogError::RequestError(e.to_string()))
}

/// Adds the headers plex.tv and Plex servers expect from every client
fn plex_headers(request: RequestBuilder, client_identifier: &str) -> RequestBuilder {
    request
        .header("Accept", "application/json")
        .header("X-Plex-Product", PRODUCT)
        .header("X-Plex-Version", env!("CARGO_PKG_VERSION"))
        .header("X-Plex-Client-Identifier", client_identifier)
}

/// Maps the response status to a catalog error, passing successes through
fn check_status(response: Response) -> Result<Response, CatalogError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(CatalogError::Unauthorized);
    }
    if !status.is_success() {
        return Err(CatalogError::RequestError(format!(
            "HTTP {} {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown")
        )));
    }
    Ok(response)
}

fn parse_json<T: DeserializeOwned>(response: Response) -> Result<T, CatalogError> {
    response
        .json()
        .map_err(|e| CatalogError::ParseError(e.to_string()))
}

/// A media server advertised by a Plex account.
#[derive(Debug, Clone)]
pub struct ServerResource {
    pub name: String,
    pub product_version: Option<String>,
    access_token: Option<String>,
    /// Connection URIs, non-relay connections first
    connections: Vec<String>,
}

impl ServerResource {
    fn from_plex(resource: PlexResource) -> Self {
        let (direct, relayed): (Vec<_>, Vec<_>) =
            resource.connections.into_iter().partition(|c| !c.relay);
        // Local addresses first, then remote, then relays
        let (local, remote): (Vec<_>, Vec<_>) = direct.into_iter().partition(|c| c.local);
        let connections = local
            .into_iter()
            .chain(remote)
            .chain(relayed)
            .map(|c| c.uri)
            .collect();

        Self {
            name: resource.name,
            product_version: resource.product_version,
            access_token: resource.access_token,
            connections,
        }
    }
}

/// An authenticated plex.tv account.
pub struct PlexAccount {
    client: Client,
    token: String,
    client_identifier: String,
    username: Option<String>,
}

impl PlexAccount {
    /// Signs in with username (or email) and password.
    ///
    /// A rejected login is reported as [`CatalogError::Unauthorized`].
    pub fn sign_in(
        username: &str,
        password: &str,
        client_identifier: &str,
    ) -> Result<Self, CatalogError> {
        let client = build_client()?;
        let request = client
            .post(format!("{}/api/v2/users/signin", PLEX_TV_URL))
            .form(&[("login", username), ("password", password)]);

        let response = plex_headers(request, client_identifier)
            .send()
            .map_err(|e| CatalogError::RequestError(e.to_string()))?;
        let sign_in: PlexSignIn = parse_json(check_status(response)?)?;

        Ok(Self {
            client,
            token: sign_in.auth_token,
            client_identifier: client_identifier.to_string(),
            username: sign_in.username,
        })
    }

    /// Uses a previously obtained account token.
    ///
    /// The token is not validated until the first request.
    pub fn from_token(token: &str, client_identifier: &str) -> Result<Self, CatalogError> {
        Ok(Self {
            client: build_client()?,
            token: token.to_string(),
            client_identifier: client_identifier.to_string(),
            username: None,
        })
    }

    /// The account token, suitable for persisting.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// The account's user name, when known from signing in.
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Lists the media servers available to this account.
    pub fn servers(&self) -> Result<Vec<ServerResource>, CatalogError> {
        let request = self
            .client
            .get(format!("{}/api/v2/resources", PLEX_TV_URL))
            .query(&[("includeHttps", "1"), ("includeRelay", "1")])
            .header("X-Plex-Token", &self.token);

        let response = plex_headers(request, &self.client_identifier)
            .send()
            .map_err(|e| CatalogError::RequestError(e.to_string()))?;
        let resources: Vec<PlexResource> = parse_json(check_status(response)?)?;

        Ok(resources
            .into_iter()
            .filter(|r| r.product.as_deref() == Some(SERVER_PRODUCT))
            .map(ServerResource::from_plex)
            .collect())
    }

    /// Connects to the server named `server_name`.
    ///
    /// Each advertised connection is tried in turn; the first one that
    /// answers wins.
    pub fn connect(&self, server_name: &str) -> Result<PlexServer, CatalogError> {
        let resource = self
            .servers()?
            .into_iter()
            .find(|r| r.name == server_name)
            .ok_or_else(|| CatalogError::ServerNotFound(server_name.to_string()))?;

        let token = resource
            .access_token
            .clone()
            .unwrap_or_else(|| self.token.clone());

        for uri in &resource.connections {
            let request = self
                .client
                .get(format!("{}/identity", uri.trim_end_matches('/')))
                .timeout(CONNECT_TIMEOUT)
                .header("X-Plex-Token", &token);

            match plex_headers(request, &self.client_identifier).send() {
                Ok(response) if response.status() == StatusCode::UNAUTHORIZED => {
                    return Err(CatalogError::Unauthorized);
                }
                Ok(response) if response.status().is_success() => {
                    debug!(server = %resource.name, uri = %uri, "Connected to server");
                    let handle = ServerHandle {
                        name: resource.name.clone(),
                        base_url: uri.trim_end_matches('/').to_string(),
                        token,
                    };
                    return PlexServer::new(handle, &self.client_identifier);
                }
                Ok(response) => {
                    debug!(uri = %uri, status = %response.status(), "Connection rejected");
                }
                Err(e) => {
                    debug!(uri = %uri, error = %e, "Connection failed");
                }
            }
        }

        Err(CatalogError::NoReachableConnection(resource.name))
    }
}

/// A connected Plex media server.
pub struct PlexServer {
    client: Client,
    handle: ServerHandle,
    client_identifier: String,
}

impl PlexServer {
    /// Creates a server client for an already resolved connection.
    pub fn new(handle: ServerHandle, client_identifier: &str) -> Result<Self, CatalogError> {
        Ok(Self {
            client: build_client()?,
            handle,
            client_identifier: client_identifier.to_string(),
        })
    }

    /// Addressing details used to build download URLs.
    pub fn handle(&self) -> &ServerHandle {
        &self.handle
    }

    fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, CatalogError> {
        let request = self
            .client
            .get(format!("{}{}", self.handle.base_url, path))
            .query(query)
            .header("X-Plex-Token", &self.handle.token);

        let response = plex_headers(request, &self.client_identifier)
            .send()
            .map_err(|e| CatalogError::RequestError(e.to_string()))?;

        parse_json(check_status(response)?)
    }

    fn children(&self, rating_key: &str) -> Result<Vec<PlexMetadata>, CatalogError> {
        let response: PlexResponse<PlexMetadataContainer> =
            self.get(&format!("/library/metadata/{}/children", rating_key), &[])?;
        Ok(response.media_container.metadata)
    }

    fn convert_media(media: Vec<PlexMedia>) -> Vec<Media> {
        media
            .into_iter()
            .map(|m| Media {
                video_resolution: m.video_resolution,
                parts: m
                    .parts
                    .into_iter()
                    .map(|p| {
                        let container = p
                            .container
                            .or_else(|| extension_of(&p.key))
                            .unwrap_or_else(|| "mkv".to_string());
                        MediaPart {
                            key: p.key,
                            container,
                            size: p.size,
                        }
                    })
                    .collect(),
            })
            .collect()
    }

    fn convert_item(metadata: PlexMetadata, kind: MediaKind) -> CatalogItem {
        match kind {
            MediaKind::Movie => CatalogItem::Movie(Movie {
                rating_key: metadata.rating_key,
                title: metadata.title,
                year: metadata.year,
                media: Self::convert_media(metadata.media),
            }),
            MediaKind::Show => CatalogItem::Show(Show {
                rating_key: metadata.rating_key,
                title: metadata.title,
                year: metadata.year,
                season_count: metadata.child_count,
            }),
        }
    }

    fn convert_episode(metadata: PlexMetadata, season: &Season) -> Episode {
        Episode {
            rating_key: metadata.rating_key,
            title: metadata.title,
            season_number: metadata
                .parent_index
                .or(season.index)
                .unwrap_or_default(),
            index: metadata.index.unwrap_or_default(),
            media: Self::convert_media(metadata.media),
        }
    }
}

/// Extension of the file name at the end of a part key
fn extension_of(key: &str) -> Option<String> {
    let file_name = key.rsplit('/').next()?;
    let (_, extension) = file_name.rsplit_once('.')?;
    (!extension.is_empty()).then(|| extension.to_string())
}

fn kind_label(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Movie => "movie",
        MediaKind::Show => "show",
    }
}

impl Catalog for PlexServer {
    fn search(&self, query: &str, kind: MediaKind) -> Result<Vec<CatalogItem>, CatalogError> {
        let response: PlexResponse<PlexHubContainer> = self.get(
            "/hubs/search",
            &[("query", query), ("limit", SEARCH_LIMIT)],
        )?;

        let label = kind_label(kind);
        Ok(response
            .media_container
            .hubs
            .into_iter()
            .filter(|hub| hub.hub_type == label)
            .flat_map(|hub| hub.metadata)
            .filter(|m| m.kind.as_deref().is_none_or(|k| k == label))
            .map(|m| Self::convert_item(m, kind))
            .collect())
    }

    fn seasons(&self, show: &Show) -> Result<Vec<Season>, CatalogError> {
        Ok(self
            .children(&show.rating_key)?
            .into_iter()
            .filter(|m| m.kind.as_deref().is_none_or(|k| k == "season"))
            .map(|m| Season {
                rating_key: m.rating_key,
                title: m.title,
                index: m.index,
            })
            .collect())
    }

    fn episodes(&self, season: &Season) -> Result<Vec<Episode>, CatalogError> {
        Ok(self
            .children(&season.rating_key)?
            .into_iter()
            .filter(|m| m.kind.as_deref().is_none_or(|k| k == "episode"))
            .map(|m| Self::convert_episode(m, season))
            .collect())
    }
}
