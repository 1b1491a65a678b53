use serde::Deserialize;

/// Response of `POST /api/v2/users/signin` on plex.tv
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct PlexSignIn {
    pub auth_token: String,
    pub username: Option<String>,
}

/// Entry of `GET /api/v2/resources` on plex.tv
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct PlexResource {
    pub name: String,
    pub product: Option<String>,
    pub product_version: Option<String>,
    pub access_token: Option<String>,
    #[serde(default)]
    pub connections: Vec<PlexConnection>,
}

#[derive(Debug, Deserialize)]
pub(super) struct PlexConnection {
    pub uri: String,
    #[serde(default)]
    pub local: bool,
    #[serde(default)]
    pub relay: bool,
}

/// Envelope around every server response
#[derive(Debug, Deserialize)]
pub(super) struct PlexResponse<T> {
    #[serde(rename = "MediaContainer")]
    pub media_container: T,
}

#[derive(Debug, Deserialize)]
pub(super) struct PlexHubContainer {
    #[serde(rename = "Hub", default)]
    pub hubs: Vec<PlexHub>,
}

#[derive(Debug, Deserialize)]
pub(super) struct PlexHub {
    #[serde(rename = "type")]
    pub hub_type: String,
    #[serde(rename = "Metadata", default)]
    pub metadata: Vec<PlexMetadata>,
}

#[derive(Debug, Deserialize)]
pub(super) struct PlexMetadataContainer {
    #[serde(rename = "Metadata", default)]
    pub metadata: Vec<PlexMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct PlexMetadata {
    pub rating_key: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub title: String,
    pub year: Option<u32>,
    pub index: Option<u32>,
    pub parent_index: Option<u32>,
    pub child_count: Option<usize>,
    #[serde(rename = "Media", default)]
    pub media: Vec<PlexMedia>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct PlexMedia {
    pub video_resolution: Option<String>,
    #[serde(rename = "Part", default)]
    pub parts: Vec<PlexPart>,
}

#[derive(Debug, Deserialize)]
pub(super) struct PlexPart {
    pub key: String,
    pub container: Option<String>,
    pub size: Option<u64>,
}
