//! Persistent configuration
//!
//! The configuration is a small JSON document stored in the system's standard
//! configuration directory. Saving writes a sibling `.tmp` file and renames it
//! over the old one, so a crash never leaves a truncated file behind.

use crate::relocation::Destination;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

const CONFIG_FILE: &str = "config.json";

/// Errors that can occur while loading or saving the configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to determine the configuration directory location
    #[error("Failed to determine configuration directory location")]
    ConfigDirectoryNotFound,

    /// Failed to create the configuration directory
    #[error("Failed to create configuration directory at {path}: {source}")]
    DirectoryCreationFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to read the configuration file
    #[error("Failed to read configuration file {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to write the configuration file
    #[error("Failed to write configuration file {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON
    #[error("Failed to parse configuration file {path}: {source}")]
    DeserializationFailed {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// Failed to serialize the configuration
    #[error("Failed to serialize configuration: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    /// A required setting has not been configured
    #[error("Configuration incomplete: '{0}' is not set")]
    Incomplete(&'static str),
}

/// Stored settings
///
/// Every field is optional on disk; [`Config::resolve`] checks that the ones
/// needed for a download are present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Plex authentication token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Name of the Plex Media Server to download from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    /// Directory downloads are written to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_path: Option<String>,
    /// Where finished downloads are moved to: a local path or `remote:path`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_server_path: Option<String>,
    /// Identifier this installation presents to Plex
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_identifier: Option<String>,
}

/// The settings a download run needs, validated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub token: String,
    pub server_name: String,
    pub download_dir: PathBuf,
    pub destination: Option<Destination>,
}

impl Config {
    /// Checks that token, server and download directory are set
    pub fn resolve(&self) -> Result<ResolvedConfig, ConfigError> {
        let token = non_empty(&self.token).ok_or(ConfigError::Incomplete("token"))?;
        let server_name =
            non_empty(&self.server_name).ok_or(ConfigError::Incomplete("server_name"))?;
        let download_path =
            non_empty(&self.download_path).ok_or(ConfigError::Incomplete("download_path"))?;

        Ok(ResolvedConfig {
            token: token.to_string(),
            server_name: server_name.to_string(),
            download_dir: expand_home(download_path),
            destination: non_empty(&self.media_server_path).map(Destination::parse),
        })
    }

    /// Returns the client identifier, generating one on first use
    pub fn client_identifier(&mut self) -> &str {
        self.client_identifier
            .get_or_insert_with(|| ulid::Ulid::new().to_string().to_lowercase())
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Expands a leading `~` to the user's home directory
pub fn expand_home(path: &str) -> PathBuf {
    let home = || directories::BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf());

    if path == "~" {
        if let Some(home) = home() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = home() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Location of the configuration file
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// Opens the store in the system's standard configuration directory
    ///
    /// The directory is created if it does not exist yet.
    pub fn open() -> Result<Self, ConfigError> {
        let proj_dirs = directories::ProjectDirs::from("", "", "plex-downloader")
            .ok_or(ConfigError::ConfigDirectoryNotFound)?;

        let config_dir = proj_dirs.config_dir();
        fs::create_dir_all(config_dir).map_err(|e| ConfigError::DirectoryCreationFailed {
            path: config_dir.to_path_buf(),
            source: e,
        })?;

        Ok(Self::at(config_dir.join(CONFIG_FILE)))
    }

    /// Uses an explicit file path
    pub fn at(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the configuration, or an empty one if the file does not exist
    pub fn load(&self) -> Result<Config, ConfigError> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No configuration file yet");
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&self.path).map_err(|e| ConfigError::ReadFailed {
            path: self.path.clone(),
            source: e,
        })?;

        serde_json::from_str(&content).map_err(|e| ConfigError::DeserializationFailed {
            path: self.path.clone(),
            source: e,
        })
    }

    /// Writes the configuration, replacing the previous file atomically
    pub fn save(&self, config: &Config) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(config)?;

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        fs::write(&tmp_path, content).map_err(|e| ConfigError::WriteFailed {
            path: tmp_path.clone(),
            source: e,
        })?;

        fs::rename(&tmp_path, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            ConfigError::WriteFailed {
                path: self.path.clone(),
                source: e,
            }
        })?;

        debug!(path = %self.path.display(), "Configuration saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn complete() -> Config {
        Config {
            token: Some("abc".into()),
            server_name: Some("Home".into()),
            download_path: Some("/data/downloads".into()),
            media_server_path: Some("mynas:media".into()),
            client_identifier: None,
        }
    }

    #[test]
    fn test_missing_file_loads_empty_config() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::at(dir.path().join("config.json"));

        assert_eq!(store.load().unwrap(), Config::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::at(dir.path().join("config.json"));
        let config = complete();

        store.save(&config).unwrap();

        assert_eq!(store.load().unwrap(), config);
        assert!(!dir.path().join("config.json.tmp").exists());
    }

    #[test]
    fn test_save_omits_unset_keys() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::at(dir.path().join("config.json"));

        store
            .save(&Config {
                token: Some("abc".into()),
                ..Config::default()
            })
            .unwrap();

        let content = fs::read_to_string(store.path()).unwrap();
        assert!(content.contains("\"token\""));
        assert!(!content.contains("server_name"));
    }

    #[test]
    fn test_invalid_json_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let result = ConfigStore::at(path).load();
        assert!(matches!(
            result,
            Err(ConfigError::DeserializationFailed { .. })
        ));
    }

    #[test]
    fn test_resolve_complete_config() {
        let resolved = complete().resolve().unwrap();

        assert_eq!(resolved.token, "abc");
        assert_eq!(resolved.server_name, "Home");
        assert_eq!(resolved.download_dir, PathBuf::from("/data/downloads"));
        assert_eq!(
            resolved.destination,
            Some(Destination::Remote("mynas:media".into()))
        );
    }

    #[test]
    fn test_resolve_reports_first_missing_key() {
        let mut config = complete();
        config.server_name = Some("  ".into());
        assert!(matches!(
            config.resolve(),
            Err(ConfigError::Incomplete("server_name"))
        ));

        config.token = None;
        assert!(matches!(config.resolve(), Err(ConfigError::Incomplete("token"))));
    }

    #[test]
    fn test_resolve_without_media_path() {
        let mut config = complete();
        config.media_server_path = Some(String::new());

        assert_eq!(config.resolve().unwrap().destination, None);
    }

    #[test]
    fn test_client_identifier_is_stable() {
        let mut config = Config::default();

        let first = config.client_identifier().to_string();
        let second = config.client_identifier().to_string();

        assert_eq!(first.len(), 26);
        assert_eq!(first, second);
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/abs/path"), PathBuf::from("/abs/path"));
        assert_eq!(expand_home("relative"), PathBuf::from("relative"));

        if let Some(dirs) = directories::BaseDirs::new() {
            assert_eq!(expand_home("~/Downloads"), dirs.home_dir().join("Downloads"));
        }
    }
}
