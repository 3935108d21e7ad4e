use serde::{Deserialize, Serialize};

use std::future::Future;
use std::path::Path;
use std::path::PathBuf;

use crate::error::{ConfigError, SerDeError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path of the local SQLite draft store.
    pub store_path: PathBuf,
    /// Debounce windows for the autosave scheduler.
    pub autosave: AutosaveSettings,
}

/// Debounce windows, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutosaveSettings {
    /// Window for title/visibility edits.
    pub metadata_debounce_ms: u64,
    /// Window for content edits.
    pub content_debounce_ms: u64,
}

impl Default for AutosaveSettings {
    fn default() -> Self {
        Self {
            metadata_debounce_ms: 1000,
            content_debounce_ms: 2000,
        }
    }
}

impl Config {
    /// Loads the configuration from the provided loader.
    pub async fn load(loader: &impl Loader) -> Result<Self, ConfigError> {
        loader.load().await
    }

    /// Saves the configuration using the provided saver.
    pub async fn save(&self, saver: &impl Saver) -> Result<(), ConfigError> {
        saver.save(self).await
    }

    /// Overlay environment variables on top of this configuration.
    ///
    /// - `SCRIPTORIUM_STORE`: path of the draft store
    /// - `SCRIPTORIUM_METADATA_DEBOUNCE_MS`: metadata debounce window
    /// - `SCRIPTORIUM_CONTENT_DEBOUNCE_MS`: content debounce window
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var("SCRIPTORIUM_STORE") {
            self.store_path = PathBuf::from(path);
        }
        if let Some(ms) = env_millis("SCRIPTORIUM_METADATA_DEBOUNCE_MS")? {
            self.autosave.metadata_debounce_ms = ms;
        }
        if let Some(ms) = env_millis("SCRIPTORIUM_CONTENT_DEBOUNCE_MS")? {
            self.autosave.content_debounce_ms = ms;
        }
        Ok(self)
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }
}

fn env_millis(var: &'static str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: std::num::ParseIntError| ConfigError::InvalidEnv {
                var,
                message: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

impl Default for Config {
    /// The default store lives at `<config_dir>/scriptorium/drafts.sqlite`.
    fn default() -> Self {
        Self {
            store_path: config_dir().join("drafts.sqlite"),
            autosave: AutosaveSettings::default(),
        }
    }
}

/// The trait for loading configuration data.
pub trait Loader {
    /// Loads the configuration data.
    fn load(&self) -> impl Future<Output = Result<Config, ConfigError>> + Send;
}

/// The trait for saving configuration data.
pub trait Saver {
    /// Saves the configuration data.
    fn save(&self, config: &Config) -> impl Future<Output = Result<(), ConfigError>> + Send;
}

/// An implementation of [`Loader`] and [`Saver`] that reads and writes a configuration file.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Create a new [`FileStore`] with the given path.
    ///
    /// [`Config`] data will be serialized and deserialized using the file extension.
    /// Only `.json` and `.toml` files are supported.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn read(&self) -> Result<String, ConfigError> {
        std::fs::read_to_string(&self.path).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })
    }

    fn write(&self, contents: String) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(&self.path, contents).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

impl Loader for FileStore {
    async fn load(&self) -> Result<Config, ConfigError> {
        match self.path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(serde_json::from_str(&self.read()?).map_err(SerDeError::from)?),
            Some("toml") => Ok(toml::from_str(&self.read()?).map_err(SerDeError::from)?),
            _ => Err(ConfigError::UnsupportedFormat {
                path: self.path.clone(),
            }),
        }
    }
}

impl Saver for FileStore {
    async fn save(&self, config: &Config) -> Result<(), ConfigError> {
        match self.path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => {
                self.write(serde_json::to_string_pretty(config).map_err(SerDeError::from)?)
            }
            Some("toml") => self.write(toml::to_string_pretty(config).map_err(SerDeError::from)?),
            _ => Err(ConfigError::UnsupportedFormat {
                path: self.path.clone(),
            }),
        }
    }
}

/// Directory holding scriptorium's config and local store.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("./"))
        .join("scriptorium")
}
