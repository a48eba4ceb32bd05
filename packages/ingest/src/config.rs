//! Process configuration shared by the CLI and the server.
//!
//! Values come from built-in defaults, then an optional TOML file, then
//! environment variables (highest precedence).
//!
//! ```toml
//! db_path = "data/paddle_mirror.db"
//! bind_addr = "127.0.0.1"
//! port = 8080
//! page_delay_ms = 500
//! request_timeout_secs = 120
//! live_api_url = "https://vendors.paddle.com/api/2.0/subscription/users"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use paddle_mirror_database::paths::default_db_path;
use paddle_mirror_ingest_models::ApiProfile;
use paddle_mirror_source::PaddleUserSource;
use paddle_mirror_source::paddle::DEFAULT_REQUEST_TIMEOUT;
use serde::Deserialize;

use crate::controller::DEFAULT_PAGE_DELAY;

/// Environment variable naming the TOML config file.
pub const CONFIG_PATH_ENV: &str = "PADDLE_MIRROR_CONFIG";

/// Config file read when [`CONFIG_PATH_ENV`] is unset.
pub const DEFAULT_CONFIG_FILE: &str = "paddle_mirror.toml";

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    #[error("Failed to read config file {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The config file is not valid TOML for [`MirrorConfig`].
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        source: toml::de::Error,
    },

    /// An environment variable holds an unparseable value.
    #[error("Invalid value for {name}: {value:?}")]
    InvalidEnv {
        /// Variable name.
        name: &'static str,
        /// Offending value.
        value: String,
    },
}

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// Location of the `SQLite` store.
    pub db_path: PathBuf,
    /// Server bind address.
    pub bind_addr: String,
    /// Server port.
    pub port: u16,
    /// Pause between successful pages, in milliseconds.
    pub page_delay_ms: u64,
    /// Per-request HTTP timeout, in seconds.
    pub request_timeout_secs: u64,
    /// Override for the mock profile endpoint.
    pub mock_api_url: Option<String>,
    /// Override for the live profile endpoint.
    pub live_api_url: Option<String>,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            bind_addr: "127.0.0.1".to_string(),
            port: 8080,
            #[allow(clippy::cast_possible_truncation)]
            page_delay_ms: DEFAULT_PAGE_DELAY.as_millis() as u64,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT.as_secs(),
            mock_api_url: None,
            live_api_url: None,
        }
    }
}

fn parse_env<T: std::str::FromStr>(
    name: &'static str,
    lookup: &impl Fn(&str) -> Option<String>,
) -> Result<Option<T>, ConfigError> {
    lookup(name).map_or(Ok(None), |value| {
        value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { name, value })
    })
}

impl MirrorConfig {
    /// Loads configuration from the config file (if present) and the
    /// process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed, or an
    /// environment variable holds an invalid value.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from);

        let config = if path.exists() {
            Self::from_file(&path)?
        } else {
            log::debug!("No config file at {}, using defaults", path.display());
            Self::default()
        };

        config.with_env(&|name| std::env::var(name).ok())
    }

    /// Parses a TOML config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parses TOML text; missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns the TOML error if `content` is not a valid config.
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Applies environment overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] for unparseable numbers.
    pub fn with_env(mut self, lookup: &impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        if let Some(path) = lookup("PADDLE_MIRROR_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }
        if let Some(addr) = lookup("BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Some(port) = parse_env("PORT", lookup)? {
            self.port = port;
        }
        if let Some(ms) = parse_env("PADDLE_MIRROR_PAGE_DELAY_MS", lookup)? {
            self.page_delay_ms = ms;
        }
        if let Some(secs) = parse_env("PADDLE_MIRROR_REQUEST_TIMEOUT_SECS", lookup)? {
            self.request_timeout_secs = secs;
        }
        if let Some(url) = lookup("PADDLE_MIRROR_MOCK_URL") {
            self.mock_api_url = Some(url);
        }
        if let Some(url) = lookup("PADDLE_MIRROR_LIVE_URL") {
            self.live_api_url = Some(url);
        }
        Ok(self)
    }

    /// Pause between successful pages.
    #[must_use]
    pub const fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    /// Per-request HTTP timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Builds the page fetcher with this config's timeout and endpoint
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns [`paddle_mirror_source::SourceError`] if the HTTP client
    /// cannot be built.
    pub fn build_fetcher(&self) -> Result<PaddleUserSource, paddle_mirror_source::SourceError> {
        let mut source = PaddleUserSource::new(self.request_timeout())?;
        if let Some(url) = &self.mock_api_url {
            source = source.with_endpoint(ApiProfile::Mock, url.clone());
        }
        if let Some(url) = &self.live_api_url {
            source = source.with_endpoint(ApiProfile::Live, url.clone());
        }
        Ok(source)
    }
}
