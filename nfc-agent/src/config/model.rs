// src/config/model.rs

use url::Url;
use serde::Deserialize;
use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};
use thiserror::Error;

use shared::constants::UNLOCK_PATH;

/// Top-level runtime config
#[derive(Debug, Clone)]
pub struct Config {
    pub logging: LoggingConfig,
    pub api:     ApiConfig,
    pub reader:  ReaderConfig,
    pub session: SessionConfig,
    pub metrics: MetricsConfig,
}

/// Mirror of the whole TOML document; every table may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    #[serde(default)] pub logging: LoggingConfig,
    #[serde(default)] pub api:     ApiStub,
    #[serde(default)] pub reader:  ReaderStub,
    #[serde(default)] pub session: SessionStub,
    #[serde(default)] pub metrics: MetricsStub,
}

/// Mirror of the `[logging]` table
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]            pub enable: bool,
    #[serde(default)]            pub file:   Option<String>,
    #[serde(default = "default_level")] pub level: String,
}
fn default_level() -> String { "INFO".into() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { enable: false, file: None, level: default_level() }
    }
}

/// Raw `[api]` table
#[derive(Debug, Deserialize)]
pub struct ApiStub {
    #[serde(default = "default_base_url")]    pub base_url:    String,
    #[serde(default = "default_unlock_path")] pub unlock_path: String,
}
fn default_base_url() -> String { "http://127.0.0.1:8000".into() }
fn default_unlock_path() -> String { UNLOCK_PATH.into() }

impl Default for ApiStub {
    fn default() -> Self {
        Self { base_url: default_base_url(), unlock_path: default_unlock_path() }
    }
}

/// Backend location, fully resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    /// As configured, kept so a new base URL can be applied later.
    pub unlock_path: String,
    /// Unlock path resolved below the base URL. A path prefix on the base
    /// (`http://host/kotcha`) is kept.
    pub unlock_url:  Url,
}

impl ApiConfig {
    pub fn new(base_url: &str, unlock_path: &str) -> Result<Self, ConfigError> {
        let mut base = Url::parse(base_url)
            .map_err(|e| ConfigError::InvalidUrl(base_url.into(), e))?;
        if !base.path().ends_with('/') {
            let dir = format!("{}/", base.path());
            base.set_path(&dir);
        }
        let unlock_url = base
            .join(unlock_path.trim_start_matches('/'))
            .map_err(|e| ConfigError::InvalidUrl(unlock_path.into(), e))?;
        Ok(Self { unlock_path: unlock_path.into(), unlock_url })
    }
}

/// Raw `[reader]` table
#[derive(Debug, Deserialize)]
pub struct ReaderStub {
    #[serde(default = "default_source")] pub source: String,
    #[serde(default)]                    pub path:   Option<String>,
}
fn default_source() -> String { "stdin".into() }

impl Default for ReaderStub {
    fn default() -> Self {
        Self { source: default_source(), path: None }
    }
}

/// Where tag reads come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderSource {
    Stdin,
    File,
    /// No tag-reading capability on this host.
    None,
}

/// Allow `"stdin"` → `ReaderSource::Stdin`
impl FromStr for ReaderSource {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stdin" => Ok(ReaderSource::Stdin),
            "file"  => Ok(ReaderSource::File),
            "none"  => Ok(ReaderSource::None),
            other   => Err(ConfigError::InvalidSource(other.into())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderConfig {
    pub source: ReaderSource,
    pub path:   Option<PathBuf>,
}

/// Raw `[session]` table
#[derive(Debug, Default, Deserialize)]
pub struct SessionStub {
    #[serde(default)]
    pub shutdown_grace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// How long teardown waits for unlock requests already on the wire.
    pub shutdown_grace: Duration,
}

pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

impl Default for SessionConfig {
    fn default() -> Self {
        Self { shutdown_grace: DEFAULT_SHUTDOWN_GRACE }
    }
}

/// Raw `[metrics]` table
#[derive(Debug, Default, Deserialize)]
pub struct MetricsStub {
    #[serde(default)]
    pub listen: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsConfig {
    /// Prometheus scrape endpoint; disabled when `None`.
    pub listen: Option<SocketAddr>,
}

/// All the ways config loading can go wrong
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid reader source '{0}' (expected stdin, file or none)")]
    InvalidSource(String),

    #[error("reader source 'file' needs a `path`")]
    MissingPath,

    #[error("invalid duration '{0}': {1}")]
    InvalidDuration(String, #[source] humantime::DurationError),

    #[error("invalid URL '{0}': {1}")]
    InvalidUrl(String, #[source] url::ParseError),

    #[error("invalid listen address '{0}': {1}")]
    InvalidAddress(String, #[source] std::net::AddrParseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl TryFrom<RawConfig> for Config {
    type Error = ConfigError;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        let api = ApiConfig::new(&raw.api.base_url, &raw.api.unlock_path)?;

        let source: ReaderSource = raw.reader.source.parse()?;
        let path = raw.reader.path.map(PathBuf::from);
        if source == ReaderSource::File && path.is_none() {
            return Err(ConfigError::MissingPath);
        }

        let shutdown_grace = match raw.session.shutdown_grace {
            Some(txt) => humantime::parse_duration(&txt)
                .map_err(|e| ConfigError::InvalidDuration(txt, e))?,
            None => DEFAULT_SHUTDOWN_GRACE,
        };

        let listen = raw
            .metrics
            .listen
            .map(|txt| txt.parse().map_err(|e| ConfigError::InvalidAddress(txt, e)))
            .transpose()?;

        Ok(Config {
            logging: raw.logging,
            api,
            reader: ReaderConfig { source, path },
            session: SessionConfig { shutdown_grace },
            metrics: MetricsConfig { listen },
        })
    }
}
