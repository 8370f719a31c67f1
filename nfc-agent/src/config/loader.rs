// src/config/loader.rs

//! # Configuration Loader
//!
//! Reads the agent's TOML file, deserializes it into `RawConfig`, and
//! converts the raw tables into the typed runtime `Config`.

use crate::config::model::{Config, ConfigError, RawConfig};
use log::Level;
use std::{fs, path::Path};

/// Load and parse the configuration from `path`.
/// Logs at DEBUG before reading and INFO on success.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    nfc_log!(Level::Debug, "config", "Reading config from {:?}", path);
    let txt = fs::read_to_string(path)?;
    let cfg = parse(&txt)?;
    nfc_log!(Level::Info, "config", "Loaded config from {:?}", path);
    Ok(cfg)
}

/// Like [`load`], but a missing file yields the built-in defaults.
pub fn load_or_default(path: &Path) -> Result<Config, ConfigError> {
    if path.exists() {
        load(path)
    } else {
        nfc_log!(Level::Info, "config", "No config at {:?}, using defaults", path);
        Config::try_from(RawConfig::default())
    }
}

/// Parse a TOML document into a runtime `Config`.
pub fn parse(txt: &str) -> Result<Config, ConfigError> {
    let raw: RawConfig = toml::from_str(txt)?;
    Config::try_from(raw)
}
