//! Config file loading
//!
//! The file is a TOML rendition of [`ServerConfig`]. Without `--config`,
//! `<config dir>/oscine/config.toml` is used when it exists.

use anyhow::{Context, Result};
use oscine_server::ServerConfig;
use std::path::{Path, PathBuf};
use tracing::debug;

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("oscine").join("config.toml"))
}

pub fn load(path: Option<&Path>) -> Result<ServerConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match default_config_path() {
            Some(path) if path.is_file() => path,
            _ => return Ok(ServerConfig::default()),
        },
    };

    debug!("Loading config from {}", path.display());
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    parse(&text).with_context(|| format!("Invalid config {}", path.display()))
}

pub fn parse(text: &str) -> Result<ServerConfig> {
    Ok(toml::from_str(text)?)
}
