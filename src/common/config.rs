//! Authored-data loading.
//!
//! Bullet templates, the surface database and the tunables are plain `serde` types.
//! They are read once at startup and treated as read-only afterwards.

use std::path::Path;

use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

pub fn from_json_str<T: DeserializeOwned>(text: &str) -> Result<T, ConfigError> {
    Ok(serde_json::from_str(text)?)
}

pub fn from_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    from_json_str(&text)
}
