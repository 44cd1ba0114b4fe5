//! TOML loading helpers

use serde::de::DeserializeOwned;
use std::path::Path;
use tracing::debug;

use crate::error::{Error, Result};

/// Read and parse a TOML file into `T`.
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path)?;
    let parsed = toml::from_str(&contents)?;
    debug!(path = %path.display(), "parsed configuration file");
    Ok(parsed)
}

/// Read a file holding a single value (key file, token file), trimming
/// surrounding whitespace. Returns `None` when the file is blank.
pub fn read_trimmed(path: &Path) -> Result<Option<String>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    Ok(Some(trimmed.to_owned()))
}
