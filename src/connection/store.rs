//! Persistence for connection configurations.
//!
//! The only durable state of the server: a single JSON array of
//! `ConnectionConfig` records, written atomically.

use crate::connection::ConnectionConfig;
use crate::error::{AskdbError, Result};
use std::path::{Path, PathBuf};

/// Returns the default connections file path for the current platform.
pub fn default_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("askdb")
        .join("connections.json")
}

/// Loads the config array from disk. A missing file is an empty registry.
pub fn load(path: &Path) -> Result<Vec<ConnectionConfig>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(AskdbError::internal(format!(
                "Failed to read {}: {e}",
                path.display()
            )))
        }
    };
    serde_json::from_str(&raw).map_err(|e| {
        AskdbError::internal(format!("Corrupt connections file {}: {e}", path.display()))
    })
}

/// Saves the config array atomically (write temp file, then rename).
pub fn save(path: &Path, configs: &[ConnectionConfig]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            AskdbError::internal(format!("Failed to create {}: {e}", parent.display()))
        })?;
    }
    let raw = serde_json::to_string_pretty(configs)
        .map_err(|e| AskdbError::internal(format!("Failed to encode connections: {e}")))?;

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, raw).map_err(|e| {
        AskdbError::internal(format!("Failed to write {}: {e}", tmp.display()))
    })?;
    std::fs::rename(&tmp, path).map_err(|e| {
        AskdbError::internal(format!("Failed to replace {}: {e}", path.display()))
    })
}
