//! Configuration
//!
//! Read from ~/.config/merkle_state/config.json when present. Every field is
//! optional in the file; missing fields take their defaults.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const APP_DIR: &str = "merkle_state";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Parent directory of the per-tree directories
    pub data_dir: PathBuf,
    /// fsync after every committed batch
    pub sync_writes: bool,
    /// Values at least this many bytes long are stored zstd-compressed
    pub compression_threshold: usize,
    pub compression_level: i32,
    /// The log is compacted once it is larger than this and holds more dead
    /// bytes than live ones
    pub compaction_min_bytes: u64,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .map(|d| d.join(APP_DIR))
            .unwrap_or_else(|| PathBuf::from(".merkle_state"));
        Config {
            data_dir,
            sync_writes: true,
            compression_threshold: 256,
            compression_level: 3,
            compaction_min_bytes: 1024 * 1024,
        }
    }
}

impl Config {
    /// Create a config rooted at the given data directory
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Config {
            data_dir: data_dir.into(),
            ..Config::default()
        }
    }

    /// Default config file location
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("Could not find config directory".into()))?;
        Ok(config_dir.join(APP_DIR).join(CONFIG_FILE))
    }

    /// Load from the default location, falling back to defaults
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Ok(path) if path.exists() => Self::load_from(path),
            _ => Ok(Config::default()),
        }
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("Failed to create config dir: {}", e)))?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)
            .map_err(|e| Error::Config(format!("Failed to write config: {}", e)))
    }

    /// Directory holding the storage for the named tree
    pub fn tree_dir(&self, name: &str) -> Result<PathBuf> {
        validate_tree_name(name)?;
        Ok(self.data_dir.join(name))
    }
}

/// Tree names double as directory names
pub fn validate_tree_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidArgument("tree name cannot be empty".into()));
    }
    if name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(Error::InvalidArgument(format!(
            "tree name '{}' is not a valid directory name",
            name
        )));
    }
    Ok(())
}
