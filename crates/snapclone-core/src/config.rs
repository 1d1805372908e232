//! Configuration for the clone/recover engine.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $SNAPCLONE_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/snapclone/config.toml
//!   3. ~/.config/snapclone/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapcloneConfig {
    /// Absolute path prefix for temporary clone files: `tempDir + "/" + taskId`.
    pub clone_temp_dir: PathBuf,
    /// Bytes per recovery stripe. Must be > 0 and divide `chunkSize`, or
    /// `RecoverChunk` fails with `ChunkSizeNotAligned`.
    pub clone_chunk_split_size: u64,
    /// Starting seqnum for a brand-new clone (not a recover).
    pub initial_seq_num: u64,
}

impl Default for SnapcloneConfig {
    fn default() -> Self {
        Self {
            clone_temp_dir: data_dir().join("clone-temp"),
            clone_chunk_split_size: 1024 * 1024,
            initial_seq_num: 1,
        }
    }
}

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("snapclone")
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("snapclone")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

impl SnapcloneConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            SnapcloneConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn file_path() -> PathBuf {
        std::env::var("SNAPCLONE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&SnapcloneConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text)
                .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SNAPCLONE_CLONE_TEMP_DIR") {
            self.clone_temp_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("SNAPCLONE_CLONE_CHUNK_SPLIT_SIZE") {
            if let Ok(n) = v.parse() {
                self.clone_chunk_split_size = n;
            }
        }
        if let Ok(v) = std::env::var("SNAPCLONE_INITIAL_SEQ_NUM") {
            if let Ok(n) = v.parse() {
                self.initial_seq_num = n;
            }
        }
    }
}
