//! Configuration for revow-storage

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::StorageError;

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("revow-storage")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the durable store
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Base URL of the attestation explorer; UIDs are appended as the last path segment
    #[serde(default = "default_explorer_url")]
    pub explorer_url: String,

    /// Schema registered on the attestation network for pledges
    #[serde(default = "default_schema_id")]
    pub schema_id: String,

    /// Chain the registry and attestation contracts live on
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,

    /// Try to anchor new attestations on the attestation network before
    /// falling back to a purely local record
    #[serde(default)]
    pub anchor_attestations: bool,

    /// Publish `put` payloads to the content-addressed network when one is attached
    #[serde(default = "default_true")]
    pub publish_content: bool,

    /// Create an attestation right after a pledge is registered
    #[serde(default = "default_true")]
    pub attest_on_register: bool,
}

fn default_explorer_url() -> String {
    "https://sepolia.easscan.org/attestation/view".to_string()
}

fn default_schema_id() -> String {
    "0x50eb4e430e8a389676629e56f689476a4b3bdf25bd5b3020dea23df68b60813a".to_string()
}

fn default_chain_id() -> u64 {
    421614
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            explorer_url: default_explorer_url(),
            schema_id: default_schema_id(),
            chain_id: default_chain_id(),
            anchor_attestations: false,
            publish_content: true,
            attest_on_register: true,
        }
    }
}

impl Config {
    /// Config rooted at `dir`, everything else default (tests, CLI overrides)
    pub fn with_storage_dir<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            storage_dir: dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| StorageError::Config(e.to_string()))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), StorageError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| StorageError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Durable database path
    pub fn db_path(&self) -> PathBuf {
        self.storage_dir.join("local.sled")
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }

    /// Viewer URL for an attestation UID
    pub fn explorer_link(&self, uid: &str) -> String {
        format!("{}/{}", self.explorer_url.trim_end_matches('/'), uid)
    }
}
