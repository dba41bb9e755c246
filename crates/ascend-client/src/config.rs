//! Client configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, SyncError};
use crate::scheduler::SchedulerConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the remote store
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Identity the local store is namespaced under
    #[serde(default)]
    pub identity_id: Option<String>,

    /// Cached bearer token
    #[serde(default)]
    pub token: Option<String>,

    /// Local store directory
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Heartbeat interval in seconds
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    /// Per-exchange request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_server_url() -> String {
    "http://127.0.0.1:8787".to_string()
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ascend")
}

fn default_heartbeat_secs() -> u64 {
    60
}

fn default_request_timeout_secs() -> u64 {
    15
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            identity_id: None,
            token: None,
            data_dir: default_data_dir(),
            heartbeat_secs: default_heartbeat_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ClientConfig {
    /// Default config file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ascend")
            .join("client.toml")
    }

    /// Load from `path`, falling back to defaults when the file is missing.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| SyncError::Config(format!("Invalid config {}: {}", path.display(), e)))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SyncError::Config(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| SyncError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)
            .map_err(|e| SyncError::Config(format!("Failed to write {}: {}", path.display(), e)))
    }

    /// Drop `rejected` from the config file at `path`.
    ///
    /// The file is reloaded first so CLI overrides never get persisted, and a
    /// token saved by a later login is left alone. Returns whether the file
    /// changed.
    pub fn clear_token(path: &Path, rejected: &str) -> Result<bool> {
        let mut config = Self::load(path)?;
        if config.token.as_deref() != Some(rejected) {
            return Ok(false);
        }
        config.token = None;
        config.save(path)?;
        info!(path = %path.display(), "Cleared rejected token");
        Ok(true)
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("local.sled")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            heartbeat: Duration::from_secs(self.heartbeat_secs.max(1)),
            // Slightly above the HTTP timeout so the transport reports first
            exchange_timeout: self.request_timeout() + Duration::from_secs(1),
        }
    }
}
