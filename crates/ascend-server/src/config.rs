//! Server configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ServerError;

pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ascend-server")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Directory holding the SQLite database
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// HTTP API port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// HS256 signing secret for identity tokens
    #[serde(default)]
    pub jwt_secret: String,

    /// Lifetime of issued tokens in seconds
    #[serde(default = "default_token_expiry")]
    pub token_expiry_secs: u64,
}

fn default_http_port() -> u16 {
    8787
}

fn default_token_expiry() -> u64 {
    30 * 24 * 60 * 60 // 30 days
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            http_port: default_http_port(),
            jwt_secret: String::new(),
            token_expiry_secs: default_token_expiry(),
        }
    }
}

impl ServerConfig {
    /// Load from `path`, falling back to defaults when the file is missing.
    pub fn load(path: &Path) -> Result<Self, ServerError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| ServerError::Config(format!("Invalid config {}: {}", path.display(), e)))
    }
}
