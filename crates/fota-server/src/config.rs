//! Update server configuration
//!
//! Loaded from a TOML file with three tables. Every field has a default,
//! so an empty file (or no file) is a valid configuration.
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 5000
//! idle_timeout_secs = 1000
//!
//! [transfer]
//! chunk_size = 8192
//!
//! [storage]
//! catalog_path = "catalog.yaml"
//! blob_root = "firmware"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ListenConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl ServerConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transfer.chunk_size == 0 {
            return Err(ConfigError::Invalid("transfer.chunk_size must be > 0".into()));
        }
        if self.server.idle_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "server.idle_timeout_secs must be > 0".into(),
            ));
        }
        if self.transfer.ack_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "transfer.ack_timeout_secs must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// `host:port` to bind
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.server.idle_timeout_secs)
    }

    /// Ack wait bound; falls back to the idle timeout
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(
            self.transfer
                .ack_timeout_secs
                .unwrap_or(self.server.idle_timeout_secs),
        )
    }
}

// =============================================================================
// [server]
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Close a connection after this long without a frame
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Refuse a second connection for a vehicle id that is already connected
    /// (409) instead of letting it take over
    #[serde(default)]
    pub reject_duplicate_sessions: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_idle_timeout_secs() -> u64 {
    1000
}

fn default_max_frame_bytes() -> usize {
    fota_proto::DEFAULT_MAX_FRAME_BYTES
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            idle_timeout_secs: default_idle_timeout_secs(),
            max_frame_bytes: default_max_frame_bytes(),
            reject_duplicate_sessions: false,
        }
    }
}

// =============================================================================
// [transfer]
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Bytes per FILE_CHUNK
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Bound on DOWNLOAD_ACK / CHUNK_ACK waits (defaults to the idle timeout)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_timeout_secs: Option<u64>,
}

fn default_chunk_size() -> usize {
    8192
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            ack_timeout_secs: None,
        }
    }
}

// =============================================================================
// [storage]
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Catalog file (JSON, YAML or TOML)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_path: Option<PathBuf>,
    /// Directory firmware locations are resolved against
    #[serde(default = "default_blob_root")]
    pub blob_root: PathBuf,
}

fn default_blob_root() -> PathBuf {
    PathBuf::from(".")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            catalog_path: None,
            blob_root: default_blob_root(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ServerConfig::from_toml("").unwrap();
        assert_eq!(config.bind_addr(), "0.0.0.0:5000");
        assert_eq!(config.transfer.chunk_size, 8192);
        assert_eq!(config.idle_timeout(), Duration::from_secs(1000));
        assert_eq!(config.ack_timeout(), Duration::from_secs(1000));
        assert!(!config.server.reject_duplicate_sessions);
        assert!(config.storage.catalog_path.is_none());
    }

    #[test]
    fn test_partial_config() {
        let config = ServerConfig::from_toml(
            r#"
            [server]
            port = 6000
            reject_duplicate_sessions = true

            [transfer]
            chunk_size = 1024
            ack_timeout_secs = 30

            [storage]
            catalog_path = "/etc/fota/catalog.yaml"
            "#,
        )
        .unwrap();
        assert_eq!(config.bind_addr(), "0.0.0.0:6000");
        assert!(config.server.reject_duplicate_sessions);
        assert_eq!(config.transfer.chunk_size, 1024);
        assert_eq!(config.ack_timeout(), Duration::from_secs(30));
        assert_eq!(
            config.storage.catalog_path,
            Some(PathBuf::from("/etc/fota/catalog.yaml"))
        );
        assert_eq!(config.storage.blob_root, PathBuf::from("."));
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert!(matches!(
            ServerConfig::from_toml("[transfer]\nchunk_size = 0"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_unparseable_config() {
        assert!(matches!(
            ServerConfig::from_toml("[server\nport ="),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fotad.toml");
        std::fs::write(&path, "[server]\nhost = \"127.0.0.1\"\nport = 5100\n").unwrap();

        let config = ServerConfig::load(&path).unwrap();
        assert_eq!(config.bind_addr(), "127.0.0.1:5100");

        let missing = ServerConfig::load(dir.path().join("absent.toml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
