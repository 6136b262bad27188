//! Application Configuration
//!
//! This module provides configuration management for the application,
//! supporting YAML configuration files with sensible defaults. The file is
//! `config.yaml` in the working directory unless `AETHER_CONFIG` names
//! another one.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use log::{info, warn};

use crate::chunker::DEFAULT_CHUNK_SIZE;
use crate::error::StripeError;
use crate::metadata::config::MetadataConfig;
use crate::service::stripe_service::StripeOptions;
use crate::storage::config::BackendConfig;

/// Environment variable naming an alternative config file
pub const CONFIG_ENV: &str = "AETHER_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// Chunk backends, in placement order
    pub backends: Vec<BackendConfig>,
    /// Striping configuration
    pub striping: StripingConfig,
    /// Metadata configuration
    pub metadata: MetadataConfig,
    /// Deletion worker configuration
    pub deletion: DeletionConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Number of worker threads
    pub workers: usize,
    /// Maximum payload size in bytes
    pub max_payload_size: usize,
}

/// Chunking, concurrency and retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StripingConfig {
    /// Chunk size in bytes
    pub chunk_size: usize,
    /// Backend calls in flight per operation
    pub concurrency: usize,
    /// Attempts per backend call, including the first
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Per-request deadline in seconds, 0 disables it
    pub operation_timeout_secs: u64,
}

/// Deletion worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeletionConfig {
    /// Enable deletion worker
    pub enabled: bool,
    /// Cleanup interval in seconds
    pub cleanup_interval: u64,
    /// Manifests processed per run
    pub batch_size: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Path to log configuration file
    pub config_file: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9710,
            workers: 4,
            max_payload_size: 1073741824, // 1GB
        }
    }
}

impl Default for StripingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrency: 4,
            retry_attempts: 3,
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 5000,
            operation_timeout_secs: 300,
        }
    }
}

impl Default for DeletionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cleanup_interval: 300, // 5 minutes
            batch_size: 100,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            config_file: "server_log.yaml".to_string(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            backends: vec![
                BackendConfig::local("backend0", "./data/backend0"),
                BackendConfig::local("backend1", "./data/backend1"),
            ],
            striping: StripingConfig::default(),
            metadata: MetadataConfig::default(),
            deletion: DeletionConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `AETHER_CONFIG` or `config.yaml`, use defaults if not found
    pub fn load() -> Result<Self, StripeError> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::load_from(&path),
            Err(_) if Path::new(DEFAULT_CONFIG_PATH).exists() => Self::load_from(DEFAULT_CONFIG_PATH),
            Err(_) => {
                warn!("Config file not found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load and validate a specific configuration file
    pub fn load_from(path: &str) -> Result<Self, StripeError> {
        let content = fs::read_to_string(path)
            .map_err(|e| StripeError::InvalidConfig(format!("cannot read {}: {}", path, e)))?;
        let config: AppConfig = serde_yaml::from_str(&content)
            .map_err(|e| StripeError::InvalidConfig(format!("cannot parse {}: {}", path, e)))?;
        config.validate()?;
        info!("Loaded configuration from {}", path);
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), StripeError> {
        if self.backends.is_empty() {
            return Err(StripeError::InvalidConfig("at least one backend is required".to_string()));
        }
        let mut seen = HashSet::new();
        for backend in &self.backends {
            if !seen.insert(backend.id.as_str()) {
                return Err(StripeError::InvalidConfig(format!("duplicate backend id: {}", backend.id)));
            }
        }
        if self.striping.chunk_size == 0 {
            return Err(StripeError::InvalidConfig("striping.chunk_size must be at least 1".to_string()));
        }
        if self.striping.concurrency == 0 {
            return Err(StripeError::InvalidConfig("striping.concurrency must be at least 1".to_string()));
        }
        if self.striping.retry_attempts == 0 {
            return Err(StripeError::InvalidConfig("striping.retry_attempts must be at least 1".to_string()));
        }
        if self.deletion.enabled && self.deletion.cleanup_interval == 0 {
            return Err(StripeError::InvalidConfig(
                "deletion.cleanup_interval must be at least 1 second".to_string(),
            ));
        }
        if self.deletion.enabled && self.deletion.batch_size == 0 {
            return Err(StripeError::InvalidConfig("deletion.batch_size must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn stripe_options(&self) -> StripeOptions {
        StripeOptions::from(&self.striping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::config::MetadataBackend;
    use crate::storage::config::BackendKind;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 9710);
        assert_eq!(config.backends.len(), 2);
        assert_eq!(config.striping.chunk_size, 1024 * 1024);
        assert_eq!(config.striping.concurrency, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
backends:
  - id: gcs
    kind: mock
  - id: azure
    kind: local
    path: /tmp/azure
striping:
  chunk_size: 4096
metadata:
  backend: Mock
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.backends[0].kind, BackendKind::Mock);
        assert_eq!(config.backends[1].kind, BackendKind::LocalFs);
        assert_eq!(config.striping.chunk_size, 4096);
        assert_eq!(config.striping.concurrency, 4);
        assert_eq!(config.metadata.backend, MetadataBackend::Mock);
        assert_eq!(config.server.port, 9710);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.backends.clear();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.backends[1].id = config.backends[0].id.clone();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.striping.chunk_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_cleanup_interval_needs_worker_disabled() {
        let yaml = "deletion:\n  cleanup_interval: 0\n";
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(config.validate(), Err(StripeError::InvalidConfig(_))));

        let yaml = "deletion:\n  enabled: false\n  cleanup_interval: 0\n";
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_kinds_parse_in_any_case() {
        let yaml = r#"
backends:
  - id: a
    kind: LocalFs
    path: /tmp/a
  - id: b
    kind: MOCK
  - id: c
    kind: fs
    path: /tmp/c
metadata:
  backend: sqlite
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.backends[0].kind, BackendKind::LocalFs);
        assert_eq!(config.backends[1].kind, BackendKind::Mock);
        assert_eq!(config.backends[2].kind, BackendKind::LocalFs);
        assert_eq!(config.metadata.backend, MetadataBackend::SQLite);

        let err = serde_yaml::from_str::<AppConfig>("metadata:\n  backend: postgres\n").unwrap_err();
        assert!(err.to_string().contains("Unknown metadata backend"));

        // Serialized names read back
        let text = serde_yaml::to_string(&config).unwrap();
        let reread: AppConfig = serde_yaml::from_str(&text).unwrap();
        assert_eq!(reread.backends[0].kind, BackendKind::LocalFs);
        assert_eq!(reread.metadata.backend, MetadataBackend::SQLite);
    }

    #[test]
    #[serial]
    fn test_load_from_env_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "server:\n  port: 8123\nstriping:\n  concurrency: 2").unwrap();

        std::env::set_var(CONFIG_ENV, file.path());
        let config = AppConfig::load();
        std::env::remove_var(CONFIG_ENV);

        let config = config.unwrap();
        assert_eq!(config.server.port, 8123);
        assert_eq!(config.striping.concurrency, 2);
        assert_eq!(config.stripe_options().concurrency, 2);
    }

    #[test]
    #[serial]
    fn test_load_from_missing_env_path_fails() {
        std::env::set_var(CONFIG_ENV, "/nonexistent/aether.yaml");
        let result = AppConfig::load();
        std::env::remove_var(CONFIG_ENV);
        assert!(matches!(result, Err(StripeError::InvalidConfig(_))));
    }
}
