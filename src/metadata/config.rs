//! Configuration for manifest storage backends

use crate::error::StripeError;
use crate::metadata::{mock_store::MockManifestStore, sqlite_store::SQLiteManifestStore, ManifestStore};
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Available manifest storage backends
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "String")]
pub enum MetadataBackend {
    SQLite,
    Mock,
}

impl Default for MetadataBackend {
    fn default() -> Self {
        MetadataBackend::SQLite
    }
}

impl std::str::FromStr for MetadataBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(MetadataBackend::SQLite),
            "mock" => Ok(MetadataBackend::Mock),
            _ => Err(format!("Unknown metadata backend: {}", s)),
        }
    }
}

impl TryFrom<String> for MetadataBackend {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Manifest store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    pub backend: MetadataBackend,
    /// Database file path
    pub db_path: String,
    /// Enable WAL mode
    pub wal_mode: bool,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            backend: MetadataBackend::default(),
            db_path: "./data/manifests.sqlite".to_string(),
            wal_mode: true,
        }
    }
}

impl MetadataConfig {
    /// Create a manifest store instance based on the configuration
    pub fn create_store(&self) -> Result<Arc<dyn ManifestStore>, StripeError> {
        match self.backend {
            MetadataBackend::SQLite => {
                info!("Creating SQLite manifest store at {}", self.db_path);
                Ok(Arc::new(SQLiteManifestStore::open(&self.db_path, self.wal_mode)?))
            }
            MetadataBackend::Mock => {
                info!("Creating Mock manifest store");
                Ok(Arc::new(MockManifestStore::new()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_backend_from_str() {
        assert_eq!("sqlite".parse::<MetadataBackend>().unwrap(), MetadataBackend::SQLite);
        assert_eq!("SQLite".parse::<MetadataBackend>().unwrap(), MetadataBackend::SQLite);
        assert_eq!("mock".parse::<MetadataBackend>().unwrap(), MetadataBackend::Mock);
        assert_eq!("MOCK".parse::<MetadataBackend>().unwrap(), MetadataBackend::Mock);

        assert!("invalid".parse::<MetadataBackend>().is_err());
    }

    #[test]
    fn test_metadata_config_default() {
        let config = MetadataConfig::default();
        assert_eq!(config.backend, MetadataBackend::SQLite);
        assert!(config.wal_mode);
    }

    #[test]
    fn test_create_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = MetadataConfig {
            backend: MetadataBackend::SQLite,
            db_path: dir.path().join("m.sqlite").to_string_lossy().into_owned(),
            wal_mode: false,
        };
        let store = config.create_store().unwrap();
        assert!(!store.manifest_exists("anything").unwrap());

        let config = MetadataConfig { backend: MetadataBackend::Mock, ..MetadataConfig::default() };
        let store = config.create_store().unwrap();
        assert!(!store.manifest_exists("anything").unwrap());
    }
}
