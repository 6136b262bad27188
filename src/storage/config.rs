//! Configuration for object storage backends

use crate::error::StripeError;
use crate::storage::{local_store::LocalFsBackend, mock_store::MockBackend, Backend, BackendId, BackendRegistry};
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Available object storage backends
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "String")]
pub enum BackendKind {
    LocalFs,
    Mock,
}

impl Default for BackendKind {
    fn default() -> Self {
        BackendKind::LocalFs
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "localfs" | "local" | "fs" => Ok(BackendKind::LocalFs),
            "mock" => Ok(BackendKind::Mock),
            _ => Err(format!("Unknown storage backend: {}", s)),
        }
    }
}

impl TryFrom<String> for BackendKind {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// One entry of the backend registry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendConfig {
    /// Identifier recorded in manifests; must stay stable across restarts
    pub id: BackendId,
    #[serde(default)]
    pub kind: BackendKind,
    /// Root directory for `LocalFs` backends
    #[serde(default)]
    pub path: Option<String>,
}

impl BackendConfig {
    pub fn local(id: &str, path: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: BackendKind::LocalFs,
            path: Some(path.to_string()),
        }
    }

    pub fn mock(id: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: BackendKind::Mock,
            path: None,
        }
    }

    /// Create a backend instance based on the configuration
    pub fn create_backend(&self) -> Result<Arc<dyn Backend>, StripeError> {
        match self.kind {
            BackendKind::LocalFs => {
                let path = self.path.as_deref().ok_or_else(|| {
                    StripeError::InvalidConfig(format!("backend {} needs a path", self.id))
                })?;
                info!("Creating local backend {} at {}", self.id, path);
                let backend = LocalFsBackend::new(path)
                    .map_err(|e| StripeError::InvalidConfig(format!("backend {}: {}", self.id, e)))?;
                Ok(Arc::new(backend))
            }
            BackendKind::Mock => {
                info!("Creating mock backend {}", self.id);
                Ok(Arc::new(MockBackend::new()))
            }
        }
    }
}

/// Build the registry in configuration order
pub fn build_registry(configs: &[BackendConfig]) -> Result<BackendRegistry, StripeError> {
    let entries = configs
        .iter()
        .map(|cfg| Ok((cfg.id.clone(), cfg.create_backend()?)))
        .collect::<Result<Vec<_>, StripeError>>()?;
    BackendRegistry::new(entries)
}
