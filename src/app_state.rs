//! Application State Management
//!
//! This module provides the application state that contains all services
//! and their dependencies, following the dependency injection pattern.

use std::sync::Arc;
use std::time::Duration;
use log::info;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::error::StripeError;
use crate::metadata::mock_store::MockManifestStore;
use crate::service::stripe_service::StripeService;
use crate::storage::config::{build_registry, BackendConfig};

/// Application state containing all services and their dependencies
#[derive(Clone)]
pub struct AppState {
    pub stripe_service: Arc<StripeService>,
    pub config: AppConfig,
}

impl AppState {
    /// Create application state from configuration
    pub fn from_config(config: AppConfig) -> Result<Self, StripeError> {
        info!("Initializing application state with configuration");
        config.validate()?;

        let registry = build_registry(&config.backends)?;
        let store = config.metadata.create_store()?;
        let service = StripeService::new(registry, store, config.stripe_options())?;

        info!("Application state initialized successfully");
        Ok(Self::with_service(Arc::new(service), config))
    }

    /// Wrap an already built service
    pub fn with_service(stripe_service: Arc<StripeService>, config: AppConfig) -> Self {
        Self { stripe_service, config }
    }

    /// Create application state for testing with mock backends
    pub fn new_for_testing() -> Result<Self, StripeError> {
        let mut config = AppConfig::default();
        config.backends = vec![BackendConfig::mock("b0"), BackendConfig::mock("b1")];

        let registry = build_registry(&config.backends)?;
        let service = StripeService::new(registry, Arc::new(MockManifestStore::new()), config.stripe_options())?;
        Ok(Self::with_service(Arc::new(service), config))
    }

    /// Token for one request, cancelled once the operation timeout elapses
    pub fn operation_token(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let secs = self.config.striping.operation_timeout_secs;
        if secs > 0 {
            let deadline = token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = deadline.cancelled() => {}
                    _ = tokio::time::sleep(Duration::from_secs(secs)) => deadline.cancel(),
                }
            });
        }
        token
    }
}
