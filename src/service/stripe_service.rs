//! Striping service: the engine behind upload, download and delete
//!
//! Backends, the manifest store and the placement policy are injected at
//! construction time. The orchestrators themselves live in `upload`,
//! `download` and `delete`, each adding an `impl StripeService` block.

use crate::chunker::DEFAULT_CHUNK_SIZE;
use crate::config::StripingConfig;
use crate::error::StripeError;
use crate::metadata::{FileManifest, ManifestStore};
use crate::placement::{PlacementPolicy, RoundRobin};
use crate::service::manifest_service::ManifestService;
use crate::service::retry::RetryPolicy;
use crate::storage::{BackendId, BackendRegistry};
use log::info;
use std::sync::Arc;
use std::time::Duration;

/// Tuning knobs shared by all orchestrators
#[derive(Debug, Clone)]
pub struct StripeOptions {
    pub chunk_size: usize,
    /// Maximum backend calls in flight per operation
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for StripeOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrency: 4,
            retry: RetryPolicy::default(),
        }
    }
}

impl From<&StripingConfig> for StripeOptions {
    fn from(config: &StripingConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            concurrency: config.concurrency,
            retry: RetryPolicy {
                max_attempts: config.retry_attempts,
                base_delay: Duration::from_millis(config.retry_base_delay_ms),
                max_delay: Duration::from_millis(config.retry_max_delay_ms),
            },
        }
    }
}

pub struct StripeService {
    pub(crate) registry: Arc<BackendRegistry>,
    pub(crate) policy: Arc<dyn PlacementPolicy>,
    pub(crate) manifests: ManifestService,
    pub(crate) options: StripeOptions,
}

impl StripeService {
    /// Create a striping service with round-robin placement
    pub fn new(
        registry: BackendRegistry,
        store: Arc<dyn ManifestStore>,
        options: StripeOptions,
    ) -> Result<Self, StripeError> {
        Self::with_policy(registry, store, options, Arc::new(RoundRobin))
    }

    pub fn with_policy(
        registry: BackendRegistry,
        store: Arc<dyn ManifestStore>,
        options: StripeOptions,
        policy: Arc<dyn PlacementPolicy>,
    ) -> Result<Self, StripeError> {
        if options.chunk_size == 0 {
            return Err(StripeError::InvalidConfig("chunk_size must be at least 1".to_string()));
        }
        if options.concurrency == 0 {
            return Err(StripeError::InvalidConfig("concurrency must be at least 1".to_string()));
        }

        info!(
            "Striping over {:?} with {} placement, chunk_size={}, concurrency={}, retry_attempts={}",
            registry.ids(),
            policy.name(),
            options.chunk_size,
            options.concurrency,
            options.retry.max_attempts
        );

        Ok(Self {
            registry: Arc::new(registry),
            policy,
            manifests: ManifestService::new(store),
            options,
        })
    }

    pub fn backend_ids(&self) -> Vec<BackendId> {
        self.registry.ids()
    }

    /// Validated manifest of a stored file
    pub fn manifest(&self, file_id: &str) -> Result<FileManifest, StripeError> {
        self.manifests.load(file_id)
    }

    /// Manifests left behind by partially failed deletes
    pub fn pending_deletions(&self, limit: usize) -> Result<Vec<FileManifest>, StripeError> {
        self.manifests.pending_deletions(limit)
    }
}
