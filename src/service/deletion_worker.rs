//! Background deletion worker
//!
//! Deletes that fail part way leave their manifest behind with the failed
//! chunk indices recorded. This worker periodically picks those manifests up
//! and re-runs the delete orchestrator on them until they are gone.

use crate::config::DeletionConfig;
use crate::error::StripeError;
use crate::service::stripe_service::StripeService;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tokio_util::sync::CancellationToken;

/// Background deletion worker
pub struct DeletionWorker {
    service: Arc<StripeService>,
    batch_size: usize,
    cleanup_interval: Duration,
}

impl DeletionWorker {
    pub fn new(service: Arc<StripeService>, config: &DeletionConfig) -> Self {
        Self {
            service,
            batch_size: config.batch_size,
            cleanup_interval: Duration::from_secs(config.cleanup_interval),
        }
    }

    /// Start the deletion worker as a background task (non-blocking)
    pub fn start_background(self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        info!("Starting deletion worker with {}s interval", self.cleanup_interval.as_secs());

        tokio::spawn(async move {
            let mut interval = time::interval(self.cleanup_interval);
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }

                if let Err(e) = self.process_deletions(&shutdown).await {
                    error!("Error processing deletions: {}", e);
                }
            }
            info!("Deletion worker stopped");
        })
    }

    /// Retry one batch of pending deletes, returning how many files were fully removed
    pub async fn process_deletions(&self, cancel: &CancellationToken) -> Result<usize, StripeError> {
        let pending = self.service.pending_deletions(self.batch_size)?;
        if pending.is_empty() {
            debug!("No pending deletions");
            return Ok(0);
        }

        info!("Processing {} pending deletions", pending.len());
        let mut removed = 0;
        for manifest in pending {
            if cancel.is_cancelled() {
                break;
            }
            match self.service.delete(&manifest.file_id, cancel).await {
                Ok(result) if result.is_complete() => removed += 1,
                Ok(result) => warn!(
                    "Delete of {} still has {} chunk(s) pending",
                    manifest.file_id,
                    result.failures.len()
                ),
                // Someone else finished it in the meantime
                Err(StripeError::FileNotFound(_)) => {}
                // Continue with other files even if one fails
                Err(e) => error!("Failed to resume delete of {}: {}", manifest.file_id, e),
            }
        }
        Ok(removed)
    }
}
