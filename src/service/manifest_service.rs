//! Manifest service layer on top of the ManifestStore trait
//!
//! Adds validation on every read, file id allocation and per-file locking, so
//! an upload and a delete of the same id can never interleave.

use crate::error::StripeError;
use crate::metadata::{FileManifest, ManifestStore};
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

const FILE_ID_ATTEMPTS: usize = 5;

pub struct ManifestService {
    store: Arc<dyn ManifestStore>,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ManifestService {
    pub fn new(store: Arc<dyn ManifestStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate a 128-bit random file id that no stored manifest uses
    pub fn generate_file_id(&self) -> Result<String, StripeError> {
        for _ in 0..FILE_ID_ATTEMPTS {
            let file_id = Uuid::new_v4().simple().to_string();
            if !self.store.manifest_exists(&file_id)? {
                return Ok(file_id);
            }
            warn!("Generated file id {} already in use, retrying", file_id);
        }
        Err(StripeError::Metadata("could not allocate a unique file id".to_string()))
    }

    /// Exclusive access to `file_id` until the guard is dropped
    pub async fn lock(&self, file_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // Drop entries nobody holds or waits on
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(file_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    /// Load and validate a manifest
    pub fn load(&self, file_id: &str) -> Result<FileManifest, StripeError> {
        let manifest = self.store.get_manifest(file_id)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Validate and persist a freshly built manifest
    pub fn commit(&self, manifest: &FileManifest) -> Result<(), StripeError> {
        manifest.validate()?;
        self.store.put_manifest(manifest)?;
        debug!(
            "Committed manifest {} ({} chunks, {} bytes)",
            manifest.file_id, manifest.chunk_count, manifest.total_size
        );
        Ok(())
    }

    pub fn remove(&self, file_id: &str) -> Result<(), StripeError> {
        self.store.delete_manifest(file_id)
    }

    pub fn mark_pending_deletion(&self, file_id: &str, indices: &[u64]) -> Result<(), StripeError> {
        self.store.set_pending_deletion(file_id, indices)
    }

    pub fn pending_deletions(&self, limit: usize) -> Result<Vec<FileManifest>, StripeError> {
        self.store.list_pending_deletions(limit)
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.lock().unwrap().len()
    }
}
