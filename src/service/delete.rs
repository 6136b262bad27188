//! Delete orchestrator
//!
//! Removes every chunk listed in a manifest, then the manifest itself. When
//! some chunk deletes fail the manifest stays behind, recording exactly the
//! failed indices, so a later call (or the deletion worker) retries only those.

use futures::{stream, StreamExt};
use log::{debug, info, warn};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::{BackendError, ChunkFailure, StripeError};
use crate::metadata::FileManifest;
use crate::service::stripe_service::StripeService;

/// Outcome of a delete call
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DeleteResult {
    pub file_id: String,
    /// Chunk indices confirmed gone
    pub succeeded: Vec<u64>,
    pub failures: Vec<ChunkFailure>,
}

impl DeleteResult {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Turn a partial failure into `PartialDeleteFailure`
    pub fn into_result(self) -> Result<DeleteResult, StripeError> {
        if self.is_complete() {
            Ok(self)
        } else {
            Err(StripeError::PartialDeleteFailure {
                file_id: self.file_id,
                failures: self.failures,
            })
        }
    }
}

impl StripeService {
    /// Delete a stored file
    ///
    /// `FileNotFound` if no manifest exists. A partial failure is reported in
    /// the returned `DeleteResult`, not as an error.
    pub async fn delete(&self, file_id: &str, cancel: &CancellationToken) -> Result<DeleteResult, StripeError> {
        let _guard = self.manifests.lock(file_id).await;
        let manifest = self.manifests.load(file_id)?;

        let targets: Vec<u64> = if manifest.is_pending_deletion() {
            debug!("Resuming delete of {} for chunks {:?}", file_id, manifest.pending_deletion);
            manifest.pending_deletion.clone()
        } else {
            (0..manifest.chunk_count).collect()
        };

        let outcomes: Vec<(u64, Result<(), BackendError>)> = stream::iter(targets)
            .map(|index| {
                let manifest = &manifest;
                async move { (index, self.delete_chunk(manifest, index, cancel).await) }
            })
            .buffer_unordered(self.options.concurrency)
            .collect()
            .await;

        let mut succeeded = Vec::new();
        let mut failures = Vec::new();
        for (index, outcome) in outcomes {
            match outcome {
                Ok(()) => succeeded.push(index),
                Err(e) => {
                    let backend_id = manifest.placement[index as usize].clone();
                    warn!("Failed to delete chunk {} of {} on {}: {}", index, file_id, backend_id, e);
                    failures.push(ChunkFailure {
                        index,
                        backend_id,
                        reason: e.to_string(),
                    });
                }
            }
        }
        succeeded.sort_unstable();
        failures.sort_by_key(|failure| failure.index);

        if failures.is_empty() {
            self.manifests.remove(file_id)?;
            info!("Deleted {} ({} chunks)", file_id, succeeded.len());
        } else {
            let pending: Vec<u64> = failures.iter().map(|failure| failure.index).collect();
            self.manifests.mark_pending_deletion(file_id, &pending)?;
            warn!(
                "Delete of {} incomplete: {} chunk(s) pending {:?}",
                file_id,
                pending.len(),
                pending
            );
        }

        Ok(DeleteResult {
            file_id: file_id.to_string(),
            succeeded,
            failures,
        })
    }

    async fn delete_chunk(&self, manifest: &FileManifest, index: u64, cancel: &CancellationToken) -> Result<(), BackendError> {
        let backend_id = &manifest.placement[index as usize];
        let backend = self
            .registry
            .get(backend_id)
            .ok_or_else(|| BackendError::Permanent(format!("backend {} is not registered", backend_id)))?;

        let key = manifest.chunk_key(index);
        match self.options.retry.run(cancel, || backend.delete(&key)).await {
            // Already gone counts as deleted
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::mock_store::MockManifestStore;
    use crate::service::retry::RetryPolicy;
    use crate::service::stripe_service::StripeOptions;
    use crate::storage::mock_store::{MockBackend, MockOp};
    use crate::storage::{Backend, BackendRegistry};
    use bytes::Bytes;
    use std::sync::Arc;

    fn setup() -> (Vec<Arc<MockBackend>>, StripeService) {
        let backends: Vec<Arc<MockBackend>> = (0..2).map(|_| Arc::new(MockBackend::new())).collect();
        let registry = BackendRegistry::new(
            backends
                .iter()
                .enumerate()
                .map(|(i, b)| (format!("b{}", i), Arc::clone(b) as Arc<dyn Backend>))
                .collect(),
        )
        .unwrap();
        let options = StripeOptions {
            chunk_size: 2,
            concurrency: 3,
            retry: RetryPolicy::none(),
        };
        let service = StripeService::new(registry, Arc::new(MockManifestStore::new()), options).unwrap();
        (backends, service)
    }

    #[test]
    fn test_into_result() {
        let ok = DeleteResult {
            file_id: "f".into(),
            succeeded: vec![0, 1],
            failures: vec![],
        };
        assert_eq!(ok.clone().into_result().unwrap(), ok);

        let partial = DeleteResult {
            failures: vec![ChunkFailure {
                index: 1,
                backend_id: "b1".into(),
                reason: "denied".into(),
            }],
            ..ok
        };
        assert!(matches!(
            partial.into_result(),
            Err(StripeError::PartialDeleteFailure { failures, .. }) if failures.len() == 1
        ));
    }

    #[tokio::test]
    async fn test_delete_removes_chunks_and_manifest() {
        let (backends, service) = setup();
        let cancel = CancellationToken::new();
        let manifest = service.upload_bytes(Bytes::from_static(b"abcdefg"), &cancel).await.unwrap();

        let result = service.delete(&manifest.file_id, &cancel).await.unwrap();
        assert_eq!(result.succeeded, vec![0, 1, 2, 3]);
        assert!(result.is_complete());
        assert_eq!(backends[0].object_count() + backends[1].object_count(), 0);
        assert!(matches!(
            service.delete(&manifest.file_id, &cancel).await,
            Err(StripeError::FileNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_already_missing_chunk_counts_as_deleted() {
        let (backends, service) = setup();
        let cancel = CancellationToken::new();
        let manifest = service.upload_bytes(Bytes::from_static(b"abcd"), &cancel).await.unwrap();
        backends[1].clear();

        let result = service.delete(&manifest.file_id, &cancel).await.unwrap();
        assert!(result.is_complete());
        assert_eq!(result.succeeded, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_partial_failure_retains_only_failed_indices() {
        let (backends, service) = setup();
        let cancel = CancellationToken::new();
        let manifest = service.upload_bytes(Bytes::from_static(b"abcdefgh"), &cancel).await.unwrap();
        backends[1].fail(MockOp::Delete, "_chunk_3", BackendError::Permanent("denied".into()));

        let result = service.delete(&manifest.file_id, &cancel).await.unwrap();
        assert_eq!(result.succeeded, vec![0, 1, 2]);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].index, 3);
        assert_eq!(service.manifest(&manifest.file_id).unwrap().pending_deletion, vec![3]);

        // A retry only touches the pending chunk
        backends[1].clear_faults();
        let deletes_before = backends[0].delete_calls();
        let result = service.delete(&manifest.file_id, &cancel).await.unwrap();
        assert_eq!(result.succeeded, vec![3]);
        assert_eq!(backends[0].delete_calls(), deletes_before);
        assert!(matches!(service.manifest(&manifest.file_id), Err(StripeError::FileNotFound(_))));
    }
}
