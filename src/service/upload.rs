//! Upload orchestrator
//!
//! Splits the source into chunks, writes them to their assigned backends with
//! at most `concurrency` writes in flight, and commits the manifest only once
//! every chunk is durable. Any failure leaves no manifest behind and triggers
//! a best-effort cleanup of the chunks that were dispatched. That includes the
//! upload future being dropped, e.g. when an HTTP client disconnects.

use bytes::Bytes;
use futures::stream::{self, FuturesUnordered};
use futures::{Stream, StreamExt};
use log::{debug, info, warn};
use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::chunker::{chunk_checksum, ChunkSplitter};
use crate::error::{BackendError, ChunkFailure, StripeError};
use crate::metadata::{ChunkRecord, FileManifest, ManifestBuilder};
use crate::service::stripe_service::StripeService;
use crate::storage::{chunk_key, Backend, BackendId, BackendRegistry};

impl StripeService {
    /// Store an in-memory buffer
    pub async fn upload_bytes(&self, data: Bytes, cancel: &CancellationToken) -> Result<FileManifest, StripeError> {
        self.upload(stream::iter([Ok::<_, Infallible>(data)]), cancel).await
    }

    /// Store a byte stream as a new striped file and return its manifest
    pub async fn upload<S, B, E>(&self, source: S, cancel: &CancellationToken) -> Result<FileManifest, StripeError>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: fmt::Display,
    {
        let mut splitter = ChunkSplitter::new(source, self.options.chunk_size)?;
        let file_id = self.manifests.generate_file_id()?;
        log_mdc::insert("file_id", &file_id);
        let mut pending = PendingChunks {
            registry: Arc::clone(&self.registry),
            file_id: file_id.clone(),
            chunks: Vec::new(),
            concurrency: self.options.concurrency,
        };
        let _guard = self.manifests.lock(&file_id).await;
        debug!("Uploading {} with chunk_size={}", file_id, self.options.chunk_size);

        let mut builder = ManifestBuilder::new(&file_id, self.options.chunk_size as u64);
        let mut in_flight = FuturesUnordered::new();
        let mut failures: Vec<ChunkFailure> = Vec::new();
        let mut halt: Option<StripeError> = None;
        let mut source_done = false;

        loop {
            while halt.is_none() && failures.is_empty() && !source_done && in_flight.len() < self.options.concurrency {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        halt = Some(StripeError::Cancelled);
                        break;
                    }
                    next = splitter.next_chunk() => next,
                };

                let data = match next {
                    None => {
                        source_done = true;
                        break;
                    }
                    Some(Err(e)) => {
                        halt = Some(e);
                        break;
                    }
                    Some(Ok(data)) => data,
                };

                let index = pending.chunks.len() as u64;
                let slot = self.policy.assign(index, self.registry.len());
                let Some((backend_id, backend)) = self.registry.at(slot) else {
                    halt = Some(StripeError::InvalidConfig(format!(
                        "{} placement chose slot {} of {} backends",
                        self.policy.name(),
                        slot,
                        self.registry.len()
                    )));
                    break;
                };

                pending.chunks.push((index, backend_id.clone()));
                in_flight.push(self.write_chunk(&file_id, index, backend_id.clone(), Arc::clone(backend), data, cancel));
            }

            if matches!(halt, Some(StripeError::Cancelled)) {
                break;
            }

            // Drain; nothing new is dispatched once a failure has been seen
            let Some((index, backend_id, result)) = in_flight.next().await else {
                break;
            };
            match result {
                Ok(record) => builder.record(record),
                Err(BackendError::Cancelled) => {
                    halt = Some(StripeError::Cancelled);
                    break;
                }
                Err(e) => {
                    warn!("Chunk {} of {} failed on {}: {}", index, file_id, backend_id, e);
                    failures.push(ChunkFailure {
                        index,
                        backend_id,
                        reason: e.to_string(),
                    });
                }
            }
        }
        // Dropping the set abandons whatever is still in flight
        drop(in_flight);

        let error = match halt {
            Some(StripeError::Cancelled) => Some(StripeError::Cancelled),
            _ if !failures.is_empty() => {
                failures.sort_by_key(|failure| failure.index);
                Some(StripeError::UploadFailed {
                    file_id: file_id.clone(),
                    failures,
                })
            }
            other => other,
        };

        let committed = match error {
            Some(e) => Err(e),
            None => builder.build().and_then(|manifest| {
                self.manifests.commit(&manifest)?;
                Ok(manifest)
            }),
        };

        let dispatched = pending.release();
        match committed {
            Ok(manifest) => {
                info!(
                    "Uploaded {} ({} bytes in {} chunks)",
                    file_id, manifest.total_size, manifest.chunk_count
                );
                Ok(manifest)
            }
            Err(e) => {
                warn!("Upload of {} aborted: {}", file_id, e);
                cleanup_chunks(Arc::clone(&self.registry), file_id, dispatched, self.options.concurrency).await;
                Err(e)
            }
        }
    }

    async fn write_chunk(
        &self,
        file_id: &str,
        index: u64,
        backend_id: BackendId,
        backend: Arc<dyn Backend>,
        data: Bytes,
        cancel: &CancellationToken,
    ) -> (u64, BackendId, Result<ChunkRecord, BackendError>) {
        let key = chunk_key(file_id, index);
        let checksum = chunk_checksum(&data);
        let len = data.len() as u64;

        let result = self
            .options
            .retry
            .run(cancel, || backend.put(&key, data.clone()))
            .await
            .map(|()| ChunkRecord {
                index,
                backend_id: backend_id.clone(),
                checksum,
                len,
            });
        (index, backend_id, result)
    }
}

/// Chunks dispatched by an upload that has not finished yet
///
/// Dropped while still holding chunks means the upload future itself was
/// dropped, so the cleanup is handed to a detached task.
struct PendingChunks {
    registry: Arc<BackendRegistry>,
    file_id: String,
    chunks: Vec<(u64, BackendId)>,
    concurrency: usize,
}

impl PendingChunks {
    fn release(&mut self) -> Vec<(u64, BackendId)> {
        std::mem::take(&mut self.chunks)
    }
}

impl Drop for PendingChunks {
    fn drop(&mut self) {
        let chunks = self.release();
        if chunks.is_empty() {
            return;
        }
        match Handle::try_current() {
            Ok(handle) => {
                warn!(
                    "Upload of {} dropped with {} chunk(s) dispatched; cleaning up in the background",
                    self.file_id,
                    chunks.len()
                );
                handle.spawn(cleanup_chunks(
                    Arc::clone(&self.registry),
                    self.file_id.clone(),
                    chunks,
                    self.concurrency,
                ));
            }
            Err(_) => warn!(
                "Upload of {} dropped outside a runtime; {} chunk(s) left behind",
                self.file_id,
                chunks.len()
            ),
        }
    }
}

/// Single delete attempt per dispatched chunk; failures are only logged
///
/// Runs regardless of the caller's cancellation token.
async fn cleanup_chunks(
    registry: Arc<BackendRegistry>,
    file_id: String,
    dispatched: Vec<(u64, BackendId)>,
    concurrency: usize,
) {
    if dispatched.is_empty() {
        return;
    }
    debug!("Cleaning up {} chunk(s) of aborted upload {}", dispatched.len(), file_id);

    let registry = registry.as_ref();
    let file_id = file_id.as_str();
    stream::iter(dispatched)
        .map(|(index, backend_id)| async move {
            let Some(backend) = registry.get(&backend_id) else {
                return;
            };
            match backend.delete(&chunk_key(file_id, index)).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!(
                    "Failed to clean up chunk {} of {} on {}: {}",
                    index, file_id, backend_id, e
                ),
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect::<Vec<()>>()
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::mock_store::MockManifestStore;
    use crate::service::retry::RetryPolicy;
    use crate::service::stripe_service::StripeOptions;
    use crate::storage::mock_store::{MockBackend, MockOp};
    use crate::storage::BackendRegistry;
    use std::time::Duration;

    fn setup(chunk_size: usize) -> (Vec<Arc<MockBackend>>, Arc<MockManifestStore>, StripeService) {
        let backends: Vec<Arc<MockBackend>> = (0..2).map(|_| Arc::new(MockBackend::new())).collect();
        let registry = BackendRegistry::new(
            backends
                .iter()
                .enumerate()
                .map(|(i, b)| (format!("b{}", i), Arc::clone(b) as Arc<dyn Backend>))
                .collect(),
        )
        .unwrap();
        let store = Arc::new(MockManifestStore::new());
        let options = StripeOptions {
            chunk_size,
            concurrency: 2,
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
        };
        let service = StripeService::new(registry, store.clone(), options).unwrap();
        (backends, store, service)
    }

    #[tokio::test]
    async fn test_upload_stripes_round_robin() {
        let (backends, store, service) = setup(4);
        let manifest = service
            .upload_bytes(Bytes::from_static(b"0123456789"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(manifest.chunk_count, 3);
        assert_eq!(manifest.total_size, 10);
        assert_eq!(manifest.placement, vec!["b0", "b1", "b0"]);
        assert_eq!(manifest.checksums[2], chunk_checksum(b"89"));
        assert_eq!(backends[0].object_count(), 2);
        assert_eq!(backends[1].object_count(), 1);
        assert!(backends[1].object_exists(&manifest.chunk_key(1)));
        assert_eq!(store.manifest_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_chunk_rolls_back() {
        let (backends, store, service) = setup(4);
        backends[1].fail_all(MockOp::Put, BackendError::Permanent("disk full".into()));

        let err = service
            .upload_bytes(Bytes::from_static(b"0123456789"), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            StripeError::UploadFailed { failures, .. } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].index, 1);
                assert_eq!(failures[0].backend_id, "b1");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(store.manifest_count(), 0);
        assert_eq!(backends[0].object_count(), 0);
        assert_eq!(backends[1].object_count(), 0);
    }

    #[tokio::test]
    async fn test_transient_put_is_retried() {
        let (backends, _, service) = setup(4);
        backends[0].fail_times(MockOp::Put, "_chunk_0", BackendError::Transient("throttled".into()), 2);

        let manifest = service
            .upload_bytes(Bytes::from_static(b"01234567"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(manifest.chunk_count, 2);
        assert_eq!(backends[0].put_calls(), 3);
    }

    #[tokio::test]
    async fn test_source_error_aborts_without_manifest() {
        let (backends, store, service) = setup(4);
        let source = stream::iter(vec![Ok(Bytes::from_static(b"01234567")), Err("client went away")]);

        let err = service.upload(source, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, StripeError::Source(_)));
        assert_eq!(store.manifest_count(), 0);
        assert_eq!(backends[0].object_count() + backends[1].object_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_upload_commits_nothing() {
        let (backends, store, service) = setup(4);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = service
            .upload_bytes(Bytes::from_static(b"0123456789"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, StripeError::Cancelled));
        assert_eq!(store.manifest_count(), 0);
        assert_eq!(backends[0].object_count() + backends[1].object_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_upload_cleans_up_in_background() {
        let (backends, store, service) = setup(4);
        backends[1].set_latency("_chunk_1", Duration::from_secs(30));

        let dropped = tokio::time::timeout(
            Duration::from_millis(100),
            service.upload_bytes(Bytes::from_static(b"0123456789abcdef"), &CancellationToken::new()),
        )
        .await;
        assert!(dropped.is_err());

        for _ in 0..50 {
            if backends[0].object_count() == 0 && backends[1].object_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(backends[0].object_count(), 0);
        assert_eq!(backends[1].object_count(), 0);
        assert_eq!(store.manifest_count(), 0);
    }

    #[tokio::test]
    async fn test_file_id_is_in_log_context_after_upload() {
        let (_, _, service) = setup(4);
        let manifest = service
            .upload_bytes(Bytes::from_static(b"0123"), &CancellationToken::new())
            .await
            .unwrap();

        let logged = log_mdc::get("file_id", |v| v.map(str::to_owned));
        assert_eq!(logged.as_deref(), Some(manifest.file_id.as_str()));
    }
}
