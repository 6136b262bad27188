//! Download orchestrator
//!
//! Chunks are fetched concurrently but emitted strictly in index order. The
//! manifest is loaded before the stream is handed out, so a missing file is
//! reported before any bytes are produced.

use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::{future, StreamExt};
use log::{debug, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::chunker::chunk_checksum;
use crate::error::{BackendError, StripeError};
use crate::metadata::FileManifest;
use crate::service::retry::RetryPolicy;
use crate::service::stripe_service::StripeService;
use crate::storage::BackendRegistry;

/// Index-ordered chunks of a stored file. Ends after the first error.
pub type ChunkStream = BoxStream<'static, Result<Bytes, StripeError>>;

impl StripeService {
    /// Open a stored file for reading
    pub fn download(&self, file_id: &str, cancel: CancellationToken) -> Result<(FileManifest, ChunkStream), StripeError> {
        let manifest = self.manifests.load(file_id)?;
        if manifest.is_pending_deletion() {
            debug!("{} is being deleted, reporting it as missing", file_id);
            return Err(StripeError::FileNotFound(file_id.to_string()));
        }

        let shared = Arc::new(manifest.clone());
        let registry = Arc::clone(&self.registry);
        let retry = self.options.retry.clone();

        let chunks = stream::iter(0..manifest.chunk_count)
            .map(move |index| {
                fetch_chunk(
                    Arc::clone(&registry),
                    Arc::clone(&shared),
                    index,
                    retry.clone(),
                    cancel.clone(),
                )
            })
            .buffered(self.options.concurrency)
            .scan(false, |failed, item| {
                if *failed {
                    return future::ready(None);
                }
                *failed = item.is_err();
                future::ready(Some(item))
            })
            .boxed();

        Ok((manifest, chunks))
    }

    /// Read a whole file into memory
    pub async fn download_to_vec(&self, file_id: &str, cancel: &CancellationToken) -> Result<Vec<u8>, StripeError> {
        let (manifest, mut chunks) = self.download(file_id, cancel.clone())?;
        let mut data = Vec::with_capacity(manifest.total_size as usize);
        while let Some(chunk) = chunks.next().await {
            data.extend_from_slice(&chunk?);
        }
        Ok(data)
    }
}

/// Fetch and verify one chunk against its manifest entry
async fn fetch_chunk(
    registry: Arc<BackendRegistry>,
    manifest: Arc<FileManifest>,
    index: u64,
    retry: RetryPolicy,
    cancel: CancellationToken,
) -> Result<Bytes, StripeError> {
    let slot = index as usize;
    let backend_id = &manifest.placement[slot];
    let unavailable = |reason: String| {
        warn!("Chunk {} of {} unavailable on {}: {}", index, manifest.file_id, backend_id, reason);
        StripeError::ChunkUnavailable {
            file_id: manifest.file_id.clone(),
            index,
            backend_id: backend_id.clone(),
            reason,
        }
    };

    let Some(backend) = registry.get(backend_id) else {
        return Err(unavailable("backend is not registered".to_string()));
    };

    let key = manifest.chunk_key(index);
    let data = match retry.run(&cancel, || backend.get(&key)).await {
        Ok(data) => data,
        Err(BackendError::Cancelled) => return Err(StripeError::Cancelled),
        Err(e) => return Err(unavailable(e.to_string())),
    };

    let expected = manifest.chunk_len(index);
    if data.len() as u64 != expected {
        return Err(unavailable(format!("expected {} bytes, got {}", expected, data.len())));
    }
    if chunk_checksum(&data) != manifest.checksums[slot] {
        return Err(unavailable("checksum mismatch".to_string()));
    }
    Ok(data)
}
