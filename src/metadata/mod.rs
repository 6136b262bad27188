//! Manifest Storage Layer Abstraction
//!
//! This module provides an abstraction over manifest storage backends,
//! allowing the system to use different storage implementations (SQLite,
//! in-memory, etc.) without affecting higher-level services.
//!
//! A manifest is the single source of truth for how many chunks a file has and
//! which backend holds each one. Nothing in the engine ever infers chunk
//! existence by probing backends.

pub mod sqlite_store;
pub mod mock_store;
pub mod config;


use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::chunker::chunk_count_for;
use crate::error::StripeError;
use crate::storage::{chunk_key, BackendId};

/// File identifier type
pub type FileId = String;

/// Authoritative metadata record for one striped file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileManifest {
    pub file_id: FileId,
    /// Bytes per chunk used when the file was split
    pub chunk_size: u64,
    pub chunk_count: u64,
    /// Length of the original file in bytes
    pub total_size: u64,
    /// Backend holding chunk `i`, for every `i` in `0..chunk_count`
    pub placement: Vec<BackendId>,
    /// MD5 hex digest of chunk `i`
    pub checksums: Vec<String>,
    pub created_at: DateTime<Utc>,
    /// Chunk indices whose delete failed. Non-empty means the file is being deleted.
    #[serde(default)]
    pub pending_deletion: Vec<u64>,
}

impl FileManifest {
    pub fn is_pending_deletion(&self) -> bool {
        !self.pending_deletion.is_empty()
    }

    pub fn chunk_key(&self, index: u64) -> String {
        chunk_key(&self.file_id, index)
    }

    /// Expected byte length of chunk `index`; only the last chunk may be short
    pub fn chunk_len(&self, index: u64) -> u64 {
        if index + 1 < self.chunk_count {
            self.chunk_size
        } else {
            self.total_size - self.chunk_size * index
        }
    }

    /// Check the structural invariants of a manifest
    pub fn validate(&self) -> Result<(), StripeError> {
        let corrupt = |reason: String| StripeError::ManifestCorruption {
            file_id: self.file_id.clone(),
            reason,
        };

        if self.chunk_size == 0 {
            return Err(corrupt("chunk_size is zero".to_string()));
        }
        if self.placement.len() as u64 != self.chunk_count {
            return Err(corrupt(format!(
                "placement has {} entries for {} chunks",
                self.placement.len(),
                self.chunk_count
            )));
        }
        if self.checksums.len() as u64 != self.chunk_count {
            return Err(corrupt(format!(
                "checksums has {} entries for {} chunks",
                self.checksums.len(),
                self.chunk_count
            )));
        }
        if chunk_count_for(self.total_size, self.chunk_size) != self.chunk_count {
            return Err(corrupt(format!(
                "{} bytes in chunks of {} cannot make {} chunks",
                self.total_size, self.chunk_size, self.chunk_count
            )));
        }
        if let Some(index) = self.pending_deletion.iter().find(|&&i| i >= self.chunk_count) {
            return Err(corrupt(format!("pending deletion index {} out of range", index)));
        }
        Ok(())
    }
}

/// A chunk that has been durably written during an upload
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    pub index: u64,
    pub backend_id: BackendId,
    pub checksum: String,
    pub len: u64,
}

/// Collects chunk records as writes complete, in any order
pub struct ManifestBuilder {
    file_id: FileId,
    chunk_size: u64,
    chunks: BTreeMap<u64, ChunkRecord>,
}

impl ManifestBuilder {
    pub fn new(file_id: &str, chunk_size: u64) -> Self {
        Self {
            file_id: file_id.to_string(),
            chunk_size,
            chunks: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, chunk: ChunkRecord) {
        self.chunks.insert(chunk.index, chunk);
    }

    /// Produce the manifest; fails unless indices are contiguous from zero
    pub fn build(self) -> Result<FileManifest, StripeError> {
        let chunk_count = self.chunks.len() as u64;
        let mut placement = Vec::with_capacity(self.chunks.len());
        let mut checksums = Vec::with_capacity(self.chunks.len());
        let mut total_size = 0u64;

        for (expected, (index, chunk)) in self.chunks.into_iter().enumerate() {
            let expected = expected as u64;
            if index != expected {
                return Err(StripeError::ManifestCorruption {
                    file_id: self.file_id,
                    reason: format!("chunk {} missing", expected),
                });
            }
            if expected + 1 < chunk_count && chunk.len != self.chunk_size {
                return Err(StripeError::ManifestCorruption {
                    file_id: self.file_id,
                    reason: format!("chunk {} is {} bytes, expected {}", index, chunk.len, self.chunk_size),
                });
            }
            total_size += chunk.len;
            placement.push(chunk.backend_id);
            checksums.push(chunk.checksum);
        }

        let manifest = FileManifest {
            file_id: self.file_id,
            chunk_size: self.chunk_size,
            chunk_count,
            total_size,
            placement,
            checksums,
            created_at: Utc::now(),
            pending_deletion: Vec::new(),
        };
        manifest.validate()?;
        Ok(manifest)
    }
}

/// Trait defining the manifest storage interface
pub trait ManifestStore: Send + Sync {
    /// Store a new manifest. Fails with `ManifestConflict` if the id is taken.
    fn put_manifest(&self, manifest: &FileManifest) -> Result<(), StripeError>;

    /// Retrieve a manifest, `FileNotFound` if absent
    fn get_manifest(&self, file_id: &str) -> Result<FileManifest, StripeError>;

    /// Remove a manifest, `FileNotFound` if absent
    fn delete_manifest(&self, file_id: &str) -> Result<(), StripeError>;

    fn manifest_exists(&self, file_id: &str) -> Result<bool, StripeError>;

    /// Replace the pending deletion list of an existing manifest
    fn set_pending_deletion(&self, file_id: &str, indices: &[u64]) -> Result<(), StripeError>;

    /// Manifests with outstanding chunk deletes, oldest first
    fn list_pending_deletions(&self, limit: usize) -> Result<Vec<FileManifest>, StripeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(index: u64, backend: &str, len: u64) -> ChunkRecord {
        ChunkRecord {
            index,
            backend_id: backend.to_string(),
            checksum: format!("sum{}", index),
            len,
        }
    }

    #[test]
    fn test_builder_accepts_out_of_order_records() {
        let mut builder = ManifestBuilder::new("f1", 4);
        builder.record(record(2, "b0", 2));
        builder.record(record(0, "b0", 4));
        builder.record(record(1, "b1", 4));

        let manifest = builder.build().unwrap();
        assert_eq!(manifest.chunk_count, 3);
        assert_eq!(manifest.total_size, 10);
        assert_eq!(manifest.placement, vec!["b0", "b1", "b0"]);
        assert_eq!(manifest.checksums, vec!["sum0", "sum1", "sum2"]);
        assert_eq!(manifest.chunk_len(0), 4);
        assert_eq!(manifest.chunk_len(2), 2);
    }

    #[test]
    fn test_builder_rejects_gaps_and_short_middle_chunks() {
        let mut gap = ManifestBuilder::new("f1", 4);
        gap.record(record(0, "b0", 4));
        gap.record(record(2, "b0", 4));
        assert!(matches!(gap.build(), Err(StripeError::ManifestCorruption { .. })));

        let mut short = ManifestBuilder::new("f1", 4);
        short.record(record(0, "b0", 3));
        short.record(record(1, "b1", 4));
        assert!(matches!(short.build(), Err(StripeError::ManifestCorruption { .. })));
    }

    #[test]
    fn test_empty_manifest_is_valid() {
        let manifest = ManifestBuilder::new("empty", 1024).build().unwrap();
        assert_eq!(manifest.chunk_count, 0);
        assert_eq!(manifest.total_size, 0);
        assert!(manifest.placement.is_empty());
    }

    #[test]
    fn test_validate_catches_structural_damage() {
        let mut builder = ManifestBuilder::new("f1", 4);
        builder.record(record(0, "b0", 4));
        builder.record(record(1, "b1", 1));
        let good = builder.build().unwrap();

        let mut bad = good.clone();
        bad.placement.pop();
        assert!(bad.validate().is_err());

        let mut bad = good.clone();
        bad.total_size = 9;
        assert!(bad.validate().is_err());

        let mut bad = good.clone();
        bad.chunk_size = 0;
        assert!(bad.validate().is_err());

        let mut bad = good.clone();
        bad.pending_deletion = vec![2];
        assert!(bad.validate().is_err());

        let mut pending = good;
        pending.pending_deletion = vec![1];
        assert!(pending.validate().is_ok());
        assert!(pending.is_pending_deletion());
    }
}
