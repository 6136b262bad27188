//! Object Storage Layer Abstraction
//!
//! This module provides an abstraction over object storage backends (local
//! directories, cloud blob stores, etc.). The striping engine only ever talks
//! to a backend through the `Backend` trait and routes by `BackendId`; it never
//! knows which provider sits behind an id.

pub mod local_store;
pub mod mock_store;
pub mod config;

#[cfg(test)]
mod comprehensive_test;

use async_trait::async_trait;
use bytes::Bytes;
use log::{info, warn};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{BackendError, StripeError};

/// Backend identifier type
pub type BackendId = String;

/// Trait defining the object storage interface
#[async_trait]
pub trait Backend: Send + Sync {
    /// Store a blob under `key`, replacing any previous value
    async fn put(&self, key: &str, data: Bytes) -> Result<(), BackendError>;

    /// Fetch the blob stored under `key`
    async fn get(&self, key: &str) -> Result<Bytes, BackendError>;

    /// Remove the blob stored under `key`. Reports `NotFound` if it was absent.
    async fn delete(&self, key: &str) -> Result<(), BackendError>;

    /// Check whether a blob exists under `key`
    async fn exists(&self, key: &str) -> Result<bool, BackendError>;
}

/// Object key for chunk `index` of `file_id`
pub fn chunk_key(file_id: &str, index: u64) -> String {
    format!("{}_chunk_{}", file_id, index)
}

/// Ordered, immutable set of configured backends
pub struct BackendRegistry {
    entries: Vec<(BackendId, Arc<dyn Backend>)>,
    by_id: HashMap<BackendId, usize>,
}

impl BackendRegistry {
    pub fn new(entries: Vec<(BackendId, Arc<dyn Backend>)>) -> Result<Self, StripeError> {
        if entries.is_empty() {
            return Err(StripeError::InvalidConfig("at least one backend must be registered".to_string()));
        }

        let mut by_id = HashMap::with_capacity(entries.len());
        for (slot, (id, _)) in entries.iter().enumerate() {
            if by_id.insert(id.clone(), slot).is_some() {
                return Err(StripeError::InvalidConfig(format!("duplicate backend id: {}", id)));
            }
        }

        if entries.len() < 2 {
            warn!("Only one backend registered, every chunk will land on {}", entries[0].0);
        }
        info!("Backend registry initialized with {} backends", entries.len());

        Ok(Self { entries, by_id })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Backend at registry position `slot`
    pub fn at(&self, slot: usize) -> Option<(&BackendId, &Arc<dyn Backend>)> {
        self.entries.get(slot).map(|(id, backend)| (id, backend))
    }

    /// Look a backend up by the id recorded in a manifest
    pub fn get(&self, id: &str) -> Option<&Arc<dyn Backend>> {
        self.by_id.get(id).map(|&slot| &self.entries[slot].1)
    }

    pub fn ids(&self) -> Vec<BackendId> {
        self.entries.iter().map(|(id, _)| id.clone()).collect()
    }
}
