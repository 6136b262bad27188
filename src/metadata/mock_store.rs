//! Mock implementation of ManifestStore trait for testing

use crate::error::StripeError;
use crate::metadata::{FileManifest, ManifestStore};
use std::collections::HashMap;
use std::sync::Mutex;

/// Mock implementation of ManifestStore for testing
pub struct MockManifestStore {
    data: Mutex<HashMap<String, FileManifest>>,
}

impl MockManifestStore {
    /// Create a new mock manifest store
    pub fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
        }
    }

    /// Clear all data from the store (useful for test cleanup)
    pub fn clear(&self) {
        self.data.lock().unwrap().clear();
    }

    pub fn manifest_count(&self) -> usize {
        self.data.lock().unwrap().len()
    }

    /// Replace a stored manifest as-is, skipping every check
    pub fn overwrite(&self, manifest: FileManifest) {
        self.data.lock().unwrap().insert(manifest.file_id.clone(), manifest);
    }
}

impl Default for MockManifestStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ManifestStore for MockManifestStore {
    fn put_manifest(&self, manifest: &FileManifest) -> Result<(), StripeError> {
        let mut data = self.data.lock().unwrap();
        if data.contains_key(&manifest.file_id) {
            return Err(StripeError::ManifestConflict(manifest.file_id.clone()));
        }
        data.insert(manifest.file_id.clone(), manifest.clone());
        Ok(())
    }

    fn get_manifest(&self, file_id: &str) -> Result<FileManifest, StripeError> {
        self.data
            .lock()
            .unwrap()
            .get(file_id)
            .cloned()
            .ok_or_else(|| StripeError::FileNotFound(file_id.to_string()))
    }

    fn delete_manifest(&self, file_id: &str) -> Result<(), StripeError> {
        match self.data.lock().unwrap().remove(file_id) {
            Some(_) => Ok(()),
            None => Err(StripeError::FileNotFound(file_id.to_string())),
        }
    }

    fn manifest_exists(&self, file_id: &str) -> Result<bool, StripeError> {
        Ok(self.data.lock().unwrap().contains_key(file_id))
    }

    fn set_pending_deletion(&self, file_id: &str, indices: &[u64]) -> Result<(), StripeError> {
        let mut data = self.data.lock().unwrap();
        let manifest = data
            .get_mut(file_id)
            .ok_or_else(|| StripeError::FileNotFound(file_id.to_string()))?;
        manifest.pending_deletion = indices.to_vec();
        Ok(())
    }

    fn list_pending_deletions(&self, limit: usize) -> Result<Vec<FileManifest>, StripeError> {
        let data = self.data.lock().unwrap();
        let mut pending: Vec<FileManifest> = data.values().filter(|m| m.is_pending_deletion()).cloned().collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.file_id.cmp(&b.file_id)));
        pending.truncate(limit);
        Ok(pending)
    }
}
