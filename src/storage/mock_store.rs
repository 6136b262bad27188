//! Mock implementation of the Backend trait for testing

use crate::error::BackendError;
use crate::storage::Backend;
use async_trait::async_trait;
use bytes::Bytes;
use log::info;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Operation a fault applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Put,
    Get,
    Delete,
}

struct Fault {
    op: MockOp,
    // None matches every key
    key: Option<String>,
    error: BackendError,
    // None fails forever
    remaining: Option<usize>,
}

/// In-memory backend with fault injection, latency and call counters
pub struct MockBackend {
    objects: Mutex<HashMap<String, Bytes>>,
    faults: Mutex<Vec<Fault>>,
    latency: Mutex<Vec<(String, Duration)>>,
    puts: AtomicUsize,
    gets: AtomicUsize,
    deletes: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            faults: Mutex::new(Vec::new()),
            latency: Mutex::new(Vec::new()),
            puts: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        }
    }

    /// Fail every `op` on `key` with `error`
    ///
    /// Keys match exactly or by suffix, so `"_chunk_1"` targets chunk 1 of
    /// any file.
    pub fn fail(&self, op: MockOp, key: &str, error: BackendError) {
        self.push_fault(op, Some(key), error, None);
    }

    /// Fail the next `times` calls of `op` on `key`, then behave normally
    pub fn fail_times(&self, op: MockOp, key: &str, error: BackendError, times: usize) {
        self.push_fault(op, Some(key), error, Some(times));
    }

    /// Fail every `op` regardless of key
    pub fn fail_all(&self, op: MockOp, error: BackendError) {
        self.push_fault(op, None, error, None);
    }

    fn push_fault(&self, op: MockOp, key: Option<&str>, error: BackendError, remaining: Option<usize>) {
        self.faults.lock().unwrap().push(Fault {
            op,
            key: key.map(str::to_string),
            error,
            remaining,
        });
    }

    pub fn clear_faults(&self) {
        self.faults.lock().unwrap().clear();
    }

    /// Delay every call touching `key` (exact or suffix match)
    pub fn set_latency(&self, key: &str, delay: Duration) {
        self.latency.lock().unwrap().push((key.to_string(), delay));
    }

    /// Number of objects currently stored
    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn object_exists(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    /// List all stored keys, sorted
    pub fn list_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Overwrite a stored object without going through the fault machinery
    pub fn corrupt(&self, key: &str, data: &[u8]) {
        self.objects.lock().unwrap().insert(key.to_string(), Bytes::copy_from_slice(data));
    }

    pub fn clear(&self) {
        self.objects.lock().unwrap().clear();
    }

    pub fn put_calls(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    async fn before_call(&self, op: MockOp, key: &str) -> Result<(), BackendError> {
        let counter = match op {
            MockOp::Put => &self.puts,
            MockOp::Get => &self.gets,
            MockOp::Delete => &self.deletes,
        };
        counter.fetch_add(1, Ordering::SeqCst);

        let delay = self
            .latency
            .lock()
            .unwrap()
            .iter()
            .find(|(pattern, _)| key_matches(pattern, key))
            .map(|(_, delay)| *delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut faults = self.faults.lock().unwrap();
        let hit = faults.iter().position(|f| {
            f.op == op && f.remaining != Some(0) && f.key.as_deref().map_or(true, |pattern| key_matches(pattern, key))
        });
        if let Some(pos) = hit {
            let fault = &mut faults[pos];
            if let Some(remaining) = fault.remaining.as_mut() {
                *remaining -= 1;
            }
            return Err(fault.error.clone());
        }
        Ok(())
    }
}

fn key_matches(pattern: &str, key: &str) -> bool {
    key == pattern || key.ends_with(pattern)
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn put(&self, key: &str, data: Bytes) -> Result<(), BackendError> {
        self.before_call(MockOp::Put, key).await?;
        info!("Mock: Stored {} ({} bytes)", key, data.len());
        self.objects.lock().unwrap().insert(key.to_string(), data);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, BackendError> {
        self.before_call(MockOp::Get, key).await?;
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        self.before_call(MockOp::Delete, key).await?;
        match self.objects.lock().unwrap().remove(key) {
            Some(_) => {
                info!("Mock: Deleted {}", key);
                Ok(())
            }
            None => Err(BackendError::NotFound(key.to_string())),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, BackendError> {
        Ok(self.object_exists(key))
    }
}
