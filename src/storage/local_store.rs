//! Local filesystem object storage implementation
//!
//! Each backend owns one directory and stores one file per key. Writes go to a
//! temporary file first and are renamed into place, so a reader never sees a
//! half-written chunk.

use crate::error::BackendError;
use crate::storage::Backend;
use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, info};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Local directory backed object store
pub struct LocalFsBackend {
    root: PathBuf,
}

impl LocalFsBackend {
    /// Open a backend rooted at `root`, creating the directory if needed
    pub fn new<P: AsRef<Path>>(root: P) -> io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }
        info!("Using local storage directory: {}", root.display());
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, BackendError> {
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return Err(BackendError::Permanent(format!("invalid object key: {:?}", key)));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl Backend for LocalFsBackend {
    async fn put(&self, key: &str, data: Bytes) -> Result<(), BackendError> {
        let path = self.path_for(key)?;
        let tmp = self.root.join(format!(".{}.tmp", key));

        let mut file = fs::File::create(&tmp).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, &path).await?;

        debug!("Wrote {} bytes to {}", data.len(), path.display());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, BackendError> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(buf) => Ok(Bytes::from(buf)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(BackendError::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(BackendError::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, BackendError> {
        let path = self.path_for(key)?;
        Ok(fs::try_exists(&path).await?)
    }
}
