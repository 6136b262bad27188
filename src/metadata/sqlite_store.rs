//! SQLite implementation of ManifestStore trait

use crate::error::StripeError;
use crate::metadata::{FileManifest, ManifestStore};
use chrono::{DateTime, Utc};
use log::{debug, error, info};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS manifests (
    file_id TEXT PRIMARY KEY,
    chunk_size INTEGER NOT NULL,
    chunk_count INTEGER NOT NULL,
    total_size INTEGER NOT NULL,
    placement BLOB NOT NULL,
    checksums BLOB NOT NULL,
    pending_deletion BLOB,
    created_at TEXT NOT NULL
)";

const SELECT_COLUMNS: &str =
    "SELECT file_id, chunk_size, chunk_count, total_size, placement, checksums, pending_deletion, created_at FROM manifests";

/// Raw column values as read from a row, decoded outside the rusqlite closure
struct ManifestRow {
    file_id: String,
    chunk_size: i64,
    chunk_count: i64,
    total_size: i64,
    placement: Vec<u8>,
    checksums: Vec<u8>,
    pending_deletion: Option<Vec<u8>>,
    created_at: String,
}

impl ManifestRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            file_id: row.get(0)?,
            chunk_size: row.get(1)?,
            chunk_count: row.get(2)?,
            total_size: row.get(3)?,
            placement: row.get(4)?,
            checksums: row.get(5)?,
            pending_deletion: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn decode(self) -> Result<FileManifest, StripeError> {
        let file_id = self.file_id;
        let corrupt = |reason: String| StripeError::ManifestCorruption {
            file_id: file_id.clone(),
            reason,
        };
        let unsigned = |name: &str, value: i64| {
            u64::try_from(value).map_err(|_| corrupt(format!("{} is negative ({})", name, value)))
        };

        let chunk_size = unsigned("chunk_size", self.chunk_size)?;
        let chunk_count = unsigned("chunk_count", self.chunk_count)?;
        let total_size = unsigned("total_size", self.total_size)?;
        let placement: Vec<String> = bincode::deserialize(&self.placement)
            .map_err(|e| corrupt(format!("placement: {}", e)))?;
        let checksums: Vec<String> = bincode::deserialize(&self.checksums)
            .map_err(|e| corrupt(format!("checksums: {}", e)))?;
        let pending_deletion: Vec<u64> = match self.pending_deletion {
            Some(bytes) => bincode::deserialize(&bytes).map_err(|e| corrupt(format!("pending_deletion: {}", e)))?,
            None => Vec::new(),
        };
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| corrupt(format!("created_at: {}", e)))?
            .with_timezone(&Utc);

        Ok(FileManifest {
            file_id,
            chunk_size,
            chunk_count,
            total_size,
            placement,
            checksums,
            created_at,
            pending_deletion,
        })
    }
}

fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, StripeError> {
    bincode::serialize(value).map_err(|e| StripeError::Metadata(format!("failed to encode manifest: {}", e)))
}

fn encode_pending(indices: &[u64]) -> Result<Option<Vec<u8>>, StripeError> {
    if indices.is_empty() {
        Ok(None)
    } else {
        encode(indices).map(Some)
    }
}

fn to_sql_int(name: &str, value: u64) -> Result<i64, StripeError> {
    i64::try_from(value).map_err(|_| StripeError::Metadata(format!("{} {} does not fit in SQLite", name, value)))
}

/// SQLite implementation of ManifestStore
pub struct SQLiteManifestStore {
    conn: Mutex<Connection>,
}

impl SQLiteManifestStore {
    /// Open (or create) the database at `path`
    pub fn open<P: AsRef<Path>>(path: P, wal_mode: bool) -> Result<Self, StripeError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StripeError::Metadata(format!("failed to create {}: {}", parent.display(), e)))?;
            }
        }

        let conn = Connection::open(path)?;
        if wal_mode {
            let mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            debug!("SQLite journal mode: {}", mode);
        }
        info!("Opened manifest database at {} (wal_mode: {})", path.display(), wal_mode);
        Self::with_connection(conn)
    }

    /// Private in-memory database, mostly for tests
    pub fn in_memory() -> Result<Self, StripeError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StripeError> {
        conn.execute(SCHEMA, [])?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StripeError> {
        self.conn
            .lock()
            .map_err(|_| StripeError::Metadata("manifest connection mutex poisoned".to_string()))
    }
}

impl ManifestStore for SQLiteManifestStore {
    fn put_manifest(&self, manifest: &FileManifest) -> Result<(), StripeError> {
        let placement = encode(&manifest.placement)?;
        let checksums = encode(&manifest.checksums)?;
        let pending = encode_pending(&manifest.pending_deletion)?;

        let conn = self.conn()?;
        let result = conn.execute(
            "INSERT INTO manifests (file_id, chunk_size, chunk_count, total_size, placement, checksums, pending_deletion, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                manifest.file_id,
                to_sql_int("chunk_size", manifest.chunk_size)?,
                to_sql_int("chunk_count", manifest.chunk_count)?,
                to_sql_int("total_size", manifest.total_size)?,
                placement,
                checksums,
                pending,
                manifest.created_at.to_rfc3339(),
            ],
        );

        match result {
            Ok(_) => {
                debug!("Stored manifest {} with {} chunks", manifest.file_id, manifest.chunk_count);
                Ok(())
            }
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(StripeError::ManifestConflict(manifest.file_id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn get_manifest(&self, file_id: &str) -> Result<FileManifest, StripeError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("{} WHERE file_id = ?1", SELECT_COLUMNS),
                params![file_id],
                ManifestRow::from_row,
            )
            .optional()?;
        drop(conn);

        match row {
            Some(row) => row.decode(),
            None => Err(StripeError::FileNotFound(file_id.to_string())),
        }
    }

    fn delete_manifest(&self, file_id: &str) -> Result<(), StripeError> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM manifests WHERE file_id = ?1", params![file_id])?;
        if removed == 0 {
            return Err(StripeError::FileNotFound(file_id.to_string()));
        }
        Ok(())
    }

    fn manifest_exists(&self, file_id: &str) -> Result<bool, StripeError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM manifests WHERE file_id = ?1",
            params![file_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn set_pending_deletion(&self, file_id: &str, indices: &[u64]) -> Result<(), StripeError> {
        let pending = encode_pending(indices)?;
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE manifests SET pending_deletion = ?1 WHERE file_id = ?2",
            params![pending, file_id],
        )?;
        if updated == 0 {
            return Err(StripeError::FileNotFound(file_id.to_string()));
        }
        Ok(())
    }

    fn list_pending_deletions(&self, limit: usize) -> Result<Vec<FileManifest>, StripeError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE pending_deletion IS NOT NULL ORDER BY created_at LIMIT ?1",
            SELECT_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![limit], ManifestRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        drop(stmt);
        drop(conn);

        // A corrupt row must not hide the others from the deletion worker
        Ok(rows
            .into_iter()
            .filter_map(|row| match row.decode() {
                Ok(manifest) => Some(manifest),
                Err(e) => {
                    error!("Skipping pending deletion: {}", e);
                    None
                }
            })
            .collect())
    }
}
