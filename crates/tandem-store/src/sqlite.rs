//! SQLite implementation of the store traits.
//!
//! Uses rusqlite with bundled SQLite. Queries run on the blocking pool via
//! `tokio::task::spawn_blocking`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use tandem_core::{ChangeSet, DocumentId};

use crate::error::{Result, StoreError};
use crate::migration::{self, now_millis};
use crate::traits::{CapabilityKey, CapabilityStore, CapabilityValue, DocumentArchive};

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. Cloning shares the connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn encode_value(value: &CapabilityValue) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn decode_value(bytes: &[u8]) -> Result<CapabilityValue> {
    ciborium::from_reader(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

#[async_trait]
impl CapabilityStore for SqliteStore {
    async fn get(&self, key: &CapabilityKey) -> Result<Option<CapabilityValue>> {
        let kind = key.kind();
        let key_bytes = key.key_bytes();

        self.run(move |conn| {
            let raw: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT value FROM capabilities WHERE kind = ?1 AND key = ?2",
                    params![kind, key_bytes],
                    |row| row.get(0),
                )
                .optional()?;

            raw.map(|bytes| decode_value(&bytes)).transpose()
        })
        .await
    }

    async fn set(&self, key: CapabilityKey, value: CapabilityValue) -> Result<()> {
        let kind = key.kind();
        let key_bytes = key.key_bytes();
        let encoded = encode_value(&value)?;

        self.run(move |conn| {
            conn.execute(
                "INSERT INTO capabilities (kind, key, value, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(kind, key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at",
                params![kind, key_bytes, encoded, now_millis()],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &CapabilityKey) -> Result<bool> {
        let kind = key.kind();
        let key_bytes = key.key_bytes();

        self.run(move |conn| {
            let removed = conn.execute(
                "DELETE FROM capabilities WHERE kind = ?1 AND key = ?2",
                params![kind, key_bytes],
            )?;
            Ok(removed > 0)
        })
        .await
    }
}

#[async_trait]
impl DocumentArchive for SqliteStore {
    async fn save_snapshot(&self, document: &DocumentId, snapshot: &ChangeSet) -> Result<()> {
        let document = document.as_str().to_owned();
        let snapshot = snapshot.as_bytes().to_vec();

        self.run(move |conn| {
            conn.execute(
                "INSERT INTO document_snapshots (document_id, snapshot, saved_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(document_id) DO UPDATE SET
                    snapshot = excluded.snapshot,
                    saved_at = excluded.saved_at",
                params![document, snapshot, now_millis()],
            )?;
            Ok(())
        })
        .await
    }

    async fn load_snapshot(&self, document: &DocumentId) -> Result<Option<ChangeSet>> {
        let document = document.as_str().to_owned();

        self.run(move |conn| {
            let raw: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT snapshot FROM document_snapshots WHERE document_id = ?1",
                    params![document],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(raw.map(ChangeSet::new))
        })
        .await
    }
}
