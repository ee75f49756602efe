//! Persistent keyed blob store.
//!
//! A thin async facade over an embedded redb database. Each logical table is
//! a flat `key -> bytes` map; callers own the encoding (everything above
//! this crate stores serde_json). The database file lives in the broker's
//! data directory and is the ground truth rebuilt into memory on startup.
//!
//! redb transactions are synchronous, so every call hops onto the blocking
//! pool; the `Database` handle itself serializes writers internally.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use thiserror::Error;
use tracing::debug;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by the blob store
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database could not be opened or is corrupt
    #[error("store unavailable at {path}: {message}")]
    Unavailable { path: PathBuf, message: String },

    /// A transaction failed
    #[error("store transaction failed: {0}")]
    Transaction(String),

    /// The blocking task running the transaction was cancelled
    #[error("store task cancelled")]
    Cancelled,
}

const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");
const SESSIONS_AUTH: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions_auth");
const SESSIONS_NIP46: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions_nip46");
const REQUESTS_NIP46: TableDefinition<&str, &[u8]> = TableDefinition::new("requests_nip46");
const TRANSPORT_KEYS: TableDefinition<&str, &[u8]> = TableDefinition::new("transport_keys");
const USER_CREDENTIALS: TableDefinition<&str, &[u8]> = TableDefinition::new("user_credentials");

/// The logical tables the broker persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Users,
    SessionsAuth,
    SessionsNip46,
    RequestsNip46,
    TransportKeys,
    UserCredentials,
}

impl Table {
    fn definition(self) -> TableDefinition<'static, &'static str, &'static [u8]> {
        match self {
            Table::Users => USERS,
            Table::SessionsAuth => SESSIONS_AUTH,
            Table::SessionsNip46 => SESSIONS_NIP46,
            Table::RequestsNip46 => REQUESTS_NIP46,
            Table::TransportKeys => TRANSPORT_KEYS,
            Table::UserCredentials => USER_CREDENTIALS,
        }
    }

    const ALL: [Table; 6] = [
        Table::Users,
        Table::SessionsAuth,
        Table::SessionsNip46,
        Table::RequestsNip46,
        Table::TransportKeys,
        Table::UserCredentials,
    ];
}

/// Handle to the embedded database. Cheap to clone.
#[derive(Clone)]
pub struct BlobStore {
    db: Arc<Database>,
}

impl BlobStore {
    /// Open (or create) the database and ensure every table exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Unavailable {
                path: path.clone(),
                message: format!("cannot create data directory: {}", e),
            })?;
        }

        let db = Database::create(&path).map_err(|e| StoreError::Unavailable {
            path: path.clone(),
            message: e.to_string(),
        })?;

        let txn = db
            .begin_write()
            .map_err(|e| StoreError::Transaction(e.to_string()))?;
        for table in Table::ALL {
            txn.open_table(table.definition())
                .map_err(|e| StoreError::Transaction(e.to_string()))?;
        }
        txn.commit()
            .map_err(|e| StoreError::Transaction(e.to_string()))?;

        debug!(path = %path.display(), "blob store opened");
        Ok(Self { db: Arc::new(db) })
    }

    /// Insert or replace one row.
    pub async fn put(&self, table: Table, key: String, value: Vec<u8>) -> Result<()> {
        let db = Arc::clone(&self.db);
        run_blocking(move || {
            let txn = db.begin_write().map_err(transaction_err)?;
            {
                let mut t = txn.open_table(table.definition()).map_err(transaction_err)?;
                t.insert(key.as_str(), value.as_slice())
                    .map_err(transaction_err)?;
            }
            txn.commit().map_err(transaction_err)
        })
        .await
    }

    /// Fetch one row.
    pub async fn get(&self, table: Table, key: String) -> Result<Option<Vec<u8>>> {
        let db = Arc::clone(&self.db);
        run_blocking(move || {
            let txn = db.begin_read().map_err(transaction_err)?;
            let t = txn.open_table(table.definition()).map_err(transaction_err)?;
            let row = t.get(key.as_str()).map_err(transaction_err)?;
            Ok(row.map(|guard| guard.value().to_vec()))
        })
        .await
    }

    /// Delete one row; returns whether it existed.
    pub async fn delete(&self, table: Table, key: String) -> Result<bool> {
        let db = Arc::clone(&self.db);
        run_blocking(move || {
            let txn = db.begin_write().map_err(transaction_err)?;
            let existed = {
                let mut t = txn.open_table(table.definition()).map_err(transaction_err)?;
                let removed = t.remove(key.as_str()).map_err(transaction_err)?.is_some();
                removed
            };
            txn.commit().map_err(transaction_err)?;
            Ok(existed)
        })
        .await
    }

    /// All rows of a table, in key order.
    pub async fn list(&self, table: Table) -> Result<Vec<(String, Vec<u8>)>> {
        let db = Arc::clone(&self.db);
        run_blocking(move || {
            let txn = db.begin_read().map_err(transaction_err)?;
            let t = txn.open_table(table.definition()).map_err(transaction_err)?;
            let mut rows = Vec::new();
            for entry in t.iter().map_err(transaction_err)? {
                let (key, value) = entry.map_err(transaction_err)?;
                rows.push((key.value().to_string(), value.value().to_vec()));
            }
            Ok(rows)
        })
        .await
    }
}

fn transaction_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Transaction(e.to_string())
}

async fn run_blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|_| StoreError::Cancelled)?
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn fresh() -> (BlobStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(dir.path().join("igloo.redb")).unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn put_get_delete_round_trip() {
        let (store, _dir) = fresh().await;

        store
            .put(Table::Users, "alice".into(), b"row".to_vec())
            .await
            .unwrap();
        assert_eq!(
            store.get(Table::Users, "alice".into()).await.unwrap(),
            Some(b"row".to_vec())
        );

        assert!(store.delete(Table::Users, "alice".into()).await.unwrap());
        assert!(!store.delete(Table::Users, "alice".into()).await.unwrap());
        assert_eq!(store.get(Table::Users, "alice".into()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn tables_are_isolated() {
        let (store, _dir) = fresh().await;

        store
            .put(Table::SessionsNip46, "k".into(), b"session".to_vec())
            .await
            .unwrap();
        assert_eq!(store.get(Table::RequestsNip46, "k".into()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn list_returns_all_rows() {
        let (store, _dir) = fresh().await;

        for (k, v) in [("a", "1"), ("b", "2"), ("c", "3")] {
            store
                .put(Table::RequestsNip46, k.into(), v.as_bytes().to_vec())
                .await
                .unwrap();
        }
        let rows = store.list(Table::RequestsNip46).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].0, "a");
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("igloo.redb");

        {
            let store = BlobStore::open(&path).unwrap();
            store
                .put(Table::TransportKeys, "user1".into(), vec![9; 32])
                .await
                .unwrap();
        }

        let store = BlobStore::open(&path).unwrap();
        assert_eq!(
            store.get(Table::TransportKeys, "user1".into()).await.unwrap(),
            Some(vec![9; 32])
        );
    }
}
