//! Durable local storage collaborator.
//!
//! The offline queue persists its log through [`BlobStore`], so the core
//! stays unaware of which concrete backing store a platform provides.
//! [`SqliteBlobStore`] is the default; [`MemoryBlobStore`] backs tests.

use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::PersistError;

/// Durable key/value blob storage.
pub trait BlobStore: Send + Sync {
  /// Read a blob. `Ok(None)` means the key has never been written.
  fn read_blob(&self, key: &str) -> Result<Option<Vec<u8>>, PersistError>;

  /// Write a blob, replacing any previous value. Returns only after the
  /// data is durable.
  fn write_blob(&self, key: &str, bytes: &[u8]) -> Result<(), PersistError>;
}

/// SQLite-backed blob storage.
pub struct SqliteBlobStore {
  conn: Mutex<Connection>,
}

/// Schema for the blob table.
const BLOB_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS blobs (
    key TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    written_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl SqliteBlobStore {
  /// Open or create the store at the default location.
  pub fn open() -> Result<Self, PersistError> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open or create the store at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self, PersistError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(path)?;
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Get the default database path.
  fn default_path() -> Result<PathBuf, PersistError> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or(PersistError::NoDataDir)?;

    Ok(data_dir.join("offsync").join("offsync.db"))
  }

  fn run_migrations(&self) -> Result<(), PersistError> {
    let conn = lock_conn(&self.conn)?;
    conn.execute_batch(BLOB_SCHEMA)?;
    Ok(())
  }
}

fn lock_conn(conn: &Mutex<Connection>) -> Result<std::sync::MutexGuard<'_, Connection>, PersistError>
{
  conn.lock().map_err(|_| {
    PersistError::Io(std::io::Error::other("sqlite connection lock poisoned"))
  })
}

impl BlobStore for SqliteBlobStore {
  fn read_blob(&self, key: &str) -> Result<Option<Vec<u8>>, PersistError> {
    let conn = lock_conn(&self.conn)?;
    let mut stmt = conn.prepare("SELECT data FROM blobs WHERE key = ?")?;
    let result = stmt.query_row(params![key], |row| row.get::<_, Vec<u8>>(0));

    match result {
      Ok(data) => Ok(Some(data)),
      Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
      Err(e) => Err(e.into()),
    }
  }

  fn write_blob(&self, key: &str, bytes: &[u8]) -> Result<(), PersistError> {
    let conn = lock_conn(&self.conn)?;
    conn.execute(
      "INSERT OR REPLACE INTO blobs (key, data, written_at) VALUES (?, ?, datetime('now'))",
      params![key, bytes],
    )?;
    Ok(())
  }
}

/// In-memory blob storage for tests. Not durable across processes, but
/// shared clones of the same store simulate a restart's `load`.
#[derive(Default)]
pub struct MemoryBlobStore {
  blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl BlobStore for MemoryBlobStore {
  fn read_blob(&self, key: &str) -> Result<Option<Vec<u8>>, PersistError> {
    let blobs = self
      .blobs
      .lock()
      .map_err(|_| PersistError::Io(std::io::Error::other("blob lock poisoned")))?;
    Ok(blobs.get(key).cloned())
  }

  fn write_blob(&self, key: &str, bytes: &[u8]) -> Result<(), PersistError> {
    let mut blobs = self
      .blobs
      .lock()
      .map_err(|_| PersistError::Io(std::io::Error::other("blob lock poisoned")))?;
    blobs.insert(key.to_string(), bytes.to_vec());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_memory_store_round_trip() {
    let store = MemoryBlobStore::new();
    assert!(store.read_blob("q").unwrap().is_none());

    store.write_blob("q", b"abc").unwrap();
    assert_eq!(store.read_blob("q").unwrap().as_deref(), Some(&b"abc"[..]));

    store.write_blob("q", b"def").unwrap();
    assert_eq!(store.read_blob("q").unwrap().as_deref(), Some(&b"def"[..]));
  }

  #[test]
  fn test_sqlite_store_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.db");

    let store = SqliteBlobStore::open_at(&path).unwrap();
    assert!(store.read_blob("q").unwrap().is_none());
    store.write_blob("q", b"abc").unwrap();

    // Reopen: data survives the connection.
    drop(store);
    let store = SqliteBlobStore::open_at(&path).unwrap();
    assert_eq!(store.read_blob("q").unwrap().as_deref(), Some(&b"abc"[..]));
  }
}
