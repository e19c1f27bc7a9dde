//! Error taxonomy for the cache, queue, and sync layers.
//!
//! Remote failures are transient by design: the coordinator degrades to
//! stale cache or the offline queue instead of surfacing them. Only
//! programmer errors (malformed keys, non-object payloads) propagate as
//! hard errors to the caller.

use thiserror::Error;

/// Failure talking to the remote document store.
///
/// "Not found" is not an error — `fetch_one` returns `Ok(None)` for a
/// missing document. These variants cover transport-level failures only.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
  /// Network or backend failure reported by the store implementation.
  #[error("remote store transport error: {0}")]
  Transport(String),

  /// The remote call did not complete within the configured timeout.
  #[error("remote call timed out after {0:?}")]
  Timeout(std::time::Duration),
}

/// Failure reading or writing durable local storage.
#[derive(Debug, Error)]
pub enum PersistError {
  #[error("sqlite: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("io: {0}")]
  Io(#[from] std::io::Error),

  #[error("serialize queue log: {0}")]
  Serialize(#[from] serde_json::Error),

  #[error("could not determine local data directory")]
  NoDataDir,
}

/// Errors surfaced by [`SyncCoordinator`](crate::sync::SyncCoordinator).
#[derive(Debug, Error)]
pub enum SyncError {
  /// The remote store failed and no degraded result was possible.
  #[error(transparent)]
  Remote(#[from] RemoteError),

  /// Malformed scope, collection, or document id.
  #[error("invalid key: {0}")]
  InvalidKey(String),

  /// Create/update payload was not a JSON object.
  #[error("invalid payload: {0}")]
  InvalidPayload(String),
}

/// Errors loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("config file not found: {0}")]
  NotFound(String),

  #[error("failed to read config file {path}: {source}")]
  Read {
    path: String,
    source: std::io::Error,
  },

  #[error("failed to parse config file {path}: {source}")]
  Parse {
    path: String,
    source: serde_yaml::Error,
  },
}
