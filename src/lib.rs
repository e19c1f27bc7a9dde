//! Offline-tolerant document cache.
//!
//! A client-side data access layer that sits in front of a remote
//! document store: cache-first reads with bounded staleness, an ordered
//! durable queue for writes made while disconnected, and a coordinator
//! that replays the queue when connectivity returns and reconciles
//! client-generated placeholder ids with remote-assigned ones.
//!
//! The remote store and the durable local store are capability traits
//! ([`DocumentStore`], [`storage::BlobStore`]); the core is unaware of
//! which concrete backends a platform wires in.

pub mod cache;
pub mod config;
pub mod error;
pub mod key;
pub mod queue;
pub mod remote;
pub mod storage;
pub mod sync;

pub use config::SyncConfig;
pub use error::{ConfigError, PersistError, RemoteError, SyncError};
pub use key::{CacheKey, Scope};
pub use queue::{MutationKind, OfflineQueue, PendingMutation, ReplayReport};
pub use remote::{Document, DocumentStore, FieldFilter, InMemoryStore, ListQuery};
pub use sync::{
  is_placeholder_id, CacheResult, CacheSource, SyncCoordinator, SyncStatus, WriteOp, WriteOutcome,
};
