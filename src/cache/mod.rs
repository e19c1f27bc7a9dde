//! In-memory TTL cache in front of the remote document store.
//!
//! Pure data structure: signals only via absence, never via error.
//! Expired entries are treated as absent and lazily evicted on lookup;
//! the coordinator may still observe the evicted value once, to soft-fail
//! to stale data when the remote store is unreachable.

mod store;

pub use store::{CacheStore, CachedValue, Lookup};
