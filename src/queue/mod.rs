//! Durable, ordered log of writes that could not reach the remote store.
//!
//! Mutations are appended in enqueue order and persisted to durable local
//! storage before `enqueue` returns, so a process restart does not lose
//! them. Replay walks the queue in order; a mutation that fails to apply
//! is kept (appended after the still-pending set) and replay moves on, so
//! one bad mutation never blocks the rest of the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{PersistError, RemoteError};
use crate::key::Scope;
use crate::storage::BlobStore;

/// Kind of queued write operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
  Create,
  Update,
  Delete,
}

/// A write recorded while the remote store was unreachable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingMutation {
  /// Unique id of the queue entry itself.
  pub id: String,
  pub kind: MutationKind,
  pub scope: Scope,
  pub collection: String,
  /// Target document id. Absent for `Create`.
  pub doc_id: Option<String>,
  /// Client-generated placeholder id handed to the caller of an offline
  /// `Create`; replay maps it to the remote-assigned id.
  pub local_id: Option<String>,
  /// New document payload. Absent for `Delete`.
  pub payload: Option<Value>,
  pub enqueued_at: DateTime<Utc>,
}

impl PendingMutation {
  pub fn new(
    kind: MutationKind,
    scope: Scope,
    collection: impl Into<String>,
    doc_id: Option<String>,
    local_id: Option<String>,
    payload: Option<Value>,
  ) -> Self {
    Self {
      id: Uuid::new_v4().to_string(),
      kind,
      scope,
      collection: collection.into(),
      doc_id,
      local_id,
      payload,
      enqueued_at: Utc::now(),
    }
  }
}

/// Counts from one replay pass. Failed mutations remain queued for the
/// next connectivity transition; this is not an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
  pub applied: usize,
  pub failed: usize,
}

/// Ordered, durably persisted mutation log.
pub struct OfflineQueue {
  storage: Arc<dyn BlobStore>,
  storage_key: String,
  pending: Vec<PendingMutation>,
}

impl OfflineQueue {
  /// Create a queue persisting under the well-known key for a tenant.
  pub fn new(storage: Arc<dyn BlobStore>, tenant: &str) -> Self {
    Self {
      storage,
      storage_key: format!("offsync:queue:{}", tenant),
      pending: Vec::new(),
    }
  }

  /// Restore the queue from durable storage. Runs at process start,
  /// before any replay.
  ///
  /// Absent or corrupt storage falls back to an empty queue: this is a
  /// best-effort offline buffer, not a transaction log.
  pub fn load(&mut self) -> usize {
    self.pending = match self.storage.read_blob(&self.storage_key) {
      Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
        Ok(pending) => pending,
        Err(e) => {
          warn!(key = %self.storage_key, error = %e, "corrupt queue log, starting empty");
          Vec::new()
        }
      },
      Ok(None) => Vec::new(),
      Err(e) => {
        warn!(key = %self.storage_key, error = %e, "unreadable queue log, starting empty");
        Vec::new()
      }
    };
    debug!(key = %self.storage_key, count = self.pending.len(), "loaded offline queue");
    self.pending.len()
  }

  /// Append a mutation and persist the full queue before returning.
  ///
  /// On a persistence failure the mutation is still accepted into the
  /// in-memory queue; the error warns the caller that durability is not
  /// guaranteed.
  pub fn enqueue(&mut self, mutation: PendingMutation) -> Result<(), PersistError> {
    debug!(
      kind = ?mutation.kind,
      collection = %mutation.collection,
      "enqueueing offline mutation"
    );
    self.pending.push(mutation);
    self.persist()
  }

  /// Replay the queue in enqueue order, applying each mutation against
  /// the remote store via `apply`.
  ///
  /// Each success removes its mutation and re-persists; each failure
  /// keeps the mutation and continues with the next one.
  pub async fn replay<F, Fut>(&mut self, mut apply: F) -> ReplayReport
  where
    F: FnMut(PendingMutation) -> Fut,
    Fut: Future<Output = Result<(), RemoteError>>,
  {
    let batch = self.snapshot_ids();
    let mut report = ReplayReport::default();

    for id in batch {
      let Some(mutation) = self.get(&id) else {
        continue;
      };
      match apply(mutation).await {
        Ok(()) => {
          report.applied += 1;
          if let Err(e) = self.confirm(&id) {
            warn!(error = %e, "failed to persist queue after apply");
          }
        }
        Err(e) => {
          warn!(
            mutation_id = %id,
            error = %e,
            "mutation failed to apply, keeping for next replay"
          );
          report.failed += 1;
          if let Err(e) = self.defer(&id) {
            warn!(error = %e, "failed to persist queue after defer");
          }
        }
      }
    }

    debug!(applied = report.applied, failed = report.failed, "replay pass complete");
    report
  }

  /// Ids of the pending mutations, in enqueue order. A replay pass takes
  /// this snapshot up front so mutations arriving mid-pass wait for the
  /// next pass.
  pub fn snapshot_ids(&self) -> Vec<String> {
    self.pending.iter().map(|m| m.id.clone()).collect()
  }

  /// Clone one pending mutation by queue-entry id.
  pub fn get(&self, id: &str) -> Option<PendingMutation> {
    self.pending.iter().find(|m| m.id == id).cloned()
  }

  /// Remove a successfully applied mutation and re-persist, so a crash
  /// mid-replay does not resurrect it.
  pub fn confirm(&mut self, id: &str) -> Result<(), PersistError> {
    self.pending.retain(|m| m.id != id);
    self.persist()
  }

  /// Move a failed mutation behind the still-pending set and re-persist;
  /// it is retried on a later replay pass.
  pub fn defer(&mut self, id: &str) -> Result<(), PersistError> {
    if let Some(pos) = self.pending.iter().position(|m| m.id == id) {
      let mutation = self.pending.remove(pos);
      self.pending.push(mutation);
    }
    self.persist()
  }

  /// Number of pending mutations.
  pub fn len(&self) -> usize {
    self.pending.len()
  }

  pub fn is_empty(&self) -> bool {
    self.pending.is_empty()
  }

  /// Number of pending mutations within one scope.
  pub fn len_for_scope(&self, scope: &Scope) -> usize {
    self.pending.iter().filter(|m| &m.scope == scope).count()
  }

  /// Pending mutations in enqueue order.
  pub fn pending(&self) -> &[PendingMutation] {
    &self.pending
  }

  fn persist(&self) -> Result<(), PersistError> {
    let bytes = serde_json::to_vec(&self.pending)?;
    self.storage.write_blob(&self.storage_key, &bytes)
  }
}
