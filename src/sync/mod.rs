//! Sync coordinator: the single entry point for reads and writes.
//!
//! Reads are cache-first with remote fallback; when the remote store
//! fails and only an expired entry exists, the stale value is served
//! instead of an error. Writes go remote-first while online and fall back
//! to the offline queue on any transient failure; queued writes update
//! the single-document cache entry optimistically and invalidate the
//! collection's cached lists. An offline→online transition triggers
//! exactly one replay pass; a replay already in progress suppresses the
//! trigger and runs a follow-up pass once it completes. Replay applies
//! queued mutations one at a time and holds the queue lock only for
//! bookkeeping, so reads, writes, and status queries stay responsive
//! while a pass is in flight.

use chrono::Utc;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{CacheStore, CachedValue, Lookup};
use crate::config::SyncConfig;
use crate::error::{RemoteError, SyncError};
use crate::key::{CacheKey, Scope};
use crate::queue::{MutationKind, OfflineQueue, PendingMutation, ReplayReport};
use crate::remote::{Document, DocumentStore, ListQuery};
use crate::storage::BlobStore;

/// Prefix distinguishing client-generated placeholder ids from
/// remote-assigned ones.
const PLACEHOLDER_PREFIX: &str = "local_";

/// Where read data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from the remote store.
  Network,
  /// Data from cache, still fresh.
  CacheFresh,
  /// Expired cache data served because the remote store failed.
  CacheStale,
  /// Offline; serving whatever the cache has (possibly nothing).
  Offline,
}

/// A read result plus metadata about where it came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  pub data: T,
  pub source: CacheSource,
}

impl<T> CacheResult<T> {
  fn network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
    }
  }

  fn fresh(data: T) -> Self {
    Self {
      data,
      source: CacheSource::CacheFresh,
    }
  }

  fn stale(data: T) -> Self {
    Self {
      data,
      source: CacheSource::CacheStale,
    }
  }

  fn offline(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
    }
  }
}

/// A write operation against a collection.
#[derive(Debug, Clone)]
pub enum WriteOp {
  Create { payload: Value },
  Update { id: String, payload: Value },
  Delete { id: String },
}

impl WriteOp {
  fn target_id(&self) -> Option<&str> {
    match self {
      Self::Create { .. } => None,
      Self::Update { id, .. } | Self::Delete { id } => Some(id),
    }
  }
}

/// Result of a write: the document id (remote-assigned, or a placeholder
/// for an offline create) and whether the write is still pending replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
  pub id: String,
  pub pending: bool,
  /// Whether the write survives a process restart. True for applied
  /// remote writes and for queued mutations that reached durable
  /// storage; false when persisting the queue failed and the mutation
  /// lives only in memory.
  pub durable: bool,
}

/// Connectivity flag and pending-mutation count, for UI display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncStatus {
  pub online: bool,
  pub pending_count: usize,
}

/// Orchestrates the cache store, the offline queue, and the remote
/// document store. One instance per tenant session; callers share it by
/// reference.
pub struct SyncCoordinator {
  remote: Arc<dyn DocumentStore>,
  cache: StdMutex<CacheStore>,
  queue: AsyncMutex<OfflineQueue>,
  online: AtomicBool,
  /// Serializes replay passes against each other.
  replay_gate: AsyncMutex<()>,
  /// A connectivity event arrived while a replay was running.
  replay_requested: AtomicBool,
  /// Placeholder id → remote-assigned id, filled in by replay.
  id_map: Arc<StdMutex<HashMap<String, String>>>,
  replay_tx: broadcast::Sender<ReplayReport>,
  config: SyncConfig,
}

impl SyncCoordinator {
  /// Create a coordinator for one tenant session, restoring any queued
  /// mutations from durable storage.
  pub fn new(
    remote: Arc<dyn DocumentStore>,
    storage: Arc<dyn BlobStore>,
    tenant: &str,
    config: SyncConfig,
  ) -> Self {
    let mut queue = OfflineQueue::new(storage, tenant);
    let restored = queue.load();
    if restored > 0 {
      info!(count = restored, "restored pending offline mutations");
    }

    let (replay_tx, _) = broadcast::channel(16);

    Self {
      remote,
      cache: StdMutex::new(CacheStore::new()),
      queue: AsyncMutex::new(queue),
      online: AtomicBool::new(config.assume_online),
      replay_gate: AsyncMutex::new(()),
      replay_requested: AtomicBool::new(false),
      id_map: Arc::new(StdMutex::new(HashMap::new())),
      replay_tx,
      config,
    }
  }

  // ==========================================================================
  // Connectivity
  // ==========================================================================

  pub fn is_online(&self) -> bool {
    self.online.load(Ordering::SeqCst)
  }

  /// Apply an external connectivity signal.
  ///
  /// Offline→online replays the queue before returning. An online report
  /// while already online still replays if mutations are waiting, so a
  /// queue restored at startup drains without needing a flap.
  /// Online→offline only flips the flag; in-flight remote calls fail
  /// naturally.
  pub async fn set_online(&self, online: bool) {
    let was = self.online.swap(online, Ordering::SeqCst);

    if online {
      if !was {
        info!("connectivity restored, replaying offline queue");
        self.run_replay().await;
      } else if !self.queue.lock().await.is_empty() {
        self.run_replay().await;
      }
    } else if was {
      info!("connectivity lost, writes will queue");
    }
  }

  /// Connectivity flag and pending count for one scope.
  pub async fn sync_status(&self, scope: &Scope) -> SyncStatus {
    let queue = self.queue.lock().await;
    SyncStatus {
      online: self.is_online(),
      pending_count: queue.len_for_scope(scope),
    }
  }

  /// Subscribe to replay-pass completions, for UI refresh.
  pub fn subscribe_replay(&self) -> broadcast::Receiver<ReplayReport> {
    self.replay_tx.subscribe()
  }

  /// Resolve a placeholder id to the remote-assigned id, once a replay
  /// has applied the corresponding create.
  pub fn resolve_id(&self, placeholder: &str) -> Option<String> {
    self
      .id_map
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .get(placeholder)
      .cloned()
  }

  // ==========================================================================
  // Read path
  // ==========================================================================

  /// Read a single document, cache-first.
  pub async fn read_one(
    &self,
    scope: &Scope,
    collection: &str,
    id: &str,
  ) -> Result<CacheResult<Option<Document>>, SyncError> {
    check_key(scope, collection)?;
    check_id(id)?;

    let key = CacheKey::doc(scope, collection, id);
    let stale = match self.lock_cache().lookup(&key) {
      Lookup::Hit(CachedValue::One(doc)) => return Ok(CacheResult::fresh(Some(doc))),
      Lookup::Expired(CachedValue::One(doc)) => Some(doc),
      _ => None,
    };

    if !self.is_online() {
      // Never block on connectivity; absence is a valid offline answer.
      return Ok(CacheResult::offline(stale));
    }

    match self
      .with_timeout(self.remote.fetch_one(scope, collection, id))
      .await
    {
      Ok(found) => {
        if let Some(doc) = &found {
          self
            .lock_cache()
            .put(&key, CachedValue::One(doc.clone()), self.config.cache_ttl());
        }
        Ok(CacheResult::network(found))
      }
      Err(e) => match stale {
        Some(doc) => {
          debug!(key = %key, error = %e, "remote failed, serving stale document");
          Ok(CacheResult::stale(Some(doc)))
        }
        None => Err(e.into()),
      },
    }
  }

  /// Read a list-query result, cache-first.
  pub async fn read_list(
    &self,
    scope: &Scope,
    collection: &str,
    query: &ListQuery,
  ) -> Result<CacheResult<Vec<Document>>, SyncError> {
    check_key(scope, collection)?;

    let key = CacheKey::list(scope, collection, query);
    let stale = match self.lock_cache().lookup(&key) {
      Lookup::Hit(CachedValue::Many(docs)) => return Ok(CacheResult::fresh(docs)),
      Lookup::Expired(CachedValue::Many(docs)) => Some(docs),
      _ => None,
    };

    if !self.is_online() {
      return Ok(CacheResult::offline(stale.unwrap_or_default()));
    }

    match self
      .with_timeout(self.remote.fetch_list(scope, collection, query))
      .await
    {
      Ok(docs) => {
        self.lock_cache().put(
          &key,
          CachedValue::Many(docs.clone()),
          self.config.cache_ttl(),
        );
        Ok(CacheResult::network(docs))
      }
      Err(e) => match stale {
        Some(docs) => {
          debug!(key = %key, error = %e, "remote failed, serving stale list");
          Ok(CacheResult::stale(docs))
        }
        None => Err(e.into()),
      },
    }
  }

  // ==========================================================================
  // Write path
  // ==========================================================================

  /// Apply a write: remote-first while online, queued otherwise.
  pub async fn write(
    &self,
    scope: &Scope,
    collection: &str,
    op: WriteOp,
  ) -> Result<WriteOutcome, SyncError> {
    check_key(scope, collection)?;
    match &op {
      WriteOp::Create { payload } | WriteOp::Update { payload, .. } => check_payload(payload)?,
      WriteOp::Delete { .. } => {}
    }
    if let Some(id) = op.target_id() {
      check_id(id)?;
    }

    // A write against a placeholder id whose create has already been
    // replayed is retargeted at the remote-assigned id.
    let op = self.retarget(op);

    if let Some(id) = op.target_id() {
      if is_placeholder_id(id) {
        // The target does not exist remotely yet; queue behind its create.
        return self.enqueue_write(scope, collection, op).await;
      }
    }

    if self.is_online() {
      match self.apply_remote(scope, collection, &op).await {
        Ok(id) => {
          self.update_cache_after_write(scope, collection, &op, &id);
          return Ok(WriteOutcome {
            id,
            pending: false,
            durable: true,
          });
        }
        Err(e) => {
          warn!(collection = %collection, error = %e, "remote write failed, queueing");
        }
      }
    }

    self.enqueue_write(scope, collection, op).await
  }

  async fn apply_remote(
    &self,
    scope: &Scope,
    collection: &str,
    op: &WriteOp,
  ) -> Result<String, RemoteError> {
    match op {
      WriteOp::Create { payload } => {
        self
          .with_timeout(self.remote.create_doc(scope, collection, payload.clone()))
          .await
      }
      WriteOp::Update { id, payload } => {
        self
          .with_timeout(self.remote.update_doc(scope, collection, id, payload.clone()))
          .await?;
        Ok(id.clone())
      }
      WriteOp::Delete { id } => {
        self
          .with_timeout(self.remote.delete_doc(scope, collection, id))
          .await?;
        Ok(id.clone())
      }
    }
  }

  fn update_cache_after_write(&self, scope: &Scope, collection: &str, op: &WriteOp, id: &str) {
    let mut cache = self.lock_cache();
    let doc_key = CacheKey::doc(scope, collection, id);
    match op {
      WriteOp::Create { payload } | WriteOp::Update { payload, .. } => {
        cache.put(
          &doc_key,
          CachedValue::One(Document::new(id, payload.clone())),
          self.config.cache_ttl(),
        );
      }
      WriteOp::Delete { .. } => cache.invalidate(&doc_key),
    }
    // Any cached list of this collection is now stale.
    cache.invalidate_prefix(&CacheKey::list_prefix(scope, collection));
  }

  async fn enqueue_write(
    &self,
    scope: &Scope,
    collection: &str,
    op: WriteOp,
  ) -> Result<WriteOutcome, SyncError> {
    let (kind, doc_id, local_id, payload, outcome_id) = match op {
      WriteOp::Create { payload } => {
        let placeholder = new_placeholder_id();
        (
          MutationKind::Create,
          None,
          Some(placeholder.clone()),
          Some(payload),
          placeholder,
        )
      }
      WriteOp::Update { id, payload } => {
        (MutationKind::Update, Some(id.clone()), None, Some(payload), id)
      }
      WriteOp::Delete { id } => (MutationKind::Delete, Some(id.clone()), None, None, id),
    };

    let mutation = PendingMutation::new(
      kind,
      scope.clone(),
      collection,
      doc_id,
      local_id,
      payload.clone(),
    );

    let durable = {
      let mut queue = self.queue.lock().await;
      match queue.enqueue(mutation) {
        Ok(()) => true,
        Err(e) => {
          // Accepted in memory; the outcome tells the caller durability
          // is not guaranteed.
          warn!(collection = %collection, error = %e, "offline mutation not durably persisted");
          false
        }
      }
    };

    // Optimistic single-document entry; lists are invalidated instead and
    // refreshed on the next successful sync.
    {
      let mut cache = self.lock_cache();
      let doc_key = CacheKey::doc(scope, collection, &outcome_id);
      match kind {
        MutationKind::Create | MutationKind::Update => {
          if let Some(payload) = payload {
            cache.put(
              &doc_key,
              CachedValue::One(Document::new(outcome_id.clone(), payload)),
              self.config.cache_ttl(),
            );
          }
        }
        MutationKind::Delete => cache.invalidate(&doc_key),
      }
      cache.invalidate_prefix(&CacheKey::list_prefix(scope, collection));
    }

    Ok(WriteOutcome {
      id: outcome_id,
      pending: true,
      durable,
    })
  }

  // ==========================================================================
  // Replay
  // ==========================================================================

  async fn run_replay(&self) {
    loop {
      {
        let _gate = match self.replay_gate.try_lock() {
          Ok(gate) => gate,
          Err(_) => {
            // A pass is running; it will notice and run a follow-up.
            self.replay_requested.store(true, Ordering::SeqCst);
            debug!("replay already in progress, follow-up pass requested");
            return;
          }
        };

        loop {
          let report = self.replay_pass().await;
          let _ = self.replay_tx.send(report);

          let requested = self.replay_requested.swap(false, Ordering::SeqCst);
          // Anything beyond the kept failures arrived mid-replay.
          let new_arrivals = self.queue.lock().await.len() > report.failed;
          if !(self.is_online() && (requested || new_arrivals)) {
            break;
          }
          debug!("running follow-up replay pass");
        }
      }

      // A trigger can land between the last check and the gate release;
      // re-check with the gate dropped so it is not stranded until the
      // next connectivity flap.
      if !(self.is_online() && self.replay_requested.swap(false, Ordering::SeqCst)) {
        return;
      }
    }
  }

  async fn replay_pass(&self) -> ReplayReport {
    let limit = self.config.remote_timeout();
    let batch = self.queue.lock().await.snapshot_ids();
    let mut report = ReplayReport::default();
    let mut touched: HashSet<String> = HashSet::new();

    for id in batch {
      // Hold the queue lock only around bookkeeping; the remote call
      // runs unlocked so status queries and fallback enqueues proceed.
      let Some(mutation) = self.queue.lock().await.get(&id) else {
        continue;
      };
      let scope_prefix = format!("{}:", mutation.scope.prefix());
      let result = apply_queued(&*self.remote, &self.id_map, limit, mutation).await;

      let mut queue = self.queue.lock().await;
      match result {
        Ok(()) => {
          report.applied += 1;
          touched.insert(scope_prefix);
          if let Err(e) = queue.confirm(&id) {
            warn!(error = %e, "failed to persist queue after apply");
          }
        }
        Err(e) => {
          report.failed += 1;
          warn!(mutation_id = %id, error = %e, "mutation failed to apply, keeping for next replay");
          if let Err(e) = queue.defer(&id) {
            warn!(error = %e, "failed to persist queue after defer");
          }
        }
      }
    }

    if report.applied > 0 {
      // Conservative: drop every cache entry in a touched scope rather
      // than chasing individual keys.
      let mut cache = self.lock_cache();
      for prefix in &touched {
        cache.invalidate_prefix(prefix);
      }
    }

    report
  }

  // ==========================================================================
  // Helpers
  // ==========================================================================

  async fn with_timeout<T>(
    &self,
    fut: impl Future<Output = Result<T, RemoteError>>,
  ) -> Result<T, RemoteError> {
    let limit = self.config.remote_timeout();
    match tokio::time::timeout(limit, fut).await {
      Ok(result) => result,
      Err(_) => Err(RemoteError::Timeout(limit)),
    }
  }

  fn lock_cache(&self) -> std::sync::MutexGuard<'_, CacheStore> {
    self.cache.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Rewrite a resolved placeholder target to its remote id.
  fn retarget(&self, op: WriteOp) -> WriteOp {
    let resolve = |id: String| -> String {
      self
        .id_map
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&id)
        .cloned()
        .unwrap_or(id)
    };
    match op {
      WriteOp::Update { id, payload } => WriteOp::Update {
        id: resolve(id),
        payload,
      },
      WriteOp::Delete { id } => WriteOp::Delete { id: resolve(id) },
      create => create,
    }
  }
}

/// Apply one queued mutation against the remote store, resolving
/// placeholder targets through the reconciliation map.
async fn apply_queued(
  remote: &dyn DocumentStore,
  id_map: &StdMutex<HashMap<String, String>>,
  limit: std::time::Duration,
  mutation: PendingMutation,
) -> Result<(), RemoteError> {
  let resolve = |id: String| -> String {
    id_map
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .get(&id)
      .cloned()
      .unwrap_or(id)
  };

  let run = async {
    match mutation.kind {
      MutationKind::Create => {
        let Some(payload) = mutation.payload else {
          warn!(mutation_id = %mutation.id, "dropping queued create without payload");
          return Ok(());
        };
        let real_id = remote
          .create_doc(&mutation.scope, &mutation.collection, payload)
          .await?;
        if let Some(local) = mutation.local_id {
          debug!(placeholder = %local, remote_id = %real_id, "reconciled placeholder id");
          id_map
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(local, real_id);
        }
        Ok(())
      }
      MutationKind::Update => {
        let (Some(id), Some(payload)) = (mutation.doc_id, mutation.payload) else {
          warn!(mutation_id = %mutation.id, "dropping malformed queued update");
          return Ok(());
        };
        let id = resolve(id);
        remote
          .update_doc(&mutation.scope, &mutation.collection, &id, payload)
          .await
      }
      MutationKind::Delete => {
        let Some(id) = mutation.doc_id else {
          warn!(mutation_id = %mutation.id, "dropping queued delete without target");
          return Ok(());
        };
        let id = resolve(id);
        remote
          .delete_doc(&mutation.scope, &mutation.collection, &id)
          .await
      }
    }
  };

  match tokio::time::timeout(limit, run).await {
    Ok(result) => result,
    Err(_) => Err(RemoteError::Timeout(limit)),
  }
}

/// Generate a client-side placeholder id for an offline create.
fn new_placeholder_id() -> String {
  let suffix = Uuid::new_v4().simple().to_string();
  format!("{}{}_{}", PLACEHOLDER_PREFIX, Utc::now().timestamp(), &suffix[..8])
}

/// Whether an id is a client-generated placeholder.
pub fn is_placeholder_id(id: &str) -> bool {
  id.starts_with(PLACEHOLDER_PREFIX)
}

/// Validate one key component. `:` is the key separator, so a component
/// containing it could alias another collection's prefix.
fn check_component(kind: &str, value: &str) -> Result<(), SyncError> {
  if value.trim().is_empty() {
    return Err(SyncError::InvalidKey(format!("{} must be non-empty", kind)));
  }
  if value.contains(':') {
    return Err(SyncError::InvalidKey(format!(
      "{} must not contain ':'",
      kind
    )));
  }
  Ok(())
}

fn check_key(scope: &Scope, collection: &str) -> Result<(), SyncError> {
  check_component("scope tenant", &scope.tenant)?;
  check_component("scope module", &scope.module)?;
  check_component("collection", collection)
}

fn check_id(id: &str) -> Result<(), SyncError> {
  check_component("document id", id)
}

fn check_payload(payload: &Value) -> Result<(), SyncError> {
  if !payload.is_object() {
    return Err(SyncError::InvalidPayload(
      "payload must be a JSON object".into(),
    ));
  }
  Ok(())
}
