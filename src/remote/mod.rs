//! Remote document store collaborator.
//!
//! The sync layer is backend-agnostic: it talks to whatever implements
//! [`DocumentStore`]. A missing document is a valid empty result
//! (`Ok(None)`), distinct from a transport failure.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::error::RemoteError;
use crate::key::Scope;

/// An opaque structured record identified by a string id within a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
  pub id: String,
  pub data: Value,
}

impl Document {
  pub fn new(id: impl Into<String>, data: Value) -> Self {
    Self {
      id: id.into(),
      data,
    }
  }
}

/// Equality filter on a top-level document field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldFilter {
  pub field: String,
  pub value: Value,
}

/// Shape of a list query against a collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListQuery {
  pub filter: Option<FieldFilter>,
  pub order_by: Option<String>,
  pub limit: Option<u32>,
}

/// Capability contract against the remote document store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
  /// Fetch a single document. `Ok(None)` means not found.
  async fn fetch_one(
    &self,
    scope: &Scope,
    collection: &str,
    id: &str,
  ) -> Result<Option<Document>, RemoteError>;

  /// Fetch documents matching a query.
  async fn fetch_list(
    &self,
    scope: &Scope,
    collection: &str,
    query: &ListQuery,
  ) -> Result<Vec<Document>, RemoteError>;

  /// Create a document; the store assigns and returns its id.
  async fn create_doc(
    &self,
    scope: &Scope,
    collection: &str,
    payload: Value,
  ) -> Result<String, RemoteError>;

  /// Replace a document's payload.
  async fn update_doc(
    &self,
    scope: &Scope,
    collection: &str,
    id: &str,
    payload: Value,
  ) -> Result<(), RemoteError>;

  /// Delete a document.
  async fn delete_doc(&self, scope: &Scope, collection: &str, id: &str)
    -> Result<(), RemoteError>;
}

/// In-memory document store.
///
/// Backs tests and local development when no real backend is wired in;
/// collections live in a map keyed by `scope:collection`.
#[derive(Default)]
pub struct InMemoryStore {
  collections: Mutex<HashMap<String, Vec<Document>>>,
  next_id: AtomicU64,
}

impl InMemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn bucket_key(scope: &Scope, collection: &str) -> String {
    format!("{}:{}", scope.prefix(), collection)
  }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
  async fn fetch_one(
    &self,
    scope: &Scope,
    collection: &str,
    id: &str,
  ) -> Result<Option<Document>, RemoteError> {
    let collections = self
      .collections
      .lock()
      .map_err(|e| RemoteError::Transport(format!("lock poisoned: {}", e)))?;
    Ok(
      collections
        .get(&Self::bucket_key(scope, collection))
        .and_then(|docs| docs.iter().find(|d| d.id == id).cloned()),
    )
  }

  async fn fetch_list(
    &self,
    scope: &Scope,
    collection: &str,
    query: &ListQuery,
  ) -> Result<Vec<Document>, RemoteError> {
    let collections = self
      .collections
      .lock()
      .map_err(|e| RemoteError::Transport(format!("lock poisoned: {}", e)))?;
    let mut docs: Vec<Document> = collections
      .get(&Self::bucket_key(scope, collection))
      .cloned()
      .unwrap_or_default();

    if let Some(filter) = &query.filter {
      docs.retain(|d| d.data.get(&filter.field) == Some(&filter.value));
    }
    if let Some(field) = &query.order_by {
      docs.sort_by(|a, b| {
        let av = a.data.get(field).map(|v| v.to_string()).unwrap_or_default();
        let bv = b.data.get(field).map(|v| v.to_string()).unwrap_or_default();
        av.cmp(&bv)
      });
    }
    if let Some(limit) = query.limit {
      docs.truncate(limit as usize);
    }

    Ok(docs)
  }

  async fn create_doc(
    &self,
    scope: &Scope,
    collection: &str,
    payload: Value,
  ) -> Result<String, RemoteError> {
    let id = format!("doc_{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
    let mut collections = self
      .collections
      .lock()
      .map_err(|e| RemoteError::Transport(format!("lock poisoned: {}", e)))?;
    collections
      .entry(Self::bucket_key(scope, collection))
      .or_default()
      .push(Document::new(id.clone(), payload));
    Ok(id)
  }

  async fn update_doc(
    &self,
    scope: &Scope,
    collection: &str,
    id: &str,
    payload: Value,
  ) -> Result<(), RemoteError> {
    let mut collections = self
      .collections
      .lock()
      .map_err(|e| RemoteError::Transport(format!("lock poisoned: {}", e)))?;
    let docs = collections
      .get_mut(&Self::bucket_key(scope, collection))
      .ok_or_else(|| RemoteError::Transport(format!("no such collection: {}", collection)))?;
    match docs.iter_mut().find(|d| d.id == id) {
      Some(doc) => {
        doc.data = payload;
        Ok(())
      }
      None => Err(RemoteError::Transport(format!("no such document: {}", id))),
    }
  }

  async fn delete_doc(
    &self,
    scope: &Scope,
    collection: &str,
    id: &str,
  ) -> Result<(), RemoteError> {
    let mut collections = self
      .collections
      .lock()
      .map_err(|e| RemoteError::Transport(format!("lock poisoned: {}", e)))?;
    if let Some(docs) = collections.get_mut(&Self::bucket_key(scope, collection)) {
      docs.retain(|d| d.id != id);
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[tokio::test]
  async fn test_create_then_fetch_one() {
    let store = InMemoryStore::new();
    let scope = Scope::new("acme", "crm");

    let id = store
      .create_doc(&scope, "clients", json!({"name": "Ana"}))
      .await
      .unwrap();

    let doc = store.fetch_one(&scope, "clients", &id).await.unwrap();
    assert_eq!(doc.unwrap().data["name"], "Ana");
  }

  #[tokio::test]
  async fn test_fetch_one_missing_is_none_not_error() {
    let store = InMemoryStore::new();
    let scope = Scope::new("acme", "crm");
    let doc = store.fetch_one(&scope, "clients", "nope").await.unwrap();
    assert!(doc.is_none());
  }

  #[tokio::test]
  async fn test_fetch_list_filter_and_limit() {
    let store = InMemoryStore::new();
    let scope = Scope::new("acme", "crm");
    for city in ["porto", "lisbon", "porto"] {
      store
        .create_doc(&scope, "clients", json!({"city": city}))
        .await
        .unwrap();
    }

    let query = ListQuery {
      filter: Some(FieldFilter {
        field: "city".into(),
        value: json!("porto"),
      }),
      order_by: None,
      limit: Some(1),
    };
    let docs = store.fetch_list(&scope, "clients", &query).await.unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].data["city"], "porto");
  }

  #[tokio::test]
  async fn test_scopes_are_isolated() {
    let store = InMemoryStore::new();
    let a = Scope::new("acme", "crm");
    let b = Scope::new("other", "crm");
    store
      .create_doc(&a, "clients", json!({"name": "Ana"}))
      .await
      .unwrap();

    let docs = store
      .fetch_list(&b, "clients", &ListQuery::default())
      .await
      .unwrap();
    assert!(docs.is_empty());
  }
}
