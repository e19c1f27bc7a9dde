//! Cache key types: tenant/module scope plus collection and target.
//!
//! A single-document fetch is keyed by its document id; a list query is
//! keyed by a SHA-256 hash of the query shape so differently filtered
//! lists cache independently. Both live under the same collection prefix,
//! which is what collection-level invalidation matches on.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::remote::ListQuery;

/// Tenant/company + module namespace under which collections are partitioned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
  pub tenant: String,
  pub module: String,
}

impl Scope {
  pub fn new(tenant: impl Into<String>, module: impl Into<String>) -> Self {
    Self {
      tenant: tenant.into(),
      module: module.into(),
    }
  }

  /// Key prefix shared by every entry in this scope.
  pub fn prefix(&self) -> String {
    format!("{}:{}", self.tenant, self.module)
  }
}

impl fmt::Display for Scope {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.tenant, self.module)
  }
}

/// What a cache key points at within a collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Target {
  /// A single document by id.
  Doc(String),
  /// A list-query result, identified by the hash of its query shape.
  List(String),
}

/// Composite cache key: scope + collection + document id or list-query hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
  scope: Scope,
  collection: String,
  target: Target,
}

impl CacheKey {
  /// Key for a single document.
  pub fn doc(scope: &Scope, collection: &str, id: &str) -> Self {
    Self {
      scope: scope.clone(),
      collection: collection.to_string(),
      target: Target::Doc(id.to_string()),
    }
  }

  /// Key for a list-query result.
  pub fn list(scope: &Scope, collection: &str, query: &ListQuery) -> Self {
    Self {
      scope: scope.clone(),
      collection: collection.to_string(),
      target: Target::List(query_hash(query)),
    }
  }

  /// Rendered string form, used as the storage key.
  pub fn render(&self) -> String {
    match &self.target {
      Target::Doc(id) => format!("{}:{}:doc:{}", self.scope.prefix(), self.collection, id),
      Target::List(hash) => format!("{}:{}:list:{}", self.scope.prefix(), self.collection, hash),
    }
  }

  /// Prefix matching every cached list variant of a collection.
  ///
  /// A write to any document in the collection invalidates this prefix,
  /// since every cached list result is now stale.
  pub fn list_prefix(scope: &Scope, collection: &str) -> String {
    format!("{}:{}:list:", scope.prefix(), collection)
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.render())
  }
}

/// SHA-256 hash of the query shape, for stable fixed-length keys.
fn query_hash(query: &ListQuery) -> String {
  let input = serde_json::to_string(query).unwrap_or_default();
  let mut hasher = Sha256::new();
  hasher.update(input.as_bytes());
  hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_doc_key_render() {
    let scope = Scope::new("acme", "crm");
    let key = CacheKey::doc(&scope, "clients", "c1");
    assert_eq!(key.render(), "acme:crm:clients:doc:c1");
  }

  #[test]
  fn test_list_keys_differ_by_query() {
    let scope = Scope::new("acme", "crm");
    let all = CacheKey::list(&scope, "clients", &ListQuery::default());
    let limited = CacheKey::list(
      &scope,
      "clients",
      &ListQuery {
        limit: Some(10),
        ..Default::default()
      },
    );
    assert_ne!(all.render(), limited.render());
  }

  #[test]
  fn test_list_keys_share_collection_prefix() {
    let scope = Scope::new("acme", "crm");
    let key = CacheKey::list(&scope, "clients", &ListQuery::default());
    assert!(key
      .render()
      .starts_with(&CacheKey::list_prefix(&scope, "clients")));
  }

  #[test]
  fn test_doc_key_not_under_list_prefix() {
    let scope = Scope::new("acme", "crm");
    let key = CacheKey::doc(&scope, "clients", "c1");
    assert!(!key
      .render()
      .starts_with(&CacheKey::list_prefix(&scope, "clients")));
  }
}
