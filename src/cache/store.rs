//! TTL'd key/value store with prefix invalidation.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing::debug;

use crate::key::CacheKey;
use crate::remote::Document;

/// What a cache entry holds: a single document or a list-query result.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue {
  One(Document),
  Many(Vec<Document>),
}

/// A cached value with its write time and time-to-live.
///
/// Entries are never mutated in place; a write replaces the whole entry.
#[derive(Debug, Clone)]
struct CacheEntry {
  value: CachedValue,
  written_at: DateTime<Utc>,
  ttl: Duration,
}

impl CacheEntry {
  fn is_fresh(&self, now: DateTime<Utc>) -> bool {
    now - self.written_at <= self.ttl
  }
}

/// Outcome of a cache lookup.
#[derive(Debug, Clone)]
pub enum Lookup {
  /// Present and unexpired.
  Hit(CachedValue),
  /// Present but expired; the entry has been evicted, the value is
  /// handed back once so the caller can soft-fail to stale data.
  Expired(CachedValue),
  /// Not present.
  Miss,
}

/// In-memory cache keyed by rendered [`CacheKey`] strings.
///
/// Single-session cache owned by one coordinator; prefix invalidation is
/// a linear scan, which is acceptable at this size.
#[derive(Debug, Default)]
pub struct CacheStore {
  entries: HashMap<String, CacheEntry>,
}

impl CacheStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Look up a key, evicting it if expired.
  pub fn lookup(&mut self, key: &CacheKey) -> Lookup {
    let rendered = key.render();
    let fresh = match self.entries.get(&rendered) {
      Some(entry) => entry.is_fresh(Utc::now()),
      None => return Lookup::Miss,
    };

    if fresh {
      debug!(key = %rendered, "cache hit");
      // Presence checked above.
      match self.entries.get(&rendered) {
        Some(entry) => Lookup::Hit(entry.value.clone()),
        None => Lookup::Miss,
      }
    } else {
      debug!(key = %rendered, "cache entry expired, evicting");
      match self.entries.remove(&rendered) {
        Some(entry) => Lookup::Expired(entry.value),
        None => Lookup::Miss,
      }
    }
  }

  /// Like [`lookup`](Self::lookup), collapsing expired entries to a miss.
  pub fn get(&mut self, key: &CacheKey) -> Option<CachedValue> {
    match self.lookup(key) {
      Lookup::Hit(value) => Some(value),
      Lookup::Expired(_) | Lookup::Miss => None,
    }
  }

  /// Unconditionally replace any existing entry.
  pub fn put(&mut self, key: &CacheKey, value: CachedValue, ttl: Duration) {
    self.entries.insert(
      key.render(),
      CacheEntry {
        value,
        written_at: Utc::now(),
        ttl,
      },
    );
  }

  /// Remove one entry.
  pub fn invalidate(&mut self, key: &CacheKey) {
    self.entries.remove(&key.render());
  }

  /// Remove all entries whose rendered key starts with the given prefix.
  pub fn invalidate_prefix(&mut self, prefix: &str) {
    let before = self.entries.len();
    self.entries.retain(|key, _| !key.starts_with(prefix));
    let dropped = before - self.entries.len();
    if dropped > 0 {
      debug!(prefix = %prefix, dropped, "invalidated cache prefix");
    }
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Backdate an entry's write time, for expiry tests.
  #[cfg(test)]
  fn age_entry(&mut self, key: &CacheKey, by: Duration) {
    if let Some(entry) = self.entries.get_mut(&key.render()) {
      entry.written_at -= by;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::key::Scope;
  use crate::remote::ListQuery;
  use serde_json::json;

  fn doc(id: &str) -> Document {
    Document::new(id, json!({"name": id}))
  }

  fn scope() -> Scope {
    Scope::new("acme", "crm")
  }

  #[test]
  fn test_put_then_get_returns_value() {
    let mut cache = CacheStore::new();
    let key = CacheKey::doc(&scope(), "clients", "c1");

    cache.put(&key, CachedValue::One(doc("c1")), Duration::minutes(5));

    assert_eq!(cache.get(&key), Some(CachedValue::One(doc("c1"))));
  }

  #[test]
  fn test_expired_entry_is_absent_and_evicted() {
    let mut cache = CacheStore::new();
    let key = CacheKey::doc(&scope(), "clients", "c1");

    cache.put(&key, CachedValue::One(doc("c1")), Duration::minutes(5));
    cache.age_entry(&key, Duration::minutes(6));

    assert!(cache.get(&key).is_none());
    assert!(cache.is_empty());
  }

  #[test]
  fn test_lookup_hands_back_expired_value_once() {
    let mut cache = CacheStore::new();
    let key = CacheKey::doc(&scope(), "clients", "c1");

    cache.put(&key, CachedValue::One(doc("c1")), Duration::minutes(5));
    cache.age_entry(&key, Duration::minutes(6));

    match cache.lookup(&key) {
      Lookup::Expired(CachedValue::One(d)) => assert_eq!(d.id, "c1"),
      other => panic!("expected Expired, got {:?}", other),
    }
    // Second lookup: evicted.
    assert!(matches!(cache.lookup(&key), Lookup::Miss));
  }

  #[test]
  fn test_put_replaces_whole_value() {
    let mut cache = CacheStore::new();
    let key = CacheKey::doc(&scope(), "clients", "c1");

    cache.put(&key, CachedValue::One(doc("c1")), Duration::minutes(5));
    let updated = Document::new("c1", json!({"name": "renamed"}));
    cache.put(
      &key,
      CachedValue::One(updated.clone()),
      Duration::minutes(5),
    );

    assert_eq!(cache.get(&key), Some(CachedValue::One(updated)));
    assert_eq!(cache.len(), 1);
  }

  #[test]
  fn test_invalidate_prefix_drops_list_variants_only() {
    let mut cache = CacheStore::new();
    let s = scope();
    let doc_key = CacheKey::doc(&s, "clients", "c1");
    let list_all = CacheKey::list(&s, "clients", &ListQuery::default());
    let list_limited = CacheKey::list(
      &s,
      "clients",
      &ListQuery {
        limit: Some(3),
        ..Default::default()
      },
    );
    let other_list = CacheKey::list(&s, "suppliers", &ListQuery::default());

    cache.put(&doc_key, CachedValue::One(doc("c1")), Duration::minutes(5));
    cache.put(&list_all, CachedValue::Many(vec![]), Duration::minutes(5));
    cache.put(&list_limited, CachedValue::Many(vec![]), Duration::minutes(5));
    cache.put(&other_list, CachedValue::Many(vec![]), Duration::minutes(5));

    cache.invalidate_prefix(&CacheKey::list_prefix(&s, "clients"));

    assert!(cache.get(&doc_key).is_some());
    assert!(cache.get(&list_all).is_none());
    assert!(cache.get(&list_limited).is_none());
    assert!(cache.get(&other_list).is_some());
  }

  #[test]
  fn test_invalidate_scope_prefix_drops_everything_in_scope() {
    let mut cache = CacheStore::new();
    let s = scope();
    let other = Scope::new("other", "crm");
    let in_scope = CacheKey::doc(&s, "clients", "c1");
    let out_of_scope = CacheKey::doc(&other, "clients", "c1");

    cache.put(&in_scope, CachedValue::One(doc("c1")), Duration::minutes(5));
    cache.put(
      &out_of_scope,
      CachedValue::One(doc("c1")),
      Duration::minutes(5),
    );

    cache.invalidate_prefix(&s.prefix());

    assert!(cache.get(&in_scope).is_none());
    assert!(cache.get(&out_of_scope).is_some());
  }
}
