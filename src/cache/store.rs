//! In-memory cache store keyed by resource name.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use super::clock::{Clock, SystemClock};
use super::registry::ResourceRegistry;
use super::storage::{CacheStorage, NoopStorage};
use super::traits::Shape;

/// What to do when a caller names a key that is not registered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KeyPolicy {
  /// Log a warning and do nothing
  #[default]
  Lenient,
  /// Panic, so a typo fails the test suite instead of silently missing
  Strict,
}

/// One cached resource.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
  pub key: String,
  pub data: Option<Value>,
  pub fetched_at: Option<DateTime<Utc>>,
  pub ttl: Duration,
}

impl CacheEntry {
  fn empty(key: &str, ttl: Duration) -> Self {
    Self {
      key: key.to_string(),
      data: None,
      fetched_at: None,
      ttl,
    }
  }

  /// Data is present and younger than the TTL.
  pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
    match (&self.data, self.fetched_at) {
      (Some(_), Some(fetched_at)) => now - fetched_at < self.ttl,
      _ => false,
    }
  }
}

/// Handle for one in-flight fetch of a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
  pub key: String,
  pub seq: u64,
}

struct StoreInner {
  entries: HashMap<String, CacheEntry>,
  /// Last request sequence number issued per key
  issued: HashMap<String, u64>,
}

/// Shared cache of resource payloads.
///
/// Cloning is cheap and every clone sees the same entries. The lock is held
/// for one map operation and its write-through to storage, never across an
/// await, so storage sees writes in the same order as memory.
#[derive(Clone)]
pub struct CacheStore {
  inner: Arc<Mutex<StoreInner>>,
  registry: Arc<ResourceRegistry>,
  clock: Arc<dyn Clock>,
  storage: Arc<dyn CacheStorage>,
  policy: KeyPolicy,
}

impl CacheStore {
  /// Create a store with one empty entry per registered key.
  pub fn new(registry: ResourceRegistry) -> Self {
    let entries = registry
      .iter()
      .map(|spec| (spec.key.clone(), CacheEntry::empty(&spec.key, spec.ttl)))
      .collect();

    Self {
      inner: Arc::new(Mutex::new(StoreInner {
        entries,
        issued: HashMap::new(),
      })),
      registry: Arc::new(registry),
      clock: Arc::new(SystemClock),
      storage: Arc::new(NoopStorage),
      policy: KeyPolicy::default(),
    }
  }

  /// Use a different time source.
  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  pub fn with_policy(mut self, policy: KeyPolicy) -> Self {
    self.policy = policy;
    self
  }

  /// Persist entries to `storage` and load whatever it already holds.
  ///
  /// Hydrated entries keep their original `fetched_at`, so expired ones are
  /// misses but still serve as the offline fallback.
  pub fn with_storage(mut self, storage: Arc<dyn CacheStorage>) -> Self {
    match storage.load_all() {
      Ok(stored) => {
        let mut inner = self.lock();
        for entry in stored {
          if let Some(slot) = inner.entries.get_mut(&entry.key) {
            slot.data = Some(entry.data);
            slot.fetched_at = Some(entry.fetched_at);
          }
        }
        debug!(entries = inner.entries.len(), "Hydrated cache from storage");
      }
      Err(e) => warn!(error = %e, "Failed to load persisted cache"),
    }
    self.storage = storage;
    self
  }

  pub fn registry(&self) -> &ResourceRegistry {
    &self.registry
  }

  pub fn now(&self) -> DateTime<Utc> {
    self.clock.now()
  }

  /// Payload shape expected for `key`.
  pub fn shape(&self, key: &str) -> Shape {
    self.registry.shape(key)
  }

  fn lock(&self) -> MutexGuard<'_, StoreInner> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn unknown_key(&self, op: &str, key: &str) {
    match self.policy {
      KeyPolicy::Lenient => warn!(op, key, "Unknown cache key"),
      KeyPolicy::Strict => panic!("{op} on unknown cache key {key:?}"),
    }
  }

  /// Data for `key` if the entry is valid, otherwise a miss.
  pub fn get(&self, key: &str) -> Option<Value> {
    let now = self.clock.now();
    let inner = self.lock();
    match inner.entries.get(key) {
      Some(entry) if entry.is_valid(now) => {
        debug!(key, "Cache hit");
        entry.data.clone()
      }
      Some(_) => {
        debug!(key, "Cache miss");
        None
      }
      None => {
        drop(inner);
        self.unknown_key("get", key);
        None
      }
    }
  }

  /// Last known data for `key`, valid or not.
  pub fn get_stale_fallback(&self, key: &str) -> Option<Value> {
    let inner = self.lock();
    match inner.entries.get(key) {
      Some(entry) => entry.data.clone(),
      None => {
        drop(inner);
        self.unknown_key("get_stale_fallback", key);
        None
      }
    }
  }

  /// Replace the data for `key` and stamp it with the current time.
  pub fn set(&self, key: &str, data: Value) {
    let now = self.clock.now();
    let mut inner = self.lock();
    let Some(entry) = inner.entries.get_mut(key) else {
      drop(inner);
      self.unknown_key("set", key);
      return;
    };
    if let Err(e) = self.storage.store(key, &data, now) {
      warn!(key, error = %e, "Failed to persist cache entry");
    }
    entry.data = Some(data);
    entry.fetched_at = Some(now);
    debug!(key, "Cache set");
  }

  /// Empty the entry for `key` so the next `get` misses.
  pub fn invalidate(&self, key: &str) {
    let mut inner = self.lock();
    let Some(entry) = inner.entries.get_mut(key) else {
      drop(inner);
      self.unknown_key("invalidate", key);
      return;
    };
    entry.data = None;
    entry.fetched_at = None;
    if let Err(e) = self.storage.remove(key) {
      warn!(key, error = %e, "Failed to remove persisted cache entry");
    }
    debug!(key, "Cache invalidated");
  }

  pub fn invalidate_many<I, K>(&self, keys: I)
  where
    I: IntoIterator<Item = K>,
    K: AsRef<str>,
  {
    for key in keys {
      self.invalidate(key.as_ref());
    }
  }

  /// Invalidate every key. Run on logout and login.
  pub fn clear_all(&self) {
    let mut inner = self.lock();
    for entry in inner.entries.values_mut() {
      entry.data = None;
      entry.fetched_at = None;
    }
    if let Err(e) = self.storage.clear() {
      warn!(error = %e, "Failed to clear persisted cache");
    }
    debug!("Cache cleared");
  }

  /// Issue the next request sequence number for `key`.
  pub fn begin_request(&self, key: &str) -> Ticket {
    let mut inner = self.lock();
    let seq = inner.issued.entry(key.to_string()).or_insert(0);
    *seq += 1;
    Ticket {
      key: key.to_string(),
      seq: *seq,
    }
  }

  /// Whether `ticket` is still the latest request issued for its key.
  pub fn is_latest(&self, ticket: &Ticket) -> bool {
    self.lock().issued.get(&ticket.key).copied() == Some(ticket.seq)
  }

  /// Snapshot of one entry.
  pub fn entry(&self, key: &str) -> Option<CacheEntry> {
    self.lock().entries.get(key).cloned()
  }

  /// Snapshot of every entry, ordered by key.
  pub fn entries(&self) -> Vec<CacheEntry> {
    let mut entries: Vec<CacheEntry> = self.lock().entries.values().cloned().collect();
    entries.sort_by(|a, b| a.key.cmp(&b.key));
    entries
  }
}

impl std::fmt::Debug for CacheStore {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CacheStore")
      .field("registry", &self.registry)
      .field("policy", &self.policy)
      .finish_non_exhaustive()
  }
}
