//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

/// Trait for domain rows that are cached as one collection per resource.
///
/// The resource key names the logical dataset ("barrios", "militantes", ...)
/// and doubles as the backend collection path.
pub trait Resource: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Cache key of the collection this row belongs to
  fn resource_key() -> &'static str;

  /// Backend identifier of this row, if it has been persisted
  fn id(&self) -> Option<u64>;
}

/// Expected payload shape for a resource key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
  /// A JSON array of rows
  List,
  /// A single JSON object (e.g. an aggregated summary)
  Object,
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from a valid cache entry.
  pub fn from_cache(data: T, cached_at: Option<DateTime<Utc>>) -> Self {
    Self {
      data,
      source: CacheSource::CacheFresh,
      cached_at,
    }
  }

  /// Create a new cache result for offline mode (network failed, stale data served).
  pub fn offline(data: T, cached_at: Option<DateTime<Utc>>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at,
    }
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheResult<U> {
    CacheResult {
      data: f(self.data),
      source: self.source,
      cached_at: self.cached_at,
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Offline mode - network failed, serving the last known good data
  Offline,
}
