//! Async query abstraction for data fetching with caching support.
//!
//! Inspired by TanStack Query, this module provides a `Query<T>` bound to one
//! resource key. It reads through the shared [`CacheStore`], falls back to the
//! fetcher on a miss, and keeps showing the last good data when a fetch fails.
//!
//! # Example
//!
//! ```ignore
//! let api = api.clone();
//! let mut query: Query<Vec<Neighborhood>> = Query::new(layer, "barrios", move || {
//!     let api = api.clone();
//!     async move { api.get_collection("barrios").await }
//! });
//!
//! // Start fetching (answers synchronously on a cache hit)
//! query.fetch_data(false);
//!
//! // In event loop tick
//! if query.poll() {
//!     // State changed, trigger re-render
//! }
//! ```
//!
//! [`CacheStore`]: crate::cache::CacheStore

use color_eyre::Result;
use futures::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::cache::{CacheLayer, CacheSource, Completion, Ticket};

/// A factory function that creates futures for fetching data
pub type FetcherFn = Arc<dyn Fn() -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Box a fetch closure.
pub fn fetcher<F, Fut>(f: F) -> FetcherFn
where
  F: Fn() -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<Value>> + Send + 'static,
{
  Arc::new(move || f().boxed())
}

struct Pending {
  ticket: Ticket,
  receiver: mpsc::UnboundedReceiver<Result<Value>>,
}

/// Spawn `fetcher` and deliver its result on a channel.
pub(crate) fn spawn_fetch(fetcher: &FetcherFn) -> mpsc::UnboundedReceiver<Result<Value>> {
  let (tx, rx) = mpsc::unbounded_channel();
  let future = fetcher();
  tokio::spawn(async move {
    let result = future.await;
    // Ignore send errors - receiver may have been dropped
    let _ = tx.send(result);
  });
  rx
}

/// Cached data binding for one resource key.
///
/// Query<T> encapsulates:
/// - The fetching logic (via a closure)
/// - `data`, `loading` and `error` state
/// - Async result handling via channels
/// - Re-fetching when the key or dependency list changes
pub struct Query<T> {
  layer: CacheLayer,
  key: String,
  deps: Vec<String>,
  fetcher: FetcherFn,
  data: T,
  loading: bool,
  error: Option<String>,
  source: Option<CacheSource>,
  pending: Option<Pending>,
}

impl<T> Query<T>
where
  T: DeserializeOwned + Default + Send + 'static,
{
  /// Create a new query for `key` with the given fetcher function.
  ///
  /// Nothing is fetched until `fetch_data` is called.
  pub fn new<F, Fut>(layer: CacheLayer, key: &str, fetch: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
  {
    Self::with_fetcher(layer, key, fetcher(fetch))
  }

  pub fn with_fetcher(layer: CacheLayer, key: &str, fetcher: FetcherFn) -> Self {
    Self {
      layer,
      key: key.to_string(),
      deps: Vec::new(),
      fetcher,
      data: T::default(),
      loading: false,
      error: None,
      source: None,
      pending: None,
    }
  }

  /// Set the initial dependency list without fetching.
  pub fn with_deps(mut self, deps: Vec<String>) -> Self {
    self.deps = deps;
    self
  }

  pub fn key(&self) -> &str {
    &self.key
  }

  /// Last known good data, or the empty value.
  pub fn data(&self) -> &T {
    &self.data
  }

  pub fn is_loading(&self) -> bool {
    self.loading
  }

  /// Message of the last failed fetch.
  pub fn error(&self) -> Option<&str> {
    self.error.as_deref()
  }

  /// Where the current data came from.
  pub fn source(&self) -> Option<CacheSource> {
    self.source
  }

  /// Load the data, from the cache when possible.
  ///
  /// Without `force`, a valid cache entry is adopted immediately and the
  /// fetcher is not called. A non-forced call while a fetch is pending is a
  /// no-op.
  pub fn fetch_data(&mut self, force: bool) {
    if !force {
      if self.pending.is_some() {
        return;
      }
      if let Some(data) = self.layer.lookup::<T>(&self.key) {
        self.data = data;
        self.source = Some(CacheSource::CacheFresh);
        self.loading = false;
        self.error = None;
        return;
      }
    }
    self.start_fetch();
  }

  /// Force a refetch, even if data is cached or a fetch is pending.
  pub fn refetch(&mut self) {
    self.fetch_data(true);
  }

  /// Drop the cached entry for this key without refetching.
  pub fn invalidate(&self) {
    self.layer.store().invalidate(&self.key);
  }

  /// Replace the fetcher. Never triggers a fetch by itself.
  pub fn set_fetcher(&mut self, fetcher: FetcherFn) {
    self.fetcher = fetcher;
  }

  /// Point the query at `key` with `deps`, refetching if either changed.
  ///
  /// Returns true when a fetch was triggered.
  pub fn update(&mut self, key: &str, deps: &[String]) -> bool {
    if self.key == key && self.deps == deps {
      return false;
    }
    // A result requested with the old key or deps must not land here
    self.pending = None;
    self.key = key.to_string();
    self.deps = deps.to_vec();
    self.fetch_data(false);
    true
  }

  /// Poll for results from a pending fetch.
  ///
  /// Returns `true` if the state changed (data arrived or error occurred).
  /// Call this in your event loop tick handler.
  pub fn poll(&mut self) -> bool {
    let pending = match &mut self.pending {
      Some(pending) => pending,
      None => return false,
    };

    // Try to receive without blocking
    let result = match pending.receiver.try_recv() {
      Ok(result) => result,
      Err(mpsc::error::TryRecvError::Empty) => return false,
      Err(mpsc::error::TryRecvError::Disconnected) => {
        Err(color_eyre::eyre::eyre!("Query was cancelled"))
      }
    };
    self.finish(result);
    true
  }

  /// Wait for the pending fetch, if any, and apply it.
  ///
  /// Returns `true` if the state changed.
  pub async fn settle(&mut self) -> bool {
    let pending = match &mut self.pending {
      Some(pending) => pending,
      None => return false,
    };

    let result = pending
      .receiver
      .recv()
      .await
      .unwrap_or_else(|| Err(color_eyre::eyre::eyre!("Query was cancelled")));
    self.finish(result);
    true
  }

  /// Internal: start the fetch operation
  fn start_fetch(&mut self) {
    // Cancel any pending fetch by dropping its receiver
    let ticket = self.layer.begin(&self.key);
    let receiver = spawn_fetch(&self.fetcher);
    self.pending = Some(Pending { ticket, receiver });
    self.loading = true;
    self.error = None;
  }

  fn finish(&mut self, result: Result<Value>) {
    let Some(pending) = self.pending.take() else {
      return;
    };

    match self.layer.complete::<T>(&pending.ticket, result) {
      Completion::Fresh(data) => {
        self.data = data;
        self.source = Some(CacheSource::Network);
      }
      // Another query for the same key asked later; its answer wins
      Completion::Superseded(current) => {
        if let Some(data) = current {
          self.data = data;
          self.source = Some(CacheSource::CacheFresh);
        }
      }
      Completion::Degraded { data, error } => {
        self.source = data.as_ref().map(|_| CacheSource::Offline);
        self.data = data.unwrap_or_default();
        self.error = Some(error);
      }
    }
    self.loading = false;
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("key", &self.key)
      .field("deps", &self.deps)
      .field("data", &self.data)
      .field("loading", &self.loading)
      .field("error", &self.error)
      .finish_non_exhaustive()
  }
}
