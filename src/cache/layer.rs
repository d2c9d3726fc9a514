//! Cache layer that orchestrates caching logic with network fetching.

use color_eyre::{eyre::eyre, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use tracing::{debug, warn};

use super::store::{CacheStore, Ticket};
use super::traits::{CacheResult, Shape};

/// Outcome of applying a finished fetch to the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion<T> {
  /// Fetch succeeded and the store now holds the result
  Fresh(T),
  /// A newer request for the key was issued meanwhile. The result was
  /// dropped; this holds whatever valid payload the store has now.
  Superseded(Option<T>),
  /// Fetch failed; `data` is the last known good payload, if any
  Degraded { data: Option<T>, error: String },
}

/// Cache layer that manages caching logic and network fetching.
///
/// Sits between callers and the backend client: answers from the store
/// while entries are valid, fetches on a miss, and serves stale data when
/// the fetch fails.
#[derive(Clone, Debug)]
pub struct CacheLayer {
  store: CacheStore,
}

impl CacheLayer {
  pub fn new(store: CacheStore) -> Self {
    Self { store }
  }

  pub fn store(&self) -> &CacheStore {
    &self.store
  }

  /// Valid cached payload for `key`, decoded as `T`.
  ///
  /// A payload that no longer decodes is treated as a miss.
  pub fn lookup<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
    let value = self.store.get(key)?;
    match serde_json::from_value(value) {
      Ok(data) => Some(data),
      Err(e) => {
        warn!(key, error = %e, "Cached payload does not decode, treating as miss");
        None
      }
    }
  }

  /// Start a tracked request for `key`.
  pub fn begin(&self, key: &str) -> Ticket {
    self.store.begin_request(key)
  }

  /// Apply the result of the fetch identified by `ticket`.
  ///
  /// A successful payload is normalized to the key's shape and must decode
  /// as `T` before it is stored; otherwise it counts as a failure.
  pub fn complete<T: DeserializeOwned>(
    &self,
    ticket: &Ticket,
    result: Result<Value>,
  ) -> Completion<T> {
    let key = ticket.key.as_str();
    if !self.store.is_latest(ticket) {
      debug!(key, seq = ticket.seq, "Discarding superseded response");
      return Completion::Superseded(self.lookup(key));
    }

    let decoded = result.and_then(|raw| {
      let value = normalize(self.store.shape(key), raw);
      let data = serde_json::from_value::<T>(value.clone())
        .map_err(|e| eyre!("Malformed payload for {}: {}", key, e))?;
      Ok((value, data))
    });

    match decoded {
      Ok((value, data)) => {
        self.store.set(key, value);
        Completion::Fresh(data)
      }
      Err(e) => {
        let error = e.to_string();
        warn!(key, error = %error, "Fetch failed, falling back to stale data");
        let data = self
          .store
          .get_stale_fallback(key)
          .and_then(|value| serde_json::from_value(value).ok());
        Completion::Degraded { data, error }
      }
    }
  }

  /// Read-through fetch.
  ///
  /// 1. Unless `force`, return a valid cached payload without calling `fetcher`
  /// 2. Otherwise fetch and store the result
  /// 3. On failure, return the stale payload (offline mode) or the error
  pub async fn fetch<T, F, Fut>(&self, key: &str, force: bool, fetcher: F) -> Result<CacheResult<T>>
  where
    T: DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Value>>,
  {
    if !force {
      if let Some(data) = self.lookup(key) {
        let cached_at = self.store.entry(key).and_then(|e| e.fetched_at);
        return Ok(CacheResult::from_cache(data, cached_at));
      }
    }

    let ticket = self.begin(key);
    let result = fetcher().await;

    match self.complete(&ticket, result) {
      Completion::Fresh(data) => Ok(CacheResult::from_network(data)),
      Completion::Superseded(Some(data)) => {
        let cached_at = self.store.entry(key).and_then(|e| e.fetched_at);
        Ok(CacheResult::from_cache(data, cached_at))
      }
      Completion::Superseded(None) => Err(eyre!(
        "Request for {} was superseded before a newer one completed",
        key
      )),
      Completion::Degraded {
        data: Some(data), ..
      } => {
        let cached_at = self.store.entry(key).and_then(|e| e.fetched_at);
        Ok(CacheResult::offline(data, cached_at))
      }
      Completion::Degraded { data: None, error } => Err(eyre!(error)),
    }
  }
}

/// Coerce a backend payload to the expected shape.
///
/// Some endpoints wrap lists as `{"data": [...]}` or `{"rows": [...]}`;
/// `null` stands for an empty list. Objects are passed through untouched.
pub fn normalize(shape: Shape, raw: Value) -> Value {
  match (shape, raw) {
    (Shape::List, Value::Array(items)) => Value::Array(items),
    (Shape::List, Value::Null) => Value::Array(Vec::new()),
    (Shape::List, Value::Object(mut map)) => {
      for field in ["data", "rows"] {
        if let Some(Value::Array(items)) = map.remove(field) {
          return Value::Array(items);
        }
      }
      warn!("Expected a list payload, got an object");
      Value::Array(Vec::new())
    }
    (Shape::List, other) => {
      warn!(payload = %other, "Expected a list payload");
      Value::Array(Vec::new())
    }
    (Shape::Object, raw) => raw,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::clock::ManualClock;
  use crate::cache::registry::{ResourceRegistry, ResourceSpec, BARRIOS, SECCIONALES_RESUMEN};
  use crate::cache::traits::CacheSource;
  use chrono::Duration;
  use serde_json::json;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Arc;

  fn layer() -> (CacheLayer, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::at_epoch());
    let mut registry = ResourceRegistry::empty();
    registry.register(ResourceSpec::list(BARRIOS, Duration::seconds(5)));
    registry.register(ResourceSpec::object(SECCIONALES_RESUMEN, Duration::seconds(5)));
    let store = CacheStore::new(registry).with_clock(clock.clone());
    (CacheLayer::new(store), clock)
  }

  #[test]
  fn test_normalize_list_shapes() {
    assert_eq!(normalize(Shape::List, json!([1, 2])), json!([1, 2]));
    assert_eq!(normalize(Shape::List, json!(null)), json!([]));
    assert_eq!(normalize(Shape::List, json!({"data": [1]})), json!([1]));
    assert_eq!(normalize(Shape::List, json!({"rows": [2]})), json!([2]));
    assert_eq!(normalize(Shape::List, json!({"message": "ok"})), json!([]));
    assert_eq!(normalize(Shape::List, json!("oops")), json!([]));
    assert_eq!(normalize(Shape::Object, json!({"a": 1})), json!({"a": 1}));
  }

  #[tokio::test]
  async fn test_fetch_hit_skips_fetcher() {
    let (layer, _) = layer();
    layer.store().set(BARRIOS, json!([{"id": 1}]));
    let calls = AtomicU32::new(0);

    let result: CacheResult<Value> = layer
      .fetch(BARRIOS, false, || async {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!([]))
      })
      .await
      .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(result.source, CacheSource::CacheFresh);
    assert_eq!(result.data, json!([{"id": 1}]));
  }

  #[tokio::test]
  async fn test_fetch_offline_after_expiry() {
    let (layer, clock) = layer();
    layer.store().set(BARRIOS, json!([{"id": 1}]));
    clock.advance(Duration::seconds(6));

    let result: CacheResult<Value> = layer
      .fetch(BARRIOS, false, || async { Err(eyre!("connection refused")) })
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(result.data, json!([{"id": 1}]));
  }

  #[tokio::test]
  async fn test_fetch_error_without_fallback() {
    let (layer, _) = layer();
    let result = layer
      .fetch::<Value, _, _>(BARRIOS, false, || async { Err(eyre!("HTTP 500")) })
      .await;

    assert_eq!(result.unwrap_err().to_string(), "HTTP 500");
  }

  #[test]
  fn test_malformed_payload_is_not_stored() {
    let (layer, _) = layer();
    let ticket = layer.begin(SECCIONALES_RESUMEN);

    #[derive(Debug, PartialEq, serde::Deserialize)]
    struct Summary {
      total: u32,
    }

    let completion: Completion<Summary> = layer.complete(&ticket, Ok(json!({"total": "many"})));
    assert!(matches!(completion, Completion::Degraded { data: None, .. }));
    assert_eq!(layer.store().get(SECCIONALES_RESUMEN), None);
  }

  #[test]
  fn test_superseded_result_is_discarded() {
    let (layer, _) = layer();
    let old = layer.begin(BARRIOS);
    let new = layer.begin(BARRIOS);

    let late: Completion<Value> = layer.complete(&new, Ok(json!([2])));
    assert_eq!(late, Completion::Fresh(json!([2])));

    let stale: Completion<Value> = layer.complete(&old, Ok(json!([1])));
    assert_eq!(stale, Completion::Superseded(Some(json!([2]))));
    assert_eq!(layer.store().get(BARRIOS), Some(json!([2])));
  }

  #[test]
  fn test_superseded_failure_is_discarded() {
    let (layer, _) = layer();
    let old = layer.begin(BARRIOS);
    let _new = layer.begin(BARRIOS);

    let stale: Completion<Value> = layer.complete(&old, Err(eyre!("timeout")));
    assert_eq!(stale, Completion::Superseded(None));
  }

  #[tokio::test]
  async fn test_fetch_overtaken_returns_stored_value() {
    let (layer, _) = layer();
    let racer = layer.clone();

    let result: CacheResult<Value> = layer
      .fetch(BARRIOS, true, || async move {
        // A newer request starts and lands while this one is in flight
        let ticket = racer.begin(BARRIOS);
        let _: Completion<Value> = racer.complete(&ticket, Ok(json!(["new"])));
        Ok(json!(["old"]))
      })
      .await
      .unwrap();

    assert_eq!(result.data, json!(["new"]));
    assert_eq!(result.source, CacheSource::CacheFresh);
    assert_eq!(layer.store().get(BARRIOS), Some(json!(["new"])));
  }
}
