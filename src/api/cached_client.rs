//! Backend client with transparent caching and invalidation on writes.

use color_eyre::{eyre::eyre, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use crate::batch::{BatchEntry, BatchQuery};
use crate::cache::{
  session_scope, Action, CacheLayer, CacheResult, CacheStorage, CacheStore, InvalidationRouter,
  MutationEvent, NoopStorage, SqliteStorage, SECCIONALES_RESUMEN,
};
use crate::config::Config;
use crate::policy::Role;
use crate::query::Query;

use super::cache::Mutable;
use super::client::ApiClient;
use super::types::SectionSummary;

/// The seam between the cache and the backend.
///
/// `ApiClient` is the real implementation; tests substitute an in-memory one.
pub trait Backend: Clone + Send + Sync + 'static {
  fn get_collection(
    &self,
    resource: &str,
  ) -> impl std::future::Future<Output = Result<Value>> + Send;

  fn create(
    &self,
    resource: &str,
    body: &Value,
  ) -> impl std::future::Future<Output = Result<Value>> + Send;

  fn update(
    &self,
    resource: &str,
    id: u64,
    body: &Value,
  ) -> impl std::future::Future<Output = Result<Value>> + Send;

  fn delete(&self, resource: &str, id: u64) -> impl std::future::Future<Output = Result<()>> + Send;
}

impl Backend for ApiClient {
  async fn get_collection(&self, resource: &str) -> Result<Value> {
    ApiClient::get_collection(self, resource).await
  }

  async fn create(&self, resource: &str, body: &Value) -> Result<Value> {
    ApiClient::create(self, resource, body).await
  }

  async fn update(&self, resource: &str, id: u64, body: &Value) -> Result<Value> {
    ApiClient::update(self, resource, id, body).await
  }

  async fn delete(&self, resource: &str, id: u64) -> Result<()> {
    ApiClient::delete(self, resource, id).await
  }
}

/// Backend client with transparent caching support.
///
/// Reads go through the cache; every successful write routes the matching
/// mutation event so dependent views refetch.
#[derive(Clone)]
pub struct CachedApi<B: Backend = ApiClient> {
  inner: B,
  cache: CacheLayer,
  router: InvalidationRouter,
  role: Role,
}

/// Build the store and router described by `config`.
///
/// Storage is scoped to the configured backend and user.
pub fn build_cache(config: &Config) -> Result<(CacheStore, InvalidationRouter)> {
  let storage: Arc<dyn CacheStorage> = if config.cache.persist {
    let scope = session_scope(&config.api.url, &config.api.username);
    let storage = match &config.cache.path {
      Some(path) => SqliteStorage::open_at(path, &scope)?,
      None => SqliteStorage::open(&scope)?,
    };
    Arc::new(storage)
  } else {
    Arc::new(NoopStorage)
  };

  let store = CacheStore::new(config.registry())
    .with_policy(config.key_policy())
    .with_storage(storage);
  let router = InvalidationRouter::new(store.clone(), config.dependency_graph())
    .with_policy(config.key_policy());

  Ok((store, router))
}

impl CachedApi<ApiClient> {
  /// Build the client, store and router from configuration.
  pub fn new(config: &Config) -> Result<Self> {
    let inner = ApiClient::new(config)?;
    let (store, router) = build_cache(config)?;
    Ok(Self::from_parts(inner, store, router, config.api.role))
  }
}

impl<B: Backend> CachedApi<B> {
  pub fn from_parts(inner: B, store: CacheStore, router: InvalidationRouter, role: Role) -> Self {
    Self {
      inner,
      cache: CacheLayer::new(store),
      router,
      role,
    }
  }

  pub fn store(&self) -> &CacheStore {
    self.cache.store()
  }

  pub fn router(&self) -> &InvalidationRouter {
    &self.router
  }

  pub fn role(&self) -> Role {
    self.role
  }

  /// Raw payload of any resource key, read through the cache.
  pub async fn fetch(&self, key: &str, force: bool) -> Result<CacheResult<Value>> {
    self.fetch_typed(key, force).await
  }

  /// All rows of `T`, read through the cache.
  pub async fn list<T: Mutable>(&self) -> Result<Vec<T>> {
    let result = self.fetch_typed(T::resource_key(), false).await?;
    Ok(result.data)
  }

  /// Per-section summary, read through the cache.
  pub async fn summary(&self) -> Result<SectionSummary> {
    let result = self.fetch_typed(SECCIONALES_RESUMEN, false).await?;
    Ok(result.data)
  }

  async fn fetch_typed<T: DeserializeOwned>(&self, key: &str, force: bool) -> Result<CacheResult<T>> {
    let inner = self.inner.clone();
    let resource = key.to_string();
    self
      .cache
      .fetch(key, force, || async move { inner.get_collection(&resource).await })
      .await
  }

  /// A query bound to `key` that fetches from this backend.
  pub fn query<T>(&self, key: &str) -> Query<T>
  where
    T: DeserializeOwned + Default + Send + 'static,
  {
    let inner = self.inner.clone();
    let resource = key.to_string();
    Query::new(self.cache.clone(), key, move || {
      let inner = inner.clone();
      let resource = resource.clone();
      async move { inner.get_collection(&resource).await }
    })
  }

  /// A batch query over `keys`, each fetched from this backend.
  pub fn batch(&self, keys: &[&str]) -> BatchQuery {
    let entries = keys
      .iter()
      .map(|key| {
        let inner = self.inner.clone();
        let resource = key.to_string();
        BatchEntry::new(key, move || {
          let inner = inner.clone();
          let resource = resource.clone();
          async move { inner.get_collection(&resource).await }
        })
      })
      .collect();
    BatchQuery::new(self.cache.clone(), entries)
  }

  /// Create a row and invalidate everything derived from its collection.
  pub async fn create<T: Mutable>(&self, row: &T) -> Result<T> {
    self.authorize::<T>(Action::Created)?;
    let body = self.validated_body(row)?;
    let created = self.inner.create(T::resource_key(), &body).await?;
    self.after_mutation::<T>(Action::Created);

    Ok(merge_response(body, created, row))
  }

  pub async fn update<T: Mutable>(&self, row: &T) -> Result<T> {
    self.authorize::<T>(Action::Updated)?;
    let id = row
      .id()
      .ok_or_else(|| eyre!("Cannot update {} without an id", T::resource_key()))?;
    let body = self.validated_body(row)?;
    let updated = self.inner.update(T::resource_key(), id, &body).await?;
    self.after_mutation::<T>(Action::Updated);

    Ok(merge_response(body, updated, row))
  }

  pub async fn delete<T: Mutable>(&self, id: u64) -> Result<()> {
    self.authorize::<T>(Action::Deleted)?;
    self.inner.delete(T::resource_key(), id).await?;
    self.after_mutation::<T>(Action::Deleted);
    Ok(())
  }

  /// Start a session: switch role and drop anything cached before.
  pub fn login(&mut self, role: Role) {
    self.role = role;
    self.router.invalidate(MutationEvent::Login);
    info!(role = ?role, "Logged in");
  }

  /// End the session and drop every cached entry.
  pub fn logout(&mut self) {
    self.router.invalidate(MutationEvent::Logout);
    self.role = Role::Viewer;
    info!("Logged out");
  }

  fn authorize<T: Mutable>(&self, action: Action) -> Result<()> {
    self.role.check(T::entity(), action)?;
    Ok(())
  }

  fn validated_body<T: Mutable>(&self, row: &T) -> Result<Value> {
    let problems = row.problems();
    if !problems.is_empty() {
      return Err(eyre!(
        "Invalid {}: {}",
        T::entity().name(),
        problems.join("; ")
      ));
    }

    serde_json::to_value(row).map_err(|e| eyre!("Failed to serialize {}: {}", T::resource_key(), e))
  }

  fn after_mutation<T: Mutable>(&self, action: Action) {
    self
      .router
      .invalidate(MutationEvent::new(T::entity(), action));
  }
}

/// Decode a write response on top of the row that was sent.
///
/// Some endpoints only answer with the new id, others echo the full row.
fn merge_response<T: Mutable>(sent: Value, response: Value, row: &T) -> T {
  let merged = match (sent, response) {
    (Value::Object(mut fields), Value::Object(answer)) => {
      fields.extend(answer);
      Value::Object(fields)
    }
    (sent, Value::Null) => sent,
    (_, response) => response,
  };
  serde_json::from_value(merged).unwrap_or_else(|e| {
    warn!(resource = T::resource_key(), error = %e, "Unexpected write response, keeping sent row");
    row.clone()
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::types::{Activist, ListVotes, Neighborhood, VoteResult};
  use crate::cache::{
    DependencyGraph, ResourceRegistry, BARRIOS, ESCUELAS, INSTITUCIONES, MILITANTES,
  };
  use serde_json::json;
  use std::collections::HashMap;
  use std::sync::Mutex;

  /// In-memory backend recording every call.
  #[derive(Clone, Default)]
  struct FakeBackend {
    collections: Arc<Mutex<HashMap<String, Value>>>,
    calls: Arc<Mutex<Vec<String>>>,
    offline: Arc<Mutex<bool>>,
    id_only: Arc<Mutex<bool>>,
  }

  impl FakeBackend {
    fn with(self, key: &str, payload: Value) -> Self {
      self.collections.lock().unwrap().insert(key.to_string(), payload);
      self
    }

    fn calls(&self) -> Vec<String> {
      self.calls.lock().unwrap().clone()
    }

    fn answer_with_id_only(&self) {
      *self.id_only.lock().unwrap() = true;
    }

    fn go_offline(&self) {
      *self.offline.lock().unwrap() = true;
    }

    fn record(&self, call: String) -> Result<()> {
      self.calls.lock().unwrap().push(call);
      if *self.offline.lock().unwrap() {
        return Err(eyre!("connection refused"));
      }
      Ok(())
    }
  }

  impl Backend for FakeBackend {
    async fn get_collection(&self, resource: &str) -> Result<Value> {
      self.record(format!("GET {resource}"))?;
      Ok(
        self
          .collections
          .lock()
          .unwrap()
          .get(resource)
          .cloned()
          .unwrap_or(Value::Null),
      )
    }

    async fn create(&self, resource: &str, body: &Value) -> Result<Value> {
      self.record(format!("POST {resource}"))?;
      if *self.id_only.lock().unwrap() {
        return Ok(json!({"id": 42}));
      }
      let mut created = body.clone();
      created["id"] = json!(99);
      Ok(created)
    }

    async fn update(&self, resource: &str, id: u64, body: &Value) -> Result<Value> {
      self.record(format!("PUT {resource}/{id}"))?;
      if *self.id_only.lock().unwrap() {
        return Ok(Value::Null);
      }
      Ok(body.clone())
    }

    async fn delete(&self, resource: &str, id: u64) -> Result<()> {
      self.record(format!("DELETE {resource}/{id}"))
    }
  }

  fn api(backend: FakeBackend, role: Role) -> CachedApi<FakeBackend> {
    let store = CacheStore::new(ResourceRegistry::with_defaults());
    let router = InvalidationRouter::new(store.clone(), DependencyGraph::with_defaults());
    CachedApi::from_parts(backend, store, router, role)
  }

  fn activist() -> Activist {
    Activist {
      id: None,
      first_name: "Ana".to_string(),
      last_name: "Pérez".to_string(),
      dni: None,
      phone: None,
      neighborhood_id: Some(1),
      school_id: Some(4),
    }
  }

  #[tokio::test]
  async fn test_list_reads_through_cache() {
    let backend =
      FakeBackend::default().with(BARRIOS, json!([{"id": 1, "nombre": "Centro"}]));
    let api = api(backend.clone(), Role::Viewer);

    let first: Vec<Neighborhood> = api.list().await.unwrap();
    let second: Vec<Neighborhood> = api.list().await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first[0].name, "Centro");
    assert_eq!(backend.calls(), vec!["GET barrios"]);
  }

  #[tokio::test]
  async fn test_create_invalidates_dependents() {
    let backend = FakeBackend::default();
    let api = api(backend.clone(), Role::Coordinator);
    for key in [MILITANTES, ESCUELAS, SECCIONALES_RESUMEN, BARRIOS, INSTITUCIONES] {
      api.store().set(key, json!([]));
    }

    let created = api.create(&activist()).await.unwrap();

    assert_eq!(created.id, Some(99));
    assert_eq!(api.store().get(MILITANTES), None);
    assert_eq!(api.store().get(ESCUELAS), None);
    assert_eq!(api.store().get(SECCIONALES_RESUMEN), None);
    assert_eq!(api.store().get(BARRIOS), Some(json!([])));
    assert_eq!(api.store().get(INSTITUCIONES), Some(json!([])));
  }

  #[tokio::test]
  async fn test_create_keeps_id_from_terse_response() {
    let backend = FakeBackend::default();
    backend.answer_with_id_only();
    let api = api(backend, Role::Coordinator);

    let created = api.create(&activist()).await.unwrap();

    assert_eq!(created.id, Some(42));
    assert_eq!(created.first_name, "Ana");
    assert_eq!(created.school_id, Some(4));
  }

  #[tokio::test]
  async fn test_update_with_empty_response_returns_sent_row() {
    let backend = FakeBackend::default();
    backend.answer_with_id_only();
    let api = api(backend, Role::Coordinator);
    let row = Activist {
      id: Some(7),
      ..activist()
    };

    let updated = api.update(&row).await.unwrap();

    assert_eq!(updated, row);
  }

  #[tokio::test]
  async fn test_denied_mutation_never_reaches_backend() {
    let backend = FakeBackend::default();
    let api = api(backend.clone(), Role::Viewer);
    api.store().set(MILITANTES, json!([]));

    let err = api.create(&activist()).await.unwrap_err();

    assert!(err.to_string().contains("may not create militante"));
    assert!(backend.calls().is_empty());
    assert_eq!(api.store().get(MILITANTES), Some(json!([])));
  }

  #[tokio::test]
  async fn test_failed_mutation_keeps_cache() {
    let backend = FakeBackend::default();
    let api = api(backend.clone(), Role::Admin);
    api.store().set(MILITANTES, json!([]));
    backend.go_offline();

    assert!(api.delete::<Activist>(3).await.is_err());
    assert_eq!(api.store().get(MILITANTES), Some(json!([])));
  }

  #[tokio::test]
  async fn test_update_requires_id() {
    let api = api(FakeBackend::default(), Role::Admin);
    let err = api.update(&activist()).await.unwrap_err();
    assert!(err.to_string().contains("without an id"));
  }

  #[tokio::test]
  async fn test_unreconciled_result_is_rejected() {
    let backend = FakeBackend::default();
    let api = api(backend.clone(), Role::Auditor);
    let result = VoteResult {
      id: None,
      school_id: 4,
      table: 1021,
      registered: 300,
      voters: 200,
      lists: vec![ListVotes {
        list: "501".to_string(),
        votes: 150,
      }],
      blank: 0,
      null: 0,
      contested: 0,
    };

    let err = api.create(&result).await.unwrap_err();

    assert!(err.to_string().starts_with("Invalid resultado: votes add up to 150"));
    assert!(backend.calls().is_empty());
  }

  #[tokio::test]
  async fn test_offline_serves_stale_summary() {
    let backend = FakeBackend::default().with(
      SECCIONALES_RESUMEN,
      json!({"seccionales": [{"seccional_id": 1, "escuelas": 12}]}),
    );
    let api = api(backend.clone(), Role::Viewer);
    let summary = api.summary().await.unwrap();
    assert_eq!(summary.sections[0].schools, 12);

    backend.go_offline();
    let stale = api.fetch(SECCIONALES_RESUMEN, true).await.unwrap();
    assert_eq!(stale.source, crate::cache::CacheSource::Offline);
  }

  #[tokio::test]
  async fn test_logout_clears_cache_and_role() {
    let mut api = api(FakeBackend::default(), Role::Admin);
    api.store().set(BARRIOS, json!([]));

    api.logout();

    assert_eq!(api.role(), Role::Viewer);
    assert_eq!(api.store().get_stale_fallback(BARRIOS), None);

    api.store().set(BARRIOS, json!([]));
    api.login(Role::Coordinator);
    assert_eq!(api.role(), Role::Coordinator);
    assert_eq!(api.store().get(BARRIOS), None);
  }

  #[tokio::test]
  async fn test_query_and_batch_use_backend() {
    let backend = FakeBackend::default()
      .with(BARRIOS, json!([{"id": 1, "nombre": "Centro"}]))
      .with(ESCUELAS, json!({"data": [{"id": 2, "nombre": "Escuela 12", "mesas": 8}]}));
    let api = api(backend.clone(), Role::Viewer);

    let mut query: Query<Vec<Neighborhood>> = api.query(BARRIOS);
    query.fetch_data(false);
    query.settle().await;
    assert_eq!(query.data().len(), 1);

    let mut batch = api.batch(&[BARRIOS, ESCUELAS]);
    batch.fetch_all(false);
    batch.settle().await;

    assert!(batch.errors().is_empty());
    assert_eq!(batch.get(ESCUELAS).and_then(|v| v.as_array()).map(Vec::len), Some(1));
    // barrios came from the cache the query filled
    assert_eq!(backend.calls(), vec!["GET barrios", "GET escuelas"]);
  }
}
