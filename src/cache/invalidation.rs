//! Routing of mutation events to the cache keys they make stale.
//!
//! The dependency graph declares, for each resource, the resources derived
//! from it. A mutation of `militantes` clears `militantes` plus everything
//! reachable from it, so the event table never has to be hand-maintained.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

use super::registry::{
  ResourceRegistry, BARRIOS, ESCUELAS, INSTITUCIONES, MILITANTES, RESULTADOS, SECCIONALES,
  SECCIONALES_RESUMEN,
};
use super::store::{CacheStore, KeyPolicy};

/// Domain entities that can be mutated from the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Entity {
  Barrio,
  Escuela,
  Militante,
  Institucion,
  Resultado,
  Seccional,
}

impl Entity {
  pub const ALL: [Entity; 6] = [
    Entity::Barrio,
    Entity::Escuela,
    Entity::Militante,
    Entity::Institucion,
    Entity::Resultado,
    Entity::Seccional,
  ];

  /// Name used in event strings ("militante" in "militante_created").
  pub fn name(self) -> &'static str {
    match self {
      Entity::Barrio => "barrio",
      Entity::Escuela => "escuela",
      Entity::Militante => "militante",
      Entity::Institucion => "institucion",
      Entity::Resultado => "resultado",
      Entity::Seccional => "seccional",
    }
  }

  /// Cache key of the collection holding this entity.
  pub fn resource_key(self) -> &'static str {
    match self {
      Entity::Barrio => BARRIOS,
      Entity::Escuela => ESCUELAS,
      Entity::Militante => MILITANTES,
      Entity::Institucion => INSTITUCIONES,
      Entity::Resultado => RESULTADOS,
      Entity::Seccional => SECCIONALES,
    }
  }

  fn from_name(name: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|e| e.name() == name)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Action {
  Created,
  Updated,
  Deleted,
}

impl Action {
  pub const ALL: [Action; 3] = [Action::Created, Action::Updated, Action::Deleted];

  pub fn name(self) -> &'static str {
    match self {
      Action::Created => "created",
      Action::Updated => "updated",
      Action::Deleted => "deleted",
    }
  }

  pub fn verb(self) -> &'static str {
    match self {
      Action::Created => "create",
      Action::Updated => "update",
      Action::Deleted => "delete",
    }
  }
}

/// A named semantic occurrence that drives invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MutationEvent {
  Mutation { entity: Entity, action: Action },
  Login,
  Logout,
}

impl MutationEvent {
  pub fn new(entity: Entity, action: Action) -> Self {
    Self::Mutation { entity, action }
  }

  /// Every event in the vocabulary.
  pub fn all() -> Vec<MutationEvent> {
    let mut events: Vec<MutationEvent> = Entity::ALL
      .into_iter()
      .flat_map(|entity| {
        Action::ALL
          .into_iter()
          .map(move |action| MutationEvent::new(entity, action))
      })
      .collect();
    events.push(MutationEvent::Login);
    events.push(MutationEvent::Logout);
    events
  }
}

impl fmt::Display for MutationEvent {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Mutation { entity, action } => write!(f, "{}_{}", entity.name(), action.name()),
      Self::Login => f.write_str("login"),
      Self::Logout => f.write_str("logout"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEvent(pub String);

impl fmt::Display for UnknownEvent {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "unknown invalidation event {:?}", self.0)
  }
}

impl FromStr for MutationEvent {
  type Err = UnknownEvent;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "login" => return Ok(Self::Login),
      "logout" => return Ok(Self::Logout),
      _ => {}
    }

    let (entity, action) = s
      .rsplit_once('_')
      .ok_or_else(|| UnknownEvent(s.to_string()))?;
    let entity = Entity::from_name(entity).ok_or_else(|| UnknownEvent(s.to_string()))?;
    let action = Action::ALL
      .into_iter()
      .find(|a| a.name() == action)
      .ok_or_else(|| UnknownEvent(s.to_string()))?;

    Ok(Self::new(entity, action))
  }
}

/// Declared resource → derived resources edges.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
  derived: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
  pub fn empty() -> Self {
    Self::default()
  }

  /// Dependencies of the dashboard views.
  ///
  /// Schools show the activists assigned to them and the neighborhood they
  /// sit in; the section summary aggregates schools, institutions and
  /// results; sections own their neighborhoods.
  pub fn with_defaults() -> Self {
    let mut graph = Self::empty();
    graph.declare(MILITANTES, [ESCUELAS, SECCIONALES_RESUMEN]);
    graph.declare(ESCUELAS, [SECCIONALES_RESUMEN]);
    graph.declare(BARRIOS, [ESCUELAS]);
    graph.declare(INSTITUCIONES, [SECCIONALES_RESUMEN]);
    graph.declare(RESULTADOS, [SECCIONALES_RESUMEN]);
    graph.declare(SECCIONALES, [BARRIOS, SECCIONALES_RESUMEN]);
    graph
  }

  /// Add edges `source → derived`.
  pub fn declare<I, K>(&mut self, source: &str, derived: I)
  where
    I: IntoIterator<Item = K>,
    K: Into<String>,
  {
    self
      .derived
      .entry(source.to_string())
      .or_default()
      .extend(derived.into_iter().map(Into::into));
  }

  /// `source` and every resource transitively derived from it.
  pub fn closure(&self, source: &str) -> BTreeSet<String> {
    let mut seen = BTreeSet::new();
    let mut stack = vec![source.to_string()];
    while let Some(key) = stack.pop() {
      if !seen.insert(key.clone()) {
        continue;
      }
      if let Some(derived) = self.derived.get(&key) {
        stack.extend(derived.iter().filter(|d| !seen.contains(*d)).cloned());
      }
    }
    seen
  }

  /// Keys named by an edge but missing from `registry`.
  pub fn unregistered_keys(&self, registry: &ResourceRegistry) -> BTreeSet<String> {
    self
      .derived
      .iter()
      .flat_map(|(source, derived)| std::iter::once(source).chain(derived))
      .filter(|key| !registry.contains(key))
      .cloned()
      .collect()
  }
}

/// What a caller wants invalidated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
  /// A named event, resolved through the dependency graph
  Event(String),
  /// Exactly these keys, bypassing the graph
  Keys(Vec<String>),
}

impl From<&str> for Invalidation {
  fn from(event: &str) -> Self {
    Self::Event(event.to_string())
  }
}

impl From<MutationEvent> for Invalidation {
  fn from(event: MutationEvent) -> Self {
    Self::Event(event.to_string())
  }
}

impl From<Vec<String>> for Invalidation {
  fn from(keys: Vec<String>) -> Self {
    Self::Keys(keys)
  }
}

impl<const N: usize> From<[&str; N]> for Invalidation {
  fn from(keys: [&str; N]) -> Self {
    Self::Keys(keys.iter().map(|k| k.to_string()).collect())
  }
}

/// Translates mutation events into cache invalidations.
#[derive(Debug, Clone)]
pub struct InvalidationRouter {
  store: CacheStore,
  graph: DependencyGraph,
  policy: KeyPolicy,
}

impl InvalidationRouter {
  pub fn new(store: CacheStore, graph: DependencyGraph) -> Self {
    let unregistered = graph.unregistered_keys(store.registry());
    if !unregistered.is_empty() {
      warn!(keys = ?unregistered, "Dependency graph names unregistered resources");
    }

    Self {
      store,
      graph,
      policy: KeyPolicy::default(),
    }
  }

  pub fn with_policy(mut self, policy: KeyPolicy) -> Self {
    self.policy = policy;
    self
  }

  pub fn graph(&self) -> &DependencyGraph {
    &self.graph
  }

  /// Keys cleared by `event`. `None` means every key.
  pub fn keys_for(&self, event: MutationEvent) -> Option<BTreeSet<String>> {
    match event {
      MutationEvent::Mutation { entity, .. } => Some(self.graph.closure(entity.resource_key())),
      MutationEvent::Login | MutationEvent::Logout => None,
    }
  }

  /// Every event with the keys it clears, in event order.
  pub fn event_table(&self) -> Vec<(MutationEvent, Option<BTreeSet<String>>)> {
    MutationEvent::all()
      .into_iter()
      .map(|event| (event, self.keys_for(event)))
      .collect()
  }

  /// Invalidate by event name or explicit key list.
  ///
  /// Never fails. Returns the keys that were cleared; an unknown event
  /// clears nothing.
  pub fn invalidate(&self, target: impl Into<Invalidation>) -> Vec<String> {
    match target.into() {
      Invalidation::Keys(keys) => {
        info!(keys = ?keys, "Invalidating keys");
        self.store.invalidate_many(&keys);
        keys
      }
      Invalidation::Event(name) => match name.parse::<MutationEvent>() {
        Ok(event) => self.invalidate_event(event),
        Err(e) => {
          match self.policy {
            KeyPolicy::Lenient => warn!(event = %name, "{}", e),
            KeyPolicy::Strict => panic!("{e}"),
          }
          Vec::new()
        }
      },
    }
  }

  fn invalidate_event(&self, event: MutationEvent) -> Vec<String> {
    match self.keys_for(event) {
      Some(keys) => {
        let keys: Vec<String> = keys.into_iter().collect();
        info!(event = %event, keys = ?keys, "Invalidating for event");
        self.store.invalidate_many(&keys);
        keys
      }
      None => {
        info!(event = %event, "Clearing cache");
        self.store.clear_all();
        self.store.registry().keys().map(String::from).collect()
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn router() -> InvalidationRouter {
    let store = CacheStore::new(ResourceRegistry::with_defaults());
    InvalidationRouter::new(store, DependencyGraph::with_defaults())
  }

  fn fill(store: &CacheStore) {
    for key in store.registry().keys().map(String::from).collect::<Vec<_>>() {
      store.set(&key, json!([]));
    }
  }

  fn stale_keys(store: &CacheStore) -> BTreeSet<String> {
    store
      .entries()
      .into_iter()
      .filter(|e| e.data.is_none())
      .map(|e| e.key)
      .collect()
  }

  fn set_of(keys: &[&str]) -> BTreeSet<String> {
    keys.iter().map(|k| k.to_string()).collect()
  }

  #[test]
  fn test_event_names_round_trip() {
    for event in MutationEvent::all() {
      assert_eq!(event.to_string().parse::<MutationEvent>(), Ok(event));
    }
    assert_eq!(
      "militante_created".parse::<MutationEvent>(),
      Ok(MutationEvent::new(Entity::Militante, Action::Created))
    );
    assert!("militante_archived".parse::<MutationEvent>().is_err());
    assert!("militantes_created".parse::<MutationEvent>().is_err());
    assert!("".parse::<MutationEvent>().is_err());
  }

  #[test]
  fn test_militante_created_clears_declared_keys() {
    let router = router();
    fill(&router.store);

    let cleared = router.invalidate("militante_created");

    let expected = set_of(&[MILITANTES, ESCUELAS, SECCIONALES_RESUMEN]);
    assert_eq!(cleared.into_iter().collect::<BTreeSet<_>>(), expected);
    assert_eq!(stale_keys(&router.store), expected);
  }

  #[test]
  fn test_institucion_created_clears_declared_keys() {
    let router = router();
    fill(&router.store);

    router.invalidate(MutationEvent::new(Entity::Institucion, Action::Created));

    assert_eq!(
      stale_keys(&router.store),
      set_of(&[INSTITUCIONES, SECCIONALES_RESUMEN])
    );
  }

  #[test]
  fn test_explicit_keys_bypass_graph() {
    let router = router();
    fill(&router.store);

    let cleared = router.invalidate([BARRIOS]);

    assert_eq!(cleared, vec![BARRIOS.to_string()]);
    assert_eq!(stale_keys(&router.store), set_of(&[BARRIOS]));
  }

  #[test]
  fn test_unknown_event_is_noop() {
    let router = router();
    fill(&router.store);

    assert!(router.invalidate("militante_archived").is_empty());
    assert!(stale_keys(&router.store).is_empty());
  }

  #[test]
  #[should_panic(expected = "unknown invalidation event")]
  fn test_strict_router_panics_on_unknown_event() {
    router()
      .with_policy(KeyPolicy::Strict)
      .invalidate("militante_archived");
  }

  #[test]
  fn test_logout_clears_everything() {
    let router = router();
    fill(&router.store);

    router.invalidate("logout");

    assert_eq!(stale_keys(&router.store).len(), 7);
  }

  #[test]
  fn test_every_mutation_event_names_registered_keys() {
    let router = router();
    let registry = ResourceRegistry::with_defaults();
    assert!(router.graph().unregistered_keys(&registry).is_empty());

    for (event, keys) in router.event_table() {
      if let Some(keys) = keys {
        assert!(!keys.is_empty(), "{event} invalidates nothing");
        assert!(
          keys.iter().all(|k| registry.contains(k)),
          "{event} names an unregistered key"
        );
      }
    }
  }

  #[test]
  fn test_closure_tolerates_cycles() {
    let mut graph = DependencyGraph::empty();
    graph.declare("a", ["b"]);
    graph.declare("b", ["c"]);
    graph.declare("c", ["a"]);

    assert_eq!(graph.closure("b"), set_of(&["a", "b", "c"]));
    assert_eq!(graph.closure("z"), set_of(&["z"]));
  }

  #[test]
  fn test_unregistered_edges_reported() {
    let mut graph = DependencyGraph::with_defaults();
    graph.declare(BARRIOS, ["barrios_mapa"]);

    let missing = graph.unregistered_keys(&ResourceRegistry::with_defaults());
    assert_eq!(missing, set_of(&["barrios_mapa"]));
  }
}
