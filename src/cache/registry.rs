//! Known resource keys with their TTL and payload shape.

use chrono::Duration;
use std::collections::BTreeMap;

use super::traits::Shape;

pub const BARRIOS: &str = "barrios";
pub const ESCUELAS: &str = "escuelas";
pub const MILITANTES: &str = "militantes";
pub const INSTITUCIONES: &str = "instituciones";
pub const RESULTADOS: &str = "resultados";
pub const SECCIONALES: &str = "seccionales";
pub const SECCIONALES_RESUMEN: &str = "seccionales_resumen";

/// Cache configuration for one resource key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSpec {
  pub key: String,
  pub ttl: Duration,
  pub shape: Shape,
}

impl ResourceSpec {
  pub fn list(key: &str, ttl: Duration) -> Self {
    Self {
      key: key.to_string(),
      ttl,
      shape: Shape::List,
    }
  }

  pub fn object(key: &str, ttl: Duration) -> Self {
    Self {
      key: key.to_string(),
      ttl,
      shape: Shape::Object,
    }
  }
}

/// Ordered set of resource specs, one per key.
#[derive(Debug, Clone, Default)]
pub struct ResourceRegistry {
  specs: BTreeMap<String, ResourceSpec>,
}

impl ResourceRegistry {
  pub fn empty() -> Self {
    Self::default()
  }

  /// Registry with every resource the dashboard reads.
  ///
  /// Results and the section summary move during election night, so they
  /// expire much sooner than the reference lists.
  pub fn with_defaults() -> Self {
    let mut registry = Self::empty();
    registry.register(ResourceSpec::list(BARRIOS, Duration::minutes(10)));
    registry.register(ResourceSpec::list(ESCUELAS, Duration::minutes(10)));
    registry.register(ResourceSpec::list(MILITANTES, Duration::minutes(5)));
    registry.register(ResourceSpec::list(INSTITUCIONES, Duration::minutes(10)));
    registry.register(ResourceSpec::list(RESULTADOS, Duration::minutes(2)));
    registry.register(ResourceSpec::list(SECCIONALES, Duration::minutes(30)));
    registry.register(ResourceSpec::object(
      SECCIONALES_RESUMEN,
      Duration::minutes(2),
    ));
    registry
  }

  /// Add or replace a spec.
  pub fn register(&mut self, spec: ResourceSpec) {
    self.specs.insert(spec.key.clone(), spec);
  }

  /// Override the TTL of a registered key. Returns false for unknown keys.
  pub fn set_ttl(&mut self, key: &str, ttl: Duration) -> bool {
    match self.specs.get_mut(key) {
      Some(spec) => {
        spec.ttl = ttl;
        true
      }
      None => false,
    }
  }

  pub fn get(&self, key: &str) -> Option<&ResourceSpec> {
    self.specs.get(key)
  }

  pub fn contains(&self, key: &str) -> bool {
    self.specs.contains_key(key)
  }

  /// Shape for a key, lists when unknown.
  pub fn shape(&self, key: &str) -> Shape {
    self.get(key).map(|s| s.shape).unwrap_or(Shape::List)
  }

  pub fn iter(&self) -> impl Iterator<Item = &ResourceSpec> {
    self.specs.values()
  }

  pub fn keys(&self) -> impl Iterator<Item = &str> {
    self.specs.keys().map(String::as_str)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_cover_dashboard_resources() {
    let registry = ResourceRegistry::with_defaults();
    for key in [
      BARRIOS,
      ESCUELAS,
      MILITANTES,
      INSTITUCIONES,
      RESULTADOS,
      SECCIONALES,
      SECCIONALES_RESUMEN,
    ] {
      assert!(registry.contains(key), "missing {key}");
    }
    assert_eq!(registry.shape(SECCIONALES_RESUMEN), Shape::Object);
    assert_eq!(registry.shape(BARRIOS), Shape::List);
  }

  #[test]
  fn test_set_ttl_unknown_key() {
    let mut registry = ResourceRegistry::with_defaults();
    assert!(registry.set_ttl(BARRIOS, Duration::seconds(5)));
    assert_eq!(registry.get(BARRIOS).map(|s| s.ttl), Some(Duration::seconds(5)));
    assert!(!registry.set_ttl("barrio", Duration::seconds(5)));
  }
}
