//! Caching implementations for backend types.

use crate::cache::{
  Entity, Resource, BARRIOS, ESCUELAS, INSTITUCIONES, MILITANTES, RESULTADOS, SECCIONALES,
};

use super::types::{Activist, Institution, Neighborhood, School, Section, VoteResult};
use super::validation::check_result;

/// Resource that can be created, updated and deleted through the backend.
pub trait Mutable: Resource {
  fn entity() -> Entity;

  /// Reasons the backend would reject this row, checked before sending.
  fn problems(&self) -> Vec<String> {
    Vec::new()
  }
}

impl Resource for Section {
  fn resource_key() -> &'static str {
    SECCIONALES
  }

  fn id(&self) -> Option<u64> {
    self.id
  }
}

impl Resource for Neighborhood {
  fn resource_key() -> &'static str {
    BARRIOS
  }

  fn id(&self) -> Option<u64> {
    self.id
  }
}

impl Resource for School {
  fn resource_key() -> &'static str {
    ESCUELAS
  }

  fn id(&self) -> Option<u64> {
    self.id
  }
}

impl Resource for Activist {
  fn resource_key() -> &'static str {
    MILITANTES
  }

  fn id(&self) -> Option<u64> {
    self.id
  }
}

impl Resource for Institution {
  fn resource_key() -> &'static str {
    INSTITUCIONES
  }

  fn id(&self) -> Option<u64> {
    self.id
  }
}

impl Resource for VoteResult {
  fn resource_key() -> &'static str {
    RESULTADOS
  }

  fn id(&self) -> Option<u64> {
    self.id
  }
}

impl Mutable for Section {
  fn entity() -> Entity {
    Entity::Seccional
  }
}

impl Mutable for Neighborhood {
  fn entity() -> Entity {
    Entity::Barrio
  }
}

impl Mutable for School {
  fn entity() -> Entity {
    Entity::Escuela
  }
}

impl Mutable for Activist {
  fn entity() -> Entity {
    Entity::Militante
  }
}

impl Mutable for Institution {
  fn entity() -> Entity {
    Entity::Institucion
  }
}

impl Mutable for VoteResult {
  fn entity() -> Entity {
    Entity::Resultado
  }

  fn problems(&self) -> Vec<String> {
    check_result(self).iter().map(ToString::to_string).collect()
  }
}
