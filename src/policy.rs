//! Which roles may mutate which entities.

use serde::Deserialize;
use thiserror::Error;

use crate::cache::{Action, Entity};

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  /// Full access
  Admin,
  /// Manages the field organization; cannot redraw sections
  Coordinator,
  /// Polling-station witness; loads vote counts only
  Auditor,
  /// Read-only
  #[default]
  Viewer,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("role {role:?} may not {} {}", .action.verb(), .entity.name())]
pub struct PermissionDenied {
  pub role: Role,
  pub entity: Entity,
  pub action: Action,
}

impl Role {
  /// Whether this role may perform `action` on `entity`.
  ///
  /// Every role can read every resource; only writes are checked.
  pub fn can(self, entity: Entity, action: Action) -> bool {
    match self {
      Role::Admin => true,
      Role::Coordinator => entity != Entity::Seccional,
      Role::Auditor => entity == Entity::Resultado && action != Action::Deleted,
      Role::Viewer => false,
    }
  }

  pub fn check(self, entity: Entity, action: Action) -> Result<(), PermissionDenied> {
    if self.can(entity, action) {
      Ok(())
    } else {
      Err(PermissionDenied {
        role: self,
        entity,
        action,
      })
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_admin_can_do_everything() {
    for entity in Entity::ALL {
      for action in Action::ALL {
        assert!(Role::Admin.can(entity, action));
      }
    }
  }

  #[test]
  fn test_viewer_is_read_only() {
    for entity in Entity::ALL {
      for action in Action::ALL {
        assert!(!Role::Viewer.can(entity, action));
      }
    }
  }

  #[test]
  fn test_coordinator_cannot_touch_sections() {
    assert!(Role::Coordinator.can(Entity::Militante, Action::Created));
    assert!(Role::Coordinator.can(Entity::Resultado, Action::Deleted));
    assert!(!Role::Coordinator.can(Entity::Seccional, Action::Updated));
  }

  #[test]
  fn test_auditor_loads_results_only() {
    assert!(Role::Auditor.can(Entity::Resultado, Action::Created));
    assert!(Role::Auditor.can(Entity::Resultado, Action::Updated));
    assert!(!Role::Auditor.can(Entity::Resultado, Action::Deleted));
    assert!(!Role::Auditor.can(Entity::Escuela, Action::Created));
  }

  #[test]
  fn test_denial_message() {
    let err = Role::Viewer
      .check(Entity::Barrio, Action::Deleted)
      .unwrap_err();
    assert_eq!(err.to_string(), "role Viewer may not delete barrio");
  }
}
