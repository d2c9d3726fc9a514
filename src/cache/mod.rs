//! Read-through caching layer for backend resources.
//!
//! This module provides:
//! - A store of one entry per resource key, each with its own TTL
//! - Routing of mutation events to the keys they invalidate, through a
//!   declared dependency graph
//! - Read-through fetching that serves stale data when the backend is
//!   unreachable
//! - Optional persistence so the offline fallback survives restarts

mod clock;
mod invalidation;
mod layer;
mod registry;
mod storage;
mod store;
mod traits;

pub use clock::{Clock, ManualClock, SystemClock};
pub use invalidation::{
  Action, DependencyGraph, Entity, Invalidation, InvalidationRouter, MutationEvent, UnknownEvent,
};
pub use layer::{normalize, CacheLayer, Completion};
pub use registry::{
  ResourceRegistry, ResourceSpec, BARRIOS, ESCUELAS, INSTITUCIONES, MILITANTES, RESULTADOS,
  SECCIONALES, SECCIONALES_RESUMEN,
};
pub use storage::{session_scope, CacheStorage, NoopStorage, SqliteStorage, StoredEntry};
pub use store::{CacheEntry, CacheStore, KeyPolicy, Ticket};
pub use traits::{CacheResult, CacheSource, Resource, Shape};
