//! Client-side data layer for the campaign dashboard.
//!
//! Resources (barrios, escuelas, militantes, ...) are read through a shared
//! [`cache::CacheStore`]; writes go through [`api::CachedApi`], which routes
//! the matching mutation event so every derived view refetches.

pub mod api;
pub mod batch;
pub mod cache;
pub mod config;
pub mod logging;
pub mod policy;
pub mod query;
