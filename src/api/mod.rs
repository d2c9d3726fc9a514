pub mod cache;
pub mod cached_client;
pub mod client;
pub mod types;
pub mod validation;

pub use cache::Mutable;
pub use cached_client::{build_cache, Backend, CachedApi};
pub use client::ApiClient;
