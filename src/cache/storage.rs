//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// A persisted cache entry.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
  pub key: String,
  pub data: Value,
  pub fetched_at: DateTime<Utc>,
}

/// Trait for cache persistence backends.
///
/// The in-memory store writes through to this on every change and reads it
/// once at startup.
pub trait CacheStorage: Send + Sync {
  /// Every entry persisted for the current scope.
  fn load_all(&self) -> Result<Vec<StoredEntry>>;

  /// Insert or replace one entry.
  fn store(&self, key: &str, data: &Value, fetched_at: DateTime<Utc>) -> Result<()>;

  /// Remove one entry.
  fn remove(&self, key: &str) -> Result<()>;

  /// Remove every entry of the current scope.
  fn clear(&self) -> Result<()>;
}

/// Storage implementation that doesn't persist anything.
/// Used when persistence is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn load_all(&self) -> Result<Vec<StoredEntry>> {
    Ok(Vec::new())
  }

  fn store(&self, _key: &str, _data: &Value, _fetched_at: DateTime<Utc>) -> Result<()> {
    Ok(()) // Discard
  }

  fn remove(&self, _key: &str) -> Result<()> {
    Ok(())
  }

  fn clear(&self) -> Result<()> {
    Ok(())
  }
}

/// Fingerprint of a backend session.
///
/// Rows are stored under this scope so data cached for one user at one
/// backend is never read back for another.
pub fn session_scope(api_url: &str, username: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(api_url.trim_end_matches('/').as_bytes());
  hasher.update(b"\n");
  hasher.update(username.trim().to_lowercase().as_bytes());
  hex::encode(hasher.finalize())
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
  scope: String,
}

impl SqliteStorage {
  /// Open the storage at the default location.
  pub fn open(scope: &str) -> Result<Self> {
    let path = Self::default_path()?;
    Self::open_at(&path, scope)
  }

  /// Open the storage at an explicit path.
  pub fn open_at(path: &Path, scope: &str) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn, scope)
  }

  /// Storage backed by a private in-memory database.
  pub fn in_memory(scope: &str) -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn, scope)
  }

  fn with_connection(conn: Connection, scope: &str) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
      scope: scope.to_string(),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("padron").join("cache.db"))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    scope TEXT NOT NULL,
    resource_key TEXT NOT NULL,
    data BLOB NOT NULL,
    fetched_at INTEGER NOT NULL,
    PRIMARY KEY (scope, resource_key)
);
"#;

impl CacheStorage for SqliteStorage {
  fn load_all(&self) -> Result<Vec<StoredEntry>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT resource_key, data, fetched_at FROM cache_entries
         WHERE scope = ?
         ORDER BY resource_key",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<(String, Vec<u8>, i64)> = stmt
      .query_map(params![self.scope], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
      })
      .map_err(|e| eyre!("Failed to query cache entries: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    let entries = rows
      .into_iter()
      .filter_map(|(key, data, fetched_at)| {
        let data = serde_json::from_slice(&data).ok()?;
        let fetched_at = DateTime::from_timestamp_millis(fetched_at)?;
        Some(StoredEntry {
          key,
          data,
          fetched_at,
        })
      })
      .collect();

    Ok(entries)
  }

  fn store(&self, key: &str, data: &Value, fetched_at: DateTime<Utc>) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let data = serde_json::to_vec(data).map_err(|e| eyre!("Failed to serialize entry: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries (scope, resource_key, data, fetched_at)
         VALUES (?, ?, ?, ?)",
        params![self.scope, key, data, fetched_at.timestamp_millis()],
      )
      .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;

    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "DELETE FROM cache_entries WHERE scope = ? AND resource_key = ?",
        params![self.scope, key],
      )
      .map_err(|e| eyre!("Failed to remove cache entry: {}", e))?;

    Ok(())
  }

  fn clear(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "DELETE FROM cache_entries WHERE scope = ?",
        params![self.scope],
      )
      .map_err(|e| eyre!("Failed to clear cache entries: {}", e))?;

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_sqlite_store_and_load() {
    let storage = SqliteStorage::in_memory("scope-a").unwrap();
    let at = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();

    storage
      .store("barrios", &json!([{"id": 1, "nombre": "Centro"}]), at)
      .unwrap();

    let entries = storage.load_all().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].key, "barrios");
    assert_eq!(entries[0].fetched_at, at);
    assert_eq!(entries[0].data, json!([{"id": 1, "nombre": "Centro"}]));
  }

  #[test]
  fn test_sqlite_store_replaces() {
    let storage = SqliteStorage::in_memory("scope-a").unwrap();
    let at = Utc::now();

    storage.store("barrios", &json!([1]), at).unwrap();
    storage.store("barrios", &json!([1, 2]), at).unwrap();

    let entries = storage.load_all().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].data, json!([1, 2]));
  }

  #[test]
  fn test_sqlite_remove_and_clear() {
    let storage = SqliteStorage::in_memory("scope-a").unwrap();
    let at = Utc::now();

    storage.store("barrios", &json!([]), at).unwrap();
    storage.store("escuelas", &json!([]), at).unwrap();
    storage.remove("barrios").unwrap();
    assert_eq!(storage.load_all().unwrap().len(), 1);

    storage.clear().unwrap();
    assert!(storage.load_all().unwrap().is_empty());
  }

  #[test]
  fn test_scopes_are_isolated() {
    let dir = std::env::temp_dir().join(format!("padron-test-{}", std::process::id()));
    let path = dir.join("cache.db");
    let at = Utc::now();

    {
      let alice = SqliteStorage::open_at(&path, "alice").unwrap();
      alice.store("militantes", &json!([{"id": 7}]), at).unwrap();
    }

    let bob = SqliteStorage::open_at(&path, "bob").unwrap();
    assert!(bob.load_all().unwrap().is_empty());
    bob.clear().unwrap();

    let alice = SqliteStorage::open_at(&path, "alice").unwrap();
    assert_eq!(alice.load_all().unwrap().len(), 1);

    let _ = std::fs::remove_dir_all(dir);
  }

  #[test]
  fn test_session_scope_normalizes() {
    assert_eq!(
      session_scope("https://api.example.org/", "Ana"),
      session_scope("https://api.example.org", "ana ")
    );
    assert_ne!(
      session_scope("https://api.example.org", "ana"),
      session_scope("https://api.example.org", "bruno")
    );
  }
}
