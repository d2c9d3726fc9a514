use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::cache::{DependencyGraph, KeyPolicy, ResourceRegistry};
use crate::policy::Role;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub invalidation: InvalidationConfig,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  pub url: String,
  pub username: String,
  /// Role of the logged-in user; decides which mutations are allowed
  #[serde(default)]
  pub role: Role,
  /// Request timeout in seconds
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
  30
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Per-key TTL overrides in seconds. Unknown keys are registered as lists
  #[serde(default)]
  pub ttls: BTreeMap<String, i64>,
  /// Fail loudly on unknown cache keys and events
  #[serde(default)]
  pub strict_keys: bool,
  /// Keep entries in SQLite so stale data survives restarts
  #[serde(default = "default_true")]
  pub persist: bool,
  /// Database path (default: $XDG_DATA_HOME/padron/cache.db)
  pub path: Option<PathBuf>,
}

fn default_true() -> bool {
  true
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      ttls: BTreeMap::new(),
      strict_keys: false,
      persist: true,
      path: None,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvalidationConfig {
  /// Extra `resource: [derived, ...]` edges on top of the built-in graph
  #[serde(default)]
  pub derived: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
  /// Filter used when RUST_LOG is not set
  #[serde(default = "default_log_level")]
  pub level: String,
  /// Write logs to daily files in this directory instead of stderr
  pub dir: Option<PathBuf>,
}

fn default_log_level() -> String {
  "warn".to_string()
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      dir: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./padron.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/padron/config.yaml (`dirs::config_dir`)
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/padron/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("padron.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("padron").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Get the API token from environment variables.
  ///
  /// Checks PADRON_API_TOKEN first, then API_TOKEN as fallback.
  pub fn get_api_token() -> Result<String> {
    std::env::var("PADRON_API_TOKEN")
      .or_else(|_| std::env::var("API_TOKEN"))
      .map_err(|_| {
        eyre!("API token not found. Set PADRON_API_TOKEN or API_TOKEN environment variable.")
      })
  }

  /// Built-in resource registry with the configured TTL overrides applied.
  pub fn registry(&self) -> ResourceRegistry {
    let mut registry = ResourceRegistry::with_defaults();
    for (key, secs) in &self.cache.ttls {
      let ttl = chrono::Duration::seconds(*secs);
      if !registry.set_ttl(key, ttl) {
        warn!(key, "TTL configured for unknown resource, registering it as a list");
        registry.register(crate::cache::ResourceSpec::list(key, ttl));
      }
    }
    registry
  }

  /// Built-in dependency graph plus configured edges.
  pub fn dependency_graph(&self) -> DependencyGraph {
    let mut graph = DependencyGraph::with_defaults();
    for (source, derived) in &self.invalidation.derived {
      graph.declare(source, derived.iter().cloned());
    }
    graph
  }

  pub fn key_policy(&self) -> KeyPolicy {
    if self.cache.strict_keys {
      KeyPolicy::Strict
    } else {
      KeyPolicy::Lenient
    }
  }
}
