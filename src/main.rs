use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::{json, Value};
use std::path::PathBuf;

use padron::api::{build_cache, CachedApi};
use padron::cache::{CacheSource, CacheStore, Invalidation, InvalidationRouter};
use padron::config::Config;
use padron::logging;

#[derive(Parser, Debug)]
#[command(name = "padron")]
#[command(about = "Cached access to campaign data: barrios, escuelas, militantes, resultados")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/padron/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Skip the cache and ask the backend
  #[arg(short, long, global = true)]
  force: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Print one resource, from the cache when still valid
  Fetch { key: String },
  /// Load several resources concurrently
  Load {
    #[arg(required = true)]
    keys: Vec<String>,
  },
  /// Invalidate by event name (e.g. militante_created) or explicit keys
  Invalidate {
    #[arg(conflicts_with = "keys", required_unless_present = "keys")]
    event: Option<String>,
    #[arg(short, long, value_delimiter = ',')]
    keys: Vec<String>,
  },
  /// List every event and the keys it invalidates
  Events,
  /// Show the state of every cache entry
  Status,
  /// Drop every cached entry of this session
  Logout,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.log)?;

  match args.command {
    Command::Fetch { key } => {
      let api = CachedApi::new(&config)?;
      let result = api.fetch(&key, args.force).await?;
      print_json(&json!({
        "key": key,
        "source": source_name(result.source),
        "cached_at": result.cached_at.map(|t| t.to_rfc3339()),
        "data": result.data,
      }))
    }
    Command::Load { keys } => {
      let api = CachedApi::new(&config)?;
      let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
      let mut batch = api.batch(&keys);
      batch.fetch_all(args.force);
      batch.settle().await;

      let errors: Vec<Value> = batch
        .errors()
        .iter()
        .map(|e| json!({ "key": e.key, "error": e.message }))
        .collect();
      print_json(&json!({ "data": batch.data(), "errors": errors }))?;

      match batch.error() {
        Some(error) if batch.data().is_empty() => Err(eyre!(error)),
        _ => Ok(()),
      }
    }
    Command::Invalidate { event, keys } => {
      let (_, router) = build_cache(&config)?;
      let target = match event {
        Some(event) => Invalidation::Event(event),
        None => Invalidation::Keys(keys),
      };
      let cleared = router.invalidate(target);
      print_json(&json!({ "invalidated": cleared }))
    }
    Command::Events => {
      let (_, router) = build_cache(&config)?;
      print_json(&event_table(&router))
    }
    Command::Status => {
      let (store, _) = build_cache(&config)?;
      print_json(&status(&store))
    }
    Command::Logout => {
      let (_, router) = build_cache(&config)?;
      router.invalidate("logout");
      print_json(&json!({ "logged_out": config.api.username }))
    }
  }
}

fn print_json(value: &Value) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

fn source_name(source: CacheSource) -> &'static str {
  match source {
    CacheSource::Network => "network",
    CacheSource::CacheFresh => "cache",
    CacheSource::Offline => "offline",
  }
}

fn event_table(router: &InvalidationRouter) -> Value {
  let rows: Vec<Value> = router
    .event_table()
    .into_iter()
    .map(|(event, keys)| match keys {
      Some(keys) => json!({ "event": event.to_string(), "keys": keys }),
      None => json!({ "event": event.to_string(), "keys": "*" }),
    })
    .collect();
  Value::Array(rows)
}

fn status(store: &CacheStore) -> Value {
  let now = store.now();
  let rows: Vec<Value> = store
    .entries()
    .into_iter()
    .map(|entry| {
      let state = if entry.is_valid(now) {
        "valid"
      } else if entry.data.is_some() {
        "stale"
      } else {
        "empty"
      };
      json!({
        "key": entry.key,
        "state": state,
        "ttl_secs": entry.ttl.num_seconds(),
        "age_secs": entry.fetched_at.map(|t| (now - t).num_seconds()),
      })
    })
    .collect();
  Value::Array(rows)
}
