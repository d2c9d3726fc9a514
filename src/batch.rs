//! Concurrent loading of several resources with one aggregated state.

use color_eyre::{eyre::eyre, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::mpsc;

use crate::cache::{CacheLayer, Completion, Ticket};
use crate::query::{fetcher, FetcherFn};

/// One resource of a batch.
#[derive(Clone)]
pub struct BatchEntry {
  pub key: String,
  pub fetcher: FetcherFn,
}

impl BatchEntry {
  pub fn new<F, Fut>(key: &str, fetch: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Value>> + Send + 'static,
  {
    Self {
      key: key.to_string(),
      fetcher: fetcher(fetch),
    }
  }
}

/// A failed entry of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchError {
  pub key: String,
  pub message: String,
}

type Arrival = (usize, Result<Value>);

struct PendingBatch {
  tickets: HashMap<usize, Ticket>,
  receiver: mpsc::UnboundedReceiver<Arrival>,
}

/// Loads a list of resources at once.
///
/// Cache hits are adopted immediately. Misses are fetched concurrently, one
/// task each, and applied as they arrive; `is_loading` stays true until the
/// last one has resolved. A failure only affects its own entry.
pub struct BatchQuery {
  layer: CacheLayer,
  entries: Vec<BatchEntry>,
  data: HashMap<String, Value>,
  errors: Vec<BatchError>,
  pending: Option<PendingBatch>,
}

impl BatchQuery {
  pub fn new(layer: CacheLayer, entries: Vec<BatchEntry>) -> Self {
    Self {
      layer,
      entries,
      data: HashMap::new(),
      errors: Vec::new(),
      pending: None,
    }
  }

  pub fn keys(&self) -> Vec<&str> {
    self.entries.iter().map(|e| e.key.as_str()).collect()
  }

  pub fn is_loading(&self) -> bool {
    self.pending.is_some()
  }

  /// Raw payload for `key`, if loaded.
  pub fn get(&self, key: &str) -> Option<&Value> {
    self.data.get(key)
  }

  /// Payload for `key` decoded as `T`.
  pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
    self
      .data
      .get(key)
      .and_then(|v| serde_json::from_value(v.clone()).ok())
  }

  pub fn data(&self) -> &HashMap<String, Value> {
    &self.data
  }

  /// Every entry that failed in the last load.
  pub fn errors(&self) -> &[BatchError] {
    &self.errors
  }

  /// All failures joined into one message.
  pub fn error(&self) -> Option<String> {
    if self.errors.is_empty() {
      return None;
    }
    Some(
      self
        .errors
        .iter()
        .map(|e| format!("{}: {}", e.key, e.message))
        .collect::<Vec<_>>()
        .join("; "),
    )
  }

  /// Replace the entry list, reloading if the keys differ.
  ///
  /// Entries are compared by their ordered key list, since fetchers cannot
  /// be compared. Returns true when a load was triggered.
  pub fn configure(&mut self, entries: Vec<BatchEntry>) -> bool {
    let changed = self.entries.len() != entries.len()
      || self
        .entries
        .iter()
        .zip(&entries)
        .any(|(old, new)| old.key != new.key);
    self.entries = entries;
    if changed {
      self.pending = None;
      self.fetch_all(false);
    }
    changed
  }

  /// Load every entry, from the cache when possible.
  pub fn fetch_all(&mut self, force: bool) {
    if !force && self.pending.is_some() {
      return;
    }

    self.errors.clear();
    self.data.retain(|key, _| self.entries.iter().any(|e| &e.key == key));

    let (tx, rx) = mpsc::unbounded_channel();
    let mut tickets = HashMap::new();

    for (index, entry) in self.entries.iter().enumerate() {
      if !force {
        if let Some(value) = self.layer.lookup::<Value>(&entry.key) {
          self.data.insert(entry.key.clone(), value);
          continue;
        }
      }

      tickets.insert(index, self.layer.begin(&entry.key));
      let future = (entry.fetcher)();
      let tx = tx.clone();
      tokio::spawn(async move {
        let result = future.await;
        // Ignore send errors - the batch may have been reconfigured
        let _ = tx.send((index, result));
      });
    }

    self.pending = if tickets.is_empty() {
      None
    } else {
      Some(PendingBatch {
        tickets,
        receiver: rx,
      })
    };
  }

  /// Force every entry to refetch.
  pub fn refetch(&mut self) {
    self.fetch_all(true);
  }

  /// Apply every result that has arrived, without blocking.
  ///
  /// Returns `true` if anything changed.
  pub fn poll(&mut self) -> bool {
    let mut changed = false;
    loop {
      let Some(pending) = &mut self.pending else {
        return changed;
      };
      let arrival = pending.receiver.try_recv();
      match arrival {
        Ok((index, result)) => {
          self.apply(index, result);
          changed = true;
        }
        Err(mpsc::error::TryRecvError::Empty) => return changed,
        Err(mpsc::error::TryRecvError::Disconnected) => {
          self.abandon_pending();
          return true;
        }
      }
    }
  }

  /// Wait until every pending entry has resolved.
  pub async fn settle(&mut self) -> bool {
    let mut changed = false;
    while let Some(pending) = &mut self.pending {
      let arrival = pending.receiver.recv().await;
      match arrival {
        Some((index, result)) => self.apply(index, result),
        None => self.abandon_pending(),
      }
      changed = true;
    }
    changed
  }

  fn apply(&mut self, index: usize, result: Result<Value>) {
    let Some(pending) = &mut self.pending else {
      return;
    };
    let Some(ticket) = pending.tickets.remove(&index) else {
      return;
    };
    if pending.tickets.is_empty() {
      self.pending = None;
    }

    match self.layer.complete::<Value>(&ticket, result) {
      Completion::Fresh(value) | Completion::Superseded(Some(value)) => {
        self.data.insert(ticket.key, value);
      }
      Completion::Superseded(None) => {}
      Completion::Degraded { data, error } => {
        match data {
          Some(value) => self.data.insert(ticket.key.clone(), value),
          None => self.data.remove(&ticket.key),
        };
        self.errors.push(BatchError {
          key: ticket.key,
          message: error,
        });
      }
    }
  }

  /// Resolve whatever is still outstanding as failed.
  fn abandon_pending(&mut self) {
    let Some(pending) = &self.pending else {
      return;
    };
    let indices: Vec<usize> = pending.tickets.keys().copied().collect();
    for index in indices {
      self.apply(index, Err(eyre!("Query was cancelled")));
    }
    self.pending = None;
  }
}

impl std::fmt::Debug for BatchQuery {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("BatchQuery")
      .field("keys", &self.keys())
      .field("loading", &self.is_loading())
      .field("errors", &self.errors)
      .finish_non_exhaustive()
  }
}
