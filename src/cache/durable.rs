//! Cache tier persisted through the device key/value store.

use futures::future::join_all;
use serde::{de::DeserializeOwned, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::storage::KeyValueStore;
use super::traits::TimedEntry;

/// Settings for a [`DurableCache`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DurableConfig {
  /// Prepended to every key; also what `clear` scans for
  pub prefix: String,
  /// TTL applied when `set` is called without one
  pub ttl: Duration,
}

impl Default for DurableConfig {
  fn default() -> Self {
    Self {
      prefix: "cache_".to_string(),
      ttl: Duration::from_secs(5 * 60),
    }
  }
}

/// Key/value cache that survives process restarts.
///
/// Entries are stored as JSON [`TimedEntry`] values under `<prefix><key>`.
/// Nothing here fails loudly: storage errors are logged, unreadable or expired
/// entries are deleted, and both read back as a miss.
pub struct DurableCache<T, S> {
  store: Arc<S>,
  config: DurableConfig,
  _marker: PhantomData<fn() -> T>,
}

impl<T, S> DurableCache<T, S>
where
  T: Serialize + DeserializeOwned + Send + Sync,
  S: KeyValueStore,
{
  pub fn new(store: Arc<S>, config: DurableConfig) -> Self {
    Self {
      store,
      config,
      _marker: PhantomData,
    }
  }

  pub fn prefix(&self) -> &str {
    &self.config.prefix
  }

  fn storage_key(&self, key: &str) -> String {
    format!("{}{}", self.config.prefix, key)
  }

  /// Store a value with the default TTL.
  pub async fn set(&self, key: &str, value: &T) {
    self.set_with_ttl(key, value, self.config.ttl).await;
  }

  /// Store a value with an explicit TTL. A zero TTL falls back to the default.
  pub async fn set_with_ttl(&self, key: &str, value: &T, ttl: Duration) {
    let ttl = if ttl.is_zero() { self.config.ttl } else { ttl };
    let entry = TimedEntry::new(value, ttl);

    let json = match serde_json::to_string(&entry) {
      Ok(json) => json,
      Err(e) => {
        warn!(key, error = %e, "failed to serialize durable cache entry");
        return;
      }
    };

    if let Err(e) = self.store.set(&self.storage_key(key), &json).await {
      warn!(key, error = %e, "failed to write durable cache entry");
    }
  }

  /// Read a value. Expired or unreadable entries are deleted and reported absent.
  pub async fn get(&self, key: &str) -> Option<T> {
    let raw = match self.store.get(&self.storage_key(key)).await {
      Ok(raw) => raw?,
      Err(e) => {
        warn!(key, error = %e, "failed to read durable cache entry");
        return None;
      }
    };

    let entry: TimedEntry<T> = match serde_json::from_str(&raw) {
      Ok(entry) => entry,
      Err(e) => {
        warn!(key, error = %e, "discarding malformed durable cache entry");
        self.delete(key).await;
        return None;
      }
    };

    if entry.is_expired() {
      debug!(key, "durable cache entry expired");
      self.delete(key).await;
      return None;
    }

    Some(entry.value)
  }

  pub async fn has(&self, key: &str) -> bool {
    self.get(key).await.is_some()
  }

  pub async fn delete(&self, key: &str) {
    if let Err(e) = self.store.delete(&self.storage_key(key)).await {
      warn!(key, error = %e, "failed to delete durable cache entry");
    }
  }

  /// Remove every key under this cache's prefix.
  pub async fn clear(&self) {
    let keys = match self.store.list_keys().await {
      Ok(keys) => keys,
      Err(e) => {
        warn!(prefix = %self.config.prefix, error = %e, "failed to list keys for clear");
        return;
      }
    };

    for key in keys.iter().filter(|k| k.starts_with(&self.config.prefix)) {
      if let Err(e) = self.store.delete(key).await {
        warn!(key = %key, error = %e, "failed to delete durable cache entry");
      }
    }
  }

  /// Store several values concurrently with the default TTL.
  pub async fn set_many(&self, items: &[(String, T)]) {
    join_all(items.iter().map(|(key, value)| self.set(key, value))).await;
  }

  /// Read several values concurrently, in the order of `keys`.
  pub async fn get_many(&self, keys: &[&str]) -> Vec<Option<T>> {
    join_all(keys.iter().map(|key| self.get(key))).await
  }
}
