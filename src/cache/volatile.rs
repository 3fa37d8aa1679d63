//! Process-lifetime cache with lazy expiry and a size bound.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

use super::traits::TimedEntry;

/// Settings for a [`VolatileCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolatileConfig {
  /// TTL applied when `set` is called without one
  pub ttl: Duration,
  /// Maximum number of entries kept after each `set`
  pub max_size: usize,
}

impl Default for VolatileConfig {
  fn default() -> Self {
    Self {
      ttl: Duration::from_secs(5 * 60),
      max_size: 100,
    }
  }
}

/// Snapshot of a cache's size and limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
  pub size: usize,
  pub max_size: usize,
  pub ttl: Duration,
}

struct Slot<T> {
  entry: TimedEntry<T>,
  /// Insertion order, used for eviction so clock changes cannot reorder it
  seq: u64,
}

struct Inner<T> {
  entries: HashMap<String, Slot<T>>,
  next_seq: u64,
}

/// In-memory key/value cache.
///
/// Expired entries are removed when they are read, never by a background task.
/// When a `set` pushes the cache over `max_size`, the entries with the oldest
/// insertion time are dropped. Eviction looks at when an entry was *written*,
/// not when it was last read, so a key that is read constantly but never
/// rewritten is still evicted once it becomes the oldest.
pub struct VolatileCache<T> {
  inner: Mutex<Inner<T>>,
  config: VolatileConfig,
}

impl<T: Clone> VolatileCache<T> {
  /// Create a cache. Fails if `max_size` is zero.
  pub fn new(config: VolatileConfig) -> Result<Self> {
    if config.max_size == 0 {
      return Err(eyre!("Volatile cache max_size must be at least 1"));
    }

    Ok(Self {
      inner: Mutex::new(Inner {
        entries: HashMap::new(),
        next_seq: 0,
      }),
      config,
    })
  }

  fn lock(&self) -> MutexGuard<'_, Inner<T>> {
    // The map is left consistent between statements, so a poisoned lock is still usable
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Store a value with the default TTL.
  pub fn set(&self, key: &str, value: T) {
    self.set_with_ttl(key, value, self.config.ttl);
  }

  /// Store a value with an explicit TTL. A zero TTL falls back to the default.
  pub fn set_with_ttl(&self, key: &str, value: T, ttl: Duration) {
    let ttl = if ttl.is_zero() { self.config.ttl } else { ttl };

    let mut inner = self.lock();
    let seq = inner.next_seq;
    inner.next_seq += 1;
    inner.entries.insert(
      key.to_string(),
      Slot {
        entry: TimedEntry::new(value, ttl),
        seq,
      },
    );

    self.enforce_capacity(&mut inner);
  }

  /// Drop expired entries, then the oldest insertions beyond `max_size`.
  fn enforce_capacity(&self, inner: &mut Inner<T>) {
    let now = Utc::now();
    inner.entries.retain(|_, slot| !slot.entry.is_expired_at(now));

    let len = inner.entries.len();
    if len <= self.config.max_size {
      return;
    }

    let mut by_age: Vec<(u64, String)> = inner
      .entries
      .iter()
      .map(|(key, slot)| (slot.seq, key.clone()))
      .collect();
    by_age.sort_unstable();

    let overflow = len - self.config.max_size;
    for (_, key) in by_age.into_iter().take(overflow) {
      inner.entries.remove(&key);
    }
    debug!(evicted = overflow, "volatile cache over capacity");
  }

  /// Get a value, removing it if it has expired.
  pub fn get(&self, key: &str) -> Option<T> {
    let mut inner = self.lock();
    let expired = inner.entries.get(key)?.entry.is_expired();
    if expired {
      inner.entries.remove(key);
      return None;
    }
    inner.entries.get(key).map(|slot| slot.entry.value.clone())
  }

  /// Check for a live entry, removing it if it has expired.
  pub fn has(&self, key: &str) -> bool {
    let mut inner = self.lock();
    let expired = match inner.entries.get(key) {
      Some(slot) => slot.entry.is_expired(),
      None => return false,
    };
    if expired {
      inner.entries.remove(key);
    }
    !expired
  }

  pub fn delete(&self, key: &str) {
    self.lock().entries.remove(key);
  }

  pub fn clear(&self) {
    self.lock().entries.clear();
  }

  /// Number of stored entries, including ones that expired but were not read since.
  pub fn len(&self) -> usize {
    self.lock().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn stats(&self) -> CacheStats {
    CacheStats {
      size: self.len(),
      max_size: self.config.max_size,
      ttl: self.config.ttl,
    }
  }
}
