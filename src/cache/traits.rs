//! Core types shared by every cache tier.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A cached value stamped with when it was stored and how long it stays valid.
///
/// Persisted as `{"value": .., "storedAt": <epoch ms>, "ttl": <ms>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimedEntry<T> {
  /// The cached value
  pub value: T,
  /// When the value was stored
  #[serde(with = "chrono::serde::ts_milliseconds")]
  pub stored_at: DateTime<Utc>,
  /// How long the value stays valid after `stored_at`
  #[serde(with = "duration_ms")]
  pub ttl: Duration,
}

impl<T> TimedEntry<T> {
  /// Stamp a value with the current time.
  pub fn new(value: T, ttl: Duration) -> Self {
    Self {
      value,
      stored_at: Utc::now(),
      ttl,
    }
  }

  /// Check expiry against the current time.
  pub fn is_expired(&self) -> bool {
    self.is_expired_at(Utc::now())
  }

  /// An entry is expired once strictly more than `ttl` has elapsed since it was stored.
  /// Entries stamped in the future (clock skew) are never expired.
  pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
    match (now - self.stored_at).to_std() {
      Ok(elapsed) => elapsed > self.ttl,
      Err(_) => false,
    }
  }
}

/// One page of a remote collection.
///
/// `has_more` is authoritative for whether `page + 1` exists; the last page
/// may hold fewer than `page_size` items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PagedResult<T> {
  pub items: Vec<T>,
  /// 1-based page number
  pub page: u32,
  pub page_size: u32,
  /// Total number of items in the collection, as reported by the remote
  pub total: u64,
  pub has_more: bool,
}

impl<T> PagedResult<T> {
  /// Build a page, deriving `has_more` from `total`.
  pub fn new(items: Vec<T>, page: u32, page_size: u32, total: u64) -> Self {
    let seen = u64::from(page) * u64::from(page_size);
    Self {
      items,
      page,
      page_size,
      total,
      has_more: seen < total,
    }
  }
}

/// Result from a read-through fetch, with where the data came from.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
}

impl<T> CacheResult<T> {
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
    }
  }

  pub fn from_cache(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
    }
  }
}

/// Indicates where fetched data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from the remote store
  Network,
  /// Served by one of the cache tiers
  Cache,
}

/// Serialize a `Duration` as whole milliseconds.
mod duration_ms {
  use serde::{Deserialize, Deserializer, Serializer};
  use std::time::Duration;

  pub fn serialize<S: Serializer>(ttl: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX))
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let millis = u64::deserialize(deserializer)?;
    Ok(Duration::from_millis(millis))
  }
}
