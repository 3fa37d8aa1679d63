//! Two-tier cache for paged collections.

use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::durable::{DurableCache, DurableConfig};
use super::storage::KeyValueStore;
use super::traits::PagedResult;
use super::volatile::{VolatileCache, VolatileConfig};

/// Settings for a [`PaginatedCache`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationConfig {
  /// Items requested per page from the remote
  pub page_size: u32,
  /// Highest page number walked by `get_all_pages` and `clear_pages`
  pub max_pages: u32,
  pub memory: VolatileConfig,
  pub durable: DurableConfig,
}

impl Default for PaginationConfig {
  fn default() -> Self {
    Self {
      page_size: 20,
      max_pages: 10,
      memory: VolatileConfig {
        ttl: Duration::from_secs(2 * 60),
        max_size: 50,
      },
      durable: DurableConfig {
        prefix: "pagination_".to_string(),
        ttl: Duration::from_secs(10 * 60),
      },
    }
  }
}

/// Pages of a collection cached in memory and on disk.
///
/// Holds no data of its own: each page lives in the volatile tier and the
/// durable tier under `<collection>_page_<n>`. Reads check memory first and
/// promote durable hits back into memory.
pub struct PaginatedCache<T, S> {
  memory: VolatileCache<PagedResult<T>>,
  durable: DurableCache<PagedResult<T>, S>,
  page_size: u32,
  max_pages: u32,
}

impl<T, S> PaginatedCache<T, S>
where
  T: Clone + Serialize + DeserializeOwned + Send + Sync,
  S: KeyValueStore,
{
  pub fn new(store: Arc<S>, config: PaginationConfig) -> Result<Self> {
    if config.page_size == 0 {
      return Err(eyre!("Pagination page_size must be at least 1"));
    }
    if config.max_pages == 0 {
      return Err(eyre!("Pagination max_pages must be at least 1"));
    }

    Ok(Self {
      memory: VolatileCache::new(config.memory)?,
      durable: DurableCache::new(store, config.durable),
      page_size: config.page_size,
      max_pages: config.max_pages,
    })
  }

  pub fn page_size(&self) -> u32 {
    self.page_size
  }

  pub fn max_pages(&self) -> u32 {
    self.max_pages
  }

  fn page_key(collection: &str, page: u32) -> Result<String> {
    if page == 0 {
      return Err(eyre!("Page numbers start at 1 (collection {})", collection));
    }
    Ok(format!("{}_page_{}", collection, page))
  }

  /// Write a page through both tiers.
  pub async fn set_page(&self, collection: &str, page: u32, data: &PagedResult<T>) -> Result<()> {
    let key = Self::page_key(collection, page)?;
    self.memory.set(&key, data.clone());
    self.durable.set(&key, data).await;
    Ok(())
  }

  /// Read a page, memory first, then disk.
  pub async fn get_page(&self, collection: &str, page: u32) -> Result<Option<PagedResult<T>>> {
    let key = Self::page_key(collection, page)?;

    if let Some(data) = self.memory.get(&key) {
      return Ok(Some(data));
    }

    match self.durable.get(&key).await {
      Some(data) => {
        debug!(key = %key, "promoting durable page into memory");
        self.memory.set(&key, data.clone());
        Ok(Some(data))
      }
      None => Ok(None),
    }
  }

  /// Flatten cached pages from 1 onward.
  ///
  /// Stops at the first missing page, at a page with `has_more == false`, or
  /// after `max_pages`. Never goes to the network.
  pub async fn get_all_pages(&self, collection: &str) -> Vec<T> {
    let mut items = Vec::new();

    for page in 1..=self.max_pages {
      let data = match self.get_page(collection, page).await {
        Ok(Some(data)) => data,
        _ => break,
      };
      let has_more = data.has_more;
      items.extend(data.items);
      if !has_more {
        break;
      }
    }

    items
  }

  /// Delete pages 1..=max_pages from both tiers.
  pub async fn clear_pages(&self, collection: &str) {
    for page in 1..=self.max_pages {
      let key = format!("{}_page_{}", collection, page);
      self.memory.delete(&key);
      self.durable.delete(&key).await;
    }
  }

  /// Rewrite the items of a cached page. Does nothing if the page is not cached.
  pub async fn update_page<F>(&self, collection: &str, page: u32, updater: F) -> Result<()>
  where
    F: FnOnce(Vec<T>) -> Vec<T>,
  {
    if let Some(mut data) = self.get_page(collection, page).await? {
      data.items = updater(data.items);
      self.set_page(collection, page, &data).await?;
    }
    Ok(())
  }
}
