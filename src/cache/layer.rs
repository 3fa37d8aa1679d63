//! Cache layer that orchestrates paged caching with network fetching.

use color_eyre::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use super::paginated::PaginatedCache;
use super::storage::KeyValueStore;
use super::traits::{CacheResult, PagedResult};

/// Read-through access to paged collections.
///
/// This layer sits between callers and the network client: a page is served
/// from the paginated cache when present, and otherwise fetched and written
/// through both cache tiers.
pub struct CacheLayer<T, S> {
  pages: Arc<PaginatedCache<T, S>>,
}

impl<T, S> CacheLayer<T, S>
where
  T: Clone + Serialize + DeserializeOwned + Send + Sync,
  S: KeyValueStore,
{
  pub fn new(pages: PaginatedCache<T, S>) -> Self {
    Self {
      pages: Arc::new(pages),
    }
  }

  /// The underlying paginated cache.
  pub fn pages(&self) -> &PaginatedCache<T, S> {
    &self.pages
  }

  /// Fetch one page with a cache-first strategy.
  ///
  /// 1. Check the paginated cache (memory, then disk) - on hit, return it
  /// 2. On miss, call the fetcher with `(page, page_size)`
  /// 3. Store the fetched page in both tiers
  ///
  /// Fetch errors are returned as-is; nothing is cached for a failed fetch.
  pub async fn fetch_page<E, F, Fut>(
    &self,
    collection: &str,
    page: u32,
    fetcher: F,
  ) -> Result<CacheResult<PagedResult<T>>>
  where
    E: std::error::Error + Send + Sync + 'static,
    F: FnOnce(u32, u32) -> Fut,
    Fut: Future<Output = Result<PagedResult<T>, E>>,
  {
    if let Some(cached) = self.pages.get_page(collection, page).await? {
      debug!(collection, page, "page served from cache");
      return Ok(CacheResult::from_cache(cached));
    }

    debug!(collection, page, "page cache miss, fetching");
    let data = fetcher(page, self.pages.page_size()).await?;
    self.pages.set_page(collection, page, &data).await?;
    Ok(CacheResult::from_network(data))
  }

  /// Everything cached for a collection, without touching the network.
  pub async fn cached_items(&self, collection: &str) -> Vec<T> {
    self.pages.get_all_pages(collection).await
  }

  /// Drop every cached page of a collection so the next read refetches.
  pub async fn invalidate(&self, collection: &str) {
    self.pages.clear_pages(collection).await;
  }
}

impl<T, S> Clone for CacheLayer<T, S> {
  fn clone(&self) -> Self {
    Self {
      pages: Arc::clone(&self.pages),
    }
  }
}
