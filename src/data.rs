//! Composition root: one explicitly constructed instance of every component.

use color_eyre::Result;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::{
  CacheLayer, DurableCache, KeyValueStore, PagedResult, PaginatedCache, SqliteStore, VolatileCache,
};
use crate::config::Config;
use crate::offline::{MutationInput, OfflineQueue};
use crate::preload::PreloadQueue;
use crate::remote::{ApiRequest, HttpTransport, NetworkClient, NetworkError, RequestOptions, Transport};
use crate::sync::{Connectivity, Replayer, StaticConnectivity};

/// What happened to a submitted write.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
  /// The remote acknowledged the write
  Sent(Value),
  /// The write was queued for replay, with its queue id
  Queued(String),
}

/// The data access layer as assembled for the courier apps.
///
/// Every cache here is an ordinary value owned by this struct, so tests and
/// separate accounts can each build their own without sharing state.
pub struct DataLayer<S, T> {
  pub orders: CacheLayer<Value, S>,
  pub users: Arc<VolatileCache<Value>>,
  pub settings: Arc<DurableCache<Value, S>>,
  pub preload: PreloadQueue,
  pub offline: Arc<OfflineQueue<S>>,
  pub client: NetworkClient<T>,
}

impl DataLayer<SqliteStore, HttpTransport> {
  /// Open the SQLite store and HTTP transport described by the config.
  pub fn open(config: &Config) -> Result<Self> {
    let store = match &config.storage.path {
      Some(path) => SqliteStore::open_at(path)?,
      None => SqliteStore::open()?,
    };
    let transport = HttpTransport::new(&config.remote.url, Config::get_api_key())?;
    Self::new(config, Arc::new(store), transport)
  }
}

impl<S, T> DataLayer<S, T>
where
  S: KeyValueStore + 'static,
  T: Transport + 'static,
{
  pub fn new(config: &Config, store: Arc<S>, transport: T) -> Result<Self> {
    let pages = PaginatedCache::new(Arc::clone(&store), config.cache.pagination())?;

    Ok(Self {
      orders: CacheLayer::new(pages),
      users: Arc::new(VolatileCache::new(config.cache.users())?),
      settings: Arc::new(DurableCache::new(Arc::clone(&store), config.cache.settings())),
      preload: PreloadQueue::new(),
      offline: Arc::new(OfflineQueue::new(store)),
      client: NetworkClient::new(transport, config.remote.retry_policy()),
    })
  }

  /// Read one page of `collection`, fetching `endpoint` from the remote on a miss.
  ///
  /// The remote is asked for `limit`/`offset` rows; a full page means there may be more.
  pub async fn fetch_page(
    &self,
    collection: &str,
    endpoint: &str,
    page: u32,
  ) -> Result<PagedResult<Value>> {
    fetch_with(&self.orders, &self.client, collection, endpoint, page).await
  }

  /// Warm the cache for a page in the background.
  pub fn preload_page(&self, collection: &str, endpoint: &str, page: u32) {
    let orders = self.orders.clone();
    let client = self.client.clone();
    let collection = collection.to_string();
    let endpoint = endpoint.to_string();

    self.preload.add_task(move || async move {
      fetch_with(&orders, &client, &collection, &endpoint, page).await?;
      Ok(())
    });
  }

  /// Send a write now, or queue it when offline or the remote is unreachable.
  ///
  /// Older queued writes are replayed first. If any of them stay queued, the
  /// new write is queued behind them so the remote sees writes in order.
  ///
  /// Terminal rejections (validation, auth, missing rows) are returned to the
  /// caller instead of being queued, since replaying them would fail again.
  pub async fn submit(&self, input: MutationInput, online: bool) -> Result<SubmitOutcome> {
    if !online {
      let id = self.offline.enqueue(input).await?;
      return Ok(SubmitOutcome::Queued(id));
    }

    if !self.offline.is_empty().await {
      let report = self
        .replayer(Arc::new(StaticConnectivity::new(true)))
        .replay()
        .await;
      if report.remaining > 0 {
        debug!(
          target_id = %input.target_id,
          pending = report.remaining,
          "older writes still queued, queueing behind them"
        );
        let id = self.offline.enqueue(input).await?;
        return Ok(SubmitOutcome::Queued(id));
      }
    }

    match self
      .client
      .request(&input.request(), &RequestOptions::default())
      .await
    {
      Ok(value) => Ok(SubmitOutcome::Sent(value)),
      Err(e) if e.is_retryable() => {
        info!(target_id = %input.target_id, error = %e, "remote unreachable, queueing write");
        let id = self.offline.enqueue(input).await?;
        Ok(SubmitOutcome::Queued(id))
      }
      Err(e) => Err(e.into()),
    }
  }

  pub fn replayer(&self, connectivity: Arc<dyn Connectivity>) -> Replayer<S, T> {
    Replayer::new(Arc::clone(&self.offline), self.client.clone(), connectivity)
  }

  /// Drop everything cached for a collection, in memory and on disk.
  pub async fn clear_collection(&self, collection: &str) {
    self.orders.invalidate(collection).await;
  }

  /// Clear every cache tier. The offline queue is left alone.
  pub async fn clear_caches(&self, collections: &[String]) {
    self.preload.clear();
    self.users.clear();
    self.settings.clear().await;
    for collection in collections {
      self.orders.invalidate(collection).await;
    }
  }
}

async fn fetch_with<S, T>(
  orders: &CacheLayer<Value, S>,
  client: &NetworkClient<T>,
  collection: &str,
  endpoint: &str,
  page: u32,
) -> Result<PagedResult<Value>>
where
  S: KeyValueStore,
  T: Transport,
{
  let result = orders
    .fetch_page(collection, page, |page, page_size| async move {
      let offset = u64::from(page - 1) * u64::from(page_size);
      let request = ApiRequest::new(reqwest::Method::GET, endpoint)
        .with_query("limit", page_size.to_string())
        .with_query("offset", offset.to_string());

      let items = match client.request(&request, &RequestOptions::default()).await {
        Ok(Value::Array(items)) => items,
        Ok(Value::Null) => Vec::new(),
        Ok(other) => return Err(NetworkError::Decode(format!("expected a list, got {}", other))),
        Err(e) => return Err(e),
      };

      let count = items.len() as u64;
      Ok(PagedResult {
        has_more: count == u64::from(page_size),
        total: offset + count,
        items,
        page,
        page_size,
      })
    })
    .await?;

  debug!(collection, page, source = ?result.source, "page fetched");
  Ok(result.data)
}
