//! Durable FIFO of writes made while disconnected.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::cache::KeyValueStore;

/// Store key holding the whole queue as one JSON array.
pub const QUEUE_KEY: &str = "offline_mutation_queue";

/// Kind of write a mutation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationOp {
  StatusUpdate,
  Create,
  Update,
  Delete,
}

/// What a caller hands to [`OfflineQueue::enqueue`].
#[derive(Debug, Clone, PartialEq)]
pub struct MutationInput {
  /// Remote collection the write goes to, e.g. `packages`
  pub resource: String,
  pub target_id: String,
  pub operation: MutationOp,
  pub payload: Map<String, Value>,
}

/// A queued write. Never modified once enqueued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMutation {
  pub id: String,
  pub resource: String,
  pub target_id: String,
  pub operation: MutationOp,
  pub payload: Map<String, Value>,
  pub enqueued_at: DateTime<Utc>,
}

/// Offline mutation queue persisted under [`QUEUE_KEY`].
///
/// The whole list is rewritten on every change. An async lock serializes
/// read-modify-write cycles so concurrent enqueues cannot drop each other.
/// Nothing is merged or deduplicated: two updates to the same target both
/// stay queued and replay in order.
pub struct OfflineQueue<S> {
  store: Arc<S>,
  write_lock: Mutex<()>,
}

impl<S: KeyValueStore> OfflineQueue<S> {
  pub fn new(store: Arc<S>) -> Self {
    Self {
      store,
      write_lock: Mutex::new(()),
    }
  }

  async fn load(&self) -> Result<Vec<PendingMutation>> {
    let raw = match self.store.get(QUEUE_KEY).await? {
      Some(raw) => raw,
      None => return Ok(Vec::new()),
    };

    match serde_json::from_str(&raw) {
      Ok(queue) => Ok(queue),
      Err(e) => {
        error!(error = %e, "offline queue is unreadable, starting empty");
        Ok(Vec::new())
      }
    }
  }

  async fn save(&self, queue: &[PendingMutation]) -> Result<()> {
    let json =
      serde_json::to_string(queue).map_err(|e| eyre!("Failed to serialize offline queue: {}", e))?;
    self.store.set(QUEUE_KEY, &json).await
  }

  /// Append a mutation and persist the queue before returning its id.
  ///
  /// Unlike the caches, a storage failure here is returned: the write would
  /// otherwise be lost without a trace.
  pub async fn enqueue(&self, input: MutationInput) -> Result<String> {
    let _guard = self.write_lock.lock().await;

    let mut queue = self
      .load()
      .await
      .map_err(|e| eyre!("Failed to load offline queue: {}", e))?;

    let mutation = PendingMutation {
      id: Uuid::new_v4().to_string(),
      resource: input.resource,
      target_id: input.target_id,
      operation: input.operation,
      payload: input.payload,
      enqueued_at: Utc::now(),
    };
    let id = mutation.id.clone();
    queue.push(mutation);

    self
      .save(&queue)
      .await
      .map_err(|e| eyre!("Failed to persist offline queue: {}", e))?;

    debug!(id = %id, pending = queue.len(), "queued offline mutation");
    Ok(id)
  }

  /// Pending mutations in enqueue order.
  pub async fn list(&self) -> Vec<PendingMutation> {
    match self.load().await {
      Ok(queue) => queue,
      Err(e) => {
        warn!(error = %e, "failed to read offline queue");
        Vec::new()
      }
    }
  }

  /// Forget a mutation once the remote has acknowledged it, or once a caller
  /// gives up on a rejected one. Returns whether it was removed.
  pub async fn remove(&self, id: &str) -> bool {
    let _guard = self.write_lock.lock().await;

    let mut queue = match self.load().await {
      Ok(queue) => queue,
      Err(e) => {
        warn!(id, error = %e, "failed to read offline queue for removal");
        return false;
      }
    };

    let before = queue.len();
    queue.retain(|m| m.id != id);
    if queue.len() == before {
      return false;
    }

    if let Err(e) = self.save(&queue).await {
      warn!(id, error = %e, "failed to persist offline queue after removal");
      return false;
    }
    true
  }

  pub async fn len(&self) -> usize {
    self.list().await.len()
  }

  pub async fn is_empty(&self) -> bool {
    self.len().await == 0
  }
}
