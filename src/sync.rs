//! Replays queued offline mutations once the device is back online.

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::cache::KeyValueStore;
use crate::offline::{MutationInput, MutationOp, OfflineQueue, PendingMutation};
use crate::remote::{ApiRequest, NetworkClient, RequestOptions, Transport};

/// The "is online" signal. Detecting connectivity is the platform's job.
#[async_trait]
pub trait Connectivity: Send + Sync {
  async fn is_online(&self) -> bool;
}

/// Connectivity flag set from outside.
#[derive(Debug, Default)]
pub struct StaticConnectivity {
  online: AtomicBool,
}

impl StaticConnectivity {
  pub fn new(online: bool) -> Self {
    Self {
      online: AtomicBool::new(online),
    }
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }
}

#[async_trait]
impl Connectivity for StaticConnectivity {
  async fn is_online(&self) -> bool {
    self.online.load(Ordering::SeqCst)
  }
}

/// Build the remote call for a write.
///
/// `create` posts to the collection, `status_update` and `update` patch the
/// target row, `delete` deletes it.
pub fn mutation_request(
  resource: &str,
  target_id: &str,
  operation: MutationOp,
  payload: &Map<String, Value>,
) -> ApiRequest {
  let row = format!("{}/{}", resource, target_id);
  match operation {
    MutationOp::Create => {
      ApiRequest::new(Method::POST, resource).with_body(Value::Object(payload.clone()))
    }
    MutationOp::StatusUpdate | MutationOp::Update => {
      ApiRequest::new(Method::PATCH, row).with_body(Value::Object(payload.clone()))
    }
    MutationOp::Delete => ApiRequest::new(Method::DELETE, row),
  }
}

impl MutationInput {
  pub fn request(&self) -> ApiRequest {
    mutation_request(&self.resource, &self.target_id, self.operation, &self.payload)
  }
}

impl PendingMutation {
  pub fn request(&self) -> ApiRequest {
    mutation_request(&self.resource, &self.target_id, self.operation, &self.payload)
  }
}

/// Outcome of one replay pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
  /// Acknowledged by the remote and removed
  pub replayed: usize,
  /// Id of the mutation the remote rejected with a terminal error. It stays
  /// queued and blocks later ones until it is removed explicitly.
  pub rejected: Option<String>,
  /// Still queued
  pub remaining: usize,
  /// Whether the pass ran at all
  pub online: bool,
}

/// Drains the offline queue through the network client in FIFO order.
pub struct Replayer<S, T> {
  queue: Arc<OfflineQueue<S>>,
  client: NetworkClient<T>,
  connectivity: Arc<dyn Connectivity>,
}

impl<S: KeyValueStore, T: Transport> Replayer<S, T> {
  pub fn new(
    queue: Arc<OfflineQueue<S>>,
    client: NetworkClient<T>,
    connectivity: Arc<dyn Connectivity>,
  ) -> Self {
    Self {
      queue,
      client,
      connectivity,
    }
  }

  /// Replay every pending mutation, oldest first.
  ///
  /// Each mutation is removed only after the remote acknowledges it. Any
  /// failure stops the pass so later writes never overtake earlier ones. A
  /// terminal rejection is reported in `rejected`; the mutation is kept until
  /// a caller removes it with [`OfflineQueue::remove`].
  pub async fn replay(&self) -> ReplayReport {
    let pending = self.queue.list().await;
    let mut report = ReplayReport {
      remaining: pending.len(),
      ..ReplayReport::default()
    };

    if !self.connectivity.is_online().await {
      debug!(pending = pending.len(), "offline, skipping replay");
      return report;
    }
    report.online = true;

    for mutation in pending {
      match self
        .client
        .request(&mutation.request(), &RequestOptions::default())
        .await
      {
        Ok(_) => {
          self.queue.remove(&mutation.id).await;
          report.replayed += 1;
          report.remaining -= 1;
        }
        Err(e) if e.is_retryable() => {
          info!(id = %mutation.id, error = %e, "replay interrupted, will retry later");
          break;
        }
        Err(e) => {
          error!(
            id = %mutation.id,
            target_id = %mutation.target_id,
            error = %e,
            "mutation rejected by remote, keeping it queued"
          );
          report.rejected = Some(mutation.id);
          break;
        }
      }
    }

    info!(
      replayed = report.replayed,
      rejected = ?report.rejected,
      remaining = report.remaining,
      "offline replay finished"
    );
    report
  }
}
