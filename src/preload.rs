//! Background queue that warms caches ahead of navigation.
//!
//! Tasks run one at a time, in the order they were added, on a single worker
//! task. The worker exists only while there is work: adding to an idle queue
//! spawns it, and it exits once the queue is empty.
//!
//! ```ignore
//! // Warm page 2 while page 1 is on screen
//! data.preload_page("orders_u1", "packages", 2);
//!
//! // Any fallible async work can be queued directly
//! let users = Arc::clone(&data.users);
//! data.preload.add_task(move || async move {
//!   users.set("u1", serde_json::json!({"name": "Aung"}));
//!   Ok(())
//! });
//! data.preload.wait_idle().await;
//! ```

use color_eyre::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::{debug, warn};

/// A deferred task: nothing runs until the worker calls it.
type TaskFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

#[derive(Default)]
struct State {
  tasks: VecDeque<TaskFn>,
  draining: bool,
}

#[derive(Default)]
struct Shared {
  state: Mutex<State>,
  idle: Notify,
}

impl Shared {
  fn lock(&self) -> MutexGuard<'_, State> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

/// Best-effort FIFO of preload tasks.
///
/// Failures and panics in a task are logged and swallowed; they never stop the
/// queue or reach whoever added the task.
#[derive(Clone, Default)]
pub struct PreloadQueue {
  shared: Arc<Shared>,
}

impl PreloadQueue {
  pub fn new() -> Self {
    Self::default()
  }

  /// Queue a task and start draining if the queue was idle.
  ///
  /// Must be called from within a tokio runtime.
  pub fn add_task<F, Fut>(&self, task: F)
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
  {
    let mut state = self.shared.lock();
    state.tasks.push_back(Box::new(move || task().boxed()));

    if state.draining {
      return;
    }
    state.draining = true;
    drop(state);

    tokio::spawn(drain(Arc::clone(&self.shared)));
  }

  /// Drop every task that has not started yet. A task already running is not interrupted.
  pub fn clear(&self) {
    let mut state = self.shared.lock();
    let dropped = state.tasks.len();
    state.tasks.clear();
    debug!(dropped, "cleared preload queue");
  }

  /// Tasks waiting to start.
  pub fn pending(&self) -> usize {
    self.shared.lock().tasks.len()
  }

  pub fn is_draining(&self) -> bool {
    self.shared.lock().draining
  }

  /// Wait until the worker has run out of tasks.
  pub async fn wait_idle(&self) {
    loop {
      let notified = self.shared.idle.notified();
      if !self.is_draining() {
        return;
      }
      notified.await;
    }
  }
}

async fn drain(shared: Arc<Shared>) {
  loop {
    let task = {
      let mut state = shared.lock();
      match state.tasks.pop_front() {
        Some(task) => task,
        None => {
          state.draining = false;
          shared.idle.notify_waiters();
          return;
        }
      }
    };

    let run = async move { task().await };
    match AssertUnwindSafe(run).catch_unwind().await {
      Ok(Ok(())) => {}
      Ok(Err(e)) => warn!(error = %e, "preload task failed"),
      Err(_) => warn!("preload task panicked"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use color_eyre::eyre::eyre;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;

  #[tokio::test]
  async fn test_tasks_run_in_order_without_overlap() {
    let queue = PreloadQueue::new();
    let order = Arc::new(Mutex::new(Vec::new()));
    let active = Arc::new(AtomicUsize::new(0));
    let max_active = Arc::new(AtomicUsize::new(0));

    for i in 0..5 {
      let order = order.clone();
      let active = active.clone();
      let max_active = max_active.clone();
      queue.add_task(move || async move {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        max_active.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        order.lock().unwrap().push(i);
        active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
      });
    }

    queue.wait_idle().await;

    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    assert_eq!(max_active.load(Ordering::SeqCst), 1);
    assert!(!queue.is_draining());
  }

  #[tokio::test]
  async fn test_failures_do_not_stop_queue() {
    let queue = PreloadQueue::new();
    let done = Arc::new(AtomicUsize::new(0));

    queue.add_task(|| async { Err(eyre!("remote unavailable")) });
    queue.add_task(|| async {
      let missing: Option<()> = None;
      missing.expect("bad task");
      Ok(())
    });
    let counter = done.clone();
    queue.add_task(move || async move {
      counter.fetch_add(1, Ordering::SeqCst);
      Ok(())
    });

    queue.wait_idle().await;
    assert_eq!(done.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_clear_keeps_in_flight_task() {
    let queue = PreloadQueue::new();
    let ran = Arc::new(Mutex::new(Vec::new()));
    let (started_tx, started_rx) = tokio::sync::oneshot::channel();

    let log = ran.clone();
    queue.add_task(move || async move {
      let _ = started_tx.send(());
      tokio::time::sleep(Duration::from_millis(20)).await;
      log.lock().unwrap().push("first");
      Ok(())
    });
    for name in ["second", "third"] {
      let log = ran.clone();
      queue.add_task(move || async move {
        log.lock().unwrap().push(name);
        Ok(())
      });
    }

    started_rx.await.unwrap();
    assert_eq!(queue.pending(), 2);
    queue.clear();
    assert_eq!(queue.pending(), 0);

    queue.wait_idle().await;
    assert_eq!(*ran.lock().unwrap(), vec!["first"]);
  }

  #[tokio::test]
  async fn test_restarts_after_idle() {
    let queue = PreloadQueue::new();
    let count = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
      let count = count.clone();
      queue.add_task(move || async move {
        count.fetch_add(1, Ordering::SeqCst);
        Ok(())
      });
      queue.wait_idle().await;
    }

    assert_eq!(count.load(Ordering::SeqCst), 2);
  }
}
