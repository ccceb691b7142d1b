use crate::error::PoolError;
use crate::handle::{ResultCell, TaskHandle};

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use tracing::{trace, warn};

lazy_static::lazy_static! {
  static ref NEXT_POOL_TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

/// Invoke-once capability behind the type erasure: each call site supplies a
/// concrete closure plus its typed result cell, the queue only sees this.
trait RunOnce: Send {
  /// Executes the closure and publishes its outcome (value or captured
  /// panic) into the paired result cell.
  fn run(self: Box<Self>);
  /// Publishes [`PoolError::TaskAbandoned`] without running, so a handle
  /// whose task never reached a worker does not block forever.
  fn abandon(self: Box<Self>);
}

struct Packaged<F, R> {
  job: F,
  cell: Arc<ResultCell<R>>,
}

impl<F, R> RunOnce for Packaged<F, R>
where
  F: FnOnce() -> R + Send + 'static,
  R: Send + 'static,
{
  fn run(self: Box<Self>) {
    let this = *self;
    let outcome = panic::catch_unwind(AssertUnwindSafe(this.job))
      .map_err(|payload| PoolError::TaskPanicked(panic_message(payload.as_ref())));
    this.cell.publish(outcome);
  }

  fn abandon(self: Box<Self>) {
    self.cell.publish(Err(PoolError::TaskAbandoned));
  }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
  if let Some(message) = payload.downcast_ref::<&'static str>() {
    (*message).to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "non-string panic payload".to_string()
  }
}

/// A packaged, type-erased unit of work sitting in the pool queue.
///
/// Owned by the queue until popped, then exclusively by the executing
/// worker. Runs at most once; if dropped unexecuted (queue torn down with
/// the task still inside) it abandons itself into the handle.
pub(crate) struct QueuedTask {
  pub(crate) task_id: u64,
  runner: Option<Box<dyn RunOnce>>,
}

impl QueuedTask {
  pub(crate) fn run(mut self) {
    trace!(task_id = %self.task_id, "Executing task.");
    if let Some(runner) = self.runner.take() {
      runner.run();
    }
  }
}

impl Drop for QueuedTask {
  fn drop(&mut self) {
    if let Some(runner) = self.runner.take() {
      warn!(
        task_id = %self.task_id,
        "Task dropped without running; abandoning its handle."
      );
      runner.abandon();
    }
  }
}

/// Packages a closure into a [`QueuedTask`] paired with the [`TaskHandle`]
/// its outcome will be published into.
pub(crate) fn package<F, R>(job: F) -> (QueuedTask, TaskHandle<R>)
where
  F: FnOnce() -> R + Send + 'static,
  R: Send + 'static,
{
  let task_id = NEXT_POOL_TASK_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
  let cell = Arc::new(ResultCell::new());
  let task = QueuedTask {
    task_id,
    runner: Some(Box::new(Packaged {
      job,
      cell: cell.clone(),
    })),
  };
  (task, TaskHandle { task_id, cell })
}
