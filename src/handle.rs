use crate::error::PoolError;

use std::fmt;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

/// Single-assignment result slot shared between a submitter's [`TaskHandle`]
/// and the worker that executes the task.
///
/// The worker writes exactly once via [`ResultCell::publish`]; the handle may
/// observe the state any number of times and claims the value at most once.
pub(crate) struct ResultCell<R> {
  state: Mutex<CellState<R>>,
  completed: Condvar,
}

enum CellState<R> {
  Pending,
  Ready(Result<R, PoolError>),
  Claimed,
}

impl<R> CellState<R> {
  fn take_ready(&mut self) -> Option<Result<R, PoolError>> {
    if matches!(self, CellState::Ready(_)) {
      match std::mem::replace(self, CellState::Claimed) {
        CellState::Ready(outcome) => return Some(outcome),
        other => *self = other,
      }
    }
    None
  }
}

impl<R> ResultCell<R> {
  pub(crate) fn new() -> Self {
    Self {
      state: Mutex::new(CellState::Pending),
      completed: Condvar::new(),
    }
  }

  /// Publishes the task outcome. The first write wins; later writes are
  /// ignored so an abandon racing a completed run cannot clobber the result.
  pub(crate) fn publish(&self, outcome: Result<R, PoolError>) {
    {
      let mut state = self.state.lock();
      if matches!(*state, CellState::Pending) {
        *state = CellState::Ready(outcome);
      }
    }
    self.completed.notify_all();
  }
}

/// A handle to a task submitted to a [`WorkerThreadPool`] or
/// [`BoundedTaskPool`].
///
/// The handle is the submitter's side of a single-assignment result cell:
/// the executing worker publishes either the closure's return value or the
/// captured panic, and the handle retrieves it exactly once via
/// [`TaskHandle::join`]. [`TaskHandle::wait`] blocks without consuming, for
/// callers that only care about completion.
///
/// Dropping the handle never affects the task; it runs to completion and the
/// unobserved outcome is discarded.
///
/// [`WorkerThreadPool`]: crate::WorkerThreadPool
/// [`BoundedTaskPool`]: crate::BoundedTaskPool
pub struct TaskHandle<R> {
  pub(crate) task_id: u64,
  pub(crate) cell: Arc<ResultCell<R>>,
}

impl<R> TaskHandle<R> {
  /// Returns the unique ID of this task, as carried in the pool's log lines.
  pub fn id(&self) -> u64 {
    self.task_id
  }

  /// Returns `true` once the task outcome has been published.
  pub fn is_finished(&self) -> bool {
    !matches!(*self.cell.state.lock(), CellState::Pending)
  }

  /// Blocks the calling thread until the task has completed, without
  /// consuming the handle.
  pub fn wait(&self) {
    let mut state = self.cell.state.lock();
    while matches!(*state, CellState::Pending) {
      self.cell.completed.wait(&mut state);
    }
  }

  /// Blocks until the task has completed and returns its outcome.
  ///
  /// # Errors
  ///
  /// Returns [`PoolError::TaskPanicked`] if the closure panicked, or
  /// [`PoolError::TaskAbandoned`] if the pool discarded the task without
  /// running it (possible only for submissions racing pool destruction).
  pub fn join(self) -> Result<R, PoolError> {
    let mut state = self.cell.state.lock();
    loop {
      if let Some(outcome) = state.take_ready() {
        trace!(task_id = %self.task_id, "TaskHandle: result claimed.");
        return outcome;
      }
      self.cell.completed.wait(&mut state);
    }
  }
}

impl<R> fmt::Debug for TaskHandle<R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TaskHandle")
      .field("task_id", &self.task_id)
      .field("finished", &self.is_finished())
      .finish()
  }
}
