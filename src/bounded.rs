use crate::handle::TaskHandle;
use crate::pool::{QueueGuard, WorkerCallback, WorkerThreadPool};
use crate::PoolError;

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, RwLock};
use tracing::{debug, info, trace};

/// Notifies the admission condvar when a task finishes, so submitters
/// blocked for capacity re-check their condition. Drop-based so the signal
/// fires even when the task panics.
struct CompletionSignal {
  admission: Arc<Condvar>,
}

impl Drop for CompletionSignal {
  fn drop(&mut self) {
    self.admission.notify_all();
  }
}

/// A [`WorkerThreadPool`] with a fixed cap on outstanding queued tasks and a
/// predicate-gated, optionally time-bounded submission family.
///
/// The capacity is `max_tasks == max(worker_count, 1)`: the pool never
/// buffers more queued work than it has workers, so a full queue pushes back
/// on submitters instead of growing. Queue length *is* the capacity measure;
/// a task stops counting against the bound the moment a worker pops it.
///
/// Submission methods block the caller until admission, return a
/// [`TaskHandle`] on success, and err with [`PoolError::PoolUnavailable`]
/// only after a failed [`reset`](BoundedTaskPool::reset) left the pool
/// without workers.
///
/// No fairness guarantee exists among submitters blocked for capacity.
/// Submitting from inside a task running on this same pool while the pool
/// is at capacity deadlocks the submitting task forever; this is the
/// caller's responsibility to avoid, not detected by the library.
pub struct BoundedTaskPool {
  /// Read for submission, write for reset. `None` only after a failed
  /// reset, while write-locked, or never observably from the read path.
  inner: RwLock<Option<WorkerThreadPool>>,
  admission: Arc<Condvar>,
  max_tasks: usize,
  worker_count: usize,
  on_enter: Option<WorkerCallback>,
  on_exit: Option<WorkerCallback>,
}

impl BoundedTaskPool {
  /// Creates a bounded pool with `max(worker_count, 1)` workers and the
  /// same number as task capacity.
  pub fn new(worker_count: usize) -> Result<Self, PoolError> {
    Self::with_callbacks(worker_count, None, None)
  }

  /// Like [`BoundedTaskPool::new`], with per-worker lifecycle callbacks.
  /// The callbacks are retained and handed to the recreated workers on
  /// every [`reset`](BoundedTaskPool::reset).
  pub fn with_callbacks(
    worker_count: usize,
    on_enter: Option<WorkerCallback>,
    on_exit: Option<WorkerCallback>,
  ) -> Result<Self, PoolError> {
    let worker_count = worker_count.max(1);
    let pool = WorkerThreadPool::with_callbacks(worker_count, on_enter.clone(), on_exit.clone())?;
    info!(max_tasks = worker_count, "Bounded task pool started.");
    Ok(Self {
      inner: RwLock::new(Some(pool)),
      admission: Arc::new(Condvar::new()),
      max_tasks: worker_count,
      worker_count,
      on_enter,
      on_exit,
    })
  }

  /// Configured maximum number of outstanding queued tasks, fixed at
  /// construction and preserved across [`reset`](BoundedTaskPool::reset).
  pub fn max_tasks(&self) -> usize {
    self.max_tasks
  }

  /// Current queue length, read under the pool lock. Zero when the pool is
  /// unavailable.
  pub fn size(&self) -> usize {
    self.inner.read().as_ref().map_or(0, WorkerThreadPool::size)
  }

  /// Whether a task would currently be admitted without blocking.
  ///
  /// Advisory only: the answer is exact for a `wait_to_enqueue` policy
  /// re-checking capacity with the queue lock held, and racy for everyone
  /// else.
  pub fn can_enqueue_unlocked(&self) -> bool {
    self
      .inner
      .read()
      .as_ref()
      .map_or(false, |pool| pool.size_unlocked() < self.max_tasks)
  }

  /// Blocks until both `predicate()` and free capacity hold, then admits
  /// `job`.
  ///
  /// The combined condition is re-evaluated under the queue lock on every
  /// wakeup (level-triggered, spurious-wake tolerant). The predicate is
  /// re-polled after every task completion; an externally satisfied
  /// predicate is therefore noticed at the next completion on this pool.
  /// The predicate must not call back into this pool (non-reentrant lock).
  pub fn poll<P, F, R>(&self, mut predicate: P, job: F) -> Result<TaskHandle<R>, PoolError>
  where
    P: FnMut() -> bool,
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
  {
    let job = self.with_completion_signal(job);
    let max_tasks = self.max_tasks;
    let admission = &self.admission;
    self.with_pool(move |pool| {
      pool.wait_to_enqueue(
        move |guard| {
          while !(predicate() && guard.len() < max_tasks) {
            guard.wait(admission);
          }
        },
        job,
      )
    })
  }

  /// [`poll`](BoundedTaskPool::poll) bounded by a relative timeout on the
  /// admission wait (never on the task's execution time).
  ///
  /// If the deadline expires before the combined condition holds, the task
  /// is admitted anyway, without a final re-check. This deliberately
  /// mirrors the reference behavior: under time pressure the capacity
  /// bound can transiently be exceeded by the admitted task.
  pub fn poll_for<P, F, R>(
    &self,
    predicate: P,
    timeout: Duration,
    job: F,
  ) -> Result<TaskHandle<R>, PoolError>
  where
    P: FnMut() -> bool,
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
  {
    self.poll_until(predicate, Instant::now() + timeout, job)
  }

  /// [`poll`](BoundedTaskPool::poll) bounded by an absolute deadline. Same
  /// admit-on-expiry behavior as [`poll_for`](BoundedTaskPool::poll_for).
  pub fn poll_until<P, F, R>(
    &self,
    mut predicate: P,
    deadline: Instant,
    job: F,
  ) -> Result<TaskHandle<R>, PoolError>
  where
    P: FnMut() -> bool,
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
  {
    let job = self.with_completion_signal(job);
    let max_tasks = self.max_tasks;
    let admission = &self.admission;
    self.with_pool(move |pool| {
      pool.wait_to_enqueue(
        move |guard| {
          while !(predicate() && guard.len() < max_tasks) {
            if guard.wait_until(admission, deadline).timed_out() {
              trace!("Admission deadline expired; admitting task regardless.");
              break;
            }
          }
        },
        job,
      )
    })
  }

  /// Pure capacity-gated admission: blocks until the queue has room.
  pub fn wait<F, R>(&self, job: F) -> Result<TaskHandle<R>, PoolError>
  where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
  {
    self.poll(|| true, job)
  }

  /// Capacity-gated admission with a relative timeout; admits on expiry
  /// like [`poll_for`](BoundedTaskPool::poll_for).
  pub fn wait_for<F, R>(&self, timeout: Duration, job: F) -> Result<TaskHandle<R>, PoolError>
  where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
  {
    self.poll_for(|| true, timeout, job)
  }

  /// Capacity-gated admission with an absolute deadline; admits on expiry
  /// like [`poll_until`](BoundedTaskPool::poll_until).
  pub fn wait_until<F, R>(&self, deadline: Instant, job: F) -> Result<TaskHandle<R>, PoolError>
  where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
  {
    self.poll_until(|| true, deadline, job)
  }

  /// Lower-level submission with a caller-supplied blocking policy.
  ///
  /// Edge-triggered, unlike [`poll`](BoundedTaskPool::poll): the policy is
  /// re-invoked as long as the queue is at capacity, and capacity is
  /// re-checked after every policy return. The policy runs with the queue
  /// lock held and must not reacquire it (see [`QueueGuard`]).
  pub fn wait_to_enqueue<W, F, R>(&self, mut wait_policy: W, job: F) -> Result<TaskHandle<R>, PoolError>
  where
    W: FnMut(&mut QueueGuard<'_>),
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
  {
    let job = self.with_completion_signal(job);
    let max_tasks = self.max_tasks;
    self.with_pool(move |pool| {
      pool.wait_to_enqueue(
        move |guard| {
          while guard.len() >= max_tasks {
            wait_policy(guard);
          }
        },
        job,
      )
    })
  }

  /// Blocks until every queued and in-flight task has completed, then
  /// recreates the workers with the originally supplied count and
  /// callbacks. Capacity is unchanged.
  ///
  /// New submitters are held out for the duration; submitters already
  /// blocked for capacity are admitted (and drained) first.
  ///
  /// # Errors
  ///
  /// [`PoolError::WorkerSpawnFailed`] if the workers cannot be recreated.
  /// The old tasks have still fully drained; the pool then refuses
  /// submissions with [`PoolError::PoolUnavailable`] until a later `reset`
  /// succeeds.
  pub fn reset(&self) -> Result<(), PoolError> {
    let mut slot = self.inner.write();
    info!(max_tasks = self.max_tasks, "Resetting bounded task pool.");
    // Dropping the old pool drains the queue and joins every worker; that
    // is the blocking part of reset.
    drop(slot.take());
    let rebuilt =
      WorkerThreadPool::with_callbacks(self.worker_count, self.on_enter.clone(), self.on_exit.clone())?;
    *slot = Some(rebuilt);
    debug!("Bounded task pool reset complete.");
    Ok(())
  }

  fn with_pool<T>(&self, submit: impl FnOnce(&WorkerThreadPool) -> T) -> Result<T, PoolError> {
    let slot = self.inner.read();
    match slot.as_ref() {
      Some(pool) => Ok(submit(pool)),
      None => Err(PoolError::PoolUnavailable),
    }
  }

  /// Wraps `job` so blocked submitters re-check capacity at every
  /// queue-length decrease.
  ///
  /// Notifies the admission condvar twice: when the job starts executing
  /// (the worker has popped it, so the queue just shrank) and when it
  /// finishes. The second signal is drop-based so it fires even when the
  /// job panics.
  fn with_completion_signal<F, R>(&self, job: F) -> impl FnOnce() -> R + Send + 'static
  where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
  {
    let signal = CompletionSignal {
      admission: self.admission.clone(),
    };
    move || {
      signal.admission.notify_all();
      let _signal = signal;
      job()
    }
  }
}
