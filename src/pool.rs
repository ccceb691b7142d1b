use crate::handle::TaskHandle;
use crate::task::{self, QueuedTask};
use crate::PoolError;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard, WaitTimeoutResult};
use tracing::{debug, debug_span, error, info, trace, warn};

/// Per-worker lifecycle callback, invoked on the worker's own thread.
///
/// `Arc`ed so the same callbacks can be handed to every worker and reused
/// when a [`BoundedTaskPool`](crate::BoundedTaskPool) recreates its workers.
pub type WorkerCallback = Arc<dyn Fn() + Send + Sync + 'static>;

/// Queue contents plus the stop flag, all guarded by the single pool mutex.
pub(crate) struct QueueState {
  tasks: VecDeque<QueuedTask>,
  stopped: bool,
}

struct PoolShared {
  queue: Mutex<QueueState>,
  work_available: Condvar,
  /// Mirror of `tasks.len()`, written only while the mutex is held. Backs
  /// the lock-free `size_unlocked` read.
  queue_len: AtomicUsize,
}

/// A view of the locked task queue, handed to `wait_to_enqueue` policies.
///
/// The guard wraps the pool's held mutex: a policy can inspect the queue and
/// block on a caller-supplied [`Condvar`] (releasing and reacquiring the
/// lock internally), and by construction always returns with the lock held.
///
/// A policy must never try to reacquire the pool's lock through other pool
/// methods (`size`, `enqueue`, ...) — the mutex is non-reentrant and this
/// deadlocks.
pub struct QueueGuard<'a> {
  state: MutexGuard<'a, QueueState>,
}

impl QueueGuard<'_> {
  /// Current queue length, exact while this guard is alive.
  pub fn len(&self) -> usize {
    self.state.tasks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.state.tasks.is_empty()
  }

  /// `true` once the pool has begun shutting down.
  pub fn is_stopping(&self) -> bool {
    self.state.stopped
  }

  /// Blocks on `condvar` until notified, releasing the pool lock for the
  /// duration of the wait. Subject to spurious wakeups.
  pub fn wait(&mut self, condvar: &Condvar) {
    condvar.wait(&mut self.state);
  }

  /// Like [`QueueGuard::wait`], but gives up after `timeout`.
  pub fn wait_for(&mut self, condvar: &Condvar, timeout: Duration) -> WaitTimeoutResult {
    condvar.wait_for(&mut self.state, timeout)
  }

  /// Like [`QueueGuard::wait`], but gives up at `deadline`.
  pub fn wait_until(&mut self, condvar: &Condvar, deadline: Instant) -> WaitTimeoutResult {
    condvar.wait_until(&mut self.state, deadline)
  }
}

/// A fixed-size pool of OS worker threads draining one shared FIFO queue.
///
/// Submission via [`enqueue`](WorkerThreadPool::enqueue) packages any
/// `FnOnce() -> R` closure into a type-erased task and returns a
/// [`TaskHandle`] for its result. Tasks are dequeued in strict submission
/// order and executed outside the queue lock; a panicking task is captured
/// into its handle and never takes the worker down.
///
/// Dropping the pool performs a graceful shutdown: the stop flag is set,
/// every task already queued is still executed, and every worker thread is
/// joined before `drop` returns.
pub struct WorkerThreadPool {
  shared: Arc<PoolShared>,
  workers: Vec<JoinHandle<()>>,
  worker_count: usize,
}

impl WorkerThreadPool {
  /// Creates a pool with `max(worker_count, 1)` worker threads and no
  /// lifecycle callbacks.
  pub fn new(worker_count: usize) -> Result<Self, PoolError> {
    Self::with_callbacks(worker_count, None, None)
  }

  /// Creates a pool with `max(worker_count, 1)` worker threads.
  ///
  /// Each worker invokes `on_enter` once on startup and `on_exit` once
  /// right before terminating, on its own thread. No ordering or
  /// concurrency guarantee exists between callbacks of different workers,
  /// and the callbacks are not panic-safe: a panicking callback unwinds its
  /// worker thread.
  ///
  /// # Errors
  ///
  /// [`PoolError::WorkerSpawnFailed`] if the OS refuses a thread. Workers
  /// that did start are shut down and joined before the error is returned;
  /// the caller must not retry in place.
  pub fn with_callbacks(
    worker_count: usize,
    on_enter: Option<WorkerCallback>,
    on_exit: Option<WorkerCallback>,
  ) -> Result<Self, PoolError> {
    let worker_count = worker_count.max(1);
    let shared = Arc::new(PoolShared {
      queue: Mutex::new(QueueState {
        tasks: VecDeque::new(),
        stopped: false,
      }),
      work_available: Condvar::new(),
      queue_len: AtomicUsize::new(0),
    });

    let mut workers = Vec::with_capacity(worker_count);
    for index in 0..worker_count {
      let worker_shared = shared.clone();
      let worker_on_enter = on_enter.clone();
      let worker_on_exit = on_exit.clone();
      let spawned = thread::Builder::new()
        .name(format!("orchestra-worker-{}", index))
        .spawn(move || worker_loop(index, worker_shared, worker_on_enter, worker_on_exit));

      match spawned {
        Ok(join_handle) => workers.push(join_handle),
        Err(spawn_error) => {
          error!(
            worker = index,
            "Failed to spawn worker thread: {}. Shutting down partially started pool.", spawn_error
          );
          // Drop runs the normal shutdown: stop flag, notify, join the
          // workers that did start.
          drop(Self {
            shared,
            workers,
            worker_count,
          });
          return Err(PoolError::WorkerSpawnFailed(spawn_error.to_string()));
        }
      }
    }

    info!(worker_count, "Worker thread pool started.");
    Ok(Self {
      shared,
      workers,
      worker_count,
    })
  }

  /// Number of worker threads, fixed at construction.
  pub fn worker_count(&self) -> usize {
    self.worker_count
  }

  /// Current queue length, read under the pool lock.
  pub fn size(&self) -> usize {
    self.shared.queue.lock().tasks.len()
  }

  /// Current queue length without taking the pool lock.
  ///
  /// Exact for callers that already hold the lock (the mirror is only
  /// written under it); otherwise an accepted race.
  pub fn size_unlocked(&self) -> usize {
    self.shared.queue_len.load(AtomicOrdering::Relaxed)
  }

  /// Packages `job` into a task, pushes it onto the queue and signals one
  /// waiting worker. Never blocks the submitter; the returned handle
  /// resolves once a worker has executed the task.
  pub fn enqueue<F, R>(&self, job: F) -> TaskHandle<R>
  where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
  {
    self.wait_to_enqueue(|_| {}, job)
  }

  /// Generalized submission: `wait_policy` is invoked with the queue lock
  /// held, before the task is pushed.
  ///
  /// The policy may block on a condition variable through the provided
  /// [`QueueGuard`] (releasing and reacquiring the lock internally); it
  /// always returns with the lock held, after which the task is pushed and
  /// one worker is signalled. This is the composition point
  /// [`BoundedTaskPool`](crate::BoundedTaskPool) uses for backpressure
  /// without the internal lock ever being exposed.
  ///
  /// The policy must not reacquire the pool lock (see [`QueueGuard`]).
  pub fn wait_to_enqueue<W, F, R>(&self, wait_policy: W, job: F) -> TaskHandle<R>
  where
    W: FnOnce(&mut QueueGuard<'_>),
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
  {
    let (task, handle) = task::package(job);
    let task_id = task.task_id;
    {
      let mut guard = QueueGuard {
        state: self.shared.queue.lock(),
      };
      wait_policy(&mut guard);
      guard.state.tasks.push_back(task);
      self
        .shared
        .queue_len
        .store(guard.state.tasks.len(), AtomicOrdering::Relaxed);
      trace!(%task_id, queue_len = guard.state.tasks.len(), "Task enqueued.");
    }
    self.shared.work_available.notify_one();
    handle
  }
}

impl Drop for WorkerThreadPool {
  fn drop(&mut self) {
    debug!(worker_count = self.worker_count, "Shutting down worker thread pool.");
    {
      let mut state = self.shared.queue.lock();
      state.stopped = true;
    }
    self.shared.work_available.notify_all();

    for (index, worker) in self.workers.drain(..).enumerate() {
      if worker.join().is_err() {
        // Best-effort cleanup: a panicked worker must not abort the joins
        // of the remaining ones.
        warn!(worker = index, "Worker thread panicked; continuing shutdown.");
      }
    }
    debug!("All worker threads joined.");
  }
}

fn worker_loop(
  index: usize,
  shared: Arc<PoolShared>,
  on_enter: Option<WorkerCallback>,
  on_exit: Option<WorkerCallback>,
) {
  let span = debug_span!("pool_worker", worker = index);
  let _entered = span.enter();

  if let Some(callback) = &on_enter {
    callback();
  }
  debug!("Worker started.");

  loop {
    let next_task = {
      let mut state = shared.queue.lock();
      loop {
        // Pop before checking the stop flag, so shutdown drains every task
        // that made it into the queue.
        if let Some(task) = state.tasks.pop_front() {
          shared
            .queue_len
            .store(state.tasks.len(), AtomicOrdering::Relaxed);
          break Some(task);
        }
        if state.stopped {
          break None;
        }
        shared.work_available.wait(&mut state);
      }
    };

    match next_task {
      // Execution happens outside the lock so a long task never blocks
      // queue access. Panics are captured into the handle inside run().
      Some(task) => task.run(),
      None => {
        if let Some(callback) = &on_exit {
          callback();
        }
        debug!("Worker exiting.");
        return;
      }
    }
  }
}
