use thread_orchestra::{BoundedTaskPool, WorkerCallback, WorkerThreadPool};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::info;

fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Graceful Shutdown Example ---");

  let completed = Arc::new(AtomicUsize::new(0));

  {
    let pool = WorkerThreadPool::new(2).expect("Failed to start pool");
    for i in 0..8 {
      let completed = completed.clone();
      pool.enqueue(move || {
        thread::sleep(Duration::from_millis(100));
        completed.fetch_add(1, Ordering::SeqCst);
        info!("Task {} done", i);
      });
    }
    info!("8 tasks queued; dropping the pool now.");
    // Drop blocks here: the queue drains and every worker is joined.
  }
  info!(
    "Pool dropped; {} of 8 tasks had completed before drop returned.",
    completed.load(Ordering::SeqCst)
  );

  info!("--- Reset Example ---");

  let on_enter: WorkerCallback = Arc::new(|| info!("Worker up."));
  let on_exit: WorkerCallback = Arc::new(|| info!("Worker down."));
  let pool =
    BoundedTaskPool::with_callbacks(2, Some(on_enter), Some(on_exit)).expect("Failed to start pool");

  for i in 0..4 {
    pool
      .wait(move || {
        thread::sleep(Duration::from_millis(50));
        info!("Pre-reset task {} done", i);
      })
      .expect("Pool unavailable");
  }

  info!("Resetting: drains outstanding tasks, then restarts the workers.");
  pool.reset().expect("Reset failed");

  let handle = pool.wait(|| "fresh workers").expect("Pool unavailable");
  info!("Post-reset submission: {:?}", handle.join());

  info!("--- Graceful Shutdown Example End ---");
}
