use thread_orchestra::BoundedTaskPool;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::info;

fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Backpressure Example ---");

  // Two workers, so at most two tasks buffered: submitters block once the
  // queue is full instead of piling work up.
  let pool = Arc::new(BoundedTaskPool::new(2).expect("Failed to start pool"));
  info!("Pool capacity (max_tasks): {}", pool.max_tasks());

  let started = Instant::now();
  let mut submitters = Vec::new();

  for submitter_id in 0..3 {
    let pool = pool.clone();
    submitters.push(thread::spawn(move || {
      for i in 0..4 {
        let before = Instant::now();
        let handle = pool
          .wait(move || {
            thread::sleep(Duration::from_millis(150));
            (submitter_id, i)
          })
          .expect("Pool unavailable");
        info!(
          "Submitter {} admitted task {} after waiting {:?} (handle id {})",
          submitter_id,
          i,
          before.elapsed(),
          handle.id()
        );
        handle.join().expect("Task failed");
      }
    }));
  }

  for submitter in submitters {
    submitter.join().unwrap();
  }

  info!("All tasks completed in {:?}.", started.elapsed());

  // The timed variants bound only the wait for admission; on expiry the
  // task is admitted regardless of capacity.
  let handle = pool
    .wait_for(Duration::from_millis(50), || "admitted under time pressure")
    .expect("Pool unavailable");
  info!("Timed submission result: {:?}", handle.join());

  info!("--- Backpressure Example End ---");
}
