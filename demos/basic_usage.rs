use thread_orchestra::{TaskHandle, WorkerThreadPool};

use std::thread;
use std::time::Duration;

use tracing::info;

fn my_task_fn(id: usize, delay_ms: u64) -> String {
  info!("Task {} starting, will sleep for {}ms", id, delay_ms);
  thread::sleep(Duration::from_millis(delay_ms));
  let result = format!("Task {} finished successfully after {}ms", id, delay_ms);
  info!("{}", result);
  result
}

fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false) // Disable module paths for cleaner example output
    .init();

  info!("--- Basic Usage Example ---");

  let pool = WorkerThreadPool::new(2).expect("Failed to start pool");

  let mut handles: Vec<TaskHandle<String>> = Vec::new();

  for i in 0..5 {
    // Alternate sleep times for variety
    let sleep_duration: u64 = 200 + (i as u64 % 3 * 100);
    let handle = pool.enqueue(move || my_task_fn(i, sleep_duration));
    info!("Submitted task {} with handle id {}", i, handle.id());
    handles.push(handle);
  }

  info!("All tasks submitted. Collecting results...");

  for handle in handles {
    let task_id = handle.id();
    match handle.join() {
      Ok(result) => info!("Result for task {}: {}", task_id, result),
      Err(e) => info!("Error for task {}: {:?}", task_id, e),
    }
  }

  info!("All task results processed. Dropping pool drains and joins the workers.");
  drop(pool);
  info!("--- Basic Usage Example End ---");
}
