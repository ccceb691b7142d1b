use thiserror::Error;

/// Errors that can occur within the `thread_orchestra` pools.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
  #[error("Failed to spawn a worker thread: {0}")]
  WorkerSpawnFailed(String),

  #[error("Submitted task panicked during execution: {0}")]
  TaskPanicked(String),

  #[error("Task was dropped by the pool before it could run")]
  TaskAbandoned,

  #[error("Worker pool is unavailable (a previous reset failed); call reset() again to recover")]
  PoolUnavailable,
}
