//! A pool of OS worker threads for executing blocking closures, with
//! future-like result handles, strict FIFO dispatch, capacity-bounded
//! backpressure submission and graceful drain-on-drop shutdown.
//!
//! [`WorkerThreadPool`] owns a fixed set of workers and one shared queue;
//! [`enqueue`](WorkerThreadPool::enqueue) accepts any `FnOnce() -> R`
//! closure and immediately returns a [`TaskHandle`] that resolves to the
//! closure's value, or to the panic it raised. [`BoundedTaskPool`] layers a
//! capacity equal to the worker count on top, so submitters block instead
//! of growing the queue, with predicate-gated (`poll*`) and timed (`wait_for`,
//! `wait_until`) admission variants.

mod bounded;
mod error;
mod handle;
mod pool;
mod task;

pub use bounded::BoundedTaskPool;
pub use error::PoolError;
pub use handle::TaskHandle;
pub use pool::{QueueGuard, WorkerCallback, WorkerThreadPool};
