//! Job dispatch: semaphore, queue, worker pool and the elastic dispatcher
//!
//! Jobs flow `Dispatcher::add_job` -> [`JobQueue`] -> an idle worker in the
//! [`WorkerPool`] -> `Job::execute`. Stop requests are inserted at the head
//! of the queue so shutdown latency depends on in-flight work only.

pub mod signal;
pub mod queue;
pub mod pool;
pub mod job;
pub mod dispatcher;


pub use dispatcher::{Dispatcher, DispatcherOptions, DEFAULT_DRAIN_TIMEOUT};
pub use job::{CommandJob, Job};
pub use pool::WorkerPool;
pub use queue::{JobQueue, Slot};
pub use signal::Signal;
