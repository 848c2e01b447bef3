//! Task module - defines the unit of work callers submit.
//!
//! Tasks are plain data: the scheduler queues them, an agent reads them,
//! nothing mutates them after submission.

pub mod task;

pub use task::{Priority, Task, TaskError};
