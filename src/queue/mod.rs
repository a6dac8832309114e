//! The scheduling engine
//!
//! Jobs enter through [`JobQueue::push`], wait in the priority store, and are
//! dispatched by the loop in `core` whenever the queue is running and a
//! concurrency slot is free. Completion, failure, idle, and throughput
//! notifications go out through the bus the queue owns.

mod config;
mod core;
mod job;
mod store;

pub use config::QueueConfig;
pub use core::{JobQueue, LifecycleState, QueueSnapshot};
pub use job::{DEFAULT_PRIORITY, JobId, JobOutput, JobPayload, JobState, LOWEST_PRIORITY, QueuedJob, clamp_priority};
pub use store::PriorityStore;
