//! jobq - in-process priority job queue
//!
//! Callers submit async units of work with a priority from 1 (most urgent)
//! to 10; the queue executes them under a configurable concurrency ceiling,
//! reports throughput on a timer, and notifies subscribers of completions,
//! failures, and the drained state.
//!
//! # Core Concepts
//!
//! - **Priority dispatch**: smallest priority value first, FIFO among equals
//! - **Bounded concurrency**: never more running jobs than the configured limit
//! - **Contained failures**: a failing payload settles its own job, nothing else
//! - **Composition over inheritance**: the queue owns its notification bus
//!
//! # Modules
//!
//! - [`queue`] - priority store, dispatch loop, lifecycle, stats timer
//! - [`bus`] - event fan-out and per-job completion waiters
//! - [`error`] - the error taxonomy

pub mod bus;
pub mod error;
pub mod queue;

// Re-export commonly used types
pub use bus::{EventBus, EventKind, QueueEvent, Settled};
pub use error::QueueError;
pub use queue::{
    DEFAULT_PRIORITY, JobId, JobOutput, JobPayload, JobQueue, JobState, LOWEST_PRIORITY, LifecycleState,
    PriorityStore, QueueConfig, QueueSnapshot,
};
