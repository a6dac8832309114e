//! Job record and heap ordering

use futures::future::BoxFuture;

/// Internal identifier assigned at push time, starting at 1,
/// strictly increasing for the lifetime of a queue, never reused.
pub type JobId = u64;

/// The output of a successful job payload
pub type JobOutput = serde_json::Value;

/// A job payload: an opaque async operation, not started until dispatched
pub type JobPayload = BoxFuture<'static, eyre::Result<JobOutput>>;

/// Lowest urgency; also the clamp ceiling for out-of-range inputs
pub const LOWEST_PRIORITY: i32 = 10;

/// Priority assigned when the caller does not specify one
pub const DEFAULT_PRIORITY: i32 = 5;

/// Normalize a requested priority: values above 10 are clamped down to 10,
/// values at or below 1 are taken as-is (more urgent than anything standard).
pub fn clamp_priority(priority: i32) -> i32 {
    priority.min(LOWEST_PRIORITY)
}

/// Where a job currently is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A pending job held by the priority store
pub struct QueuedJob {
    pub id: JobId,
    pub priority: i32,
    /// Insertion sequence, used only to break ties between equal priorities
    pub seq: u64,
    pub payload: JobPayload,
}

impl std::fmt::Debug for QueuedJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedJob")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}

impl Eq for QueuedJob {}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Max-heap: "greater" means dispatched sooner. Numerically smaller
        // priority first, then earlier insertion among equals.
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
