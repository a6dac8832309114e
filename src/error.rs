//! Queue error types

use thiserror::Error;

use crate::queue::JobId;

/// Errors surfaced by queue operations
///
/// Every variant is recoverable: a job failure is contained to that job and
/// reported through the bus, never to the dispatch loop itself. The enum is
/// `Clone` because the same error instance fans out to every subscriber and
/// to any waiter registered for the job.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue has already been started")]
    AlreadyStarted,

    #[error("queue reached maximum capacity ({limit})")]
    CapacityExceeded { limit: usize },

    #[error("job {id} failed during execution: {message}")]
    JobExecution { id: JobId, message: String },

    #[error("no such job: {0}")]
    NotFound(JobId),
}

impl QueueError {
    /// Build a `JobExecution` error from a payload failure report
    pub fn from_job_failure(id: JobId, report: &eyre::Report) -> Self {
        // {:#} renders the full cause chain on one line
        QueueError::JobExecution {
            id,
            message: format!("{report:#}"),
        }
    }

    /// Check if this error came from a job payload (as opposed to the caller)
    pub fn is_job_failure(&self) -> bool {
        matches!(self, QueueError::JobExecution { .. })
    }

    /// Get the id of the job this error refers to, if any
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            QueueError::JobExecution { id, .. } => Some(*id),
            QueueError::NotFound(id) => Some(*id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::eyre;

    #[test]
    fn test_from_job_failure_keeps_cause_chain() {
        let report = eyre!("connection refused").wrap_err("fetch failed");
        let err = QueueError::from_job_failure(7, &report);

        assert!(err.is_job_failure());
        assert_eq!(err.job_id(), Some(7));

        let message = err.to_string();
        assert!(message.contains("fetch failed"));
        assert!(message.contains("connection refused"));
    }

    #[test]
    fn test_display() {
        let err = QueueError::CapacityExceeded { limit: 10 };
        assert_eq!(err.to_string(), "queue reached maximum capacity (10)");

        let err = QueueError::NotFound(42);
        assert_eq!(err.to_string(), "no such job: 42");

        assert_eq!(
            QueueError::AlreadyStarted.to_string(),
            "queue has already been started"
        );
    }

    #[test]
    fn test_job_id() {
        assert_eq!(QueueError::AlreadyStarted.job_id(), None);
        assert_eq!(QueueError::CapacityExceeded { limit: 1 }.job_id(), None);
        assert_eq!(QueueError::NotFound(3).job_id(), Some(3));
    }
}
