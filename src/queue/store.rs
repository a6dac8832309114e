//! Priority store for pending jobs

use std::collections::BinaryHeap;

use tracing::debug;

use super::job::{JobId, JobPayload, QueuedJob, clamp_priority};

/// Ordered container of pending jobs
///
/// Owns the id and sequence counters so every job a queue ever sees is
/// numbered here. Pop order is numerically-smallest priority first, with
/// insertion order breaking ties. Removal and reprioritization rebuild the
/// heap; fine at the scale a single process queue runs at.
pub struct PriorityStore {
    heap: BinaryHeap<QueuedJob>,
    next_id: JobId,
    next_seq: u64,
}

impl PriorityStore {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_id: 1,
            next_seq: 0,
        }
    }

    /// Insert a payload as a pending job, returning its assigned id.
    /// The priority is clamped to the valid ceiling before storage.
    pub fn insert(&mut self, payload: JobPayload, priority: i32) -> JobId {
        let id = self.next_id;
        self.next_id += 1;

        let seq = self.next_seq;
        self.next_seq += 1;

        let priority = clamp_priority(priority);
        debug!(id, priority, seq, "PriorityStore::insert");

        self.heap.push(QueuedJob {
            id,
            priority,
            seq,
            payload,
        });
        id
    }

    /// Pop the most urgent pending job, if any
    pub fn pop(&mut self) -> Option<QueuedJob> {
        self.heap.pop()
    }

    /// Remove a pending job. Returns false if the id is not pending here
    /// (already dispatched, terminal, or never existed).
    pub fn remove(&mut self, id: JobId) -> bool {
        let before = self.heap.len();
        let kept: Vec<_> = self.heap.drain().filter(|j| j.id != id).collect();
        self.heap = kept.into_iter().collect();

        let removed = self.heap.len() != before;
        debug!(id, removed, "PriorityStore::remove");
        removed
    }

    /// Change the priority of a pending job in place. The insertion sequence
    /// is kept, so it still tie-breaks at its original position. Returns
    /// false if the id is not pending here.
    pub fn set_priority(&mut self, id: JobId, priority: i32) -> bool {
        let mut jobs: Vec<_> = self.heap.drain().collect();
        let mut found = false;

        for job in &mut jobs {
            if job.id == id {
                job.priority = clamp_priority(priority);
                found = true;
                break;
            }
        }

        self.heap = jobs.into_iter().collect();
        debug!(id, priority, found, "PriorityStore::set_priority");
        found
    }

    /// Get the stored priority of a pending job
    pub fn priority_of(&self, id: JobId) -> Option<i32> {
        self.heap.iter().find(|j| j.id == id).map(|j| j.priority)
    }

    pub fn contains(&self, id: JobId) -> bool {
        self.heap.iter().any(|j| j.id == id)
    }

    /// Count of pending jobs
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl Default for PriorityStore {
    fn default() -> Self {
        Self::new()
    }
}
