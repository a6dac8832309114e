//! Queue implementation: dispatch loop, lifecycle, and stats timer

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::{EventBus, EventKind, QueueEvent, Settled};
use crate::error::QueueError;

use super::config::QueueConfig;
use super::job::{DEFAULT_PRIORITY, JobId, JobOutput, JobState};
use super::store::PriorityStore;

/// Lifecycle of a queue. Stopped and Paused both mean "not dispatching";
/// Stopped only exists before the first `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Stopped,
    Running,
    Paused,
}

/// Bookkeeping for a job occupying a concurrency slot
struct RunningJob {
    priority: i32,
    started_at: Instant,
}

/// State behind the single serialization point. Every mutation of pending,
/// running, or the counters goes through the mutex, so dispatch decisions
/// never race with pushes or settlements.
struct QueueState {
    store: PriorityStore,
    running: HashMap<JobId, RunningJob>,
    processed: u64,
    lifecycle: LifecycleState,
    started_at: Option<Instant>,
    stats_task: Option<JoinHandle<()>>,
    /// Set once drain has fired for the current idle stretch,
    /// cleared by the next push
    idle_notified: bool,
}

struct Inner {
    config: QueueConfig,
    state: Mutex<QueueState>,
    bus: EventBus,
}

/// Point-in-time view of the queue, for display and diagnostics
#[derive(Debug, Clone)]
pub struct QueueSnapshot {
    pub pending: usize,
    pub running: usize,
    pub processed: u64,
    pub lifecycle: LifecycleState,
}

/// An in-process priority job queue with a bounded concurrency ceiling
///
/// Cloning is cheap and every clone drives the same queue. Instances are
/// fully independent of each other; nothing is process-global.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<Inner>,
}

impl JobQueue {
    /// Create a queue with the given configuration. Unusable option values
    /// fall back to defaults with a warning rather than failing.
    pub fn new(config: QueueConfig) -> Self {
        let config = config.normalized();
        debug!(?config, "JobQueue::new");
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(QueueState {
                    store: PriorityStore::new(),
                    running: HashMap::new(),
                    processed: 0,
                    lifecycle: LifecycleState::Stopped,
                    started_at: None,
                    stats_task: None,
                    idle_notified: false,
                }),
                bus: EventBus::new(),
            }),
        }
    }

    /// Submit a job. `priority` runs 1 (most urgent) to 10; values above 10
    /// are clamped, omitted means 5. Fails with `CapacityExceeded` when
    /// pending plus running jobs already fill the configured limit.
    pub async fn push(
        &self,
        payload: impl Future<Output = eyre::Result<JobOutput>> + Send + 'static,
        priority: Option<i32>,
    ) -> Result<JobId, QueueError> {
        let mut events = Vec::new();
        let id = {
            let mut state = self.inner.state.lock().await;

            let limit = self.inner.config.concurrency_limit;
            if state.store.len() + state.running.len() >= limit {
                warn!(limit, "push rejected: queue at capacity");
                return Err(QueueError::CapacityExceeded { limit });
            }

            let priority = priority.unwrap_or(DEFAULT_PRIORITY);
            let id = state.store.insert(Box::pin(payload), priority);
            info!(id, priority, "job pushed");

            state.idle_notified = false;
            self.dispatch(&mut state, &mut events);
            id
        };

        self.emit_all(events);
        Ok(id)
    }

    /// Cancel a pending job. No-op when the id is unknown, already running,
    /// or already terminal. Cancelled jobs never count as processed.
    pub async fn cancel(&self, id: JobId) {
        let mut events = Vec::new();
        {
            let mut state = self.inner.state.lock().await;
            if state.store.remove(id) {
                info!(id, "job cancelled");
                self.inner.bus.settle(id, Settled::Cancelled);
                self.dispatch(&mut state, &mut events);
            } else {
                debug!(id, "cancel: not pending, ignoring");
            }
        }
        self.emit_all(events);
    }

    /// Change a pending job's priority in place; its tie-break position
    /// among equals is preserved. No-op when the id is not pending.
    pub async fn set_priority(&self, id: JobId, priority: i32) {
        let mut events = Vec::new();
        {
            let mut state = self.inner.state.lock().await;
            if state.store.set_priority(id, priority) {
                self.dispatch(&mut state, &mut events);
            } else {
                debug!(id, "set_priority: not pending, ignoring");
            }
        }
        self.emit_all(events);
    }

    /// Begin (or resume) dispatching. Fails with `AlreadyStarted` when the
    /// queue is already running. Returns as soon as the state change took
    /// effect; it never waits for jobs.
    pub async fn start(&self) -> Result<(), QueueError> {
        let mut events = Vec::new();
        {
            let mut state = self.inner.state.lock().await;
            if state.lifecycle == LifecycleState::Running {
                return Err(QueueError::AlreadyStarted);
            }

            info!("starting queue");
            state.lifecycle = LifecycleState::Running;
            if state.started_at.is_none() {
                state.started_at = Some(Instant::now());
            }
            state.stats_task = Some(self.spawn_stats_task());
            self.dispatch(&mut state, &mut events);
        }
        self.emit_all(events);
        Ok(())
    }

    /// Stop future dispatch. Jobs already running continue to completion and
    /// still emit their events, but freed slots are not refilled until
    /// `start` is called again.
    pub async fn pause(&self) {
        let stats_task = {
            let mut state = self.inner.state.lock().await;
            info!("pausing queue");
            state.lifecycle = LifecycleState::Paused;
            state.stats_task.take()
        };

        if let Some(task) = stats_task {
            task.abort();
        }
    }

    /// Wait for a job's terminal outcome: its result on completion, a
    /// `JobExecution` error on failure. Jobs that already settled resolve
    /// immediately from the retained outcome cache.
    pub async fn wait_for(&self, id: JobId) -> Result<JobOutput, QueueError> {
        self.inner.bus.wait_for(id).await
    }

    /// Subscribe to queue events. Callbacks for one kind fire in
    /// subscription order, synchronously at the emission point; they must
    /// not block for long.
    pub fn on(&self, kind: EventKind, callback: impl Fn(&QueueEvent) + Send + Sync + 'static) {
        self.inner.bus.subscribe(kind, callback);
    }

    /// Count of pending jobs
    pub async fn queue_len(&self) -> usize {
        self.inner.state.lock().await.store.len()
    }

    /// Whether the queue is currently dispatching
    pub async fn is_started(&self) -> bool {
        self.inner.state.lock().await.lifecycle == LifecycleState::Running
    }

    /// Priority of a pending or running job
    pub async fn job_priority(&self, id: JobId) -> Result<i32, QueueError> {
        let state = self.inner.state.lock().await;
        state
            .store
            .priority_of(id)
            .or_else(|| state.running.get(&id).map(|r| r.priority))
            .ok_or(QueueError::NotFound(id))
    }

    /// Current lifecycle position of a job, checking pending, running, and
    /// the retained terminal outcomes in that order
    pub async fn job_state(&self, id: JobId) -> Result<JobState, QueueError> {
        let state = self.inner.state.lock().await;
        if state.store.contains(id) {
            return Ok(JobState::Pending);
        }
        if state.running.contains_key(&id) {
            return Ok(JobState::Running);
        }
        drop(state);

        match self.inner.bus.settled_outcome(id) {
            Some(Settled::Completed(_)) => Ok(JobState::Completed),
            Some(Settled::Failed(_)) => Ok(JobState::Failed),
            Some(Settled::Cancelled) => Ok(JobState::Cancelled),
            None => Err(QueueError::NotFound(id)),
        }
    }

    /// Point-in-time counters for display
    pub async fn snapshot(&self) -> QueueSnapshot {
        let state = self.inner.state.lock().await;
        QueueSnapshot {
            pending: state.store.len(),
            running: state.running.len(),
            processed: state.processed,
            lifecycle: state.lifecycle,
        }
    }

    /// The configured concurrency ceiling
    pub fn concurrency_limit(&self) -> usize {
        self.inner.config.concurrency_limit
    }

    /// The configured stats period in milliseconds
    pub fn stats_interval_ms(&self) -> u64 {
        self.inner.config.stats_interval_ms
    }

    /// Fill free concurrency slots from the store, then detect the
    /// transition into fully-idle. Runs under the state lock; emitted events
    /// are collected for delivery after the lock is released.
    fn dispatch(&self, state: &mut QueueState, events: &mut Vec<QueueEvent>) {
        while state.lifecycle == LifecycleState::Running
            && state.running.len() < self.inner.config.concurrency_limit
        {
            let Some(job) = state.store.pop() else { break };

            debug!(id = job.id, priority = job.priority, "dispatching job");
            state.running.insert(
                job.id,
                RunningJob {
                    priority: job.priority,
                    started_at: Instant::now(),
                },
            );

            let queue = self.clone();
            let id = job.id;
            let payload = job.payload;
            tokio::spawn(async move {
                let outcome = payload.await;
                queue.on_settled(id, outcome).await;
            });
        }

        if state.lifecycle == LifecycleState::Running
            && state.running.is_empty()
            && state.store.is_empty()
            && !state.idle_notified
        {
            state.idle_notified = true;
            info!("queue drained");
            events.push(QueueEvent::Drain);
        }
    }

    /// Settlement handler for a launched payload: free the slot, record the
    /// outcome, then re-enter dispatch for the next pending job.
    async fn on_settled(&self, id: JobId, outcome: eyre::Result<JobOutput>) {
        let mut events = Vec::new();
        {
            let mut state = self.inner.state.lock().await;
            let slot = state.running.remove(&id);
            state.processed += 1;

            if let Some(run) = slot {
                debug!(id, elapsed_ms = run.started_at.elapsed().as_millis() as u64, "job settled");
            }

            match outcome {
                Ok(result) => {
                    info!(id, "job completed");
                    self.inner.bus.settle(id, Settled::Completed(result.clone()));
                    events.push(QueueEvent::Done { id, result });
                }
                Err(report) => {
                    let error = QueueError::from_job_failure(id, &report);
                    warn!(id, %error, "job failed");
                    self.inner.bus.settle(id, Settled::Failed(error.clone()));
                    events.push(QueueEvent::Error { id, error });
                }
            }

            self.dispatch(&mut state, &mut events);
        }
        self.emit_all(events);
    }

    /// Periodic throughput reporter: cumulative completions over elapsed
    /// time since the first start. Holds only a weak handle so an abandoned
    /// queue does not keep its timer alive.
    fn spawn_stats_task(&self) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.config.stats_interval();

        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            loop {
                interval.tick().await;

                let Some(inner) = weak.upgrade() else { break };
                let (processed, started_at) = {
                    let state = inner.state.lock().await;
                    (state.processed, state.started_at)
                };

                if let Some(started) = started_at {
                    let elapsed = started.elapsed().as_secs_f64();
                    let jobs_per_second = if elapsed > 0.0 {
                        processed as f64 / elapsed
                    } else {
                        0.0
                    };
                    debug!(processed, jobs_per_second, "stats tick");
                    inner.bus.emit(&QueueEvent::Stats { jobs_per_second });
                }
            }
        })
    }

    fn emit_all(&self, events: Vec<QueueEvent>) {
        for event in events {
            self.inner.bus.emit(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn quiet_config(limit: usize) -> QueueConfig {
        QueueConfig {
            concurrency_limit: limit,
            // Long interval so stats never fire during a test
            stats_interval_ms: 60_000,
        }
    }

    #[tokio::test]
    async fn test_push_assigns_increasing_ids_from_one() {
        let queue = JobQueue::new(quiet_config(10));

        let a = queue.push(async { Ok(JobOutput::Null) }, None).await.unwrap();
        let b = queue.push(async { Ok(JobOutput::Null) }, Some(2)).await.unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 2);

        // Ids are not reused after cancellation
        queue.cancel(b).await;
        let c = queue.push(async { Ok(JobOutput::Null) }, None).await.unwrap();
        assert_eq!(c, 3);
    }

    #[tokio::test]
    async fn test_priority_defaults_and_clamping() {
        let queue = JobQueue::new(quiet_config(10));

        let default = queue.push(async { Ok(JobOutput::Null) }, None).await.unwrap();
        let clamped = queue.push(async { Ok(JobOutput::Null) }, Some(15)).await.unwrap();
        let urgent = queue.push(async { Ok(JobOutput::Null) }, Some(-2)).await.unwrap();

        assert_eq!(queue.job_priority(default).await.unwrap(), 5);
        assert_eq!(queue.job_priority(clamped).await.unwrap(), 10);
        assert_eq!(queue.job_priority(urgent).await.unwrap(), -2);
    }

    #[tokio::test]
    async fn test_capacity_exceeded() {
        let queue = JobQueue::new(quiet_config(10));

        for _ in 0..10 {
            queue.push(async { Ok(JobOutput::Null) }, Some(6)).await.unwrap();
        }

        let err = queue.push(async { Ok(JobOutput::Null) }, Some(6)).await.unwrap_err();
        assert_eq!(err, QueueError::CapacityExceeded { limit: 10 });
        assert_eq!(queue.queue_len().await, 10);
    }

    #[tokio::test]
    async fn test_start_twice_fails_and_state_is_unchanged() {
        let queue = JobQueue::new(quiet_config(2));

        queue.start().await.unwrap();
        assert!(queue.is_started().await);

        let err = queue.start().await.unwrap_err();
        assert_eq!(err, QueueError::AlreadyStarted);
        assert!(queue.is_started().await);
    }

    #[tokio::test]
    async fn test_pause_then_restart() {
        let queue = JobQueue::new(quiet_config(2));

        queue.start().await.unwrap();
        queue.pause().await;
        assert!(!queue.is_started().await);

        queue.start().await.unwrap();
        assert!(queue.is_started().await);
    }

    #[tokio::test]
    async fn test_wait_for_completed_job() {
        let queue = JobQueue::new(quiet_config(2));
        queue.start().await.unwrap();

        let id = queue.push(async { Ok(json!({"answer": 42})) }, None).await.unwrap();
        let result = queue.wait_for(id).await.unwrap();
        assert_eq!(result, json!({"answer": 42}));

        // Late wait resolves from the retained outcome
        let again = queue.wait_for(id).await.unwrap();
        assert_eq!(again, json!({"answer": 42}));
    }

    #[tokio::test]
    async fn test_failed_job_is_contained() {
        let queue = JobQueue::new(quiet_config(2));
        queue.start().await.unwrap();

        let bad = queue
            .push(async { Err(eyre::eyre!("payload exploded")) }, Some(1))
            .await
            .unwrap();
        let good = queue.push(async { Ok(json!("fine")) }, Some(2)).await.unwrap();

        let err = queue.wait_for(bad).await.unwrap_err();
        assert!(err.is_job_failure());
        assert!(err.to_string().contains("payload exploded"));

        // The failure did not take the queue down
        assert_eq!(queue.wait_for(good).await.unwrap(), json!("fine"));
        assert_eq!(queue.job_state(bad).await.unwrap(), JobState::Failed);
    }

    #[tokio::test]
    async fn test_job_state_transitions() {
        let queue = JobQueue::new(quiet_config(2));

        let id = queue.push(async { Ok(JobOutput::Null) }, None).await.unwrap();
        assert_eq!(queue.job_state(id).await.unwrap(), JobState::Pending);

        let cancelled = queue.push(async { Ok(JobOutput::Null) }, None).await.unwrap();
        queue.cancel(cancelled).await;
        assert_eq!(queue.job_state(cancelled).await.unwrap(), JobState::Cancelled);

        queue.start().await.unwrap();
        queue.wait_for(id).await.unwrap();
        assert_eq!(queue.job_state(id).await.unwrap(), JobState::Completed);

        assert_eq!(queue.job_state(999).await.unwrap_err(), QueueError::NotFound(999));
    }

    #[tokio::test]
    async fn test_cancel_pending_only() {
        let queue = JobQueue::new(quiet_config(5));

        let id = queue.push(async { Ok(JobOutput::Null) }, None).await.unwrap();
        assert_eq!(queue.queue_len().await, 1);

        queue.cancel(id).await;
        assert_eq!(queue.queue_len().await, 0);

        // Unknown and terminal ids are quietly ignored
        queue.cancel(id).await;
        queue.cancel(999).await;

        // Cancelled jobs never count toward processed
        let snapshot = queue.snapshot().await;
        assert_eq!(snapshot.processed, 0);
    }

    #[tokio::test]
    async fn test_accessors_reflect_config() {
        let queue = JobQueue::new(QueueConfig {
            concurrency_limit: 10,
            stats_interval_ms: 2000,
        });

        assert_eq!(queue.concurrency_limit(), 10);
        assert_eq!(queue.stats_interval_ms(), 2000);
    }

    #[tokio::test]
    async fn test_processed_counts_failures_too() {
        let queue = JobQueue::new(quiet_config(2));
        queue.start().await.unwrap();

        let ok = queue.push(async { Ok(JobOutput::Null) }, None).await.unwrap();
        let bad = queue.push(async { Err(eyre::eyre!("no")) }, None).await.unwrap();

        queue.wait_for(ok).await.unwrap();
        queue.wait_for(bad).await.unwrap_err();

        assert_eq!(queue.snapshot().await.processed, 2);
    }
}
