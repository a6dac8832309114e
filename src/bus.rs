//! Notification bus: event fan-out and single-job completion waiters
//!
//! The queue owns a bus rather than being one: subscribers register
//! callbacks per event kind, and `wait_for` futures resolve from terminal
//! outcomes. Terminal outcomes are retained in a small FIFO cache so a
//! waiter arriving after its job settled still resolves instead of hanging.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tracing::debug;

use crate::error::QueueError;
use crate::queue::{JobId, JobOutput};

/// How many terminal outcomes to retain for late waiters
const SETTLED_CACHE_CAP: usize = 256;

/// Event kinds a subscriber can register for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Done,
    Error,
    Drain,
    Stats,
}

/// Events emitted by the dispatch loop and the stats timer
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// A job's payload resolved successfully
    Done { id: JobId, result: JobOutput },
    /// A job's payload failed; the error is always `JobExecution`
    Error { id: JobId, error: QueueError },
    /// The queue transitioned to zero pending and zero running jobs
    Drain,
    /// Cumulative throughput since the queue first started
    Stats { jobs_per_second: f64 },
}

impl QueueEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            QueueEvent::Done { .. } => EventKind::Done,
            QueueEvent::Error { .. } => EventKind::Error,
            QueueEvent::Drain => EventKind::Drain,
            QueueEvent::Stats { .. } => EventKind::Stats,
        }
    }
}

/// Terminal outcome of a job, retained for late waiters
#[derive(Debug, Clone)]
pub enum Settled {
    Completed(JobOutput),
    Failed(QueueError),
    Cancelled,
}

impl Settled {
    fn to_wait_result(&self, id: JobId) -> Result<JobOutput, QueueError> {
        match self {
            Settled::Completed(result) => Ok(result.clone()),
            Settled::Failed(error) => Err(error.clone()),
            // A cancelled job has nothing left to wait for
            Settled::Cancelled => Err(QueueError::NotFound(id)),
        }
    }
}

type Subscriber = Arc<dyn Fn(&QueueEvent) + Send + Sync>;
type WaitSender = oneshot::Sender<Result<JobOutput, QueueError>>;

/// Bounded FIFO of terminal outcomes
struct SettledCache {
    outcomes: HashMap<JobId, Settled>,
    order: VecDeque<JobId>,
}

impl SettledCache {
    fn record(&mut self, id: JobId, outcome: Settled) {
        if self.outcomes.insert(id, outcome).is_none() {
            self.order.push_back(id);
            while self.order.len() > SETTLED_CACHE_CAP {
                if let Some(evicted) = self.order.pop_front() {
                    self.outcomes.remove(&evicted);
                }
            }
        }
    }
}

/// Event fan-out plus single-job completion futures
pub struct EventBus {
    subscribers: Mutex<HashMap<EventKind, Vec<Subscriber>>>,
    waiters: Mutex<HashMap<JobId, Vec<WaitSender>>>,
    settled: Mutex<SettledCache>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            waiters: Mutex::new(HashMap::new()),
            settled: Mutex::new(SettledCache {
                outcomes: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Register a callback for one event kind. Callbacks fire in
    /// subscription order, synchronously at the emission point.
    pub fn subscribe(&self, kind: EventKind, callback: impl Fn(&QueueEvent) + Send + Sync + 'static) {
        let mut subscribers = self.subscribers.lock().expect("bus subscribers poisoned");
        subscribers.entry(kind).or_default().push(Arc::new(callback));
    }

    /// Deliver an event to every subscriber of its kind.
    /// The registry lock is not held across callbacks, so a callback may
    /// subscribe or emit without deadlocking.
    pub fn emit(&self, event: &QueueEvent) {
        let callbacks: Vec<Subscriber> = {
            let subscribers = self.subscribers.lock().expect("bus subscribers poisoned");
            subscribers.get(&event.kind()).cloned().unwrap_or_default()
        };

        debug!(kind = ?event.kind(), count = callbacks.len(), "EventBus::emit");
        for callback in callbacks {
            callback(event);
        }
    }

    /// Record a job's terminal outcome and resolve every waiter for it
    pub fn settle(&self, id: JobId, outcome: Settled) {
        debug!(id, ?outcome, "EventBus::settle");
        self.settled
            .lock()
            .expect("bus settled cache poisoned")
            .record(id, outcome.clone());

        let pending = self.waiters.lock().expect("bus waiters poisoned").remove(&id);
        if let Some(senders) = pending {
            for sender in senders {
                // Waiter may have dropped its future; nothing to do then
                let _ = sender.send(outcome.to_wait_result(id));
            }
        }
    }

    /// Look up a retained terminal outcome
    pub fn settled_outcome(&self, id: JobId) -> Option<Settled> {
        self.settled
            .lock()
            .expect("bus settled cache poisoned")
            .outcomes
            .get(&id)
            .cloned()
    }

    /// Wait for a job's terminal outcome. Resolves immediately from the
    /// settled cache when the job already finished.
    pub async fn wait_for(&self, id: JobId) -> Result<JobOutput, QueueError> {
        let rx = {
            let mut waiters = self.waiters.lock().expect("bus waiters poisoned");

            // Checked under the waiters lock: settlement records the outcome
            // before it drains waiters, so either we see it here or the
            // sender we register below is guaranteed to be resolved.
            if let Some(outcome) = self.settled_outcome(id) {
                debug!(id, "EventBus::wait_for: already settled");
                return outcome.to_wait_result(id);
            }

            let (tx, rx) = oneshot::channel();
            waiters.entry(id).or_default().push(tx);
            rx
        };

        debug!(id, "EventBus::wait_for: waiting");
        rx.await.map_err(|_| QueueError::NotFound(id))?
    }

    #[cfg(test)]
    fn waiter_count(&self, id: JobId) -> usize {
        self.waiters
            .lock()
            .expect("bus waiters poisoned")
            .get(&id)
            .map_or(0, Vec::len)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_subscribers_fire_in_subscription_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let log = Arc::clone(&log);
            bus.subscribe(EventKind::Drain, move |_| {
                log.lock().unwrap().push(tag);
            });
        }

        bus.emit(&QueueEvent::Drain);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_emit_only_reaches_matching_kind() {
        let bus = EventBus::new();
        let drains = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&drains);
        bus.subscribe(EventKind::Drain, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&QueueEvent::Stats { jobs_per_second: 1.0 });
        assert_eq!(drains.load(Ordering::SeqCst), 0);

        bus.emit(&QueueEvent::Drain);
        assert_eq!(drains.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wait_for_resolves_on_settle() {
        let bus = Arc::new(EventBus::new());

        let waiter = {
            let bus = Arc::clone(&bus);
            tokio::spawn(async move { bus.wait_for(3).await })
        };

        // Let the waiter register before settling
        tokio::task::yield_now().await;
        bus.settle(3, Settled::Completed(serde_json::json!(42)));

        let result = waiter.await.unwrap();
        assert_eq!(result.unwrap(), serde_json::json!(42));
    }

    #[tokio::test]
    async fn test_wait_for_after_settlement_uses_cache() {
        let bus = EventBus::new();
        bus.settle(9, Settled::Failed(QueueError::JobExecution {
            id: 9,
            message: "boom".to_string(),
        }));

        let err = bus.wait_for(9).await.unwrap_err();
        assert!(err.is_job_failure());
    }

    #[tokio::test]
    async fn test_wait_for_cancelled_job() {
        let bus = EventBus::new();
        bus.settle(4, Settled::Cancelled);

        assert_eq!(bus.wait_for(4).await.unwrap_err(), QueueError::NotFound(4));
    }

    #[tokio::test]
    async fn test_wait_for_never_leaves_dead_waiters() {
        let bus = Arc::new(EventBus::new());

        // Cache hit: no sender may be registered at all
        bus.settle(5, Settled::Completed(JobOutput::Null));
        bus.wait_for(5).await.unwrap();
        assert_eq!(bus.waiter_count(5), 0);

        // Settlement path: the registered sender is drained on settle
        let waiter = {
            let bus = Arc::clone(&bus);
            tokio::spawn(async move { bus.wait_for(6).await })
        };
        tokio::task::yield_now().await;
        assert_eq!(bus.waiter_count(6), 1);

        bus.settle(6, Settled::Completed(JobOutput::Null));
        waiter.await.unwrap().unwrap();
        assert_eq!(bus.waiter_count(6), 0);
    }

    #[test]
    fn test_settled_cache_evicts_oldest() {
        let bus = EventBus::new();
        for id in 0..(SETTLED_CACHE_CAP as JobId + 10) {
            bus.settle(id, Settled::Completed(JobOutput::Null));
        }

        assert!(bus.settled_outcome(0).is_none());
        assert!(bus.settled_outcome(SETTLED_CACHE_CAP as JobId + 9).is_some());
    }

    #[test]
    fn test_resettle_replaces_outcome() {
        let bus = EventBus::new();
        bus.settle(1, Settled::Cancelled);
        bus.settle(1, Settled::Completed(JobOutput::Null));

        // Re-settling replaces the outcome but must not duplicate eviction order
        assert!(matches!(bus.settled_outcome(1), Some(Settled::Completed(_))));
    }
}
