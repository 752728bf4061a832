//! Worker lifecycle events.
//!
//! Subscribers are registered explicitly on the worker. Dispatch is
//! synchronous and in registration order; a panicking subscriber is logged
//! and does not affect the others or the worker.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkerEvent {
    WorkerStarted {
        worker: String,
        schedulers: Vec<String>,
        at: DateTime<Utc>,
    },
    TaskStarted {
        worker: String,
        scheduler: String,
        task: String,
        execution_id: Uuid,
        at: DateTime<Utc>,
    },
    TaskSucceeded {
        worker: String,
        scheduler: String,
        task: String,
        execution_id: Uuid,
        #[serde(with = "duration_ms")]
        duration: Duration,
        at: DateTime<Utc>,
    },
    TaskFailed {
        worker: String,
        scheduler: String,
        task: String,
        execution_id: Uuid,
        reason: String,
        #[serde(with = "duration_ms")]
        duration: Duration,
        at: DateTime<Utc>,
    },
    WorkerStopped {
        worker: String,
        executed: usize,
        failed: usize,
        at: DateTime<Utc>,
    },
    /// The loop ended on an error; no `WorkerStopped` follows
    WorkerCrashed {
        worker: String,
        reason: String,
        executed: usize,
        failed: usize,
        at: DateTime<Utc>,
    },
}

impl WorkerEvent {
    pub fn worker(&self) -> &str {
        match self {
            WorkerEvent::WorkerStarted { worker, .. }
            | WorkerEvent::TaskStarted { worker, .. }
            | WorkerEvent::TaskSucceeded { worker, .. }
            | WorkerEvent::TaskFailed { worker, .. }
            | WorkerEvent::WorkerStopped { worker, .. }
            | WorkerEvent::WorkerCrashed { worker, .. } => worker,
        }
    }

    /// Task name for task-level events
    pub fn task(&self) -> Option<&str> {
        match self {
            WorkerEvent::TaskStarted { task, .. }
            | WorkerEvent::TaskSucceeded { task, .. }
            | WorkerEvent::TaskFailed { task, .. } => Some(task),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            WorkerEvent::WorkerStarted { .. } => "worker_started",
            WorkerEvent::TaskStarted { .. } => "task_started",
            WorkerEvent::TaskSucceeded { .. } => "task_succeeded",
            WorkerEvent::TaskFailed { .. } => "task_failed",
            WorkerEvent::WorkerStopped { .. } => "worker_stopped",
            WorkerEvent::WorkerCrashed { .. } => "worker_crashed",
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }
}

pub trait WorkerSubscriber: Send + Sync {
    fn on_event(&self, event: &WorkerEvent);
}

/// Ordered list of subscribers notified for every event
#[derive(Clone, Default)]
pub struct EventDispatcher {
    subscribers: Vec<Arc<dyn WorkerSubscriber>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, subscriber: Arc<dyn WorkerSubscriber>) {
        self.subscribers.push(subscriber);
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn dispatch(&self, event: &WorkerEvent) {
        for (index, subscriber) in self.subscribers.iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| subscriber.on_event(event))).is_err() {
                error!(
                    subscriber = index,
                    event = event.name(),
                    worker = %event.worker(),
                    "Event subscriber panicked"
                );
            }
        }
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

/// Forwards events to an unbounded channel; a closed receiver is ignored
#[derive(Debug, Clone)]
pub struct ChannelSubscriber {
    sender: mpsc::UnboundedSender<WorkerEvent>,
}

impl ChannelSubscriber {
    pub fn new(sender: mpsc::UnboundedSender<WorkerEvent>) -> Self {
        Self { sender }
    }

    /// Subscriber and the receiving end of its channel
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<WorkerEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(sender), receiver)
    }
}

impl WorkerSubscriber for ChannelSubscriber {
    fn on_event(&self, event: &WorkerEvent) {
        let _ = self.sender.send(event.clone());
    }
}

/// Writes every event to the `tracing` log
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingSubscriber;

impl WorkerSubscriber for LoggingSubscriber {
    fn on_event(&self, event: &WorkerEvent) {
        match event {
            WorkerEvent::WorkerStarted { worker, schedulers, .. } => {
                info!(worker = %worker, schedulers = ?schedulers, "Worker started");
            }
            WorkerEvent::TaskStarted { worker, scheduler, task, execution_id, .. } => {
                info!(
                    worker = %worker,
                    scheduler = %scheduler,
                    task = %task,
                    execution_id = %execution_id,
                    "Task started"
                );
            }
            WorkerEvent::TaskSucceeded { worker, scheduler, task, execution_id, duration, .. } => {
                info!(
                    worker = %worker,
                    scheduler = %scheduler,
                    task = %task,
                    execution_id = %execution_id,
                    duration_ms = duration.as_millis() as u64,
                    "Task succeeded"
                );
            }
            WorkerEvent::TaskFailed { worker, scheduler, task, execution_id, reason, duration, .. } => {
                warn!(
                    worker = %worker,
                    scheduler = %scheduler,
                    task = %task,
                    execution_id = %execution_id,
                    duration_ms = duration.as_millis() as u64,
                    reason = %reason,
                    "Task failed"
                );
            }
            WorkerEvent::WorkerStopped { worker, executed, failed, .. } => {
                info!(worker = %worker, executed, failed, "Worker stopped");
            }
            WorkerEvent::WorkerCrashed { worker, reason, executed, failed, .. } => {
                error!(worker = %worker, executed, failed, reason = %reason, "Worker crashed");
            }
        }
    }
}

/// Adapter turning a closure into a [`WorkerSubscriber`]
pub struct FnSubscriber<F>(pub F);

impl<F> WorkerSubscriber for FnSubscriber<F>
where
    F: Fn(&WorkerEvent) + Send + Sync,
{
    fn on_event(&self, event: &WorkerEvent) {
        (self.0)(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn stopped() -> WorkerEvent {
        WorkerEvent::WorkerStopped {
            worker: "w".to_string(),
            executed: 2,
            failed: 1,
            at: Utc::now(),
        }
    }

    #[test]
    fn test_dispatch_reaches_every_subscriber_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = EventDispatcher::new();
        for id in 0..3 {
            let seen = Arc::clone(&seen);
            dispatcher.subscribe(Arc::new(FnSubscriber(move |_: &WorkerEvent| {
                seen.lock().unwrap().push(id);
            })));
        }

        dispatcher.dispatch(&stopped());
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_panicking_subscriber_is_isolated() {
        let (channel, mut receiver) = ChannelSubscriber::channel();
        let mut dispatcher = EventDispatcher::new();
        dispatcher.subscribe(Arc::new(FnSubscriber(|_: &WorkerEvent| panic!("subscriber bug"))));
        dispatcher.subscribe(Arc::new(channel));

        dispatcher.dispatch(&stopped());
        let received = receiver.try_recv().unwrap();
        assert_eq!(received.name(), "worker_stopped");
        assert_eq!(received.worker(), "w");
    }

    #[test]
    fn test_closed_channel_is_ignored() {
        let (channel, receiver) = ChannelSubscriber::channel();
        drop(receiver);
        channel.on_event(&stopped());
    }

    #[test]
    fn test_event_serialization() {
        let event = WorkerEvent::TaskFailed {
            worker: "w".to_string(),
            scheduler: "foo".to_string(),
            task: "x".to_string(),
            execution_id: Uuid::nil(),
            reason: "boom".to_string(),
            duration: Duration::from_millis(1500),
            at: Utc::now(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "task_failed");
        assert_eq!(value["duration"], 1500);
        assert_eq!(value["reason"], "boom");
        assert_eq!(event.task(), Some("x"));
    }

    #[test]
    fn test_crash_event_serialization() {
        let event = WorkerEvent::WorkerCrashed {
            worker: "w".to_string(),
            reason: "disk full".to_string(),
            executed: 1,
            failed: 0,
            at: Utc::now(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "worker_crashed");
        assert_eq!(value["reason"], "disk full");
        assert_eq!(event.worker(), "w");
        assert_eq!(event.task(), None);
    }
}
