//! Owner-scoped push of job events to live subscribers.

use crate::job::{JobId, OwnerId};
use crate::metrics::TrainingMetricSnapshot;
use crate::parser::OutputStream;
use crate::progress::{ProgressTick, TrainingStatus};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Something that happened to a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum JobEvent {
    Status {
        status: TrainingStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        model_path: Option<String>,
    },
    Log {
        stream: OutputStream,
        text: String,
        is_error: bool,
    },
    Metrics(TrainingMetricSnapshot),
    Progress(ProgressTick),
}

impl JobEvent {
    #[must_use]
    pub fn status(status: TrainingStatus) -> Self {
        Self::Status { status, error_message: None, model_path: None }
    }

    #[must_use]
    pub fn log(stream: OutputStream, text: impl Into<String>) -> Self {
        Self::Log { stream, text: text.into(), is_error: stream.is_error() }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::Log { .. } => "log",
            Self::Metrics(_) => "metrics",
            Self::Progress(_) => "progress",
        }
    }
}

/// Wire envelope: `{"training_id": .., "type": .., "data": ..}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BroadcastMessage {
    pub training_id: JobId,
    #[serde(flatten)]
    pub event: JobEvent,
}

/// Receives every event the supervisor emits. Injected at construction.
pub trait TrainingObserver: Send + Sync {
    fn on_event(&self, job_id: &JobId, owner_id: OwnerId, event: &JobEvent);
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("subscriber closed")]
    Closed,

    #[error("delivery failed: {0}")]
    Failed(String),
}

/// A live connection events are written to.
pub trait Subscriber: Send + Sync {
    fn send(&self, message: &BroadcastMessage) -> Result<(), DeliveryError>;

    /// Called once when the gateway drops this subscriber after a failed send.
    fn close(&self) {}
}

/// Subscriber backed by an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSubscriber {
    tx: mpsc::UnboundedSender<BroadcastMessage>,
}

impl ChannelSubscriber {
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<BroadcastMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Subscriber for ChannelSubscriber {
    fn send(&self, message: &BroadcastMessage) -> Result<(), DeliveryError> {
        self.tx.send(message.clone()).map_err(|_| DeliveryError::Closed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

struct Subscription {
    owner_id: OwnerId,
    job_filter: Option<JobId>,
    subscriber: Arc<dyn Subscriber>,
}

impl Subscription {
    fn wants(&self, job_id: &JobId, owner_id: OwnerId) -> bool {
        self.owner_id == owner_id && self.job_filter.as_ref().is_none_or(|f| f == job_id)
    }
}

/// Fans events out to the subscribers of the job's owner.
#[derive(Default)]
pub struct BroadcastGateway {
    next_id: AtomicU64,
    subscriptions: Mutex<BTreeMap<SubscriptionId, Subscription>>,
}

impl std::fmt::Debug for BroadcastGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastGateway").field("subscribers", &self.subscriber_count()).finish()
    }
}

impl BroadcastGateway {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to every job of `owner_id`, or only to `job_filter` if given.
    pub fn subscribe(
        &self,
        owner_id: OwnerId,
        job_filter: Option<JobId>,
        subscriber: Arc<dyn Subscriber>,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Subscription { owner_id, job_filter, subscriber });
        debug!(owner_id = %owner_id, subscription = id.0, "Subscriber registered");
        id
    }

    /// Returns false if the subscription was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner).remove(&id).is_some()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Delivers one event. Returns how many subscribers received it.
    pub fn publish(&self, job_id: &JobId, owner_id: OwnerId, event: &JobEvent) -> usize {
        let targets: Vec<(SubscriptionId, Arc<dyn Subscriber>)> = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, sub)| sub.wants(job_id, owner_id))
            .map(|(id, sub)| (*id, Arc::clone(&sub.subscriber)))
            .collect();
        if targets.is_empty() {
            return 0;
        }

        let message = BroadcastMessage { training_id: job_id.clone(), event: event.clone() };
        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, subscriber) in targets {
            match subscriber.send(&message) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(job_id = %job_id, subscription = id.0, error = %e, "Dropping subscriber after failed write");
                    subscriber.close();
                    dead.push(id);
                }
            }
        }

        if !dead.is_empty() {
            let mut subs = self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner);
            for id in &dead {
                subs.remove(id);
            }
        }
        delivered
    }
}

impl TrainingObserver for BroadcastGateway {
    fn on_event(&self, job_id: &JobId, owner_id: OwnerId, event: &JobEvent) {
        self.publish(job_id, owner_id, event);
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<(JobId, OwnerId, JobEvent)>>,
}

impl RecordingObserver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<(JobId, OwnerId, JobEvent)> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    #[must_use]
    pub fn events_for(&self, job_id: &JobId) -> Vec<JobEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(id, _, _)| id == job_id)
            .map(|(_, _, e)| e.clone())
            .collect()
    }
}

impl TrainingObserver for RecordingObserver {
    fn on_event(&self, job_id: &JobId, owner_id: OwnerId, event: &JobEvent) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push((job_id.clone(), owner_id, event.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    struct BrokenSubscriber {
        closed: AtomicBool,
    }

    impl Subscriber for BrokenSubscriber {
        fn send(&self, _message: &BroadcastMessage) -> Result<(), DeliveryError> {
            Err(DeliveryError::Failed("connection reset".to_string()))
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_wire_shape() {
        let message = BroadcastMessage {
            training_id: JobId::from("mnist_1"),
            event: JobEvent::log(OutputStream::Stderr, "oops"),
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["training_id"], "mnist_1");
        assert_eq!(json["type"], "log");
        assert_eq!(json["data"]["text"], "oops");
        assert_eq!(json["data"]["is_error"], true);

        let status = serde_json::to_value(JobEvent::status(TrainingStatus::Running)).unwrap();
        assert_eq!(status["data"]["status"], "running");
        assert!(status["data"].get("model_path").is_none());
    }

    #[test]
    fn test_owner_isolation_and_job_filter() {
        let gateway = BroadcastGateway::new();
        let (alice_all, mut alice_rx) = ChannelSubscriber::channel();
        let (alice_one, mut alice_one_rx) = ChannelSubscriber::channel();
        let (bob, mut bob_rx) = ChannelSubscriber::channel();
        gateway.subscribe(OwnerId(1), None, Arc::new(alice_all));
        gateway.subscribe(OwnerId(1), Some(JobId::from("a_2")), Arc::new(alice_one));
        gateway.subscribe(OwnerId(2), None, Arc::new(bob));

        let event = JobEvent::status(TrainingStatus::Running);
        assert_eq!(gateway.publish(&JobId::from("a_1"), OwnerId(1), &event), 1);
        assert_eq!(gateway.publish(&JobId::from("a_2"), OwnerId(1), &event), 2);

        assert_eq!(alice_rx.try_recv().unwrap().training_id, JobId::from("a_1"));
        assert_eq!(alice_rx.try_recv().unwrap().training_id, JobId::from("a_2"));
        assert_eq!(alice_one_rx.try_recv().unwrap().training_id, JobId::from("a_2"));
        assert!(alice_one_rx.try_recv().is_err());
        assert!(bob_rx.try_recv().is_err());
    }

    #[test]
    fn test_failed_subscriber_is_closed_and_dropped() {
        let gateway = BroadcastGateway::new();
        let broken = Arc::new(BrokenSubscriber { closed: AtomicBool::new(false) });
        let (healthy, mut rx) = ChannelSubscriber::channel();
        gateway.subscribe(OwnerId(1), None, broken.clone());
        gateway.subscribe(OwnerId(1), None, Arc::new(healthy));

        let event = JobEvent::status(TrainingStatus::Running);
        assert_eq!(gateway.publish(&JobId::from("a_1"), OwnerId(1), &event), 1);
        assert!(broken.closed.load(Ordering::SeqCst));
        assert_eq!(gateway.subscriber_count(), 1);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_dropped_receiver_unsubscribes() {
        let gateway = BroadcastGateway::new();
        let (sub, rx) = ChannelSubscriber::channel();
        let id = gateway.subscribe(OwnerId(1), None, Arc::new(sub));
        drop(rx);
        gateway.publish(&JobId::from("a_1"), OwnerId(1), &JobEvent::status(TrainingStatus::Failed));
        assert_eq!(gateway.subscriber_count(), 0);
        assert!(!gateway.unsubscribe(id));
    }
}
