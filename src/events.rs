//! Live event fan-out
//!
//! Every subscription owns a small bounded queue. Publishing tries each queue
//! once and moves on: a full queue loses that event, a closed one is pruned.
//! The producing cycle never waits for a consumer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::trace;

use crate::Classification;

/// Default per-subscription queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    DataSaved,
    TemperatureUpdate,
}

/// Summary of one poll-and-save cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSavedEvent {
    pub saved: usize,
    pub errors: usize,
}

/// One probe's value within an alert-check snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemperatureUpdateEvent {
    #[serde(rename = "machineName")]
    pub name: String,
    #[serde(rename = "tempValue")]
    pub value: f64,
    #[serde(rename = "status")]
    pub classification: Classification,
    /// `YYYY-MM-DD HH:MM:SS`, local time.
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EngineEvent {
    DataSaved(DataSavedEvent),
    /// Ordered snapshot from one alert-check cycle.
    TemperatureUpdate(Vec<TemperatureUpdateEvent>),
}

impl EngineEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            EngineEvent::DataSaved(_) => EventKind::DataSaved,
            EngineEvent::TemperatureUpdate(_) => EventKind::TemperatureUpdate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Receiving end handed out by [`EventBus::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    receiver: mpsc::Receiver<EngineEvent>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next event, or `None` once unsubscribed and drained.
    pub async fn recv(&mut self) -> Option<EngineEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<EngineEvent> {
        self.receiver.try_recv().ok()
    }
}

#[derive(Debug)]
struct Subscriber {
    id: SubscriptionId,
    kinds: Vec<EventKind>,
    sender: mpsc::Sender<EngineEvent>,
}

/// Outcome of one publish, for logs and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub dropped: usize,
}

#[derive(Debug)]
pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe to one or more event kinds through a single queue.
    pub fn subscribe(&self, kinds: &[EventKind]) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::channel(self.capacity);

        self.lock().push(Subscriber {
            id,
            kinds: kinds.to_vec(),
            sender,
        });
        trace!("subscription {} added for {kinds:?}", id.0);

        Subscription { id, receiver }
    }

    /// Remove a subscription. Dropping its sender closes the queue, which
    /// releases a reader waiting on it.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.lock();
        let before = subscribers.len();
        subscribers.retain(|subscriber| subscriber.id != id);
        before != subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    pub fn publish(&self, event: EngineEvent) -> PublishReport {
        let kind = event.kind();
        let mut report = PublishReport::default();

        self.lock().retain(|subscriber| {
            if subscriber.sender.is_closed() {
                trace!("subscription {} went away", subscriber.id.0);
                return false;
            }
            if !subscriber.kinds.contains(&kind) {
                return true;
            }

            match subscriber.sender.try_send(event.clone()) {
                Ok(()) => {
                    report.delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    trace!("subscription {} is full, dropping {kind:?}", subscriber.id.0);
                    report.dropped += 1;
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    trace!("subscription {} went away", subscriber.id.0);
                    false
                }
            }
        });

        report
    }
}
