use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{BusError, EventBus, MessageId};
use crate::messages::{Envelope, SagaMessage, Topic};

/// A message accepted by the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub id: MessageId,
    pub message: SagaMessage,
}

/// One pending delivery, in wire form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub message_id: MessageId,
    pub topic: Topic,
    pub envelope: Envelope,
}

/// Accepted messages kept in the log by default.
pub const DEFAULT_PUBLISHED_RETENTION: usize = 1024;

#[derive(Debug)]
struct BusState {
    /// Most recent accepted messages, oldest first.
    published: VecDeque<PublishedMessage>,
    retention: usize,
    pending: VecDeque<Delivery>,
    failing_topics: HashSet<Topic>,
    next_id: u64,
}

impl Default for BusState {
    fn default() -> Self {
        Self {
            published: VecDeque::new(),
            retention: DEFAULT_PUBLISHED_RETENTION,
            pending: VecDeque::new(),
            failing_topics: HashSet::new(),
            next_id: 0,
        }
    }
}

/// In-process bus for tests and single-process deployments.
///
/// Every accepted message is queued for delivery and the most recent ones are
/// kept in a log. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBus {
    state: Arc<Mutex<BusState>>,
    notify: Arc<Notify>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A bus whose log keeps at most `retention` messages.
    pub fn with_retention(retention: usize) -> Self {
        let bus = Self::default();
        bus.state().retention = retention;
        bus
    }

    /// Makes publishes to `topic` fail until switched off again.
    pub fn set_fail_on_publish(&self, topic: Topic, fail: bool) {
        let mut state = self.state();
        if fail {
            state.failing_topics.insert(topic);
        } else {
            state.failing_topics.remove(&topic);
        }
    }

    /// Logged messages, in publish order.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state().published.iter().cloned().collect()
    }

    /// Logged messages on `topic`, in publish order.
    pub fn published_on(&self, topic: Topic) -> Vec<SagaMessage> {
        self.state()
            .published
            .iter()
            .filter(|p| p.message.topic() == topic)
            .map(|p| p.message.clone())
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.state().pending.len()
    }

    /// Takes the oldest pending delivery, if any.
    pub fn next_delivery(&self) -> Option<Delivery> {
        self.state().pending.pop_front()
    }

    /// Queues an already published message for delivery again.
    pub fn redeliver(&self, published: &PublishedMessage) -> Result<(), BusError> {
        let delivery = Delivery {
            message_id: published.id.clone(),
            topic: published.message.topic(),
            envelope: published.message.to_envelope()?,
        };
        self.state().pending.push_back(delivery);
        self.notify.notify_one();
        Ok(())
    }

    /// Waits for the next pending delivery.
    pub async fn recv(&self) -> Delivery {
        loop {
            let notified = self.notify.notified();
            if let Some(delivery) = self.next_delivery() {
                return delivery;
            }
            notified.await;
        }
    }

    fn state(&self) -> MutexGuard<'_, BusState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl EventBus for InMemoryBus {
    async fn publish(&self, message: &SagaMessage) -> Result<MessageId, BusError> {
        let topic = message.topic();
        let envelope = message.to_envelope()?;

        let id = {
            let mut state = self.state();
            if state.failing_topics.contains(&topic) {
                return Err(BusError::PublishFailed {
                    topic,
                    reason: "topic unavailable".to_string(),
                });
            }

            state.next_id += 1;
            let id = MessageId::new(format!("msg-{:06}", state.next_id));
            state.published.push_back(PublishedMessage {
                id: id.clone(),
                message: message.clone(),
            });
            while state.published.len() > state.retention {
                state.published.pop_front();
            }
            state.pending.push_back(Delivery {
                message_id: id.clone(),
                topic,
                envelope,
            });
            id
        };

        self.notify.notify_one();
        Ok(id)
    }
}
