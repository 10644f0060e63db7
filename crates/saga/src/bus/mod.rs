//! Event bus client: publish saga messages to named topics.
//!
//! Delivery is at-least-once with no ordering guarantee between messages;
//! consumers must tolerate redelivery.

mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::messages::{SagaMessage, Topic};

pub use memory::{DEFAULT_PUBLISHED_RETENTION, Delivery, InMemoryBus, PublishedMessage};

/// Identifier assigned by the bus to an accepted message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors returned when publishing.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Publish to {topic} failed: {reason}")]
    PublishFailed { topic: Topic, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Fire-and-forget publisher.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publishes `message` on its topic and returns the assigned message id.
    async fn publish(&self, message: &SagaMessage) -> Result<MessageId, BusError>;
}
