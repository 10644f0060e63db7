//! Dead-letter queue for saga messages that could not be delivered or processed.
//!
//! Resubmitting republishes the message on its topic. Ledger merges and seat
//! operations are idempotent per correlation id, so a message may be resubmitted
//! even if part of its effect already happened.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use ledger::CorrelationId;
use serde::Serialize;

use crate::bus::EventBus;
use crate::messages::{SagaMessage, Topic};

/// A message parked after a failure.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub topic: Topic,
    pub correlation_id: CorrelationId,
    pub message: SagaMessage,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
    /// Failed resubmissions so far.
    pub attempts: u32,
}

/// Result of [`DeadLetterQueue::resubmit_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResubmitReport {
    pub resubmitted: usize,
    pub failed: usize,
}

/// Shared, in-process dead-letter queue.
#[derive(Debug, Clone, Default)]
pub struct DeadLetterQueue {
    entries: Arc<Mutex<Vec<DeadLetter>>>,
}

impl DeadLetterQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks `message` with the reason it failed.
    pub fn push(&self, message: SagaMessage, reason: impl Into<String>) {
        let letter = DeadLetter {
            topic: message.topic(),
            correlation_id: message.correlation_id(),
            message,
            reason: reason.into(),
            recorded_at: Utc::now(),
            attempts: 0,
        };
        tracing::warn!(
            topic = %letter.topic,
            correlation_id = %letter.correlation_id,
            reason = %letter.reason,
            "Message dead-lettered"
        );
        metrics::counter!("saga_dead_letters_total", "topic" => letter.topic.as_str())
            .increment(1);
        self.lock().push(letter);
    }

    pub fn entries(&self) -> Vec<DeadLetter> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Republishes every parked message. Messages that fail again stay queued.
    pub async fn resubmit_all(&self, bus: &dyn EventBus) -> ResubmitReport {
        let letters = std::mem::take(&mut *self.lock());
        let mut report = ResubmitReport::default();
        let mut retained = Vec::new();

        for mut letter in letters {
            match bus.publish(&letter.message).await {
                Ok(id) => {
                    tracing::info!(
                        topic = %letter.topic,
                        correlation_id = %letter.correlation_id,
                        message_id = %id,
                        "Dead letter resubmitted"
                    );
                    report.resubmitted += 1;
                }
                Err(e) => {
                    letter.attempts += 1;
                    letter.reason = e.to_string();
                    retained.push(letter);
                    report.failed += 1;
                }
            }
        }

        self.lock().extend(retained);
        report
    }

    fn lock(&self) -> MutexGuard<'_, Vec<DeadLetter>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
