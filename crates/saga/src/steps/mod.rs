//! Saga step handlers.
//!
//! Each handler consumes one topic, performs its local transaction and
//! publishes exactly one outbound event: its success event, or its
//! compensation event when the local work failed.

mod book;
mod booking_cancellation;
mod booking_completion;
mod pay;
mod reservation_outcome;
mod reserve;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ledger::{Collection, CorrelationId, Ledger, TransactionRecord, TransitId};

use crate::bus::{EventBus, MessageId};
use crate::dead_letter::DeadLetterQueue;
use crate::error::{Result, SagaError};
use crate::messages::{SagaMessage, Topic};
use crate::protocol::{MAX_SEAT_UPDATE_ATTEMPTS, Step};
use crate::services::{
    InventoryError, InventoryGateway, PaymentGateway, SeatOperation, SeatOperationKind,
    SeatUpdate, SeatUpdateOutcome,
};

pub use book::BookStep;
pub use booking_cancellation::BookingCancellationStep;
pub use booking_completion::BookingCompletionStep;
pub use pay::PayStep;
pub use reservation_outcome::{ReservationCancellationStep, ReservationCompletionStep};
pub use reserve::{ReservationDetails, ReservationRequest, ReserveOutcome, ReserveStep};

/// Clients injected into every step. Cheap to clone.
#[derive(Clone)]
pub struct SagaServices {
    pub ledger: Arc<dyn Ledger>,
    pub bus: Arc<dyn EventBus>,
    pub inventory: Arc<dyn InventoryGateway>,
    pub payment: Arc<dyn PaymentGateway>,
    pub dead_letters: DeadLetterQueue,
    /// Reads per seat operation before a conflict is reported.
    pub seat_update_attempts: usize,
}

impl SagaServices {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        bus: Arc<dyn EventBus>,
        inventory: Arc<dyn InventoryGateway>,
        payment: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            ledger,
            bus,
            inventory,
            payment,
            dead_letters: DeadLetterQueue::new(),
            seat_update_attempts: MAX_SEAT_UPDATE_ATTEMPTS,
        }
    }

    /// Overrides how often a seat operation re-reads after a conflict.
    ///
    /// With `n` concurrent writers on one transit, `n` attempts always succeed.
    pub fn with_seat_update_attempts(mut self, attempts: usize) -> Self {
        self.seat_update_attempts = attempts.max(1);
        self
    }

    /// Publishes an event emitted by `step`.
    pub(crate) async fn publish(&self, step: Step, message: SagaMessage) -> Result<MessageId> {
        let topic = message.topic();
        let id = self.bus.publish(&message).await?;

        metrics::counter!("saga_events_published_total", "topic" => topic.as_str()).increment(1);
        if topic.is_compensation() || Some(topic) == step.compensation_topic() {
            metrics::counter!("saga_compensations_total", "step" => step.name()).increment(1);
        }
        tracing::info!(
            step = step.name(),
            topic = %topic,
            correlation_id = %message.correlation_id(),
            message_id = %id,
            "Event published"
        );
        Ok(id)
    }

    /// Publishes an event that has no further fallback. A failed publish
    /// parks the message in the dead-letter queue.
    pub(crate) async fn publish_or_dead_letter(
        &self,
        step: Step,
        message: SagaMessage,
    ) -> StepOutcome {
        let topic = message.topic();
        match self.publish(step, message.clone()).await {
            Ok(_) => StepOutcome::Published(topic),
            Err(e) => {
                tracing::error!(
                    step = step.name(),
                    topic = %topic,
                    correlation_id = %message.correlation_id(),
                    error = %e,
                    "Publish failed"
                );
                self.dead_letters.push(message, e.to_string());
                StepOutcome::Stalled
            }
        }
    }

    /// Applies a keyed seat operation as read, compute, conditional write.
    ///
    /// Re-reads and retries when the counters changed in between.
    pub(crate) async fn change_seats(
        &self,
        transit_id: &TransitId,
        correlation_id: CorrelationId,
        kind: SeatOperationKind,
        seats: u32,
    ) -> Result<SeatUpdateOutcome> {
        let mut attempt = 1;
        loop {
            let transit = self
                .inventory
                .get_transit(transit_id)
                .await?
                .ok_or_else(|| InventoryError::TransitNotFound(transit_id.clone()))?;

            let update = SeatUpdate {
                operation: SeatOperation {
                    correlation_id,
                    kind,
                },
                seats,
                expected: transit.seat_counts(),
            };

            match self.inventory.update_seats(transit_id, update).await {
                Err(InventoryError::Conflict { .. }) if attempt < self.seat_update_attempts => {
                    tracing::debug!(
                        transit_id = %transit_id,
                        correlation_id = %correlation_id,
                        attempt,
                        "Seat counts changed, retrying"
                    );
                    attempt += 1;
                }
                result => return Ok(result?),
            }
        }
    }
}

/// What a step invocation ended with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Exactly one event was published on this topic.
    Published(Topic),
    /// A redelivered message was acknowledged without side effects.
    Skipped,
    /// Nothing could be published; the message was dead-lettered.
    Stalled,
}

/// A saga participant reacting to one topic.
#[async_trait]
pub trait StepHandler: Send + Sync {
    fn step(&self) -> Step;

    /// Handles a message already decoded for this step's topic.
    async fn handle(&self, message: SagaMessage) -> StepOutcome;
}

/// Records the invocation counter and latency histogram for `step`.
pub(crate) fn observe(step: Step, elapsed: Duration) {
    metrics::counter!("saga_step_invocations_total", "step" => step.name()).increment(1);
    metrics::histogram!("saga_step_duration_seconds", "step" => step.name())
        .record(elapsed.as_secs_f64());
}

fn unexpected_message(step: Step, message: &SagaMessage) -> StepOutcome {
    tracing::warn!(
        step = step.name(),
        topic = %message.topic(),
        correlation_id = %message.correlation_id(),
        "Message delivered to the wrong step, ignoring"
    );
    StepOutcome::Skipped
}

/// Recovers the seat reservation a record describes.
fn booked_seats(collection: Collection, record: &TransactionRecord) -> Result<(TransitId, u32)> {
    let missing = |field: &'static str| SagaError::IncompleteRecord {
        collection,
        correlation_id: record.correlation_id,
        field,
    };
    let transit_id = record.transit_id.clone().ok_or_else(|| missing("transitId"))?;
    let seats = record.number_of_seats.ok_or_else(|| missing("numberOfSeats"))?;
    Ok((transit_id, seats))
}
