//! Final steps: record the reservation outcome and notify the user.

use async_trait::async_trait;
use ledger::{Collection, CorrelationId, TransactionPatch, TransactionRecord, TransactionStatus};

use super::{SagaServices, StepHandler, StepOutcome, booked_seats, unexpected_message};
use crate::error::Result;
use crate::messages::{Notification, ReservationCancelled, ReservationCompleted, SagaMessage};
use crate::protocol::Step;
use crate::services::SeatOperationKind;

async fn conclude(
    services: &SagaServices,
    step: Step,
    inbound: SagaMessage,
    status: TransactionStatus,
    error: Option<&str>,
) -> (StepOutcome, Option<TransactionRecord>) {
    let correlation_id = inbound.correlation_id();
    let mut patch = TransactionPatch::status(status);
    if let Some(error) = error {
        patch = patch.with_error(error);
    }

    let record = match services
        .ledger
        .upsert_merge(Collection::Reservations, correlation_id, patch)
        .await
    {
        Ok(record) => record,
        Err(e) => {
            tracing::error!(error = %e, "Could not record reservation outcome");
            services.dead_letters.push(inbound, e.to_string());
            return (StepOutcome::Stalled, None);
        }
    };

    let notification = SagaMessage::Notification(Notification {
        correlation_id,
        status,
        user_id: record.user_id.clone(),
    });
    let outcome = services.publish_or_dead_letter(step, notification).await;
    (outcome, Some(record))
}

/// Marks the reservation `COMPLETED` and notifies the user.
pub struct ReservationCompletionStep {
    services: SagaServices,
}

impl ReservationCompletionStep {
    pub fn new(services: SagaServices) -> Self {
        Self { services }
    }

    #[tracing::instrument(skip(self, event), fields(correlation_id = %event.correlation_id))]
    pub async fn complete(&self, event: ReservationCompleted) -> StepOutcome {
        let (outcome, _) = conclude(
            &self.services,
            Step::CompleteReservation,
            SagaMessage::ReservationCompleted(event),
            TransactionStatus::Completed,
            None,
        )
        .await;
        outcome
    }
}

#[async_trait]
impl StepHandler for ReservationCompletionStep {
    fn step(&self) -> Step {
        Step::CompleteReservation
    }

    async fn handle(&self, message: SagaMessage) -> StepOutcome {
        match message {
            SagaMessage::ReservationCompleted(event) => self.complete(event).await,
            other => unexpected_message(Step::CompleteReservation, &other),
        }
    }
}

/// Marks the reservation `FAILED`, releases any seats still locked for it
/// and notifies the user.
pub struct ReservationCancellationStep {
    services: SagaServices,
}

impl ReservationCancellationStep {
    pub fn new(services: SagaServices) -> Self {
        Self { services }
    }

    #[tracing::instrument(skip(self, event), fields(correlation_id = %event.correlation_id))]
    pub async fn cancel(&self, event: ReservationCancelled) -> StepOutcome {
        let correlation_id = event.correlation_id;
        let (outcome, record) = conclude(
            &self.services,
            Step::CancelReservation,
            SagaMessage::ReservationCancelled(event.clone()),
            TransactionStatus::Failed,
            Some(event.error.as_str()),
        )
        .await;

        if let Some(record) = record
            && let Err(e) = self.release_leftover(correlation_id, &record).await
        {
            tracing::error!(error = %e, "Could not release leftover seats");
            self.services
                .dead_letters
                .push(SagaMessage::ReservationCancelled(event), e.to_string());
        }
        outcome
    }

    /// Covers a booking that locked seats but failed before payment.
    async fn release_leftover(
        &self,
        correlation_id: CorrelationId,
        record: &TransactionRecord,
    ) -> Result<()> {
        let (transit_id, seats) = booked_seats(Collection::Reservations, record)?;
        let outcome = self
            .services
            .change_seats(&transit_id, correlation_id, SeatOperationKind::Release, seats)
            .await?;
        tracing::debug!(?outcome, transit_id = %transit_id, "Leftover seat lock checked");
        Ok(())
    }
}

#[async_trait]
impl StepHandler for ReservationCancellationStep {
    fn step(&self) -> Step {
        Step::CancelReservation
    }

    async fn handle(&self, message: SagaMessage) -> StepOutcome {
        match message {
            SagaMessage::ReservationCancelled(event) => self.cancel(event).await,
            other => unexpected_message(Step::CancelReservation, &other),
        }
    }
}
