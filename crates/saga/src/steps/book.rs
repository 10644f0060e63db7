use async_trait::async_trait;
use ledger::{Collection, CorrelationId, TransactionPatch, TransactionStatus};

use super::{SagaServices, StepHandler, StepOutcome, unexpected_message};
use crate::error::{Result, SagaError};
use crate::messages::{BookingRequested, PaymentRequested, ReservationCancelled, SagaMessage, Topic};
use crate::protocol::{BOOKINGS_ERROR, Step, amount_for};
use crate::services::SeatOperationKind;

/// Locks the requested seats and asks for payment.
///
/// On failure the reservation is cancelled; releasing a lock that may
/// already have been applied is left to the reservation cancellation step.
pub struct BookStep {
    services: SagaServices,
}

impl BookStep {
    pub fn new(services: SagaServices) -> Self {
        Self { services }
    }

    #[tracing::instrument(
        skip(self, event),
        fields(correlation_id = %event.correlation_id, transit_id = %event.transit_id)
    )]
    pub async fn book(&self, event: BookingRequested) -> StepOutcome {
        let correlation_id = event.correlation_id;
        match self.lock_seats(&event).await {
            Ok(false) => {
                tracing::info!("Booking already settled, skipping redelivery");
                StepOutcome::Skipped
            }
            Ok(true) => {
                let payment = SagaMessage::PaymentRequested(PaymentRequested {
                    correlation_id,
                    user_id: event.user_id,
                    amount: amount_for(event.number_of_seats),
                });
                match self.services.publish(Step::Book, payment).await {
                    Ok(_) => StepOutcome::Published(Topic::Payments),
                    Err(e) => self.cancel(correlation_id, e).await,
                }
            }
            Err(e) => self.cancel(correlation_id, e).await,
        }
    }

    /// Returns false if the booking was already settled.
    async fn lock_seats(&self, event: &BookingRequested) -> Result<bool> {
        let patch = TransactionPatch::status(TransactionStatus::Pending)
            .with_transit_id(event.transit_id.clone())
            .with_number_of_seats(event.number_of_seats)
            .with_user_id(event.user_id.clone());
        let record = self
            .services
            .ledger
            .upsert_merge(Collection::Bookings, event.correlation_id, patch)
            .await?;
        if record.terminal_status().is_some() {
            return Ok(false);
        }

        let outcome = self
            .services
            .change_seats(
                &event.transit_id,
                event.correlation_id,
                SeatOperationKind::Lock,
                event.number_of_seats,
            )
            .await?;
        tracing::debug!(?outcome, seats = event.number_of_seats, "Seats locked");
        Ok(true)
    }

    async fn cancel(&self, correlation_id: CorrelationId, cause: SagaError) -> StepOutcome {
        tracing::error!(error = %cause, "Booking failed, cancelling reservation");

        let failed = TransactionPatch::status(TransactionStatus::Failed).with_error(BOOKINGS_ERROR);
        if let Err(e) = self
            .services
            .ledger
            .upsert_merge(Collection::Bookings, correlation_id, failed)
            .await
        {
            tracing::error!(error = %e, "Could not mark booking as failed");
        }

        let cancellation = SagaMessage::ReservationCancelled(ReservationCancelled {
            correlation_id,
            error: BOOKINGS_ERROR.to_string(),
        });
        self.services
            .publish_or_dead_letter(Step::Book, cancellation)
            .await
    }
}

#[async_trait]
impl StepHandler for BookStep {
    fn step(&self) -> Step {
        Step::Book
    }

    async fn handle(&self, message: SagaMessage) -> StepOutcome {
        match message {
            SagaMessage::BookingRequested(event) => self.book(event).await,
            other => unexpected_message(Step::Book, &other),
        }
    }
}
