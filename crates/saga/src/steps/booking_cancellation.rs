use async_trait::async_trait;
use ledger::{Collection, TransactionPatch, TransactionStatus};

use super::{SagaServices, StepHandler, StepOutcome, booked_seats, unexpected_message};
use crate::error::Result;
use crate::messages::{BookingCancelled, ReservationCancelled, SagaMessage};
use crate::protocol::Step;
use crate::services::SeatOperationKind;

/// Undoes a booking whose payment failed: the locked seats are released.
///
/// This is the last compensation level. Failures are logged and the
/// inbound message is dead-lettered; the reservation is cancelled regardless.
pub struct BookingCancellationStep {
    services: SagaServices,
}

impl BookingCancellationStep {
    pub fn new(services: SagaServices) -> Self {
        Self { services }
    }

    #[tracing::instrument(skip(self, event), fields(correlation_id = %event.correlation_id))]
    pub async fn cancel(&self, event: BookingCancelled) -> StepOutcome {
        if let Err(e) = self.release_seats(&event).await {
            tracing::error!(error = %e, "Could not release booking");
            self.services
                .dead_letters
                .push(SagaMessage::BookingCancelled(event.clone()), e.to_string());
        }

        let cancelled = SagaMessage::ReservationCancelled(ReservationCancelled {
            correlation_id: event.correlation_id,
            error: event.error,
        });
        self.services
            .publish_or_dead_letter(Step::CancelBooking, cancelled)
            .await
    }

    async fn release_seats(&self, event: &BookingCancelled) -> Result<()> {
        let failed = TransactionPatch::status(TransactionStatus::Failed).with_error(&event.error);
        let record = self
            .services
            .ledger
            .upsert_merge(Collection::Bookings, event.correlation_id, failed)
            .await?;
        let (transit_id, seats) = booked_seats(Collection::Bookings, &record)?;

        let outcome = self
            .services
            .change_seats(
                &transit_id,
                event.correlation_id,
                SeatOperationKind::Release,
                seats,
            )
            .await?;
        tracing::info!(?outcome, transit_id = %transit_id, seats, "Seats released");
        Ok(())
    }
}

#[async_trait]
impl StepHandler for BookingCancellationStep {
    fn step(&self) -> Step {
        Step::CancelBooking
    }

    async fn handle(&self, message: SagaMessage) -> StepOutcome {
        match message {
            SagaMessage::BookingCancelled(event) => self.cancel(event).await,
            other => unexpected_message(Step::CancelBooking, &other),
        }
    }
}

#[cfg(test)]
mod tests {
    use ledger::{CorrelationId, Ledger, LedgerExt, TransitId};

    use super::*;
    use crate::messages::Topic;
    use crate::protocol::PAYMENT_DECLINED_ERROR;
    use crate::steps::test_support::fixture;

    #[tokio::test]
    async fn test_cancellation_releases_seats_and_forwards_error() {
        let f = fixture();
        let id = CorrelationId::new();
        let transit = TransitId::new("T-1");
        f.ledger
            .upsert_merge(
                Collection::Bookings,
                id,
                TransactionPatch::status(TransactionStatus::Pending)
                    .with_transit_id(transit.clone())
                    .with_number_of_seats(2),
            )
            .await
            .unwrap();
        f.services
            .change_seats(&transit, id, SeatOperationKind::Lock, 2)
            .await
            .unwrap();
        let step = BookingCancellationStep::new(f.services.clone());
        let event = BookingCancelled {
            correlation_id: id,
            error: PAYMENT_DECLINED_ERROR.into(),
        };

        let outcome = step.cancel(event.clone()).await;
        assert_eq!(outcome, StepOutcome::Published(Topic::ReservationCancellations));

        let state = f.inventory.transit(&transit).unwrap();
        assert_eq!((state.available_seats, state.locked_seats), (5, 0));

        let record = f.ledger.require(Collection::Bookings, id).await.unwrap();
        assert_eq!(record.status, Some(TransactionStatus::Failed));
        assert_eq!(record.error.as_deref(), Some(PAYMENT_DECLINED_ERROR));

        step.cancel(event).await;
        let state = f.inventory.transit(&transit).unwrap();
        assert_eq!((state.available_seats, state.locked_seats), (5, 0));
    }

    #[tokio::test]
    async fn test_inventory_outage_is_dead_lettered() {
        let f = fixture();
        let id = CorrelationId::new();
        f.ledger
            .upsert_merge(
                Collection::Bookings,
                id,
                TransactionPatch::new()
                    .with_transit_id(TransitId::new("T-1"))
                    .with_number_of_seats(2),
            )
            .await
            .unwrap();
        f.inventory.set_fail_on_read(true);
        let step = BookingCancellationStep::new(f.services.clone());

        let outcome = step
            .cancel(BookingCancelled {
                correlation_id: id,
                error: "Payments error!".into(),
            })
            .await;

        assert_eq!(outcome, StepOutcome::Published(Topic::ReservationCancellations));
        assert_eq!(f.services.dead_letters.len(), 1);
        assert_eq!(
            f.services.dead_letters.entries()[0].topic,
            Topic::BookingCancellations
        );
    }
}
