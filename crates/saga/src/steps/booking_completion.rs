use async_trait::async_trait;
use ledger::{Collection, CorrelationId, LedgerExt, TransactionStatus};

use super::{SagaServices, StepHandler, StepOutcome, booked_seats, unexpected_message};
use crate::error::Result;
use crate::messages::{BookingCompleted, ReservationCompleted, SagaMessage};
use crate::protocol::Step;
use crate::services::{SeatOperationKind, SeatUpdateOutcome};

/// Finalizes a paid booking: the locked seats are consumed.
pub struct BookingCompletionStep {
    services: SagaServices,
}

impl BookingCompletionStep {
    pub fn new(services: SagaServices) -> Self {
        Self { services }
    }

    /// `reservationCompletions` is published even when settling failed;
    /// the failed message is dead-lettered for resubmission.
    #[tracing::instrument(skip(self, event), fields(correlation_id = %event.correlation_id))]
    pub async fn complete(&self, event: BookingCompleted) -> StepOutcome {
        let correlation_id = event.correlation_id;
        if let Err(e) = self.consume_seats(correlation_id).await {
            tracing::error!(error = %e, "Could not complete booking");
            self.services
                .dead_letters
                .push(SagaMessage::BookingCompleted(event), e.to_string());
        }

        let completed = SagaMessage::ReservationCompleted(ReservationCompleted { correlation_id });
        self.services
            .publish_or_dead_letter(Step::CompleteBooking, completed)
            .await
    }

    async fn consume_seats(&self, correlation_id: CorrelationId) -> Result<()> {
        let record = self
            .services
            .ledger
            .set_status(Collection::Bookings, correlation_id, TransactionStatus::Completed)
            .await?;
        let (transit_id, seats) = booked_seats(Collection::Bookings, &record)?;

        let outcome = self
            .services
            .change_seats(&transit_id, correlation_id, SeatOperationKind::Consume, seats)
            .await?;
        if outcome != SeatUpdateOutcome::Applied {
            tracing::info!(?outcome, transit_id = %transit_id, "Seats already settled");
        }
        Ok(())
    }
}

#[async_trait]
impl StepHandler for BookingCompletionStep {
    fn step(&self) -> Step {
        Step::CompleteBooking
    }

    async fn handle(&self, message: SagaMessage) -> StepOutcome {
        match message {
            SagaMessage::BookingCompleted(event) => self.complete(event).await,
            other => unexpected_message(Step::CompleteBooking, &other),
        }
    }
}

#[cfg(test)]
mod tests {
    use ledger::{Ledger, TransactionPatch, TransitId};

    use super::*;
    use crate::messages::Topic;
    use crate::steps::test_support::{Fixture, fixture};

    async fn locked_booking(f: &Fixture, seats: u32) -> CorrelationId {
        let id = CorrelationId::new();
        let transit = TransitId::new("T-1");
        f.ledger
            .upsert_merge(
                Collection::Bookings,
                id,
                TransactionPatch::status(TransactionStatus::Pending)
                    .with_transit_id(transit.clone())
                    .with_number_of_seats(seats),
            )
            .await
            .unwrap();
        f.services
            .change_seats(&transit, id, SeatOperationKind::Lock, seats)
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn test_completion_consumes_locked_seats() {
        let f = fixture();
        let id = locked_booking(&f, 2).await;
        let step = BookingCompletionStep::new(f.services.clone());

        let outcome = step.complete(BookingCompleted { correlation_id: id }).await;
        assert_eq!(outcome, StepOutcome::Published(Topic::ReservationCompletions));

        let transit = f.inventory.transit(&TransitId::new("T-1")).unwrap();
        assert_eq!((transit.available_seats, transit.locked_seats), (3, 0));
        assert!(transit.is_consistent());

        let record = f.ledger.require(Collection::Bookings, id).await.unwrap();
        assert_eq!(record.status, Some(TransactionStatus::Completed));
    }

    #[tokio::test]
    async fn test_redelivered_completion_does_not_consume_twice() {
        let f = fixture();
        let id = locked_booking(&f, 2).await;
        let _other = locked_booking(&f, 1).await;
        let step = BookingCompletionStep::new(f.services.clone());

        step.complete(BookingCompleted { correlation_id: id }).await;
        step.complete(BookingCompleted { correlation_id: id }).await;

        let transit = f.inventory.transit(&TransitId::new("T-1")).unwrap();
        assert_eq!(transit.locked_seats, 1, "the other booking keeps its lock");
        assert_eq!(transit.sold_seats, 2);
        assert!(f.services.dead_letters.is_empty());
    }

    #[tokio::test]
    async fn test_missing_booking_is_dead_lettered_but_still_published() {
        let f = fixture();
        let step = BookingCompletionStep::new(f.services.clone());
        let id = CorrelationId::new();

        let outcome = step.complete(BookingCompleted { correlation_id: id }).await;
        assert_eq!(outcome, StepOutcome::Published(Topic::ReservationCompletions));

        let letters = f.services.dead_letters.entries();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].topic, Topic::BookingCompletions);
        assert!(letters[0].reason.contains("transitId"));
    }
}
