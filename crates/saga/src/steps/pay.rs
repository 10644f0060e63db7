use async_trait::async_trait;
use ledger::{
    Collection, CorrelationId, LedgerExt, TransactionPatch, TransactionRecord, TransactionStatus,
};

use super::{SagaServices, StepHandler, StepOutcome, unexpected_message};
use crate::error::SagaError;
use crate::messages::{BookingCancelled, BookingCompleted, PaymentRequested, SagaMessage, Topic};
use crate::protocol::{PAYMENT_DECLINED_ERROR, SERVER_ERROR, Step};
use crate::services::PaymentDecision;

/// Charges the user and reports the booking as completed or cancelled.
///
/// Every path ends in exactly one of `bookingCompletions` or
/// `bookingCancellations`.
pub struct PayStep {
    services: SagaServices,
}

impl PayStep {
    pub fn new(services: SagaServices) -> Self {
        Self { services }
    }

    #[tracing::instrument(skip(self, event), fields(correlation_id = %event.correlation_id))]
    pub async fn pay(&self, event: PaymentRequested) -> StepOutcome {
        let correlation_id = event.correlation_id;
        let pending = TransactionPatch::status(TransactionStatus::Pending)
            .with_user_id(event.user_id.clone())
            .with_amount(event.amount);
        let record = match self
            .services
            .ledger
            .upsert_merge(Collection::Payments, correlation_id, pending)
            .await
        {
            Ok(record) => record,
            Err(e) => return self.fail(correlation_id, e.into()).await,
        };

        if record.terminal_status().is_some() {
            return self.replay(&record).await;
        }

        let decision = match self.services.payment.charge(&event.user_id, event.amount).await {
            Ok(decision) => decision,
            Err(e) => return self.fail(correlation_id, e).await,
        };
        tracing::info!(?decision, amount = event.amount, "Payment processed");

        match decision {
            PaymentDecision::Approved => {
                let completed = SagaMessage::BookingCompleted(BookingCompleted { correlation_id });
                if let Err(e) = self.services.publish(Step::Pay, completed).await {
                    return self.fail(correlation_id, e).await;
                }
                if let Err(e) = self
                    .services
                    .ledger
                    .set_status(Collection::Payments, correlation_id, TransactionStatus::Completed)
                    .await
                {
                    tracing::error!(error = %e, "Could not mark payment as completed");
                }
                StepOutcome::Published(Topic::BookingCompletions)
            }
            PaymentDecision::Declined => {
                let cancelled = SagaMessage::BookingCancelled(BookingCancelled {
                    correlation_id,
                    error: PAYMENT_DECLINED_ERROR.to_string(),
                });
                if let Err(e) = self.services.publish(Step::Pay, cancelled).await {
                    return self.fail(correlation_id, e).await;
                }
                let failed = TransactionPatch::status(TransactionStatus::Failed)
                    .with_error(PAYMENT_DECLINED_ERROR);
                if let Err(e) = self
                    .services
                    .ledger
                    .upsert_merge(Collection::Payments, correlation_id, failed)
                    .await
                {
                    tracing::error!(error = %e, "Could not mark payment as failed");
                }
                StepOutcome::Published(Topic::BookingCancellations)
            }
        }
    }

    /// Re-emits the outcome of a payment that was already settled.
    async fn replay(&self, record: &TransactionRecord) -> StepOutcome {
        let correlation_id = record.correlation_id;
        tracing::info!(status = ?record.status, "Payment already settled, replaying outcome");

        let message = match record.status {
            Some(TransactionStatus::Completed) => {
                SagaMessage::BookingCompleted(BookingCompleted { correlation_id })
            }
            _ => SagaMessage::BookingCancelled(BookingCancelled {
                correlation_id,
                error: record
                    .error
                    .clone()
                    .unwrap_or_else(|| PAYMENT_DECLINED_ERROR.to_string()),
            }),
        };
        self.services.publish_or_dead_letter(Step::Pay, message).await
    }

    async fn fail(&self, correlation_id: CorrelationId, cause: SagaError) -> StepOutcome {
        tracing::error!(error = %cause, "Payment step failed, cancelling booking");

        let failed = TransactionPatch::status(TransactionStatus::Failed).with_error(SERVER_ERROR);
        if let Err(e) = self
            .services
            .ledger
            .upsert_merge(Collection::Payments, correlation_id, failed)
            .await
        {
            tracing::error!(error = %e, "Could not mark payment as failed");
        }

        let cancelled = SagaMessage::BookingCancelled(BookingCancelled {
            correlation_id,
            error: SERVER_ERROR.to_string(),
        });
        self.services
            .publish_or_dead_letter(Step::Pay, cancelled)
            .await
    }
}

#[async_trait]
impl StepHandler for PayStep {
    fn step(&self) -> Step {
        Step::Pay
    }

    async fn handle(&self, message: SagaMessage) -> StepOutcome {
        match message {
            SagaMessage::PaymentRequested(event) => self.pay(event).await,
            other => unexpected_message(Step::Pay, &other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::test_support::fixture;

    fn payment() -> PaymentRequested {
        PaymentRequested {
            correlation_id: CorrelationId::new(),
            user_id: "user-1".into(),
            amount: 40,
        }
    }

    async fn payment_status(
        f: &crate::steps::test_support::Fixture,
        id: CorrelationId,
    ) -> TransactionRecord {
        f.ledger.require(Collection::Payments, id).await.unwrap()
    }

    #[tokio::test]
    async fn test_approved_payment_completes_booking() {
        let f = fixture();
        let step = PayStep::new(f.services.clone());
        let event = payment();

        let outcome = step.pay(event.clone()).await;
        assert_eq!(outcome, StepOutcome::Published(Topic::BookingCompletions));

        let record = payment_status(&f, event.correlation_id).await;
        assert_eq!(record.status, Some(TransactionStatus::Completed));
        assert_eq!(record.amount, Some(40));
        assert_eq!(f.payment.charges(), vec![("user-1".to_string(), 40)]);
    }

    #[tokio::test]
    async fn test_declined_payment_cancels_booking() {
        let f = fixture();
        f.payment.set_decline(true);
        let step = PayStep::new(f.services.clone());
        let event = payment();

        let outcome = step.pay(event.clone()).await;
        assert_eq!(outcome, StepOutcome::Published(Topic::BookingCancellations));
        assert_eq!(
            f.bus.published_on(Topic::BookingCancellations),
            vec![SagaMessage::BookingCancelled(BookingCancelled {
                correlation_id: event.correlation_id,
                error: PAYMENT_DECLINED_ERROR.into(),
            })]
        );

        let record = payment_status(&f, event.correlation_id).await;
        assert_eq!(record.status, Some(TransactionStatus::Failed));
    }

    #[tokio::test]
    async fn test_gateway_error_is_a_server_error() {
        let f = fixture();
        f.payment.set_fail(true);
        let step = PayStep::new(f.services.clone());
        let event = payment();

        step.pay(event.clone()).await;

        let cancellations = f.bus.published_on(Topic::BookingCancellations);
        assert_eq!(cancellations.len(), 1);
        let SagaMessage::BookingCancelled(cancelled) = &cancellations[0] else {
            panic!("expected a booking cancellation");
        };
        assert_eq!(cancelled.error, SERVER_ERROR);
        assert_eq!(
            payment_status(&f, event.correlation_id).await.error.as_deref(),
            Some(SERVER_ERROR)
        );
    }

    #[tokio::test]
    async fn test_failed_success_publish_falls_back_to_cancellation() {
        let f = fixture();
        f.bus.set_fail_on_publish(Topic::BookingCompletions, true);
        let step = PayStep::new(f.services.clone());

        let outcome = step.pay(payment()).await;
        assert_eq!(outcome, StepOutcome::Published(Topic::BookingCancellations));
        assert_eq!(f.bus.published().len(), 1);
    }

    #[tokio::test]
    async fn test_redelivery_replays_without_charging() {
        let f = fixture();
        let step = PayStep::new(f.services.clone());
        let event = payment();

        step.pay(event.clone()).await;
        let outcome = step.pay(event.clone()).await;

        assert_eq!(outcome, StepOutcome::Published(Topic::BookingCompletions));
        assert_eq!(f.payment.charge_count(), 1);
        assert_eq!(f.bus.published_on(Topic::BookingCompletions).len(), 2);
    }

    #[tokio::test]
    async fn test_declined_replay_keeps_recorded_error() {
        let f = fixture();
        f.payment.set_decline(true);
        let step = PayStep::new(f.services.clone());
        let event = payment();

        step.pay(event.clone()).await;
        f.payment.set_decline(false);
        step.pay(event.clone()).await;

        assert_eq!(f.payment.charge_count(), 1);
        let cancellations = f.bus.published_on(Topic::BookingCancellations);
        assert_eq!(cancellations.len(), 2);
        assert_eq!(cancellations[0], cancellations[1]);
    }
}
