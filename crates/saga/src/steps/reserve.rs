use std::time::Instant;

use ledger::{Collection, CorrelationId, TransactionPatch, TransactionRecord, TransactionStatus};
use serde::{Deserialize, Serialize};

use super::{SagaServices, observe};
use crate::error::{Result, SagaError};
use crate::messages::{BookingRequested, SagaMessage};
use crate::protocol::Step;
use crate::services::TransitQuery;

/// Body of a reservation request. Every field is required.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationRequest {
    #[serde(default)]
    pub day: Option<String>,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub number_of_seats: Option<u32>,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// A reservation request with every field present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationDetails {
    pub day: String,
    pub destination: String,
    pub start: String,
    pub number_of_seats: u32,
    pub user_id: String,
}

impl ReservationRequest {
    pub fn validate(self) -> Result<ReservationDetails> {
        fn required(field: &str, value: Option<String>) -> Result<String> {
            value
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| SagaError::Validation(format!("{field} is required")))
        }

        let number_of_seats = self
            .number_of_seats
            .filter(|n| *n > 0)
            .ok_or_else(|| SagaError::Validation("numberOfSeats must be positive".into()))?;

        Ok(ReservationDetails {
            day: required("day", self.day)?,
            destination: required("destination", self.destination)?,
            start: required("start", self.start)?,
            number_of_seats,
            user_id: required("userId", self.user_id)?,
        })
    }
}

/// Result of the synchronous Reserve step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// A saga was started; the record is the initial reservation snapshot.
    Started(TransactionRecord),
    /// No transit has enough seats. Nothing was written or published.
    NoTransitAvailable,
}

/// Entry point of the saga, called synchronously by the HTTP layer.
#[derive(Clone)]
pub struct ReserveStep {
    services: SagaServices,
}

impl ReserveStep {
    pub fn new(services: SagaServices) -> Self {
        Self { services }
    }

    /// Validates the request, picks the first transit with enough free seats,
    /// records a `PENDING` reservation and publishes `bookings`.
    #[tracing::instrument(skip(self, request), fields(step = "reserve"))]
    pub async fn reserve(&self, request: ReservationRequest) -> Result<ReserveOutcome> {
        let started = Instant::now();
        let result = self.try_reserve(request).await;
        observe(Step::Reserve, started.elapsed());
        result
    }

    async fn try_reserve(&self, request: ReservationRequest) -> Result<ReserveOutcome> {
        let details = request.validate()?;

        let query = TransitQuery::new(&details.day, &details.destination, &details.start);
        let candidates = self.services.inventory.find_transits(&query).await?;
        let Some(transit) = candidates
            .into_iter()
            .find(|t| t.available_seats >= details.number_of_seats)
        else {
            tracing::info!(
                day = %details.day,
                destination = %details.destination,
                start = %details.start,
                seats = details.number_of_seats,
                "No transit available"
            );
            return Ok(ReserveOutcome::NoTransitAvailable);
        };

        let correlation_id = CorrelationId::new();
        let patch = TransactionPatch::status(TransactionStatus::Pending)
            .with_transit_id(transit.transit_id.clone())
            .with_number_of_seats(details.number_of_seats)
            .with_user_id(details.user_id.clone())
            .with_day(details.day)
            .with_destination(details.destination)
            .with_start(details.start);
        let record = self
            .services
            .ledger
            .upsert_merge(Collection::Reservations, correlation_id, patch)
            .await?;

        let booking = SagaMessage::BookingRequested(BookingRequested {
            correlation_id,
            number_of_seats: details.number_of_seats,
            transit_id: transit.transit_id.clone(),
            user_id: details.user_id,
        });
        if let Err(e) = self.services.publish(Step::Reserve, booking).await {
            tracing::error!(correlation_id = %correlation_id, error = %e, "Failed to start booking");
            let failed = TransactionPatch::status(TransactionStatus::Failed).with_error(e.to_string());
            if let Err(ledger_err) = self
                .services
                .ledger
                .upsert_merge(Collection::Reservations, correlation_id, failed)
                .await
            {
                tracing::warn!(
                    correlation_id = %correlation_id,
                    error = %ledger_err,
                    "Could not mark reservation as failed"
                );
            }
            return Err(e);
        }

        tracing::info!(
            correlation_id = %correlation_id,
            transit_id = %transit.transit_id,
            "Seat reservation initiated"
        );
        Ok(ReserveOutcome::Started(record))
    }
}
