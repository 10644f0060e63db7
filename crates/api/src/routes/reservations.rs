//! Reservation entry point and status lookup.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use ledger::{Collection, CorrelationId, TransactionRecord, TransactionStatus, TransitId};
use saga::{ReservationRequest, ReserveOutcome};
use serde::Serialize;

use crate::AppState;
use crate::error::{ApiError, INVALID_REQUEST};

/// Message returned when a saga was started.
pub const RESERVATION_STARTED: &str = "Successfully initiated the seat reservation.";
/// Message returned when no transit has enough free seats.
pub const NO_TRANSIT_AVAILABLE: &str = "There is no transit available for the request!";

#[derive(Debug, Serialize)]
pub struct ReserveResponse {
    pub result: ReserveResult,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ReserveResult {
    Started(ReservationStarted),
    Message(&'static str),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationStarted {
    pub correlation_id: CorrelationId,
    pub message: &'static str,
    pub transit_id: Option<TransitId>,
    pub status: Option<TransactionStatus>,
}

/// POST /reservations: run the Reserve step.
#[tracing::instrument(skip(state, payload))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ReservationRequest>, JsonRejection>,
) -> Result<Json<ReserveResponse>, ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        tracing::info!(error = %rejection, "malformed reservation request");
        ApiError::BadRequest(INVALID_REQUEST.to_string())
    })?;

    let outcome = state
        .choreography
        .reserve_step()
        .reserve(request)
        .await
        .map_err(ApiError::from_reservation)?;

    let result = match outcome {
        ReserveOutcome::Started(record) => ReserveResult::Started(ReservationStarted {
            correlation_id: record.correlation_id,
            message: RESERVATION_STARTED,
            transit_id: record.transit_id,
            status: record.status,
        }),
        ReserveOutcome::NoTransitAvailable => ReserveResult::Message(NO_TRANSIT_AVAILABLE),
    };
    Ok(Json(ReserveResponse { result }))
}

/// GET /reservations/{id}: current reservation-level ledger record.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TransactionRecord>, ApiError> {
    let correlation_id = CorrelationId::parse(&id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid correlation id: {e}")))?;

    let record = state
        .services()
        .ledger
        .get(Collection::Reservations, correlation_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Reservation {id} not found")))?;
    Ok(Json(record))
}
