//! Transit inventory endpoints, served from the process's inventory gateway.
//!
//! Same contract the saga uses against a remote transits service:
//! `GET ?day&destination&start`, `GET ?transitId`, `PUT ?transitId`.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use ledger::TransitId;
use saga::protocol::seat_transition;
use saga::{Transit, TransitPatch, TransitQuery, TransitWriteQuery};
use serde::Deserialize;

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitParams {
    pub transit_id: Option<String>,
    pub day: Option<String>,
    pub destination: Option<String>,
    pub start: Option<String>,
}


/// GET /transits: transits by id or by search filter, as an array.
#[tracing::instrument(skip(state))]
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TransitParams>,
) -> Result<Json<Vec<Transit>>, ApiError> {
    let inventory = &state.services().inventory;

    if let Some(id) = params.transit_id {
        let transit = inventory
            .get_transit(&TransitId::new(id.clone()))
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Transit {id} not found")))?;
        return Ok(Json(vec![transit]));
    }

    let query = TransitQuery {
        day: params.day,
        destination: params.destination,
        start: params.start,
    };
    Ok(Json(inventory.find_transits(&query).await?))
}

/// PUT /transits?transitId: merge the body fields into the transit.
///
/// With the seat operation in the query string the write is applied as a
/// keyed, conditional seat update and answered with its outcome. Otherwise the
/// fields are merged (creating the transit if needed) and the answer is an
/// empty 201.
#[tracing::instrument(skip(state, patch))]
pub async fn put(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TransitWriteQuery>,
    Json(patch): Json<TransitPatch>,
) -> Result<Response, ApiError> {
    let inventory = &state.services().inventory;

    let update = params
        .to_seat_update()
        .map_err(|field| ApiError::BadRequest(format!("Seat update is missing {field}")))?;
    let Some(update) = update else {
        inventory.merge_transit(&params.transit_id, patch).await?;
        return Ok(StatusCode::CREATED.into_response());
    };

    let next = seat_transition(update.operation.kind, update.expected, update.seats)?;
    if patch.seat_counts().is_some_and(|counts| counts != next) {
        return Err(ApiError::BadRequest(
            "Seat counts in the body do not match the seat operation".to_string(),
        ));
    }

    let outcome = inventory.update_seats(&params.transit_id, update).await?;
    Ok(Json(outcome).into_response())
}
