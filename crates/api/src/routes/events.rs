//! Push endpoint: the bus delivers one envelope per request.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use saga::{DispatchResult, Envelope, Topic};

use crate::AppState;
use crate::error::ApiError;

/// POST /events/{topic}: hand a base64 envelope to the topic's step.
///
/// Always acknowledges known topics with 204: invalid payloads are dropped
/// and step failures are compensated or dead-lettered, never retried by the bus.
#[tracing::instrument(skip(state, envelope))]
pub async fn push(
    State(state): State<Arc<AppState>>,
    Path(topic): Path<String>,
    Json(envelope): Json<Envelope>,
) -> Result<StatusCode, ApiError> {
    let topic: Topic = topic
        .parse()
        .map_err(|e: saga::UnknownTopic| ApiError::NotFound(e.to_string()))?;

    let result = state.choreography.dispatch(topic, &envelope).await;
    tracing::debug!(?result, "push delivery processed");
    if let DispatchResult::Dropped = result {
        metrics::counter!("api_push_rejected_total", "topic" => topic.as_str()).increment(1);
    }
    Ok(StatusCode::NO_CONTENT)
}
