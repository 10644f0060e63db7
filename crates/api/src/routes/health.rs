//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub pending_deliveries: usize,
    pub dead_letters: usize,
}

/// GET /health: returns system health status.
pub async fn check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let dead_letters = state.services().dead_letters.len();
    Json(HealthResponse {
        status: if dead_letters == 0 { "ok" } else { "degraded" },
        pending_deliveries: state.bus.pending_count(),
        dead_letters,
    })
}
