//! Dead-letter inspection and resubmission.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use saga::{DeadLetter, ResubmitReport};

use crate::AppState;

/// GET /dead-letters: messages parked after a failure.
pub async fn list(State(state): State<Arc<AppState>>) -> Json<Vec<DeadLetter>> {
    Json(state.services().dead_letters.entries())
}

/// POST /dead-letters/resubmit: republish every parked message.
#[tracing::instrument(skip(state))]
pub async fn resubmit(State(state): State<Arc<AppState>>) -> Json<ResubmitReport> {
    let services = state.services();
    let report = services
        .dead_letters
        .resubmit_all(services.bus.as_ref())
        .await;
    tracing::info!(
        resubmitted = report.resubmitted,
        failed = report.failed,
        "dead letters resubmitted"
    );
    Json(report)
}
