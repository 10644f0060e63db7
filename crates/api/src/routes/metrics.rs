//! Prometheus metrics endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;

/// Registers descriptions for the saga metrics.
pub fn describe() {
    metrics::describe_counter!(
        "saga_step_invocations_total",
        "Step handler invocations, by step"
    );
    metrics::describe_counter!(
        "saga_compensations_total",
        "Compensation events published, by step"
    );
    metrics::describe_counter!(
        "saga_events_published_total",
        "Events accepted by the bus, by topic"
    );
    metrics::describe_counter!(
        "saga_dead_letters_total",
        "Messages parked in the dead-letter queue"
    );
    metrics::describe_histogram!(
        "saga_step_duration_seconds",
        metrics::Unit::Seconds,
        "Step handler latency"
    );
}

/// GET /metrics: returns Prometheus-formatted metrics.
pub async fn get(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        handle.render(),
    )
}
