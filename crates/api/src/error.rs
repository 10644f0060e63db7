//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use ledger::LedgerError;
use saga::{ErrorKind, InventoryError, SagaError};

/// Body of a rejected reservation request.
pub const INVALID_REQUEST: &str = "Invalid request!";
/// Body of a reservation request that failed on our side.
pub const INTERNAL_SERVER_ERROR: &str = "Internal server error!";

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Saga step error.
    Saga(SagaError),
    /// Inventory gateway error.
    Inventory(InventoryError),
    /// Internal server error.
    Internal(String),
}

impl ApiError {
    /// Maps a Reserve step error to the fixed client-facing messages.
    pub fn from_reservation(err: SagaError) -> Self {
        match err.kind() {
            ErrorKind::Validation => {
                tracing::info!(error = %err, "reservation rejected");
                ApiError::BadRequest(INVALID_REQUEST.to_string())
            }
            ErrorKind::Dependency => {
                tracing::error!(error = %err, "reservation failed");
                ApiError::Internal(INTERNAL_SERVER_ERROR.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Saga(err) => saga_error_to_response(err),
            ApiError::Inventory(err) => inventory_error_to_response(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, String) {
    match err {
        SagaError::Inventory(inner) => inventory_error_to_response(inner),
        SagaError::Ledger(LedgerError::RecordNotFound { .. }) => {
            (StatusCode::NOT_FOUND, err.to_string())
        }
        _ if err.kind() == ErrorKind::Validation => (StatusCode::BAD_REQUEST, err.to_string()),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

fn inventory_error_to_response(err: InventoryError) -> (StatusCode, String) {
    let status = match &err {
        InventoryError::TransitNotFound(_) => StatusCode::NOT_FOUND,
        InventoryError::Conflict { .. } => StatusCode::CONFLICT,
        InventoryError::InvariantViolation { .. }
        | InventoryError::InsufficientSeats { .. }
        | InventoryError::LockUnderflow { .. }
        | InventoryError::IncompleteTransit { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        InventoryError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, err.to_string())
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

impl From<InventoryError> for ApiError {
    fn from(err: InventoryError) -> Self {
        ApiError::Inventory(err)
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError::Saga(SagaError::Ledger(err))
    }
}
