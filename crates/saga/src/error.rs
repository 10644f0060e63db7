//! Saga error types.

use ledger::{Collection, CorrelationId, LedgerError};
use thiserror::Error;

use crate::bus::BusError;
use crate::messages::Topic;
use crate::services::inventory::InventoryError;

/// Errors that can occur while running a saga step.
///
/// A payment decline is not an error: it is a valid outcome routed to the
/// cancellation path (see [`PaymentDecision`](crate::services::PaymentDecision)).
#[derive(Debug, Error)]
pub enum SagaError {
    /// The synchronous caller sent an incomplete request.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// An inbound bus message is missing required fields.
    #[error("Invalid {topic} payload: {reason}")]
    InvalidPayload { topic: Topic, reason: String },

    /// A ledger record lacks a field a later step depends on.
    #[error("{collection} record {correlation_id} has no {field}")]
    IncompleteRecord {
        collection: Collection,
        correlation_id: CorrelationId,
        field: &'static str,
    },

    /// Ledger error.
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Inventory gateway error.
    #[error("Inventory error: {0}")]
    Inventory(#[from] InventoryError),

    /// Event bus error.
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    /// The payment gateway call itself failed (not a decline).
    #[error("Payment gateway error: {0}")]
    PaymentGateway(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Error taxonomy used for routing failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or malformed input. Surfaced to the synchronous caller only.
    Validation,
    /// A ledger, inventory, bus or gateway call failed.
    Dependency,
}

impl SagaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SagaError::Validation(_) | SagaError::InvalidPayload { .. } => ErrorKind::Validation,
            _ => ErrorKind::Dependency,
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
