use thiserror::Error;

use crate::{Collection, CorrelationId};

/// Errors that can occur when reading or writing the ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// No record exists for the given key.
    #[error("No {collection} record for correlation id {correlation_id}")]
    RecordNotFound {
        collection: Collection,
        correlation_id: CorrelationId,
    },

    /// The backing store refused or could not serve the request.
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored document could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
