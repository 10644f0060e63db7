use async_trait::async_trait;

use crate::{
    Collection, CorrelationId, LedgerError, Result, TransactionPatch, TransactionRecord,
    TransactionStatus,
};

/// Core trait for ledger implementations.
///
/// A ledger stores one document per `(collection, correlation id)` and only
/// ever changes it through field-level merges. All implementations must be
/// thread-safe (Send + Sync).
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Merges `patch` into the stored record, creating it if absent.
    ///
    /// Returns the record as it is after the merge. Applying the same patch
    /// again yields the same record.
    async fn upsert_merge(
        &self,
        collection: Collection,
        correlation_id: CorrelationId,
        patch: TransactionPatch,
    ) -> Result<TransactionRecord>;

    /// Reads the current record, if any.
    async fn get(
        &self,
        collection: Collection,
        correlation_id: CorrelationId,
    ) -> Result<Option<TransactionRecord>>;
}

/// Extension trait providing convenience methods for ledgers.
#[async_trait]
pub trait LedgerExt: Ledger {
    /// Merges a status-only patch.
    async fn set_status(
        &self,
        collection: Collection,
        correlation_id: CorrelationId,
        status: TransactionStatus,
    ) -> Result<TransactionRecord> {
        self.upsert_merge(collection, correlation_id, TransactionPatch::status(status))
            .await
    }

    /// Reads a record, failing with `RecordNotFound` when it is absent.
    async fn require(
        &self,
        collection: Collection,
        correlation_id: CorrelationId,
    ) -> Result<TransactionRecord> {
        self.get(collection, correlation_id)
            .await?
            .ok_or(LedgerError::RecordNotFound {
                collection,
                correlation_id,
            })
    }
}

// Blanket implementation for all Ledger implementations
impl<T: Ledger + ?Sized> LedgerExt for T {}
