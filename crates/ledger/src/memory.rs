use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    Collection, CorrelationId, LedgerError, Result, TransactionPatch, TransactionRecord,
    store::Ledger,
};

/// In-memory ledger for tests and single-process deployments.
///
/// Provides the same merge semantics as the PostgreSQL implementation.
#[derive(Clone, Default)]
pub struct InMemoryLedger {
    records: Arc<RwLock<HashMap<(Collection, CorrelationId), TransactionRecord>>>,
    failing_writes: Arc<Mutex<HashSet<Collection>>>,
}

impl InMemoryLedger {
    /// Creates a new empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every write to `collection` fail until switched off again.
    pub fn set_fail_on_write(&self, collection: Collection, fail: bool) {
        let mut failing = self
            .failing_writes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if fail {
            failing.insert(collection);
        } else {
            failing.remove(&collection);
        }
    }

    /// Returns the number of records stored in `collection`.
    pub async fn record_count(&self, collection: Collection) -> usize {
        self.records
            .read()
            .await
            .keys()
            .filter(|(c, _)| *c == collection)
            .count()
    }

    /// Returns the total number of records across all collections.
    pub async fn total_records(&self) -> usize {
        self.records.read().await.len()
    }

    fn write_blocked(&self, collection: Collection) -> bool {
        self.failing_writes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(&collection)
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn upsert_merge(
        &self,
        collection: Collection,
        correlation_id: CorrelationId,
        patch: TransactionPatch,
    ) -> Result<TransactionRecord> {
        if self.write_blocked(collection) {
            return Err(LedgerError::Unavailable(format!(
                "writes to {collection} are failing"
            )));
        }

        let mut records = self.records.write().await;
        let record = records
            .entry((collection, correlation_id))
            .or_insert_with(|| TransactionRecord::new(correlation_id));
        record.merge(&patch);

        metrics::counter!("ledger_merges_total", "collection" => collection.as_str())
            .increment(1);
        Ok(record.clone())
    }

    async fn get(
        &self,
        collection: Collection,
        correlation_id: CorrelationId,
    ) -> Result<Option<TransactionRecord>> {
        let records = self.records.read().await;
        Ok(records.get(&(collection, correlation_id)).cloned())
    }
}
