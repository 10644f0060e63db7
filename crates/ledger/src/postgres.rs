use async_trait::async_trait;
use sqlx::PgPool;

use crate::{
    Collection, CorrelationId, Result, TransactionPatch, TransactionRecord, store::Ledger,
};

/// PostgreSQL-backed ledger.
///
/// Each record is a JSONB document. Merges run in a transaction that holds a
/// row lock, so concurrent writers for the same key serialize instead of
/// overwriting each other's fields.
#[derive(Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    /// Creates a new PostgreSQL ledger.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }
}

#[async_trait]
impl Ledger for PostgresLedger {
    #[tracing::instrument(skip(self, patch))]
    async fn upsert_merge(
        &self,
        collection: Collection,
        correlation_id: CorrelationId,
        patch: TransactionPatch,
    ) -> Result<TransactionRecord> {
        let mut tx = self.pool.begin().await?;

        // Make sure the row exists before locking it; two first writers would
        // otherwise both see nothing and the second would clobber the first.
        let empty = serde_json::to_value(TransactionRecord::new(correlation_id))?;
        sqlx::query(
            r#"
            INSERT INTO saga_transactions (collection, correlation_id, status, document)
            VALUES ($1, $2, NULL, $3)
            ON CONFLICT (collection, correlation_id) DO NOTHING
            "#,
        )
        .bind(collection.as_str())
        .bind(correlation_id.as_uuid())
        .bind(&empty)
        .execute(&mut *tx)
        .await?;

        let document: serde_json::Value = sqlx::query_scalar(
            r#"
            SELECT document FROM saga_transactions
            WHERE collection = $1 AND correlation_id = $2
            FOR UPDATE
            "#,
        )
        .bind(collection.as_str())
        .bind(correlation_id.as_uuid())
        .fetch_one(&mut *tx)
        .await?;

        let mut record: TransactionRecord = serde_json::from_value(document)?;
        record.merge(&patch);
        let merged = serde_json::to_value(&record)?;

        sqlx::query(
            r#"
            UPDATE saga_transactions
            SET document = $3, status = $4, updated_at = NOW()
            WHERE collection = $1 AND correlation_id = $2
            "#,
        )
        .bind(collection.as_str())
        .bind(correlation_id.as_uuid())
        .bind(&merged)
        .bind(record.status.map(|s| s.as_str()))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        metrics::counter!("ledger_merges_total", "collection" => collection.as_str())
            .increment(1);
        Ok(record)
    }

    async fn get(
        &self,
        collection: Collection,
        correlation_id: CorrelationId,
    ) -> Result<Option<TransactionRecord>> {
        let document: Option<serde_json::Value> = sqlx::query_scalar(
            "SELECT document FROM saga_transactions WHERE collection = $1 AND correlation_id = $2",
        )
        .bind(collection.as_str())
        .bind(correlation_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        document
            .map(serde_json::from_value)
            .transpose()
            .map_err(Into::into)
    }
}
