use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{RequestKey, StockChange};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::{
    DEFAULT_GRACE_WINDOW, IntentReason, LedgerError, Result, StockIntentRecord,
    ledger::IntentLedger,
};

/// PostgreSQL-backed intent ledger implementation.
#[derive(Clone)]
pub struct PostgresIntentLedger {
    pool: PgPool,
    grace_window: Duration,
}

impl PostgresIntentLedger {
    /// Creates a new PostgreSQL intent ledger with the default grace window.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            grace_window: DEFAULT_GRACE_WINDOW,
        }
    }

    /// Sets the age a record must reach before it is reported as overdue.
    pub fn with_grace_window(mut self, grace_window: Duration) -> Self {
        self.grace_window = grace_window;
        self
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_record(row: PgRow) -> Result<StockIntentRecord> {
        let content_json: serde_json::Value = row.try_get("request_content")?;
        let content: Vec<StockChange> = serde_json::from_value(content_json)?;
        let reason: String = row.try_get("reason")?;

        Ok(StockIntentRecord {
            request_key: RequestKey::from(row.try_get::<String, _>("request_key")?),
            content,
            reason: reason.parse()?,
            created_at: row.try_get("created_at")?,
            is_executed: row.try_get("is_executed")?,
            replay_key: row
                .try_get::<Option<String>, _>("replay_key")?
                .map(RequestKey::from),
        })
    }
}

#[async_trait]
impl IntentLedger for PostgresIntentLedger {
    #[tracing::instrument(skip(self, content), fields(size = content.len()))]
    async fn save_intent(
        &self,
        request_key: &RequestKey,
        reason: IntentReason,
        content: &[StockChange],
    ) -> Result<()> {
        let content_json = serde_json::to_value(content)?;

        sqlx::query(
            r#"
            INSERT INTO stock_intents (request_key, request_content, reason)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(request_key.as_str())
        .bind(content_json)
        .bind(reason.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("unique_stock_intent_request_key")
            {
                return LedgerError::DuplicateRequestKey(request_key.clone());
            }
            LedgerError::Database(e)
        })?;

        Ok(())
    }

    async fn find_overdue_unexecuted(
        &self,
        reason: IntentReason,
    ) -> Result<Vec<StockIntentRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT request_key, request_content, reason, is_executed, created_at, replay_key
            FROM stock_intents
            WHERE reason = $1
              AND is_executed = FALSE
              AND created_at <= NOW() - make_interval(secs => $2)
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(reason.as_str())
        .bind(self.grace_window.as_secs_f64())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn mark_executed(&self, request_key: &RequestKey) -> Result<bool> {
        let result = sqlx::query("UPDATE stock_intents SET is_executed = TRUE WHERE request_key = $1")
            .bind(request_key.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_replay_key(
        &self,
        request_key: &RequestKey,
        replay_key: &RequestKey,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE stock_intents SET replay_key = $2 WHERE request_key = $1")
            .bind(request_key.as_str())
            .bind(replay_key.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find(&self, request_key: &RequestKey) -> Result<Option<StockIntentRecord>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT request_key, request_content, reason, is_executed, created_at, replay_key
            FROM stock_intents
            WHERE request_key = $1
            "#,
        )
        .bind(request_key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn count_unexecuted(&self, reason: IntentReason) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM stock_intents WHERE reason = $1 AND is_executed = FALSE",
        )
        .bind(reason.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(count.max(0) as u64)
    }

    async fn purge_executed_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM stock_intents WHERE is_executed = TRUE AND created_at < $1")
                .bind(cutoff)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected())
    }
}
