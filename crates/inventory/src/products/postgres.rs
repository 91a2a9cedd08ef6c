use async_trait::async_trait;
use common::{ProductId, StockChange, canonical_order};
use sqlx::{PgPool, Row};

use crate::Result;
use crate::products::ProductStockRepository;

/// PostgreSQL-backed product stock table.
#[derive(Clone)]
pub struct PgProductStockRepository {
    pool: PgPool,
}

impl PgProductStockRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ProductStockRepository for PgProductStockRepository {
    #[tracing::instrument(skip(self, changes), fields(product_count = changes.len()))]
    async fn apply_deltas(&self, changes: &[StockChange]) -> Result<Vec<ProductId>> {
        let ordered = canonical_order(changes);
        let ids: Vec<i64> = ordered.iter().map(|c| c.product_id.as_i64()).collect();

        let mut tx = self.pool.begin().await?;

        // Every writer locks in the same order, so overlapping batches cannot deadlock.
        sqlx::query("SELECT id FROM products WHERE id = ANY($1) ORDER BY id FOR UPDATE")
            .bind(&ids)
            .fetch_all(&mut *tx)
            .await?;

        let mut skipped = Vec::new();
        for change in &ordered {
            let result = sqlx::query(
                r#"
                UPDATE products
                SET stock = stock + $2, updated_at = NOW()
                WHERE id = $1 AND stock + $2 >= 0
                "#,
            )
            .bind(change.product_id.as_i64())
            .bind(change.quantity)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                skipped.push(change.product_id);
            }
        }

        tx.commit().await?;
        Ok(skipped)
    }

    async fn stock_of(&self, product_id: ProductId) -> Result<Option<i64>> {
        let stock: Option<i64> = sqlx::query_scalar("SELECT stock FROM products WHERE id = $1")
            .bind(product_id.as_i64())
            .fetch_optional(&self.pool)
            .await?;

        Ok(stock)
    }

    async fn all_stocks(&self) -> Result<Vec<(ProductId, i64)>> {
        let rows = sqlx::query("SELECT id, stock FROM products ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| -> Result<(ProductId, i64)> {
                Ok((
                    ProductId::new(row.try_get::<i64, _>("id")?),
                    row.try_get::<i64, _>("stock")?,
                ))
            })
            .collect()
    }
}
