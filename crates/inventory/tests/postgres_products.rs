//! PostgreSQL integration tests for the product stock table.
//!
//! ```bash
//! cargo test -p inventory --test postgres_products
//! ```

use std::sync::Arc;

use futures_util::future::join_all;
use inventory::{PgProductStockRepository, ProductId, ProductStockRepository, StockChange};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let _ = tracing_subscriber::fmt().with_test_writer().try_init();

            let container = Postgres::default().start().await.unwrap();
            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();
            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::migrate!("../../migrations")
                .run(&temp_pool)
                .await
                .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_repository(stocks: &[(i64, i64)]) -> PgProductStockRepository {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE products")
        .execute(&pool)
        .await
        .unwrap();

    for (id, stock) in stocks {
        sqlx::query("INSERT INTO products (id, stock) VALUES ($1, $2)")
            .bind(id)
            .bind(stock)
            .execute(&pool)
            .await
            .unwrap();
    }

    PgProductStockRepository::new(pool)
}

#[tokio::test]
#[serial]
async fn test_guarded_update_never_goes_negative() {
    let repo = get_test_repository(&[(1, 5), (2, 5)]).await;

    let skipped = repo
        .apply_deltas(&[StockChange::new(2, -2), StockChange::new(1, -9)])
        .await
        .unwrap();

    assert_eq!(skipped, vec![ProductId::new(1)]);
    assert_eq!(repo.stock_of(ProductId::new(1)).await.unwrap(), Some(5));
    assert_eq!(repo.stock_of(ProductId::new(2)).await.unwrap(), Some(3));
}

#[tokio::test]
#[serial]
async fn test_unknown_product_is_reported_as_skipped() {
    let repo = get_test_repository(&[(1, 5)]).await;

    let skipped = repo.apply_deltas(&[StockChange::new(99, 1)]).await.unwrap();

    assert_eq!(skipped, vec![ProductId::new(99)]);
    assert_eq!(repo.stock_of(ProductId::new(99)).await.unwrap(), None);
}

#[tokio::test]
#[serial]
async fn test_all_stocks_are_ordered_by_id() {
    let repo = get_test_repository(&[(3, 30), (1, 10), (2, 20)]).await;

    let stocks = repo.all_stocks().await.unwrap();

    assert_eq!(
        stocks,
        vec![
            (ProductId::new(1), 10),
            (ProductId::new(2), 20),
            (ProductId::new(3), 30)
        ]
    );
}

#[tokio::test]
#[serial]
async fn test_overlapping_batches_in_opposite_order_do_not_deadlock() {
    let repo = get_test_repository(&[(1, 1000), (2, 1000), (3, 1000)]).await;

    let batches = (0..40).map(|i| {
        let repo = repo.clone();
        let changes = if i % 2 == 0 {
            vec![
                StockChange::new(1, -1),
                StockChange::new(2, -1),
                StockChange::new(3, -1),
            ]
        } else {
            vec![
                StockChange::new(3, -1),
                StockChange::new(2, -1),
                StockChange::new(1, -1),
            ]
        };
        tokio::spawn(async move { repo.apply_deltas(&changes).await })
    });

    for result in join_all(batches).await {
        assert!(result.unwrap().unwrap().is_empty());
    }

    for id in 1..=3 {
        assert_eq!(repo.stock_of(ProductId::new(id)).await.unwrap(), Some(960));
    }
}
