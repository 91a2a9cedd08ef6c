//! Stock consistency daemon.
//!
//! Wires the counter store, the product table and the intent ledger into a
//! [`StockConsistencyService`], seeds the counters on start-up, runs the
//! reconciliation scheduler and serves health and Prometheus endpoints.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use counter_store::{RedisCounterStore, StockMutationEngine};
use intent_ledger::{IntentLedger, PostgresIntentLedger};
use inventory::{
    BackgroundTasks, DrainReport, PgProductStockRepository, ProductOrderService,
    StockConsistencyService, StockWarmup, WarmupReport,
};
use metrics_exporter_prometheus::PrometheusHandle;
use reconciliation::{ReconciliationJob, ReconciliationScheduler, SchedulerHandle};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tower_http::trace::TraceLayer;

use config::Config;
use error::StartupError;
use routes::health::HealthState;

/// Creates the Axum application router.
pub fn create_app<L: IntentLedger + 'static>(
    state: Arc<HealthState<L>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<L>))
        .with_state(state)
        .merge(metrics_router)
        .layer(TraceLayer::new_for_http())
}

pub type StockService =
    StockConsistencyService<RedisCounterStore, PostgresIntentLedger, PgProductStockRepository>;

pub type OrderService =
    ProductOrderService<RedisCounterStore, PostgresIntentLedger, PgProductStockRepository>;

pub type Reconciler = ReconciliationJob<RedisCounterStore, PostgresIntentLedger>;

/// Every long-lived component of the daemon, connected to its backends.
pub struct Runtime {
    pub pool: PgPool,
    pub ledger: Arc<PostgresIntentLedger>,
    pub engine: Arc<StockMutationEngine<RedisCounterStore>>,
    pub tasks: BackgroundTasks,
    pub stock: Arc<StockService>,
    pub orders: OrderService,
    pub reconciler: Arc<Reconciler>,
}

impl Runtime {
    /// Connects to Postgres and Redis, runs migrations and builds the services.
    pub async fn connect(config: &Config) -> Result<Self, StartupError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .connect(&config.database_url)
            .await?;

        let ledger = PostgresIntentLedger::new(pool.clone()).with_grace_window(config.grace_window());
        ledger.run_migrations().await?;
        let ledger = Arc::new(ledger);

        let store = RedisCounterStore::connect(&config.redis_url, config.batch_timeout()).await?;
        let engine = Arc::new(StockMutationEngine::new(store, config.engine_options()));

        let tasks = BackgroundTasks::new();
        let stock = Arc::new(
            StockConsistencyService::new(
                engine.clone(),
                ledger.clone(),
                PgProductStockRepository::new(pool.clone()),
                tasks.clone(),
            )
            .with_settlement_options(config.settlement_options()),
        );
        let orders = ProductOrderService::new(stock.clone());
        let reconciler = Arc::new(
            ReconciliationJob::new(engine.clone(), ledger.clone()).with_policy(config.on_unexpected),
        );

        tracing::info!(
            max_batch_size = config.batch_max_size,
            grace_window_secs = config.grace_window_secs,
            policy = %config.on_unexpected,
            "stock runtime connected"
        );

        Ok(Self {
            pool,
            ledger,
            engine,
            tasks,
            stock,
            orders,
            reconciler,
        })
    }

    /// Seeds missing counters from the product table.
    pub async fn warm_up(&self) -> Result<WarmupReport, StartupError> {
        let report = StockWarmup::new(self.engine.clone(), self.stock.products().clone())
            .run()
            .await?;
        tracing::info!(
            seeded = report.seeded,
            already_present = report.already_present,
            "counter warm-up finished"
        );
        Ok(report)
    }

    pub fn start_scheduler(&self, config: &Config) -> SchedulerHandle {
        ReconciliationScheduler::new(self.reconciler.clone())
            .with_interval(config.reconcile_interval())
            .with_retention(config.retention())
            .start()
    }

    pub fn health_state(&self) -> Arc<HealthState<PostgresIntentLedger>> {
        Arc::new(HealthState {
            ledger: self.ledger.clone(),
        })
    }

    /// Stops the scheduler, drains background work and closes the pool.
    pub async fn shutdown(self, scheduler: SchedulerHandle, config: &Config) -> DrainReport {
        scheduler.stop().await;

        let report = self.tasks.drain(config.drain_timeout()).await;
        if report.aborted > 0 {
            tracing::warn!(
                aborted = report.aborted,
                "background tasks aborted at shutdown; reconciliation will pick up their intents"
            );
        }
        tracing::info!(
            completed = report.completed,
            failed = report.failed,
            "background tasks drained"
        );

        self.pool.close().await;
        report
    }
}
