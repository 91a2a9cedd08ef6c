//! Stock daemon entry point.

use stockd::Runtime;
use stockd::config::{Config, LogFormat};
use stockd::error::StartupError;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Resolves on SIGINT or SIGTERM. The server stops accepting requests, then
/// the scheduler and background stock tasks are wound down by `Runtime::shutdown`.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!(signal = "SIGINT", "stopping stock daemon");
        }
        () = terminate => {
            tracing::info!(signal = "SIGTERM", "stopping stock daemon");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn run(config: Config) -> Result<(), StartupError> {
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    let runtime = Runtime::connect(&config).await?;
    runtime.warm_up().await?;
    let scheduler = runtime.start_scheduler(&config);

    let app = stockd::create_app(runtime.health_state(), metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, "starting stock daemon");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    runtime.shutdown(scheduler, &config).await;
    served?;

    tracing::info!("stock daemon shut down gracefully");
    Ok(())
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();
    init_tracing(&config);

    if let Err(e) = run(config).await {
        tracing::error!(error = %e, "stock daemon failed");
        std::process::exit(1);
    }
}
