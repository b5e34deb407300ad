//! # comply-api — Binary Entry Point
//!
//! Reads configuration from the environment, connects to Postgres when
//! `DATABASE_URL` is set, hydrates the engine, seeds the catalog on first
//! start, launches the scheduler and serves HTTP until Ctrl-C.

use comply_api::state::{AppConfig, AppState, LogFormat};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::from_env()?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    tracing::info!(?config, "starting compliance engine");

    let prometheus = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| {
            tracing::error!("Prometheus recorder installation failed: {e}");
            e
        })?;

    // Absent DATABASE_URL means in-memory only.
    let db_pool = comply_api::db::init_pool(config.database_url.as_ref())
        .await
        .map_err(|e| {
            tracing::error!("Database initialization failed: {e}");
            e
        })?;

    let port = config.port;
    let state = AppState::with_config(config)
        .with_pool(db_pool)
        .with_prometheus(prometheus);

    state.hydrate_from_db().await.map_err(|e| {
        tracing::error!("Database hydration failed: {e}");
        e
    })?;

    if let Some(summary) = comply_api::bootstrap::apply_catalog(&state).await.map_err(|e| {
        tracing::error!("Catalog bootstrap failed: {e}");
        e
    })? {
        tracing::info!(?summary, "catalog seeded");
    }

    let ticker = comply_api::scheduler::spawn(state.clone());
    let app = comply_api::app(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("compliance API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    ticker.abort();
    tracing::info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
    }
}
