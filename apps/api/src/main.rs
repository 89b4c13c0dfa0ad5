use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{routing::get, Router};
use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::trace::{self, TraceLayer};
use tracing::{info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use monitoring_cell::{
    create_monitoring_router, FileSnapshotStore, InMemorySnapshotStore, MonitoringConfig,
    MonitoringHandlers, MonitoringService, SimulatedProbe, SnapshotStore,
};
use shared_config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting API monitoring server");

    // Load configuration
    let app_config = AppConfig::from_env();
    let config = MonitoringConfig::from_app_config(&app_config);

    let store: Arc<dyn SnapshotStore> = match &app_config.snapshot_dir {
        Some(dir) => Arc::new(FileSnapshotStore::new(dir)),
        None => Arc::new(InMemorySnapshotStore::new()),
    };
    let probe = Arc::new(SimulatedProbe::new(app_config.simulated_probe_success_rate));

    let service = MonitoringService::builder(config, probe)
        .store(store)
        .build_and_restore()
        .await;
    service.start();

    let app = Router::new()
        .route("/", get(|| async { "API monitoring is running!" }))
        .merge(create_monitoring_router(Arc::new(MonitoringHandlers::new(
            service.clone(),
        ))))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        );

    let addr: SocketAddr = app_config
        .bind_addr
        .parse()
        .with_context(|| format!("invalid bind address {}", app_config.bind_addr))?;
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    service.shutdown().await;
    info!("API monitoring server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}
