use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use eventlink::api;
use eventlink::attribution::RecalculationOrchestrator;
use eventlink::config::Config;
use eventlink::storage::{AssociationStore, CachedSnapshotSource, SqliteStorage};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!("Loaded configuration");

    // Initialize storage
    info!("Using SQLite storage: {}", config.database.url);
    let storage = Arc::new(
        SqliteStorage::new(&config.database.url, config.database.max_connections).await?,
    );
    storage.init().await?;
    info!("Database initialized successfully");

    let snapshots = Arc::new(CachedSnapshotSource::new(
        storage.clone(),
        config.snapshot_cache.max_entries,
        config.snapshot_cache.ttl_secs,
    ));

    let orchestrator =
        RecalculationOrchestrator::new(storage.clone(), storage.clone(), snapshots)
            .with_concurrency(config.refresh.concurrency);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Scheduled metrics refresh
    let refresh_handle = if config.refresh.interval_secs > 0 {
        let orchestrator = orchestrator.clone();
        let interval_secs = config.refresh.interval_secs;
        let mut shutdown_rx = shutdown_rx.clone();
        let refresh_rx = shutdown_rx.clone();
        info!("⏱  Refreshing metrics every {}s", interval_secs);

        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match orchestrator.refresh_metrics_after(None, Some(&refresh_rx)).await {
                            Ok(report) if report.interrupted => {
                                info!(
                                    "Metrics refresh interrupted, last completed link: {}",
                                    report.resume_after.as_deref().unwrap_or("<none>")
                                );
                                break;
                            }
                            Ok(_) => {}
                            Err(e) => error!("Scheduled metrics refresh failed: {}", e),
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!("Shutdown signal received, stopping metrics refresh");
                            break;
                        }
                    }
                }
            }
        }))
    } else {
        info!("Scheduled metrics refresh disabled");
        None
    };

    let api_router = api::create_api_router(orchestrator);
    let api_addr = format!("{}:{}", config.api_server.host, config.api_server.port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr).await?;
    info!("🚀 API server listening on http://{}", api_addr);

    axum::serve(api_listener, api_router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    let _ = shutdown_tx.send(true);
    if let Some(handle) = refresh_handle {
        let _ = handle.await;
    }

    Ok(())
}
