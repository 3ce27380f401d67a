use anyhow::{Context, Result};
use bargain_bites::api::{TelegramClient, TgtgClient};
use bargain_bites::core::{logging, Config, HealthChecker};
use bargain_bites::storage::SqliteStore;
use bargain_bites::Engine;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging; the guard flushes the log file on exit
    let _log_guard = logging::init_logging(
        &config.monitoring.log_level,
        config.monitoring.log_dir.as_deref(),
    );

    tracing::info!("🚀 Bargain Bites starting...");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let store = Arc::new(
        SqliteStore::new(&config.database.sqlite_path)
            .await
            .with_context(|| format!("failed to open database at {}", config.database.sqlite_path))?,
    );
    tracing::info!("💾 Database ready at {}", config.database.sqlite_path);

    let marketplace = Arc::new(TgtgClient::new(config.marketplace.clone())?);
    let chat = Arc::new(TelegramClient::new(&config.telegram)?);

    // Initialize health checker
    let health_checker = HealthChecker::new();

    // Start health check endpoint
    let health_clone = health_checker.clone();
    let health_port = config.monitoring.health_port;
    tokio::spawn(async move { start_health_server(health_clone, health_port).await });

    tracing::info!("✅ Health endpoint running on port {}", health_port);

    let engine = Engine::start(
        config.watcher.clone(),
        marketplace,
        chat,
        store,
        health_checker.clone(),
    );

    // Status line every minute until a shutdown signal arrives
    let mut status_interval = tokio::time::interval(tokio::time::Duration::from_secs(60));
    status_interval.tick().await;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = status_interval.tick() => {
                let status = health_checker.get_status().await;
                tracing::info!(
                    "Bot status: {} (uptime: {}s, state: {:?}, cycles: {}, queued: {}, delivered: {}, failed: {})",
                    status.status,
                    status.uptime_seconds,
                    status.engine.scheduler_state,
                    status.engine.cycles_completed,
                    status.engine.jobs_enqueued,
                    status.engine.jobs_delivered,
                    status.engine.delivery_failures
                );
            }
        }
    }

    let stats = engine.shutdown().await;
    tracing::info!(
        "Shutdown complete ({} delivered, {} failed, {} discarded)",
        stats.delivered,
        stats.failed,
        stats.discarded
    );

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("📥 Received Ctrl-C"),
        _ = terminate => tracing::info!("📥 Received SIGTERM"),
    }
}

async fn start_health_server(health_checker: HealthChecker, port: u16) {
    use warp::Filter;

    let health = warp::path("health")
        .and(warp::get())
        .and(warp::any().map(move || health_checker.clone()))
        .and_then(|checker: HealthChecker| async move {
            let status = checker.get_status().await;
            Ok::<_, warp::Rejection>(warp::reply::json(&status))
        });

    warp::serve(health).run(([0, 0, 0, 0], port)).await;
}
