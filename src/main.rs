use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod api;
mod config;
mod games;
mod metrics;
mod poller;
mod provider;
mod snapshot;

use api::AppState;
use config::Config;
use games::GameStore;
use crate::metrics::{Metrics, PrometheusMetrics};
use poller::Poller;
use provider::retry::linear_backoff;
use provider::{GameProvider, RateLimiter, Retrier, SportsDbClient};
use snapshot::{SnapshotSyncer, SnapshotWriter};

const METRICS_UPKEEP_EVERY: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    let metrics = Arc::new(PrometheusMetrics::new());
    let sink: Option<Arc<dyn Metrics>> = Some(metrics.clone());

    // Provider chain: Retrier(RateLimiter(TheSportsDB))
    let client: Arc<dyn GameProvider> = Arc::new(SportsDbClient::new(
        config.sportsdb_api_key.as_deref(),
        Some(&config.sportsdb_api_url),
        &config.sport,
    )?);
    let rate_limiter = Arc::new(RateLimiter::new(
        Some(client),
        Duration::from_millis(config.rate_limit_ms),
    ));
    let mut retrier = Retrier::new(rate_limiter.clone(), config.retry_attempts)
        .with_backoff(linear_backoff(Duration::from_millis(config.retry_backoff_ms)))
        .with_metrics(sink.clone())
        .with_name(format!("sportsdb:{}", config.sport.to_lowercase()));
    if let Some(seed) = config.retry_seed {
        retrier = retrier.with_seed(seed);
    }
    info!(
        provider = retrier.name(),
        rate_limit = ?rate_limiter.interval(),
        attempts = retrier.max_attempts(),
        seeded = config.retry_seed.is_some(),
        "Provider chain ready"
    );
    let provider: Arc<dyn GameProvider> = Arc::new(retrier);

    let writer = Arc::new(SnapshotWriter::new(&config.snapshot_dir, config.retention_days));
    info!(
        dir = %writer.base_path().display(),
        retention_days = writer.retention_days(),
        "Snapshot directory"
    );

    let root = CancellationToken::new();
    let store = GameStore::new();

    // Metrics upkeep until shutdown
    {
        let metrics = metrics.clone();
        let cancel = root.child_token();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(METRICS_UPKEEP_EVERY);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => metrics.run_upkeep(),
                }
            }
        });
    }

    let poller = Poller::new(
        provider.clone(),
        store.clone(),
        Duration::from_secs(config.poll_interval_secs),
        sink,
    );
    poller.start(root.child_token());

    let syncer = SnapshotSyncer::new(
        config.sync_config(),
        Some(writer.clone()),
        Some(provider.clone()),
    );
    let sync_task = {
        let cancel = root.child_token();
        tokio::spawn(async move { syncer.run(cancel).await })
    };

    let app = api::router(AppState {
        store,
        poller: poller.clone(),
        writer,
        provider,
        metrics,
        shutdown: root.clone(),
    });
    let addr: SocketAddr = config.listen_addr.parse()?;
    info!("API listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Run API server (blocks until shutdown)
    let shutdown = root.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_for_signal().await;
            info!("Shutdown requested");
            shutdown.cancel();
        })
        .await?;

    root.cancel();
    let timeout = config.shutdown_timeout();
    let drain = async {
        if let Err(e) = poller.stop().await {
            error!("Poller shutdown failed: {}", e);
        }
        if let Err(e) = sync_task.await {
            error!("Snapshot sync task failed: {}", e);
        }
    };
    if tokio::time::timeout(timeout, drain).await.is_err() {
        warn!(timeout = ?timeout, "Background tasks did not stop in time");
    }
    rate_limiter.close();

    info!("Shutdown complete");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
