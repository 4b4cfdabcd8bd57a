use std::sync::Arc;
use std::time::Duration;

use rust_request_tracker::config::TrackerConfig;
use rust_request_tracker::error::TrackerError;
use rust_request_tracker::metrics::{redis_export, MetricSink, RedisExporter};
use rust_request_tracker::{server, AppState};

/// How long shutdown waits for queued page hits to reach Redis.
const EXPORT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), TrackerError> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    // ── 1. Configuration ─────────────────────────────────────────
    let config = TrackerConfig::from_env()?;

    // ── 2. Optional Redis export ─────────────────────────────────
    let mut exporters: Vec<Arc<dyn MetricSink>> = Vec::new();
    let mut export_task = None;
    if let Some(url) = &config.redis_url {
        tracing::info!(%url, key = %config.redis_key, "exporting page hits to redis");
        let conn = redis_export::connect(url).await?;
        let (exporter, handle) = RedisExporter::spawn(
            conn,
            config.redis_key.clone(),
            config.redis_max_len,
            config.redis_queue_capacity,
        );
        exporters.push(Arc::new(exporter));
        export_task = Some(handle);
    }

    // ── 3. Build shared state and router ─────────────────────────
    let bind = config.bind;
    let state = Arc::new(AppState::new(config, exporters));
    let app = server::create_router(state.clone());

    // ── 4. Bind & serve ──────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(addr = %bind, "request tracker listening");
    tracing::info!("metrics JSON   → http://{bind}/api/metrics");
    tracing::info!("metrics SSE    → http://{bind}/api/metrics/stream");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // ── 5. Drain ─────────────────────────────────────────────────
    let stats = state.pipeline.stats();
    tracing::info!(
        emitted = stats.emitted,
        suppressed = stats.suppressed,
        failed = stats.failed,
        ignored = stats.ignored,
        "server stopped"
    );

    // Dropping the last state handle closes the export queue.
    drop(state);
    if let Some(handle) = export_task {
        if tokio::time::timeout(EXPORT_DRAIN_TIMEOUT, handle).await.is_err() {
            tracing::warn!("redis export did not drain before shutdown");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
