//! Per-request pipeline instrumentation for web servers.
//!
//! [`tracking`] holds the engine: path classification, per-stage timers and
//! the coordinator that owns the in-flight metric of each pipeline
//! instance. The rest of the crate hosts it in an axum server: middleware
//! that drives the coordinator, sinks that aggregate or export finished
//! page hits, and the HTTP endpoints that expose them.

use std::sync::Arc;

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod server;
pub mod tracking;

use config::TrackerConfig;
use metrics::{Fanout, MetricSink, MetricsCollector};
use middleware::ResponseCache;
use tracking::PipelinePool;

/// Shared application state available to every handler via `State<Arc<AppState>>`.
pub struct AppState {
    pub config: TrackerConfig,

    /// In-memory aggregate of finished page hits, read by the metrics endpoints.
    pub metrics: Arc<MetricsCollector>,

    /// Pipeline instances; each in-flight request checks one out.
    pub pipeline: PipelinePool,

    /// Output cache used by the demo pipeline.
    pub cache: ResponseCache,
}

impl AppState {
    /// Page hits go to the in-memory collector and then to each exporter.
    pub fn new(config: TrackerConfig, exporters: Vec<Arc<dyn MetricSink>>) -> Self {
        let metrics = Arc::new(MetricsCollector::new());
        let sink = exporters
            .into_iter()
            .fold(Fanout::new().with(metrics.clone()), Fanout::with);

        let pipeline = PipelinePool::new(
            config.tracking_settings(),
            Arc::new(sink),
            config.max_idle_pipelines,
        );
        let cache = ResponseCache::new(config.cache_ttl);

        Self {
            config,
            metrics,
            pipeline,
            cache,
        }
    }
}
