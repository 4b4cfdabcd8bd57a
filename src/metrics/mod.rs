pub mod collector;
pub mod percentiles;
pub mod redis_export;
pub mod stream;

use std::sync::Arc;

pub use collector::{MetricsCollector, MetricsSnapshot};
pub use redis_export::RedisExporter;

use crate::error::Result;
use crate::tracking::PageHit;

/// Destination for finished page hits.
///
/// Called synchronously from the request path, so implementations must not
/// block: aggregate in memory or hand off to a background task.
pub trait MetricSink: Send + Sync {
    fn emit(&self, hit: &PageHit) -> Result<()>;
}

/// Delivers every hit to each inner sink in order.
///
/// All sinks are tried; the first error (if any) is returned.
#[derive(Default, Clone)]
pub struct Fanout {
    sinks: Vec<Arc<dyn MetricSink>>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn MetricSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl MetricSink for Fanout {
    fn emit(&self, hit: &PageHit) -> Result<()> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.emit(hit) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
