use redis::aio::ConnectionManager;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use super::MetricSink;
use crate::error::{Result, TrackerError};
use crate::tracking::PageHit;

/// Creates a single `ConnectionManager` that auto-reconnects on failure.
///
/// `ConnectionManager` is cheaply cloneable; every clone shares the same
/// underlying multiplexed TCP connection.
pub async fn connect(url: &str) -> Result<ConnectionManager> {
    let client = redis::Client::open(url)?;
    Ok(ConnectionManager::new(client).await?)
}

/// Ships page hits into a capped Redis list as JSON.
///
/// `emit` only enqueues; a background task does the round-trips, so the
/// request path never waits on Redis. The queue is bounded: while Redis is
/// slow or down, hits beyond its capacity are dropped and counted. The
/// newest hit sits at the head of the list and the list is trimmed to
/// `max_len` entries (0 disables trimming).
#[derive(Clone)]
pub struct RedisExporter {
    tx: mpsc::Sender<PageHit>,
    dropped: Arc<AtomicU64>,
}

impl RedisExporter {
    /// Spawn the forwarding task. It exits once every exporter clone has
    /// been dropped and the queue is drained.
    ///
    /// `capacity` must be at least 1.
    pub fn spawn(
        conn: ConnectionManager,
        key: impl Into<String>,
        max_len: usize,
        capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity);
        let handle = tokio::spawn(forward(conn, key.into(), max_len, rx));
        (Self::from_channel(tx), handle)
    }

    /// Exporter over a caller-owned queue; the caller drains `rx`.
    pub fn from_channel(tx: mpsc::Sender<PageHit>) -> Self {
        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Hits dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl MetricSink for RedisExporter {
    fn emit(&self, hit: &PageHit) -> Result<()> {
        match self.tx.try_send(hit.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(TrackerError::SinkFull)
            }
            Err(TrySendError::Closed(_)) => Err(TrackerError::SinkClosed),
        }
    }
}

async fn forward(
    mut conn: ConnectionManager,
    key: String,
    max_len: usize,
    mut rx: mpsc::Receiver<PageHit>,
) {
    while let Some(hit) = rx.recv().await {
        if let Err(e) = push(&mut conn, &key, max_len, &hit).await {
            tracing::warn!(key = %key, error = %e, "failed to export page hit to redis");
        }
    }
    tracing::debug!(key = %key, "redis export queue closed");
}

async fn push(
    conn: &mut ConnectionManager,
    key: &str,
    max_len: usize,
    hit: &PageHit,
) -> Result<()> {
    let json = serde_json::to_string(hit)?;

    let mut pipe = redis::pipe();
    pipe.atomic().lpush(key, json).ignore();
    if max_len > 0 {
        pipe.ltrim(key, 0, max_len as isize - 1).ignore();
    }
    let _: () = pipe.query_async(conn).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::RequestMetric;

    fn sample_hit() -> PageHit {
        RequestMetric::new("Default".into(), "Default.aspx".into(), "q=1".into()).to_page_hit()
    }

    #[tokio::test]
    async fn emit_enqueues_hit() {
        let (tx, mut rx) = mpsc::channel(4);
        let exporter = RedisExporter::from_channel(tx);
        let hit = sample_hit();

        exporter.emit(&hit).unwrap();
        assert_eq!(rx.recv().await, Some(hit));
    }

    #[test]
    fn full_queue_drops_hits_instead_of_growing() {
        let (tx, mut rx) = mpsc::channel(2);
        let exporter = RedisExporter::from_channel(tx);

        for _ in 0..2 {
            exporter.emit(&sample_hit()).unwrap();
        }
        for _ in 0..10 {
            assert!(matches!(exporter.emit(&sample_hit()), Err(TrackerError::SinkFull)));
        }
        assert_eq!(exporter.dropped(), 10);

        // draining frees room again
        assert!(rx.try_recv().is_ok());
        exporter.emit(&sample_hit()).unwrap();
        assert_eq!(exporter.clone().dropped(), 10);
    }

    #[test]
    fn emit_after_shutdown_reports_closed_sink() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let exporter = RedisExporter::from_channel(tx);
        assert!(matches!(exporter.emit(&sample_hit()), Err(TrackerError::SinkClosed)));
    }

    #[test]
    fn invalid_url_is_a_redis_error() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let result = rt.block_on(connect("not a url"));
        assert!(matches!(result, Err(TrackerError::Redis(_))));
    }
}
