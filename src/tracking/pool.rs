use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::coordinator::{CoordinatorStats, RequestTrackingCoordinator, TrackingSettings};
use crate::metrics::MetricSink;

/// Pool of coordinators, one per concurrently served request.
///
/// Each checkout behaves like a pooled pipeline instance: it is handed to
/// one request at a time and returned when the request is done, or when
/// its future is dropped mid-flight. A coordinator returned with a metric
/// still in its slot has that metric suppressed by its next
/// `begin_request`.
pub struct PipelinePool {
    idle: Mutex<Vec<Arc<RequestTrackingCoordinator>>>,
    all: Mutex<Vec<Arc<RequestTrackingCoordinator>>>,
    retired: Mutex<CoordinatorStats>,
    settings: Arc<TrackingSettings>,
    sink: Arc<dyn MetricSink>,
    max_idle: usize,
    created: AtomicU64,
}

impl PipelinePool {
    pub fn new(settings: TrackingSettings, sink: Arc<dyn MetricSink>, max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            all: Mutex::new(Vec::new()),
            retired: Mutex::new(CoordinatorStats::default()),
            settings: Arc::new(settings),
            sink,
            max_idle,
            created: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &TrackingSettings {
        &self.settings
    }

    /// Take an idle coordinator, or build a new one.
    pub fn checkout(&self) -> PooledCoordinator<'_> {
        let reused = self.idle.lock().pop();
        let coordinator = reused.unwrap_or_else(|| {
            self.created.fetch_add(1, Ordering::Relaxed);
            let coordinator = Arc::new(RequestTrackingCoordinator::new(
                self.settings.clone(),
                self.sink.clone(),
            ));
            self.all.lock().push(coordinator.clone());
            coordinator
        });

        PooledCoordinator {
            pool: self,
            coordinator,
        }
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    pub fn created_count(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    /// Totals across every coordinator this pool has created.
    pub fn stats(&self) -> CoordinatorStats {
        let mut total = *self.retired.lock();
        for coordinator in self.all.lock().iter() {
            total += coordinator.stats();
        }
        total
    }

    fn give_back(&self, coordinator: Arc<RequestTrackingCoordinator>) {
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(coordinator);
            return;
        }
        drop(idle);

        // over capacity: retire it, discarding whatever it still holds
        coordinator.shutdown();
        self.all.lock().retain(|c| !Arc::ptr_eq(c, &coordinator));
        *self.retired.lock() += coordinator.stats();
    }
}

/// A coordinator checked out of a [`PipelinePool`]; returned on drop.
pub struct PooledCoordinator<'a> {
    pool: &'a PipelinePool,
    coordinator: Arc<RequestTrackingCoordinator>,
}

impl PooledCoordinator<'_> {
    /// Shared handle to the underlying coordinator, for code that must
    /// outlive this borrow (e.g. request extensions).
    pub fn shared(&self) -> Arc<RequestTrackingCoordinator> {
        self.coordinator.clone()
    }
}

impl Deref for PooledCoordinator<'_> {
    type Target = RequestTrackingCoordinator;

    fn deref(&self) -> &Self::Target {
        &self.coordinator
    }
}

impl Drop for PooledCoordinator<'_> {
    fn drop(&mut self) {
        self.pool.give_back(self.coordinator.clone());
    }
}
