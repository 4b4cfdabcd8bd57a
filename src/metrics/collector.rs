use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::Serialize;

use super::percentiles::{latency_histogram, record_ms, PercentileSet, StageSummary};
use super::MetricSink;
use crate::error::Result;
use crate::tracking::{PageHit, StageName};

// ─── Configuration ───────────────────────────────────────────────

/// How many individual page hits we keep for the live feed
const MAX_RECENT_HITS: usize = 200;

/// Aggregate timeline resolution (one point per window)
const TIMELINE_WINDOW_MS: u64 = 1_000;

/// Timeline points kept (ten minutes at one point per second)
const MAX_TIMELINE_POINTS: usize = 600;

/// Pages listed in the snapshot's top-pages table
const TOP_PAGES: usize = 20;

/// Distinct paths counted at once; the least-hit path makes room for a new one
const MAX_TRACKED_PAGES: usize = 1_000;

// ─── Public types ────────────────────────────────────────────────

/// In-memory sink aggregating page hits for the dashboard.
/// The tracker calls `emit()`, the metrics endpoints call `snapshot()`.
pub struct MetricsCollector {
    inner: Mutex<Inner>,
}

/// One aggregated point on the timeline chart.
#[derive(Debug, Clone, Serialize)]
pub struct TimelinePoint {
    pub timestamp_ms: u64,
    pub avg_total_ms: f64,
    pub avg_handler_ms: f64,
    pub cached: u64,
    pub count: u64,
}

/// A bucket in the total-duration distribution.
#[derive(Debug, Clone, Serialize)]
pub struct DistBucket {
    pub range_start_ms: f64,
    pub range_end_ms: f64,
    pub count: u64,
}

/// Hit count for one path.
#[derive(Debug, Clone, Serialize)]
pub struct PageCount {
    pub absolute_path: String,
    pub page_name: String,
    pub hits: u64,
}

/// Complete snapshot served as JSON and over SSE.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total: PercentileSet,
    pub stages: Vec<StageSummary>,

    pub total_hits: u64,
    pub cached_hits: u64,
    pub identified_hits: u64,
    pub hits_per_sec: f64,
    pub elapsed_secs: f64,

    pub top_pages: Vec<PageCount>,
    pub recent_hits: Vec<PageHit>,
    pub timeline: Vec<TimelinePoint>,
    pub distribution: Vec<DistBucket>,
}

// ─── Internal state ──────────────────────────────────────────────

struct Inner {
    total_hist: Histogram<u64>,
    stage_hists: Vec<Histogram<u64>>,

    total_hits: u64,
    cached_hits: u64,
    identified_hits: u64,

    pages: HashMap<String, PageCount>,
    recent_hits: VecDeque<PageHit>,

    timeline: VecDeque<TimelinePoint>,
    current_window: Option<WindowAccumulator>,

    // Wall-clock anchor for elapsed time
    start_time: Option<Instant>,
}

/// Running totals for the current timeline window.
struct WindowAccumulator {
    window_start_ms: u64,
    total_sum: f64,
    handler_sum: f64,
    cached: u64,
    count: u64,
}

impl WindowAccumulator {
    fn new(window_start_ms: u64) -> Self {
        Self {
            window_start_ms,
            total_sum: 0.0,
            handler_sum: 0.0,
            cached: 0,
            count: 0,
        }
    }

    fn add(&mut self, hit: &PageHit) {
        self.total_sum += hit.total_duration_ms;
        self.handler_sum += hit.execute_handler_duration_ms.unwrap_or(0.0);
        if hit.served_from_cache {
            self.cached += 1;
        }
        self.count += 1;
    }

    fn point(&self) -> TimelinePoint {
        let n = self.count.max(1) as f64;
        TimelinePoint {
            timestamp_ms: self.window_start_ms,
            avg_total_ms: self.total_sum / n,
            avg_handler_ms: self.handler_sum / n,
            cached: self.cached,
            count: self.count,
        }
    }
}

// ─── MetricsCollector impl ───────────────────────────────────────

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
        }
    }

    /// Fold one finished page hit into the aggregates.
    pub fn record(&self, hit: &PageHit) {
        self.inner.lock().record(hit);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().snapshot()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricSink for MetricsCollector {
    fn emit(&self, hit: &PageHit) -> Result<()> {
        self.record(hit);
        Ok(())
    }
}

// ─── Inner impl ──────────────────────────────────────────────────

impl Inner {
    fn new() -> Self {
        Self {
            total_hist: latency_histogram(),
            stage_hists: StageName::ALL.iter().map(|_| latency_histogram()).collect(),
            total_hits: 0,
            cached_hits: 0,
            identified_hits: 0,
            pages: HashMap::new(),
            recent_hits: VecDeque::with_capacity(MAX_RECENT_HITS + 1),
            timeline: VecDeque::with_capacity(MAX_TIMELINE_POINTS + 1),
            current_window: None,
            start_time: None,
        }
    }

    fn record(&mut self, hit: &PageHit) {
        // Lazily set the anchor on the very first hit
        let start = *self.start_time.get_or_insert_with(Instant::now);
        let elapsed_ms = start.elapsed().as_millis() as u64;

        // ── Counters ────────────────────────────────────────────
        self.total_hits += 1;
        if hit.served_from_cache {
            self.cached_hits += 1;
        }
        if hit.user_name.is_some() {
            self.identified_hits += 1;
        }

        // ── Histograms ──────────────────────────────────────────
        record_ms(&mut self.total_hist, hit.total_duration_ms);
        for stage in StageName::ALL {
            if let Some(ms) = hit.stage_duration_ms(stage) {
                record_ms(&mut self.stage_hists[stage.index()], ms);
            }
        }

        // ── Per-page counts ─────────────────────────────────────
        if !self.pages.contains_key(&hit.absolute_path) && self.pages.len() >= MAX_TRACKED_PAGES {
            self.evict_least_hit_page();
        }
        self.pages
            .entry(hit.absolute_path.clone())
            .or_insert_with(|| PageCount {
                absolute_path: hit.absolute_path.clone(),
                page_name: hit.page_name.clone(),
                hits: 0,
            })
            .hits += 1;

        self.push_to_timeline(elapsed_ms, hit);

        // ── Live feed ───────────────────────────────────────────
        self.recent_hits.push_back(hit.clone());
        if self.recent_hits.len() > MAX_RECENT_HITS {
            self.recent_hits.pop_front();
        }
    }

    fn evict_least_hit_page(&mut self) {
        let coldest = self
            .pages
            .values()
            .min_by_key(|p| p.hits)
            .map(|p| p.absolute_path.clone());
        if let Some(path) = coldest {
            self.pages.remove(&path);
        }
    }

    /// Bucket the hit into the current window, or roll over.
    fn push_to_timeline(&mut self, elapsed_ms: u64, hit: &PageHit) {
        let window_start = (elapsed_ms / TIMELINE_WINDOW_MS) * TIMELINE_WINDOW_MS;

        match &mut self.current_window {
            // Same window: accumulate
            Some(w) if w.window_start_ms == window_start => w.add(hit),
            // New window (or very first hit): close the old one, start fresh
            _ => {
                if let Some(old) = self.current_window.take() {
                    self.finalize_window(old);
                }
                let mut w = WindowAccumulator::new(window_start);
                w.add(hit);
                self.current_window = Some(w);
            }
        }
    }

    fn finalize_window(&mut self, w: WindowAccumulator) {
        if w.count == 0 {
            return;
        }
        self.timeline.push_back(w.point());
        if self.timeline.len() > MAX_TIMELINE_POINTS {
            self.timeline.pop_front();
        }
    }

    fn snapshot(&self) -> MetricsSnapshot {
        let elapsed_secs = self
            .start_time
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);

        let hits_per_sec = if elapsed_secs > 0.0 {
            self.total_hits as f64 / elapsed_secs
        } else {
            0.0
        };

        // Include the current (partial) window in the timeline
        let mut timeline: Vec<_> = self.timeline.iter().cloned().collect();
        if let Some(w) = &self.current_window {
            if w.count > 0 {
                timeline.push(w.point());
            }
        }

        let stages = StageName::ALL
            .iter()
            .map(|&stage| StageSummary {
                stage,
                percentiles: PercentileSet::from_histogram(&self.stage_hists[stage.index()]),
            })
            .filter(|s| s.percentiles.has_data())
            .collect();

        let mut top_pages: Vec<_> = self.pages.values().cloned().collect();
        top_pages.sort_by(|a, b| {
            b.hits
                .cmp(&a.hits)
                .then_with(|| a.absolute_path.cmp(&b.absolute_path))
        });
        top_pages.truncate(TOP_PAGES);

        MetricsSnapshot {
            total: PercentileSet::from_histogram(&self.total_hist),
            stages,
            total_hits: self.total_hits,
            cached_hits: self.cached_hits,
            identified_hits: self.identified_hits,
            hits_per_sec,
            elapsed_secs,
            top_pages,
            recent_hits: self.recent_hits.iter().cloned().collect(),
            timeline,
            distribution: Self::compute_distribution(&self.total_hist),
        }
    }

    // ── Distribution histogram for the bar chart ────────────────

    /// Bucket boundaries (μs), from sub-millisecond cached hits up to
    /// multi-second page builds.
    const DIST_BOUNDARIES: &'static [u64] = &[
        250, 500, 1_000, 2_000, 5_000, 10_000, 25_000, 50_000, 100_000, 250_000,
        500_000, 1_000_000, 2_500_000, 5_000_000,
    ];

    fn compute_distribution(hist: &Histogram<u64>) -> Vec<DistBucket> {
        if hist.is_empty() {
            return Vec::new();
        }

        let bounds = Self::DIST_BOUNDARIES;
        let mut counts = vec![0u64; bounds.len() + 1]; // +1 for overflow

        for iv in hist.iter_recorded() {
            let val = iv.value_iterated_to();
            // first boundary >= val; past the end means overflow
            let idx = match bounds.binary_search(&val) {
                Ok(i) | Err(i) => i,
            };
            counts[idx] += iv.count_at_value();
        }

        let mut result = Vec::with_capacity(counts.len());
        let mut prev = 0u64;
        for (&boundary, &count) in bounds.iter().zip(&counts) {
            if count > 0 {
                result.push(DistBucket {
                    range_start_ms: prev as f64 / 1000.0,
                    range_end_ms: boundary as f64 / 1000.0,
                    count,
                });
            }
            prev = boundary;
        }
        let overflow = counts[bounds.len()];
        if overflow > 0 {
            result.push(DistBucket {
                range_start_ms: prev as f64 / 1000.0,
                range_end_ms: hist.max() as f64 / 1000.0,
                count: overflow,
            });
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::{Phase, RequestIdentity, RequestMetric};

    fn hit(path: &str, stages: &[StageName], identity: Option<&str>) -> PageHit {
        let mut m = RequestMetric::new(path.trim_start_matches('/').into(), path.into(), String::new());
        for &stage in stages {
            m.record(stage, Phase::Start);
            m.record(stage, Phase::End);
        }
        m.set_identity(RequestIdentity {
            user_name: identity.map(str::to_owned),
            ..Default::default()
        });
        m.to_page_hit()
    }

    #[test]
    fn empty_snapshot() {
        let snap = MetricsCollector::new().snapshot();
        assert_eq!(snap.total_hits, 0);
        assert!(snap.stages.is_empty());
        assert!(snap.distribution.is_empty());
        assert!(snap.timeline.is_empty());
        assert_eq!(snap.hits_per_sec, 0.0);
    }

    #[test]
    fn counts_cached_and_identified_hits() {
        let c = MetricsCollector::new();
        c.emit(&hit("/a", &[StageName::Authorize], Some("ada"))).unwrap();
        c.emit(&hit("/a", &[StageName::Authorize, StageName::ExecuteHandler], None)).unwrap();
        c.emit(&hit("/b", &[StageName::ExecuteHandler], None)).unwrap();

        let snap = c.snapshot();
        assert_eq!(snap.total_hits, 3);
        assert_eq!(snap.cached_hits, 1);
        assert_eq!(snap.identified_hits, 1);
        assert_eq!(snap.total.count, 3);
        assert_eq!(snap.recent_hits.len(), 3);
        assert_eq!(snap.top_pages[0].absolute_path, "/a");
        assert_eq!(snap.top_pages[0].hits, 2);
        assert_eq!(snap.timeline.iter().map(|p| p.count).sum::<u64>(), 3);
    }

    #[test]
    fn stage_summaries_only_cover_stages_that_ran() {
        let c = MetricsCollector::new();
        c.record(&hit("/a", &[StageName::Authenticate, StageName::ExecuteHandler], None));
        c.record(&hit("/b", &[StageName::ExecuteHandler], None));

        let snap = c.snapshot();
        let stages: Vec<_> = snap.stages.iter().map(|s| (s.stage, s.percentiles.count)).collect();
        assert_eq!(
            stages,
            vec![(StageName::Authenticate, 1), (StageName::ExecuteHandler, 2)]
        );
    }

    #[test]
    fn recent_feed_is_capped() {
        let c = MetricsCollector::new();
        for i in 0..(MAX_RECENT_HITS + 10) {
            c.record(&hit(&format!("/p{i}"), &[], None));
        }
        let snap = c.snapshot();
        assert_eq!(snap.recent_hits.len(), MAX_RECENT_HITS);
        assert_eq!(snap.top_pages.len(), TOP_PAGES);
    }

    #[test]
    fn distribution_accounts_for_every_hit() {
        let c = MetricsCollector::new();
        for _ in 0..5 {
            c.record(&hit("/fast", &[], None));
        }
        let snap = c.snapshot();
        assert_eq!(snap.distribution.iter().map(|b| b.count).sum::<u64>(), 5);
    }

    #[test]
    fn page_counts_stay_bounded_under_many_distinct_paths() {
        let c = MetricsCollector::new();
        for _ in 0..3 {
            c.record(&hit("/popular", &[], None));
        }
        for i in 0..(MAX_TRACKED_PAGES * 3) {
            c.record(&hit(&format!("/missing/{i}"), &[], None));
        }

        assert_eq!(c.inner.lock().pages.len(), MAX_TRACKED_PAGES);
        let snap = c.snapshot();
        assert_eq!(snap.top_pages[0].absolute_path, "/popular");
        assert_eq!(snap.top_pages[0].hits, 3);
        assert_eq!(snap.total_hits, 3 + (MAX_TRACKED_PAGES * 3) as u64);
    }
}
