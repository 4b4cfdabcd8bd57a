use hdrhistogram::Histogram;
use serde::Serialize;

use crate::tracking::StageName;

/// HdrHistogram range: 1 μs → 10 min, 3 significant figures
const HIST_LOW: u64 = 1;
const HIST_HIGH: u64 = 600_000_000;
const HIST_SIGFIG: u8 = 3;

/// Microsecond histogram with the tracker's fixed bounds.
pub fn latency_histogram() -> Histogram<u64> {
    // bounds are constants well inside what HdrHistogram accepts
    Histogram::<u64>::new_with_bounds(HIST_LOW, HIST_HIGH, HIST_SIGFIG)
        .expect("histogram creation")
}

/// Record a millisecond duration, clamped to the histogram range.
pub fn record_ms(hist: &mut Histogram<u64>, ms: f64) {
    let us = (ms * 1000.0).round().clamp(HIST_LOW as f64, HIST_HIGH as f64) as u64;
    let _ = hist.record(us);
}

/// Percentile breakdown of one timing, in milliseconds.
#[derive(Debug, Clone, Serialize)]
pub struct PercentileSet {
    pub min_ms: f64,
    pub max_ms: f64,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub count: u64,
}

impl PercentileSet {
    /// Returns zeroed values if the histogram is empty.
    pub fn from_histogram(hist: &Histogram<u64>) -> Self {
        if hist.is_empty() {
            return Self::empty();
        }

        Self {
            min_ms: us_to_ms(hist.min()),
            max_ms: us_to_ms(hist.max()),
            mean_ms: hist.mean() / 1000.0,
            p50_ms: us_to_ms(hist.value_at_quantile(0.50)),
            p95_ms: us_to_ms(hist.value_at_quantile(0.95)),
            p99_ms: us_to_ms(hist.value_at_quantile(0.99)),
            count: hist.len(),
        }
    }

    pub fn empty() -> Self {
        Self {
            min_ms: 0.0,
            max_ms: 0.0,
            mean_ms: 0.0,
            p50_ms: 0.0,
            p95_ms: 0.0,
            p99_ms: 0.0,
            count: 0,
        }
    }

    pub fn has_data(&self) -> bool {
        self.count > 0
    }
}

/// Percentiles of one pipeline stage, over the hits where it ran.
#[derive(Debug, Clone, Serialize)]
pub struct StageSummary {
    pub stage: StageName,
    #[serde(flatten)]
    pub percentiles: PercentileSet,
}

fn us_to_ms(us: u64) -> f64 {
    us as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_histogram_gives_zeroes() {
        let set = PercentileSet::from_histogram(&latency_histogram());
        assert!(!set.has_data());
        assert_eq!(set.max_ms, 0.0);
    }

    #[test]
    fn values_come_back_in_milliseconds() {
        let mut hist = latency_histogram();
        for ms in [1.0, 2.0, 3.0, 4.0, 100.0] {
            record_ms(&mut hist, ms);
        }
        let set = PercentileSet::from_histogram(&hist);
        assert_eq!(set.count, 5);
        assert!((set.min_ms - 1.0).abs() < 0.01);
        assert!((set.max_ms - 100.0).abs() < 0.1);
        assert!((set.p50_ms - 3.0).abs() < 0.01);
    }

    #[test]
    fn sub_microsecond_durations_are_clamped() {
        let mut hist = latency_histogram();
        record_ms(&mut hist, 0.0);
        assert_eq!(hist.len(), 1);
        assert_eq!(hist.min(), 1);
    }
}
