//! Run statistics: per-outcome counters and latency percentiles.
//!
//! Latencies are tracked with HdrHistogram, recording 1μs to 60s with three
//! significant digits. Counters are plain atomics so workers never contend on
//! a lock to count an outcome.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use hdrhistogram::Histogram;
use tracing::warn;

use crate::events::RequestOutcome;

const MAX_TRACKED_LATENCY_US: u64 = 60_000_000;

/// Percentile statistics for a set of latency measurements (microseconds).
#[derive(Debug, Clone, PartialEq)]
pub struct PercentileStats {
    pub count: u64,
    pub min: u64,
    pub max: u64,
    pub mean: f64,
    pub p50: u64,
    pub p90: u64,
    pub p95: u64,
    pub p99: u64,
}

impl PercentileStats {
    /// Format statistics as a human-readable string.
    pub fn format(&self) -> String {
        format!(
            "count={}, min={:.2}ms, max={:.2}ms, mean={:.2}ms, p50={:.2}ms, p90={:.2}ms, p95={:.2}ms, p99={:.2}ms",
            self.count,
            self.min as f64 / 1000.0,
            self.max as f64 / 1000.0,
            self.mean / 1000.0,
            self.p50 as f64 / 1000.0,
            self.p90 as f64 / 1000.0,
            self.p95 as f64 / 1000.0,
            self.p99 as f64 / 1000.0,
        )
    }
}

/// Thread-safe latency histogram.
pub struct PercentileTracker {
    histogram: Mutex<Histogram<u64>>,
}

impl PercentileTracker {
    pub fn new() -> Self {
        let histogram = Histogram::new_with_bounds(1, MAX_TRACKED_LATENCY_US, 3)
            .expect("Failed to create histogram");
        Self {
            histogram: Mutex::new(histogram),
        }
    }

    pub fn record(&self, latency: Duration) {
        let latency_us = latency.as_micros().min(u128::from(u64::MAX)) as u64;
        let clamped = latency_us.clamp(1, MAX_TRACKED_LATENCY_US);

        let mut hist = self.histogram.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = hist.record(clamped) {
            warn!(
                latency_us = latency_us,
                error = %e,
                "Failed to record latency in histogram"
            );
        }
    }

    /// Returns None if no samples have been recorded.
    pub fn stats(&self) -> Option<PercentileStats> {
        let hist = self.histogram.lock().unwrap_or_else(PoisonError::into_inner);

        if hist.is_empty() {
            return None;
        }

        Some(PercentileStats {
            count: hist.len(),
            min: hist.min(),
            max: hist.max(),
            mean: hist.mean(),
            p50: hist.value_at_quantile(0.50),
            p90: hist.value_at_quantile(0.90),
            p95: hist.value_at_quantile(0.95),
            p99: hist.value_at_quantile(0.99),
        })
    }
}

impl Default for PercentileTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared counters for one load test run.
#[derive(Default)]
pub struct RunStats {
    outcomes: [AtomicU64; 6],
    generation_failures: AtomicU64,
    worker_panics: AtomicU64,
    latency: PercentileTracker,
}

fn outcome_index(outcome: RequestOutcome) -> usize {
    match outcome {
        RequestOutcome::Success => 0,
        RequestOutcome::SlowSuccess => 1,
        RequestOutcome::ClientError => 2,
        RequestOutcome::ServerError => 3,
        RequestOutcome::Failed => 4,
        RequestOutcome::Cancelled => 5,
    }
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one dispatched request. Latency is only recorded for requests
    /// that received a response.
    pub fn record_outcome(&self, outcome: RequestOutcome, latency: Option<Duration>) {
        self.outcomes[outcome_index(outcome)].fetch_add(1, Ordering::Relaxed);
        if let Some(latency) = latency {
            self.latency.record(latency);
        }
    }

    pub fn record_generation_failure(&self) {
        self.generation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_worker_panic(&self) {
        self.worker_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self, outcome: RequestOutcome) -> u64 {
        self.outcomes[outcome_index(outcome)].load(Ordering::Relaxed)
    }

    /// Requests that were handed to the dispatcher, whatever their outcome.
    pub fn dispatched(&self) -> u64 {
        self.outcomes
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .sum()
    }

    pub fn report(&self) -> RunReport {
        RunReport {
            dispatched: self.dispatched(),
            succeeded: self.count(RequestOutcome::Success),
            slow: self.count(RequestOutcome::SlowSuccess),
            client_errors: self.count(RequestOutcome::ClientError),
            server_errors: self.count(RequestOutcome::ServerError),
            failed: self.count(RequestOutcome::Failed),
            cancelled: self.count(RequestOutcome::Cancelled),
            generation_failures: self.generation_failures.load(Ordering::Relaxed),
            worker_panics: self.worker_panics.load(Ordering::Relaxed),
            latency: self.latency.stats(),
        }
    }
}

/// Snapshot of [`RunStats`] attached to the run outcome.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub dispatched: u64,
    pub succeeded: u64,
    pub slow: u64,
    pub client_errors: u64,
    pub server_errors: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub generation_failures: u64,
    pub worker_panics: u64,
    pub latency: Option<PercentileStats>,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  Dispatched requests:  {}", self.dispatched)?;
        writeln!(f, "    Succeeded:          {}", self.succeeded)?;
        writeln!(f, "    Slow:               {}", self.slow)?;
        writeln!(f, "    Client errors:      {}", self.client_errors)?;
        writeln!(f, "    Server errors:      {}", self.server_errors)?;
        writeln!(f, "    Failed:             {}", self.failed)?;
        writeln!(f, "    Cancelled:          {}", self.cancelled)?;
        writeln!(f, "  Generation failures:  {}", self.generation_failures)?;
        if self.worker_panics > 0 {
            writeln!(f, "  Worker panics:        {}", self.worker_panics)?;
        }
        match &self.latency {
            Some(stats) => write!(f, "  Latency: {}", stats.format()),
            None => write!(f, "  Latency: no responses recorded"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tracker_has_no_stats() {
        assert!(PercentileTracker::new().stats().is_none());
    }

    #[test]
    fn tracker_reports_percentiles() {
        let tracker = PercentileTracker::new();
        for ms in 1..=100 {
            tracker.record(Duration::from_millis(ms));
        }

        let stats = tracker.stats().unwrap();
        assert_eq!(stats.count, 100);
        // 3 significant digits: allow 0.1% error
        assert!((49_900..=50_100).contains(&stats.p50), "p50 was {}", stats.p50);
        assert!((98_900..=99_100).contains(&stats.p99), "p99 was {}", stats.p99);
        assert!(stats.max >= 99_900);
    }

    #[test]
    fn oversized_latency_is_clamped() {
        let tracker = PercentileTracker::new();
        tracker.record(Duration::from_secs(3600));
        let stats = tracker.stats().unwrap();
        assert_eq!(stats.count, 1);
        assert!(stats.max <= MAX_TRACKED_LATENCY_US + MAX_TRACKED_LATENCY_US / 1000);
    }

    #[test]
    fn run_stats_counts_outcomes() {
        let stats = RunStats::new();
        stats.record_outcome(RequestOutcome::Success, Some(Duration::from_millis(5)));
        stats.record_outcome(RequestOutcome::ServerError, Some(Duration::from_millis(7)));
        stats.record_outcome(RequestOutcome::Failed, None);
        stats.record_outcome(RequestOutcome::Cancelled, None);
        stats.record_generation_failure();

        let report = stats.report();
        assert_eq!(report.dispatched, 4);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.server_errors, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.cancelled, 1);
        assert_eq!(report.generation_failures, 1);
        assert_eq!(report.latency.unwrap().count, 2);
    }

    #[test]
    fn report_display_mentions_counts() {
        let stats = RunStats::new();
        stats.record_outcome(RequestOutcome::ClientError, Some(Duration::from_millis(1)));
        let text = stats.report().to_string();
        assert!(text.contains("Client errors:      1"), "{}", text);
        assert!(text.contains("p99="), "{}", text);
    }
}
