//! Percentile latency tracking using HDR Histogram.
//!
//! Latency samples are summarized in an HdrHistogram so memory stays bounded
//! no matter how many requests a run issues. All values are stored in
//! microseconds.
//!
//! # Features
//! - P50 (median), P90, P95, P99, P99.9 percentile tracking
//! - Arbitrary percentile queries for threshold evaluation
//! - Memory-efficient histogram storage

use hdrhistogram::Histogram;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

/// Highest trackable latency (60 seconds) in microseconds.
const MAX_LATENCY_US: u64 = 60_000_000;

/// Resolution is 16µs around 800ms and exact below ~32ms.
const SIGNIFICANT_DIGITS: u8 = 4;

/// Percentile statistics for a set of latency measurements.
#[derive(Debug, Clone, PartialEq)]
pub struct PercentileStats {
    /// Number of samples
    pub count: u64,

    /// Minimum value (microseconds)
    pub min: u64,

    /// Maximum value (microseconds)
    pub max: u64,

    /// Mean/average value (microseconds)
    pub mean: f64,

    /// 50th percentile - median (microseconds)
    pub p50: u64,

    /// 90th percentile (microseconds)
    pub p90: u64,

    /// 95th percentile (microseconds)
    pub p95: u64,

    /// 99th percentile (microseconds)
    pub p99: u64,

    /// 99.9th percentile (microseconds)
    pub p99_9: u64,
}

impl PercentileStats {
    /// Format statistics as a human-readable string.
    pub fn format(&self) -> String {
        format!(
            "count={}, min={:.2}ms, max={:.2}ms, mean={:.2}ms, p50={:.2}ms, p90={:.2}ms, p95={:.2}ms, p99={:.2}ms, p99.9={:.2}ms",
            self.count,
            self.min as f64 / 1000.0,
            self.max as f64 / 1000.0,
            self.mean / 1000.0,
            self.p50 as f64 / 1000.0,
            self.p90 as f64 / 1000.0,
            self.p95 as f64 / 1000.0,
            self.p99 as f64 / 1000.0,
            self.p99_9 as f64 / 1000.0,
        )
    }

    /// Format statistics as a compact table row.
    pub fn format_table_row(&self, label: &str) -> String {
        format!(
            "{:<40} {:>8} {:>8.2} {:>8.2} {:>8.2} {:>8.2} {:>8.2} {:>8.2} {:>8.2}",
            label,
            self.count,
            self.p50 as f64 / 1000.0,
            self.p90 as f64 / 1000.0,
            self.p95 as f64 / 1000.0,
            self.p99 as f64 / 1000.0,
            self.p99_9 as f64 / 1000.0,
            self.mean / 1000.0,
            self.max as f64 / 1000.0,
        )
    }
}

/// Latency summary backed by an HdrHistogram.
///
/// Tracks latencies from 1μs to 60 seconds with 3 significant digits. Not
/// synchronized; the owner provides locking.
#[derive(Debug, Clone)]
pub struct LatencyHistogram {
    histogram: Histogram<u64>,
}

impl LatencyHistogram {
    pub fn new() -> Self {
        let histogram = Histogram::new_with_bounds(1, MAX_LATENCY_US, SIGNIFICANT_DIGITS)
            .expect("Failed to create histogram");
        Self { histogram }
    }

    /// Record a latency measurement.
    pub fn record(&mut self, latency: Duration) {
        let latency_us = u64::try_from(latency.as_micros()).unwrap_or(MAX_LATENCY_US);
        self.record_us(latency_us);
    }

    /// Record a latency measurement in microseconds.
    pub fn record_us(&mut self, latency_us: u64) {
        let clamped = latency_us.clamp(1, MAX_LATENCY_US);

        if let Err(e) = self.histogram.record(clamped) {
            warn!(
                latency_us = latency_us,
                error = %e,
                "Failed to record latency in histogram"
            );
        }
    }

    pub fn len(&self) -> u64 {
        self.histogram.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histogram.is_empty()
    }

    /// Latency at `percentile` (0-100) in microseconds.
    ///
    /// Reports the floor of the histogram bucket holding the sample, so a
    /// value is never overstated and whole-millisecond samples come back
    /// exactly.
    pub fn value_at_percentile(&self, percentile: f64) -> Option<u64> {
        if self.histogram.is_empty() {
            return None;
        }
        Some(self.quantile_floor(percentile / 100.0))
    }

    fn quantile_floor(&self, quantile: f64) -> u64 {
        let raw = self.histogram.value_at_quantile(quantile.clamp(0.0, 1.0));
        self.histogram.lowest_equivalent(raw)
    }

    /// Mean latency in microseconds.
    pub fn mean(&self) -> Option<f64> {
        (!self.histogram.is_empty()).then(|| self.histogram.mean())
    }

    pub fn min(&self) -> Option<u64> {
        (!self.histogram.is_empty()).then(|| self.histogram.min())
    }

    pub fn max(&self) -> Option<u64> {
        (!self.histogram.is_empty())
            .then(|| self.histogram.lowest_equivalent(self.histogram.max()))
    }

    /// Get current percentile statistics.
    ///
    /// Returns None if no samples have been recorded.
    pub fn stats(&self) -> Option<PercentileStats> {
        if self.histogram.is_empty() {
            return None;
        }

        Some(PercentileStats {
            count: self.histogram.len(),
            min: self.histogram.min(),
            max: self.histogram.lowest_equivalent(self.histogram.max()),
            mean: self.histogram.mean(),
            p50: self.quantile_floor(0.50),
            p90: self.quantile_floor(0.90),
            p95: self.quantile_floor(0.95),
            p99: self.quantile_floor(0.99),
            p99_9: self.quantile_floor(0.999),
        })
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Format percentile statistics as a table.
pub fn format_percentile_table(
    title: &str,
    stats_map: &BTreeMap<String, PercentileStats>,
) -> String {
    if stats_map.is_empty() {
        return format!("## {}\n\nNo data available.\n", title);
    }

    let mut output = String::new();
    output.push_str(&format!("\n## {}\n\n", title));
    output.push_str(&format!(
        "{:<40} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}\n",
        "Label", "Count", "P50", "P90", "P95", "P99", "P99.9", "Mean", "Max"
    ));
    output.push_str(&format!(
        "{:<40} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}\n",
        "", "", "(ms)", "(ms)", "(ms)", "(ms)", "(ms)", "(ms)", "(ms)"
    ));
    output.push_str(&"-".repeat(130));
    output.push('\n');

    for (label, stats) in stats_map {
        output.push_str(&stats.format_table_row(label));
        output.push('\n');
    }

    output
}
