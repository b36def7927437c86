//! Shared accumulation of request outcomes and check results.
//!
//! [`MetricsAggregator`] is the only shared mutable state of a run. Virtual
//! users push events through [`MetricsAggregator::ingest`]; everything else
//! reads point-in-time copies through [`MetricsAggregator::snapshot`].

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use tokio::time::{Duration, Instant};
use tracing::error;

use crate::assertions::CheckResult;
use crate::errors::ErrorCategory;
use crate::metrics::{
    CHECKS_TOTAL, ITERATIONS_TOTAL, REQUEST_DURATION_SECONDS, REQUEST_ERRORS_BY_CATEGORY,
    REQUEST_STATUS_CODES,
};
use crate::percentiles::{LatencyHistogram, PercentileStats};

/// Series holding every request.
pub const HTTP_REQS: &str = "http_reqs";
/// Series holding every check evaluation.
pub const CHECKS: &str = "checks";
/// Series holding completed iterations.
pub const ITERATIONS: &str = "iterations";

/// Name of a series restricted to one tag value, e.g. `http_reqs{step:place_buy_order}`.
pub fn tagged_series(base: &str, tag: &str, value: &str) -> String {
    format!("{}{{{}:{}}}", base, tag, value)
}

/// The result of one executed request.
#[derive(Debug, Clone)]
pub struct RequestOutcome {
    pub step: String,
    pub step_index: usize,
    pub issued_at: Instant,
    /// HTTP status, absent when the request never got a response
    pub status: Option<u16>,
    pub error: Option<ErrorCategory>,
    pub latency: Duration,
    pub success: bool,
}

impl RequestOutcome {
    /// A request that got a response. Success means a 2xx status.
    pub fn response(
        step: &str,
        step_index: usize,
        issued_at: Instant,
        status: u16,
        latency: Duration,
    ) -> Self {
        Self {
            step: step.to_string(),
            step_index,
            issued_at,
            status: Some(status),
            error: ErrorCategory::from_status_code(status),
            latency,
            success: (200..300).contains(&status),
        }
    }

    /// A request that failed before a response arrived.
    pub fn transport_failure(
        step: &str,
        step_index: usize,
        issued_at: Instant,
        category: ErrorCategory,
        latency: Duration,
    ) -> Self {
        Self {
            step: step.to_string(),
            step_index,
            issued_at,
            status: None,
            error: Some(category),
            latency,
            success: false,
        }
    }
}

/// Running totals for one series.
#[derive(Debug, Clone, Default)]
struct MetricSeries {
    total: u64,
    failures: u64,
    latency: Option<LatencyHistogram>,
}

impl MetricSeries {
    fn record(&mut self, failed: bool, latency: Option<Duration>) {
        self.total += 1;
        if failed {
            self.failures += 1;
        }
        if let Some(latency) = latency {
            self.latency
                .get_or_insert_with(LatencyHistogram::new)
                .record(latency);
        }
    }
}

#[derive(Debug, Default)]
struct AggregatorState {
    series: BTreeMap<String, MetricSeries>,
    errors: BTreeMap<ErrorCategory, u64>,
}

impl AggregatorState {
    fn series_mut(&mut self, name: String) -> &mut MetricSeries {
        self.series.entry(name).or_default()
    }
}

/// Thread-safe accumulator for a run's outcomes.
///
/// The critical section of both [`ingest`](Self::ingest) and
/// [`snapshot`](Self::snapshot) is a bounded amount of in-memory work, so
/// readers never stall virtual users for long.
#[derive(Debug, Default)]
pub struct MetricsAggregator {
    state: Mutex<AggregatorState>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, AggregatorState> {
        // A panic while holding the lock cannot leave the counters half
        // written, so a poisoned lock is still usable.
        self.state.lock().unwrap_or_else(|poisoned| {
            error!("Metrics aggregator lock was poisoned");
            poisoned.into_inner()
        })
    }

    /// Record one request outcome together with its check results.
    pub fn ingest(&self, outcome: &RequestOutcome, checks: &[CheckResult]) {
        {
            let mut state = self.lock();

            let failed = !outcome.success;
            state
                .series_mut(HTTP_REQS.to_string())
                .record(failed, Some(outcome.latency));
            state
                .series_mut(tagged_series(HTTP_REQS, "step", &outcome.step))
                .record(failed, Some(outcome.latency));

            if let Some(category) = outcome.error {
                *state.errors.entry(category).or_insert(0) += 1;
            }

            for check in checks {
                let failed = !check.passed;
                state.series_mut(CHECKS.to_string()).record(failed, None);
                state
                    .series_mut(tagged_series(CHECKS, "check", &check.name))
                    .record(failed, None);
            }
        }

        self.export(outcome, checks);
    }

    fn export(&self, outcome: &RequestOutcome, checks: &[CheckResult]) {
        let status_label = match outcome.status {
            Some(code) => crate::metrics::status_code_label(code),
            None => "error",
        };
        REQUEST_STATUS_CODES
            .with_label_values(&[outcome.step.as_str(), status_label])
            .inc();
        REQUEST_DURATION_SECONDS
            .with_label_values(&[outcome.step.as_str()])
            .observe(outcome.latency.as_secs_f64());

        if let Some(category) = outcome.error {
            REQUEST_ERRORS_BY_CATEGORY
                .with_label_values(&[category.label()])
                .inc();
        }

        for check in checks {
            let result = if check.passed { "passed" } else { "failed" };
            CHECKS_TOTAL
                .with_label_values(&[check.name.as_str(), result])
                .inc();
        }
    }

    /// Record one completed iteration of a virtual user.
    pub fn record_iteration(&self, duration: Duration) {
        self.lock()
            .series_mut(ITERATIONS.to_string())
            .record(false, Some(duration));
        ITERATIONS_TOTAL.inc();
    }

    /// Point-in-time copy of every series.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.lock();

        let series = state
            .series
            .iter()
            .map(|(name, s)| {
                (
                    name.clone(),
                    SeriesSnapshot {
                        total: s.total,
                        failures: s.failures,
                        latency: s.latency.clone(),
                    },
                )
            })
            .collect();

        MetricsSnapshot {
            series,
            errors: state.errors.clone(),
        }
    }
}

/// Immutable view of one series.
#[derive(Debug, Clone, Default)]
pub struct SeriesSnapshot {
    pub total: u64,
    pub failures: u64,
    latency: Option<LatencyHistogram>,
}

impl SeriesSnapshot {
    pub fn passes(&self) -> u64 {
        self.total - self.failures
    }

    /// failures / total, None without samples.
    pub fn failure_rate(&self) -> Option<f64> {
        (self.total > 0).then(|| self.failures as f64 / self.total as f64)
    }

    /// passes / total, None without samples.
    pub fn pass_rate(&self) -> Option<f64> {
        (self.total > 0).then(|| self.passes() as f64 / self.total as f64)
    }

    pub fn latency(&self) -> Option<&LatencyHistogram> {
        self.latency.as_ref().filter(|h| !h.is_empty())
    }

    /// Latency at `percentile` (0-100) in microseconds.
    pub fn percentile(&self, percentile: f64) -> Option<u64> {
        self.latency()?.value_at_percentile(percentile)
    }

    pub fn stats(&self) -> Option<PercentileStats> {
        self.latency()?.stats()
    }
}

/// Immutable copy of the aggregator state at one instant.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    series: BTreeMap<String, SeriesSnapshot>,
    errors: BTreeMap<ErrorCategory, u64>,
}

impl MetricsSnapshot {
    pub fn series(&self, name: &str) -> Option<&SeriesSnapshot> {
        self.series.get(name)
    }

    pub fn total_requests(&self) -> u64 {
        self.series(HTTP_REQS).map_or(0, |s| s.total)
    }

    pub fn failed_requests(&self) -> u64 {
        self.series(HTTP_REQS).map_or(0, |s| s.failures)
    }

    pub fn iterations(&self) -> u64 {
        self.series(ITERATIONS).map_or(0, |s| s.total)
    }

    pub fn errors(&self) -> &BTreeMap<ErrorCategory, u64> {
        &self.errors
    }

    /// Latency statistics of every series that has samples.
    pub fn latency_stats(&self) -> BTreeMap<String, PercentileStats> {
        self.series
            .iter()
            .filter_map(|(name, s)| s.stats().map(|stats| (name.clone(), stats)))
            .collect()
    }
}
