//! Pass/fail thresholds over aggregated metrics.
//!
//! A threshold pairs a metric key such as `http_req_duration{step:get_order_book}`
//! with a comparison such as `p(95)<800`. Thresholds are parsed once before the
//! run starts; a malformed one is a configuration error.

use std::fmt;
use thiserror::Error;
use tokio::time::Duration;
use tracing::warn;

use crate::aggregator::{
    tagged_series, MetricsSnapshot, SeriesSnapshot, CHECKS, HTTP_REQS, ITERATIONS,
};
use crate::metrics::THRESHOLDS_FAILING;

/// Errors raised while parsing a threshold.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ThresholdParseError {
    #[error("Unknown metric '{0}'")]
    UnknownMetric(String),

    #[error("Invalid tag '{tag}' for metric '{metric}'")]
    InvalidTag { metric: String, tag: String },

    #[error("Missing comparison operator in '{0}'")]
    MissingOperator(String),

    #[error("Statistic '{statistic}' is not available for metric '{metric}'")]
    UnknownStatistic { metric: String, statistic: String },

    #[error("Invalid threshold value '{0}'")]
    InvalidValue(String),

    #[error("Unit '{unit}' is not valid for statistic '{statistic}'")]
    InvalidUnit { unit: String, statistic: String },
}

/// Which aggregated quantity a metric key refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetricKind {
    RequestFailed,
    RequestDuration,
    Requests,
    Checks,
    Iterations,
    IterationDuration,
}

impl MetricKind {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "http_req_failed" => Some(Self::RequestFailed),
            "http_req_duration" => Some(Self::RequestDuration),
            "http_reqs" => Some(Self::Requests),
            "checks" => Some(Self::Checks),
            "iterations" => Some(Self::Iterations),
            "iteration_duration" => Some(Self::IterationDuration),
            _ => None,
        }
    }

    fn series(&self) -> &'static str {
        match self {
            Self::RequestFailed | Self::RequestDuration | Self::Requests => HTTP_REQS,
            Self::Checks => CHECKS,
            Self::Iterations | Self::IterationDuration => ITERATIONS,
        }
    }

    fn tag_name(&self) -> Option<&'static str> {
        match self {
            Self::RequestFailed | Self::RequestDuration | Self::Requests => Some("step"),
            Self::Checks => Some("check"),
            Self::Iterations | Self::IterationDuration => None,
        }
    }

    fn allows(&self, statistic: &Statistic) -> bool {
        match self {
            Self::RequestFailed | Self::Checks => {
                matches!(statistic, Statistic::Rate | Statistic::Count)
            }
            Self::Requests | Self::Iterations => matches!(statistic, Statistic::Count),
            Self::RequestDuration | Self::IterationDuration => statistic.is_latency(),
        }
    }
}

/// Statistic extracted from a series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Statistic {
    Rate,
    Count,
    Avg,
    Min,
    Max,
    Med,
    Percentile(f64),
}

impl Statistic {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "rate" => Some(Self::Rate),
            "count" => Some(Self::Count),
            "avg" => Some(Self::Avg),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "med" => Some(Self::Med),
            _ => {
                let raw = s.strip_prefix('p')?;
                let raw = raw
                    .strip_prefix('(')
                    .and_then(|r| r.strip_suffix(')'))
                    .unwrap_or(raw);
                let p: f64 = raw.trim().parse().ok()?;
                (0.0..=100.0).contains(&p).then_some(Self::Percentile(p))
            }
        }
    }

    fn is_latency(&self) -> bool {
        !matches!(self, Self::Rate | Self::Count)
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rate => write!(f, "rate"),
            Self::Count => write!(f, "count"),
            Self::Avg => write!(f, "avg"),
            Self::Min => write!(f, "min"),
            Self::Max => write!(f, "max"),
            Self::Med => write!(f, "med"),
            Self::Percentile(p) => write!(f, "p({})", p),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparison {
    /// Longest match first so `<=` is not read as `<`.
    const TOKENS: [(&'static str, Comparison); 6] = [
        ("<=", Comparison::Le),
        (">=", Comparison::Ge),
        ("==", Comparison::Eq),
        ("!=", Comparison::Ne),
        ("<", Comparison::Lt),
        (">", Comparison::Gt),
    ];

    fn holds(&self, observed: f64, limit: f64) -> bool {
        match self {
            Self::Lt => observed < limit,
            Self::Le => observed <= limit,
            Self::Gt => observed > limit,
            Self::Ge => observed >= limit,
            Self::Eq => observed == limit,
            Self::Ne => observed != limit,
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "==",
            Self::Ne => "!=",
        }
    }
}

/// One parsed threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    metric: String,
    expression: String,
    kind: MetricKind,
    series: String,
    statistic: Statistic,
    comparison: Comparison,
    /// Latency limits are held in microseconds
    limit: f64,
    abort_on_fail: bool,
    delay_abort_eval: Duration,
}

impl Threshold {
    /// Parse a metric key and an expression such as `p(95) < 800ms`.
    pub fn parse(metric: &str, expression: &str) -> Result<Self, ThresholdParseError> {
        let metric = metric.trim();
        let (kind, series) = parse_metric_key(metric)?;

        let (op_index, op_token, comparison) = Comparison::TOKENS
            .iter()
            .filter_map(|(token, cmp)| expression.find(token).map(|i| (i, *token, *cmp)))
            .min_by_key(|(i, token, _)| (*i, std::cmp::Reverse(token.len())))
            .ok_or_else(|| ThresholdParseError::MissingOperator(expression.to_string()))?;

        let stat_str = expression[..op_index].trim();
        let value_str = expression[op_index + op_token.len()..].trim();

        let statistic =
            Statistic::parse(stat_str).ok_or_else(|| ThresholdParseError::UnknownStatistic {
                metric: metric.to_string(),
                statistic: stat_str.to_string(),
            })?;
        if !kind.allows(&statistic) {
            return Err(ThresholdParseError::UnknownStatistic {
                metric: metric.to_string(),
                statistic: stat_str.to_string(),
            });
        }

        let limit = parse_limit(value_str, &statistic)?;

        Ok(Self {
            metric: metric.to_string(),
            expression: expression.trim().to_string(),
            kind,
            series,
            statistic,
            comparison,
            limit,
            abort_on_fail: false,
            delay_abort_eval: Duration::ZERO,
        })
    }

    /// Stop the run early when this threshold fails, but not before `delay`
    /// of run time has elapsed.
    pub fn with_abort_on_fail(mut self, abort_on_fail: bool, delay: Duration) -> Self {
        self.abort_on_fail = abort_on_fail;
        self.delay_abort_eval = delay;
        self
    }

    pub fn metric(&self) -> &str {
        &self.metric
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn abort_on_fail(&self) -> bool {
        self.abort_on_fail
    }

    pub fn delay_abort_eval(&self) -> Duration {
        self.delay_abort_eval
    }

    /// Value of the statistic for this threshold, in display units
    /// (milliseconds for latency). None while the series has no samples.
    fn observe(&self, series: &SeriesSnapshot) -> Option<f64> {
        if series.total == 0 {
            return None;
        }
        let us_to_ms = |us: f64| us / 1000.0;

        match self.statistic {
            Statistic::Rate => match self.kind {
                MetricKind::RequestFailed => series.failure_rate(),
                _ => series.pass_rate(),
            },
            Statistic::Count => Some(series.total as f64),
            Statistic::Avg => series.latency()?.mean().map(us_to_ms),
            Statistic::Min => series.latency()?.min().map(|v| us_to_ms(v as f64)),
            Statistic::Max => series.latency()?.max().map(|v| us_to_ms(v as f64)),
            Statistic::Med => series.percentile(50.0).map(|v| us_to_ms(v as f64)),
            Statistic::Percentile(p) => series.percentile(p).map(|v| us_to_ms(v as f64)),
        }
    }

    /// Evaluate against a snapshot.
    pub fn evaluate(&self, snapshot: &MetricsSnapshot) -> ThresholdResult {
        let observed = snapshot.series(&self.series).and_then(|s| self.observe(s));

        let status = match observed {
            None => ThresholdStatus::Indeterminate,
            Some(value) => {
                let limit = if self.statistic.is_latency() {
                    self.limit / 1000.0
                } else {
                    self.limit
                };
                if self.comparison.holds(value, limit) {
                    ThresholdStatus::Passed
                } else {
                    ThresholdStatus::Failed
                }
            }
        };

        ThresholdResult {
            metric: self.metric.clone(),
            expression: self.expression.clone(),
            status,
            observed,
            abort_on_fail: self.abort_on_fail,
            delay_abort_eval: self.delay_abort_eval,
        }
    }
}

fn parse_metric_key(metric: &str) -> Result<(MetricKind, String), ThresholdParseError> {
    let (name, tag) = match metric.split_once('{') {
        Some((name, rest)) => (name.trim(), Some(rest)),
        None => (metric, None),
    };

    let kind = MetricKind::parse(name)
        .ok_or_else(|| ThresholdParseError::UnknownMetric(metric.to_string()))?;

    let Some(tag) = tag else {
        return Ok((kind, kind.series().to_string()));
    };

    let invalid = || ThresholdParseError::InvalidTag {
        metric: metric.to_string(),
        tag: tag.to_string(),
    };

    let (tag_name, tag_value) = tag
        .strip_suffix('}')
        .and_then(|t| t.split_once(':'))
        .map(|(n, v)| (n.trim(), v.trim()))
        .ok_or_else(invalid)?;

    if kind.tag_name() != Some(tag_name) || tag_value.is_empty() {
        return Err(invalid());
    }

    Ok((kind, tagged_series(kind.series(), tag_name, tag_value)))
}

/// Parses the right-hand side. Latency limits come back in microseconds.
fn parse_limit(value: &str, statistic: &Statistic) -> Result<f64, ThresholdParseError> {
    let split = value
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+'))
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);
    let unit = unit.trim();

    let number: f64 = number
        .parse()
        .map_err(|_| ThresholdParseError::InvalidValue(value.to_string()))?;
    if !number.is_finite() {
        return Err(ThresholdParseError::InvalidValue(value.to_string()));
    }

    if !statistic.is_latency() {
        if unit.is_empty() {
            return Ok(number);
        }
        return Err(ThresholdParseError::InvalidUnit {
            unit: unit.to_string(),
            statistic: statistic.to_string(),
        });
    }

    let factor = match unit {
        "us" => 1.0,
        "" | "ms" => 1_000.0,
        "s" => 1_000_000.0,
        _ => {
            return Err(ThresholdParseError::InvalidUnit {
                unit: unit.to_string(),
                statistic: statistic.to_string(),
            })
        }
    };
    Ok(number * factor)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdStatus {
    Passed,
    Failed,
    /// The metric has no samples yet
    Indeterminate,
}

impl fmt::Display for ThresholdStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Passed => "PASS",
            Self::Failed => "FAIL",
            Self::Indeterminate => "N/A",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdResult {
    pub metric: String,
    pub expression: String,
    pub status: ThresholdStatus,
    /// Observed value, milliseconds for latency statistics
    pub observed: Option<f64>,
    pub abort_on_fail: bool,
    pub delay_abort_eval: Duration,
}

/// Outcome of evaluating every threshold once.
#[derive(Debug, Clone, PartialEq)]
pub struct RunVerdict {
    pub results: Vec<ThresholdResult>,
    pub passed: bool,
}

impl RunVerdict {
    pub fn failed(&self) -> impl Iterator<Item = &ThresholdResult> {
        self.results
            .iter()
            .filter(|r| r.status == ThresholdStatus::Failed)
    }

    pub fn format_table(&self) -> String {
        if self.results.is_empty() {
            return "## Thresholds\n\nNo thresholds configured.\n".to_string();
        }

        let mut output = String::from("\n## Thresholds\n\n");
        output.push_str(&format!(
            "{:<6} {:<45} {:<20} {:>12}\n",
            "Status", "Metric", "Expression", "Observed"
        ));
        output.push_str(&"-".repeat(86));
        output.push('\n');

        for result in &self.results {
            let observed = result
                .observed
                .map(|v| format!("{:.4}", v))
                .unwrap_or_else(|| "-".to_string());
            output.push_str(&format!(
                "{:<6} {:<45} {:<20} {:>12}\n",
                result.status.to_string(),
                result.metric,
                result.expression,
                observed
            ));
        }

        output.push_str(&format!(
            "\nOverall: {}\n",
            if self.passed { "PASSED" } else { "FAILED" }
        ));
        output
    }
}

/// Evaluates a fixed set of thresholds against snapshots.
#[derive(Debug, Clone, Default)]
pub struct ThresholdEvaluator {
    thresholds: Vec<Threshold>,
}

impl ThresholdEvaluator {
    pub fn new(thresholds: Vec<Threshold>) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &[Threshold] {
        &self.thresholds
    }

    pub fn evaluate(&self, snapshot: &MetricsSnapshot) -> RunVerdict {
        let results: Vec<ThresholdResult> = self
            .thresholds
            .iter()
            .map(|t| t.evaluate(snapshot))
            .collect();

        let failing = results
            .iter()
            .filter(|r| r.status == ThresholdStatus::Failed)
            .count();
        THRESHOLDS_FAILING.set(failing as i64);

        RunVerdict {
            passed: failing == 0,
            results,
        }
    }

    /// Reason to stop the run, if a failing threshold asks for it and its
    /// abort delay has passed.
    pub fn abort_reason(&self, verdict: &RunVerdict, elapsed: Duration) -> Option<String> {
        let result = verdict
            .failed()
            .find(|r| r.abort_on_fail && elapsed >= r.delay_abort_eval)?;

        warn!(
            metric = %result.metric,
            expression = %result.expression,
            observed = ?result.observed,
            "Threshold failed with abortOnFail set"
        );
        Some(format!(
            "threshold {} '{}' failed",
            result.metric, result.expression
        ))
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} {} {}",
            self.metric,
            self.statistic,
            self.comparison.symbol(),
            self.limit
        )
    }
}
