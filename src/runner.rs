//! Ties the pieces of a run together.
//!
//! A [`LoadTest`] owns the validated [`Config`] and the request client. Its
//! `run` wires executor, scheduler and live threshold evaluation around one
//! shared [`MetricsAggregator`], then produces a [`RunReport`].

use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::aggregator::{MetricsAggregator, MetricsSnapshot};
use crate::client::RequestClient;
use crate::config::Config;
use crate::executor::ScenarioExecutor;
use crate::percentiles::format_percentile_table;
use crate::scheduler::{ScheduleSummary, StageScheduler};
use crate::thresholds::{RunVerdict, ThresholdEvaluator};
use crate::worker::{run_virtual_user, VirtualUserConfig};

/// Stops a run from outside, e.g. on Ctrl+C.
///
/// Only the first reason is kept; later calls are ignored.
#[derive(Debug, Clone)]
pub struct AbortHandle(Arc<watch::Sender<Option<String>>>);

impl AbortHandle {
    pub fn abort(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let accepted = self.0.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason.clone());
            true
        });
        if accepted {
            warn!(reason = %reason, "Abort requested");
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.0.borrow().is_some()
    }
}

/// Outcome of a finished run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub verdict: RunVerdict,
    pub snapshot: MetricsSnapshot,
    pub schedule: ScheduleSummary,
    /// Why the run stopped before the plan ended, if it did
    pub aborted: Option<String>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.verdict.passed
    }

    /// Process exit status: 0 when every threshold held, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.passed() {
            0
        } else {
            1
        }
    }

    /// Human readable end-of-run summary.
    pub fn summary(&self) -> String {
        let mut out = String::new();

        out.push_str(&format!(
            "\nRun finished in {:.1}s: {} iterations, {} requests ({} failed), {} virtual users spawned, peak {}\n",
            self.elapsed.as_secs_f64(),
            self.snapshot.iterations(),
            self.snapshot.total_requests(),
            self.snapshot.failed_requests(),
            self.schedule.spawned,
            self.schedule.peak_active,
        ));
        if let Some(reason) = &self.aborted {
            out.push_str(&format!("Aborted early: {}\n", reason));
        }

        if !self.snapshot.errors().is_empty() {
            out.push_str("\nErrors by category:\n");
            for (category, count) in self.snapshot.errors() {
                out.push_str(&format!("  {:<16} {}\n", category.label(), count));
            }
        }

        let latency = self.snapshot.latency_stats();
        if !latency.is_empty() {
            out.push_str(&format_percentile_table("Latency", &latency));
        }

        out.push_str(&self.verdict.format_table());
        out
    }
}

/// One configured load test.
pub struct LoadTest {
    config: Config,
    client: Arc<dyn RequestClient>,
    abort_tx: Arc<watch::Sender<Option<String>>>,
}

impl LoadTest {
    pub fn new(config: Config, client: Arc<dyn RequestClient>) -> Self {
        let (abort_tx, _) = watch::channel(None);
        Self {
            config,
            client,
            abort_tx: Arc::new(abort_tx),
        }
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle(self.abort_tx.clone())
    }

    /// Run the stage plan to completion (or abort) and evaluate thresholds
    /// one last time on the final metrics.
    pub async fn run(&self) -> RunReport {
        let aggregator = Arc::new(MetricsAggregator::new());
        let evaluator = Arc::new(ThresholdEvaluator::new(self.config.thresholds.clone()));
        let executor = ScenarioExecutor::new(
            self.config.base_url.clone(),
            self.client.clone(),
            aggregator.clone(),
            self.config.request_timeout,
        );
        let scenario = Arc::new(self.config.scenario.clone());

        info!(
            base_url = %self.config.base_url,
            scenario = %scenario.name,
            steps = scenario.steps.len(),
            thresholds = evaluator.thresholds().len(),
            "Starting load test"
        );

        let start = Instant::now();
        let live_evaluation = tokio::spawn(evaluate_periodically(
            evaluator.clone(),
            aggregator.clone(),
            self.abort_handle(),
            self.config.evaluation_interval,
            start,
        ));

        let scheduler = StageScheduler::new(self.config.plan.clone(), self.config.tick);
        let schedule = scheduler
            .run(
                |vu_id, stop| {
                    let config = VirtualUserConfig {
                        vu_id,
                        scenario: scenario.clone(),
                        executor: executor.clone(),
                    };
                    tokio::spawn(async move {
                        run_virtual_user(config, stop).await;
                    })
                },
                self.abort_tx.subscribe(),
            )
            .await;

        live_evaluation.abort();

        let snapshot = aggregator.snapshot();
        let verdict = evaluator.evaluate(&snapshot);
        let elapsed = start.elapsed();

        info!(
            passed = verdict.passed,
            requests = snapshot.total_requests(),
            failed = snapshot.failed_requests(),
            elapsed_secs = elapsed.as_secs_f64(),
            "Load test finished"
        );

        RunReport {
            verdict,
            aborted: schedule.aborted.clone(),
            elapsed,
            schedule,
            snapshot,
        }
    }
}

/// Evaluate thresholds every `interval` and abort on the first failing
/// threshold that asks for it.
async fn evaluate_periodically(
    evaluator: Arc<ThresholdEvaluator>,
    aggregator: Arc<MetricsAggregator>,
    abort: AbortHandle,
    interval: Duration,
    start: Instant,
) {
    if !evaluator.thresholds().iter().any(|t| t.abort_on_fail()) {
        debug!("No abortOnFail thresholds, live evaluation disabled");
        return;
    }

    let mut ticker = time::interval_at(start + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let verdict = evaluator.evaluate(&aggregator.snapshot());
        if let Some(reason) = evaluator.abort_reason(&verdict, start.elapsed()) {
            abort.abort(reason);
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_handle_keeps_first_reason() {
        let (tx, rx) = watch::channel(None);
        let handle = AbortHandle(Arc::new(tx));
        assert!(!handle.is_aborted());

        handle.abort("interrupted");
        handle.abort("threshold failed");

        assert!(handle.is_aborted());
        assert_eq!(rx.borrow().as_deref(), Some("interrupted"));
    }
}
