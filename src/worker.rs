use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use prometheus::IntGauge;
use tracing::{debug, info};

use crate::executor::ScenarioExecutor;
use crate::metrics::VIRTUAL_USERS;
use crate::scenario::{Scenario, ScenarioContext};

/// Advisory stop flag shared between the scheduler and one virtual user.
///
/// The virtual user only looks at it between iterations, so an iteration in
/// flight always completes.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Withdraw a stop request that the virtual user has not acted on yet.
    pub fn resume(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Holds one unit of a gauge for as long as it lives, so the gauge is
/// released even if the owning task panics or is cancelled.
struct GaugeGuard(IntGauge);

impl GaugeGuard {
    fn acquire(gauge: &IntGauge) -> Self {
        gauge.inc();
        Self(gauge.clone())
    }
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.0.dec();
    }
}

/// Configuration for a virtual user task.
pub struct VirtualUserConfig {
    pub vu_id: usize,
    pub scenario: Arc<Scenario>,
    pub executor: ScenarioExecutor,
}

/// Runs one virtual user: iterations back to back until the stop signal is
/// seen at an iteration boundary. Returns the number of completed iterations.
pub async fn run_virtual_user(config: VirtualUserConfig, stop: StopSignal) -> u64 {
    debug!(
        vu_id = config.vu_id,
        scenario = %config.scenario.name,
        steps = config.scenario.steps.len(),
        "Virtual user starting"
    );
    let _active = GaugeGuard::acquire(&VIRTUAL_USERS);

    let mut context = ScenarioContext::new();
    let mut iterations = 0u64;

    while !stop.is_stopped() {
        let result = config.executor.execute(&config.scenario, &mut context).await;
        iterations += 1;

        if result.failed_steps() > 0 {
            debug!(
                vu_id = config.vu_id,
                iteration = iterations,
                failed_steps = result.failed_steps(),
                "Iteration finished with failed steps"
            );
        }
    }

    info!(
        vu_id = config.vu_id,
        iterations = iterations,
        "Virtual user stopped"
    );
    iterations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::MetricsAggregator;
    use crate::client::{HttpRequest, HttpResponse, RequestClient, TransportError};
    use crate::scenario::{RequestConfig, Step};
    use async_trait::async_trait;
    use tokio::time::{sleep, Duration};

    struct SlowOk;

    #[async_trait]
    impl RequestClient for SlowOk {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, TransportError> {
            sleep(Duration::from_millis(100)).await;
            Ok(HttpResponse::new(200, ""))
        }
    }

    fn config(aggregator: Arc<MetricsAggregator>) -> VirtualUserConfig {
        let scenario = Scenario {
            name: "single".to_string(),
            steps: vec![Step {
                name: "ping".to_string(),
                request: RequestConfig::get("/ping"),
                random_values: vec![],
                checks: vec![],
                think_time: None,
            }],
        };
        VirtualUserConfig {
            vu_id: 0,
            scenario: Arc::new(scenario),
            executor: ScenarioExecutor::new(
                "http://target".to_string(),
                Arc::new(SlowOk),
                aggregator,
                Duration::from_secs(5),
            ),
        }
    }

    #[test]
    fn test_stop_signal_roundtrip() {
        let signal = StopSignal::new();
        let shared = signal.clone();
        assert!(!shared.is_stopped());

        signal.stop();
        assert!(shared.is_stopped());

        signal.resume();
        assert!(!shared.is_stopped());
    }

    #[tokio::test]
    async fn test_gauge_released_when_task_panics() {
        let gauge = IntGauge::new("active_test", "active").unwrap();
        let held = gauge.clone();

        let handle = tokio::spawn(async move {
            let _active = GaugeGuard::acquire(&held);
            assert_eq!(held.get(), 1);
            panic!("request client blew up");
        });

        assert!(handle.await.unwrap_err().is_panic());
        assert_eq!(gauge.get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gauge_released_when_task_aborted() {
        let gauge = IntGauge::new("active_test", "active").unwrap();
        let held = gauge.clone();

        let handle = tokio::spawn(async move {
            let _active = GaugeGuard::acquire(&held);
            sleep(Duration::from_secs(60)).await;
        });
        sleep(Duration::from_millis(10)).await;
        assert_eq!(gauge.get(), 1);

        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
        assert_eq!(gauge.get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_before_start_runs_nothing() {
        let aggregator = Arc::new(MetricsAggregator::new());
        let stop = StopSignal::new();
        stop.stop();

        let iterations = run_virtual_user(config(aggregator.clone()), stop).await;

        assert_eq!(iterations, 0);
        assert_eq!(aggregator.snapshot().total_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_takes_effect_at_iteration_boundary() {
        let aggregator = Arc::new(MetricsAggregator::new());
        let stop = StopSignal::new();
        let handle = tokio::spawn(run_virtual_user(config(aggregator.clone()), stop.clone()));

        // Mid-way through the fourth request.
        sleep(Duration::from_millis(350)).await;
        stop.stop();

        let iterations = handle.await.unwrap();
        assert_eq!(iterations, 4);
        assert_eq!(aggregator.snapshot().total_requests(), 4);
        assert_eq!(aggregator.snapshot().failed_requests(), 0);
    }
}
