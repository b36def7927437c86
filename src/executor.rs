//! Workload iteration engine.
//!
//! Runs one iteration of a [`Scenario`]: every step in order, each request
//! bounded by the request timeout, outcomes and check results pushed to the
//! aggregator as soon as they exist. A failed step never ends the iteration.

use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration, Instant};
use tracing::debug;

use crate::aggregator::{MetricsAggregator, RequestOutcome};
use crate::assertions::run_checks;
use crate::client::{HttpRequest, RequestClient, TransportError};
use crate::errors::ErrorCategory;
use crate::scenario::{Scenario, ScenarioContext, Step};

/// Result of executing a single step.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub step_name: String,

    /// Transport succeeded and the status was 2xx
    pub success: bool,

    /// HTTP status code, None on transport failure
    pub status_code: Option<u16>,

    pub latency: Duration,

    pub checks_passed: usize,
    pub checks_failed: usize,
}

/// Result of one iteration of the workload.
#[derive(Debug, Clone)]
pub struct IterationResult {
    pub steps: Vec<StepResult>,

    /// Wall time of the iteration, think time included
    pub duration: Duration,
}

impl IterationResult {
    pub fn failed_steps(&self) -> usize {
        self.steps.iter().filter(|s| !s.success).count()
    }
}

/// Executes scenario iterations for virtual users.
///
/// Cheap to clone; every virtual user holds its own copy sharing the same
/// client and aggregator.
#[derive(Clone)]
pub struct ScenarioExecutor {
    /// Base URL prefixed to every relative step path
    base_url: String,
    client: Arc<dyn RequestClient>,
    aggregator: Arc<MetricsAggregator>,
    request_timeout: Duration,
}

impl ScenarioExecutor {
    pub fn new(
        base_url: String,
        client: Arc<dyn RequestClient>,
        aggregator: Arc<MetricsAggregator>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            aggregator,
            request_timeout,
        }
    }

    pub fn aggregator(&self) -> &Arc<MetricsAggregator> {
        &self.aggregator
    }

    /// Execute one iteration of `scenario`.
    ///
    /// The context is reset first, so nothing carries over from the previous
    /// iteration. The iteration duration is recorded once all steps ran.
    pub async fn execute(
        &self,
        scenario: &Scenario,
        context: &mut ScenarioContext,
    ) -> IterationResult {
        let iteration_start = Instant::now();
        context.begin_iteration();

        let mut steps = Vec::with_capacity(scenario.steps.len());

        for (idx, step) in scenario.steps.iter().enumerate() {
            let result = self.execute_step(idx, step, context).await;
            steps.push(result);

            context.next_step();

            if let Some(ref think_time) = step.think_time {
                let delay = think_time.calculate_delay();
                debug!(
                    step = %step.name,
                    think_time_ms = delay.as_millis() as u64,
                    "Applying think time"
                );
                sleep(delay).await;
            }
        }

        let duration = iteration_start.elapsed();
        self.aggregator.record_iteration(duration);

        debug!(
            scenario = %scenario.name,
            iteration = context.iteration(),
            duration_ms = duration.as_millis() as u64,
            steps = steps.len(),
            "Iteration completed"
        );

        IterationResult { steps, duration }
    }

    fn build_request(
        &self,
        step: &Step,
        context: &ScenarioContext,
    ) -> Result<HttpRequest, TransportError> {
        let path = context.substitute_variables(&step.request.path);
        let url = if path.starts_with("http://") || path.starts_with("https://") {
            path
        } else {
            format!("{}{}", self.base_url, path)
        };

        let method = reqwest::Method::from_bytes(step.request.method.to_uppercase().as_bytes())
            .map_err(|_| {
                TransportError::new(
                    ErrorCategory::OtherError,
                    format!("Unsupported HTTP method: {}", step.request.method),
                )
            })?;

        let headers = step
            .request
            .headers
            .iter()
            .map(|(name, value)| (name.clone(), context.substitute_variables(value)))
            .collect();

        let body = step
            .request
            .body
            .as_ref()
            .map(|body| context.substitute_variables(body));

        Ok(HttpRequest {
            method,
            url,
            headers,
            body,
        })
    }

    async fn execute_step(
        &self,
        idx: usize,
        step: &Step,
        context: &mut ScenarioContext,
    ) -> StepResult {
        context.draw_random_values(&step.random_values);

        let issued_at = Instant::now();
        let response = match self.build_request(step, context) {
            Ok(request) => {
                debug!(
                    step = %step.name,
                    method = %request.method,
                    url = %request.url,
                    "Making HTTP request"
                );
                match timeout(self.request_timeout, self.client.send(request)).await {
                    Ok(result) => result,
                    Err(_) => Err(TransportError::timeout(self.request_timeout)),
                }
            }
            Err(e) => Err(e),
        };
        let latency = issued_at.elapsed();

        let outcome = match &response {
            Ok(resp) => RequestOutcome::response(&step.name, idx, issued_at, resp.status, latency),
            Err(e) => {
                RequestOutcome::transport_failure(&step.name, idx, issued_at, e.category, latency)
            }
        };

        let check_results = run_checks(&step.checks, response.as_ref(), latency);
        self.aggregator.ingest(&outcome, &check_results);

        let checks_failed = check_results.iter().filter(|c| !c.passed).count();

        match &response {
            Ok(resp) => debug!(
                step = %step.name,
                status_code = resp.status,
                latency_ms = latency.as_millis() as u64,
                checks_failed,
                "Received response"
            ),
            Err(e) => debug!(
                step = %step.name,
                error = %e,
                error_category = e.category.label(),
                latency_ms = latency.as_millis() as u64,
                "Request failed"
            ),
        }

        StepResult {
            step_name: step.name.clone(),
            success: outcome.success,
            status_code: outcome.status,
            latency,
            checks_passed: check_results.len() - checks_failed,
            checks_failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::HttpResponse;
    use crate::scenario::{Assertion, Check, RandomValue, RequestConfig, ThinkTime};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records every request and answers with a fixed status.
    struct RecordingClient {
        status: u16,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl RecordingClient {
        fn new(status: u16) -> Arc<Self> {
            Arc::new(Self {
                status,
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl RequestClient for RecordingClient {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            self.requests.lock().unwrap().push(request);
            Ok(HttpResponse::new(self.status, "{}"))
        }
    }

    fn step(name: &str, path: &str, think_ms: Option<u64>) -> Step {
        Step {
            name: name.to_string(),
            request: RequestConfig::get(path),
            random_values: vec![],
            checks: vec![Check::new(&format!("{} ok", name), Assertion::StatusCode(200))],
            think_time: think_ms.map(|ms| ThinkTime::Fixed(Duration::from_millis(ms))),
        }
    }

    fn executor(client: Arc<dyn RequestClient>) -> ScenarioExecutor {
        ScenarioExecutor::new(
            "http://target/api/v1/".to_string(),
            client,
            Arc::new(MetricsAggregator::new()),
            Duration::from_secs(1),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_steps_run_in_order_with_think_time() {
        let client = RecordingClient::new(200);
        let executor = executor(client.clone());
        let scenario = Scenario {
            name: "ordered".to_string(),
            steps: vec![
                step("first", "/one", Some(500)),
                step("second", "/two", Some(1_000)),
                step("third", "/three", None),
            ],
        };

        let mut ctx = ScenarioContext::new();
        let result = executor.execute(&scenario, &mut ctx).await;

        let urls: Vec<String> = client
            .requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.url.clone())
            .collect();
        assert_eq!(
            urls,
            vec![
                "http://target/api/v1/one",
                "http://target/api/v1/two",
                "http://target/api/v1/three"
            ]
        );
        assert_eq!(result.steps.len(), 3);
        assert_eq!(result.failed_steps(), 0);
        assert!(result.duration >= Duration::from_millis(1_500));

        let snapshot = executor.aggregator().snapshot();
        assert_eq!(snapshot.total_requests(), 3);
        assert_eq!(snapshot.iterations(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_step_does_not_stop_iteration() {
        let client = RecordingClient::new(500);
        let executor = executor(client.clone());
        let scenario = Scenario {
            name: "failing".to_string(),
            steps: vec![step("a", "/a", None), step("b", "/b", None)],
        };

        let result = executor.execute(&scenario, &mut ScenarioContext::new()).await;

        assert_eq!(client.requests.lock().unwrap().len(), 2);
        assert_eq!(result.failed_steps(), 2);
        assert!(result.steps.iter().all(|s| s.checks_failed == 1));
        assert_eq!(executor.aggregator().snapshot().failed_requests(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_random_values_substituted_into_body() {
        let client = RecordingClient::new(201);
        let executor = executor(client.clone());
        let scenario = Scenario {
            name: "priced".to_string(),
            steps: vec![Step {
                name: "order".to_string(),
                request: RequestConfig::post_json("/orders", r#"{"price":${price}}"#.to_string()),
                random_values: vec![RandomValue::new("price", 10.0..=10.0, 1)],
                checks: vec![],
                think_time: None,
            }],
        };

        executor.execute(&scenario, &mut ScenarioContext::new()).await;

        let requests = client.requests.lock().unwrap();
        assert_eq!(requests[0].method, reqwest::Method::POST);
        assert_eq!(requests[0].body.as_deref(), Some(r#"{"price":10.0}"#));
        assert!(requests[0]
            .headers
            .iter()
            .any(|(k, v)| k == "Content-Type" && v == "application/json"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_method_is_recorded_as_failure() {
        let client = RecordingClient::new(200);
        let executor = executor(client.clone());
        let mut bad = step("bad", "/x", None);
        bad.request.method = "NOT A METHOD".to_string();
        let scenario = Scenario {
            name: "bad".to_string(),
            steps: vec![bad],
        };

        let result = executor.execute(&scenario, &mut ScenarioContext::new()).await;

        assert!(client.requests.lock().unwrap().is_empty());
        assert!(!result.steps[0].success);
        assert_eq!(executor.aggregator().snapshot().failed_requests(), 1);
    }
}
