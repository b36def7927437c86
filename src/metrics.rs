//! Prometheus export of live run state.
//!
//! These series mirror what the aggregator sees so a run can be watched from
//! a dashboard. Threshold evaluation never reads them.

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, TextEncoder,
};
use std::env;
use tracing::{error, info};

lazy_static::lazy_static! {
    pub static ref METRIC_NAMESPACE: String =
        env::var("METRIC_NAMESPACE").unwrap_or_else(|_| "order_loadtest".to_string());

    // === Virtual users ===

    pub static ref VIRTUAL_USERS: IntGauge =
        IntGauge::with_opts(
            Opts::new("virtual_users", "Number of virtual users currently active")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref VIRTUAL_USERS_TARGET: IntGauge =
        IntGauge::with_opts(
            Opts::new("virtual_users_target", "Virtual users requested by the stage plan")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref ITERATIONS_TOTAL: IntCounter =
        IntCounter::with_opts(
            Opts::new("iterations_total", "Completed workload iterations")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    // === Requests ===

    pub static ref REQUEST_STATUS_CODES: IntCounterVec =
        IntCounterVec::new(
            Opts::new("requests_total", "HTTP requests by step and status code")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["step", "status_code"]
        ).unwrap();

    pub static ref REQUEST_DURATION_SECONDS: HistogramVec =
        HistogramVec::new(
            HistogramOpts::new(
                "request_duration_seconds",
                "HTTP request latencies in seconds"
            ).namespace(METRIC_NAMESPACE.as_str()),
            &["step"]
        ).unwrap();

    pub static ref REQUEST_ERRORS_BY_CATEGORY: IntCounterVec =
        IntCounterVec::new(
            Opts::new("request_errors_by_category", "Failed requests by error category")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["category"]
        ).unwrap();

    // === Checks and thresholds ===

    pub static ref CHECKS_TOTAL: IntCounterVec =
        IntCounterVec::new(
            Opts::new("checks_total", "Check evaluations by name and result")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["check", "result"]  // result: passed, failed
        ).unwrap();

    pub static ref THRESHOLDS_FAILING: IntGauge =
        IntGauge::with_opts(
            Opts::new("thresholds_failing", "Thresholds failing at the last evaluation")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();
}

/// Registers all metrics with the default Prometheus registry.
pub fn register_metrics() -> Result<(), prometheus::Error> {
    let registry = prometheus::default_registry();

    registry.register(Box::new(VIRTUAL_USERS.clone()))?;
    registry.register(Box::new(VIRTUAL_USERS_TARGET.clone()))?;
    registry.register(Box::new(ITERATIONS_TOTAL.clone()))?;

    registry.register(Box::new(REQUEST_STATUS_CODES.clone()))?;
    registry.register(Box::new(REQUEST_DURATION_SECONDS.clone()))?;
    registry.register(Box::new(REQUEST_ERRORS_BY_CATEGORY.clone()))?;

    registry.register(Box::new(CHECKS_TOTAL.clone()))?;
    registry.register(Box::new(THRESHOLDS_FAILING.clone()))?;

    Ok(())
}

/// Returns a static string label for common HTTP status codes.
///
/// Uncommon codes fall back to "other" to keep label cardinality bounded.
pub fn status_code_label(code: u16) -> &'static str {
    match code {
        200 => "200",
        201 => "201",
        204 => "204",
        400 => "400",
        401 => "401",
        403 => "403",
        404 => "404",
        409 => "409",
        422 => "422",
        429 => "429",
        500 => "500",
        502 => "502",
        503 => "503",
        504 => "504",
        _ => "other",
    }
}

async fn metrics_handler(_req: Request<Body>) -> Result<Response<Body>, hyper::Error> {
    let mut response = match gather_metrics_string() {
        Ok(text) => Response::new(Body::from(text)),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            let mut response = Response::new(Body::from("failed to encode metrics"));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            return Ok(response);
        }
    };

    if let Ok(content_type) = TextEncoder::new().format_type().parse() {
        response
            .headers_mut()
            .insert(hyper::header::CONTENT_TYPE, content_type);
    }
    Ok(response)
}

/// Starts the Prometheus metrics HTTP server. Runs until the process exits.
pub async fn start_metrics_server(port: u16) {
    let addr = ([0, 0, 0, 0], port).into();

    let make_svc =
        make_service_fn(|_conn| async { Ok::<_, hyper::Error>(service_fn(metrics_handler)) });

    let server = match Server::try_bind(&addr) {
        Ok(builder) => builder.serve(make_svc),
        Err(e) => {
            error!(port = port, error = %e, "Failed to bind metrics server");
            return;
        }
    };
    info!(port = port, addr = %addr, "Metrics server listening");

    if let Err(e) = server.await {
        error!(error = %e, "Metrics server error");
    }
}

/// Gathers and encodes the default registry in the text exposition format.
pub fn gather_metrics_string() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_label() {
        assert_eq!(status_code_label(201), "201");
        assert_eq!(status_code_label(500), "500");
        assert_eq!(status_code_label(418), "other");
    }

    #[test]
    fn test_counters_work_without_registration() {
        let before = CHECKS_TOTAL
            .with_label_values(&["metrics module test", "passed"])
            .get();
        CHECKS_TOTAL
            .with_label_values(&["metrics module test", "passed"])
            .inc();
        assert_eq!(
            CHECKS_TOTAL
                .with_label_values(&["metrics module test", "passed"])
                .get(),
            before + 1
        );
    }
}
