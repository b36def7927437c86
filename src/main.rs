use std::env;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use order_loadtest::client::build_client;
use order_loadtest::config::{Config, CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH};
use order_loadtest::metrics::{register_metrics, start_metrics_server};
use order_loadtest::runner::LoadTest;

/// Prints helpful configuration documentation.
fn print_config_help() {
    eprintln!("Configuration file:");
    eprintln!(
        "  {:<20} - Path to the YAML config (default: {}, built-in defaults if missing)",
        CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH
    );
    eprintln!();
    eprintln!("Environment overrides:");
    eprintln!("  TARGET_URL           - Base URL of the order API (must start with http:// or https://)");
    eprintln!("  REQUEST_TIMEOUT      - Per-request timeout: 500ms, 30s, 1m (default: 30s)");
    eprintln!("  SKIP_TLS_VERIFY      - Skip TLS certificate verification (default: false)");
    eprintln!("  CUSTOM_HEADERS       - Comma-separated headers (use \\, for literal commas)");
    eprintln!("  METRICS_PORT         - Serve Prometheus metrics on this port");
    eprintln!("  ABORT_ON_FAIL        - Stop early when any threshold fails (default: false)");
    eprintln!();
    eprintln!("Logging:");
    eprintln!("  RUST_LOG             - Log filter (default: info)");
    eprintln!("  LOG_FORMAT           - 'json' for JSON log lines");
    eprintln!("  METRIC_NAMESPACE     - Prometheus metric namespace (default: order_loadtest)");
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }
}

#[tokio::main]
async fn main() {
    init_logging();

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}\n", e);
            print_config_help();
            std::process::exit(2);
        }
    };

    let client = match build_client(&config.client_config()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to build HTTP client: {}", e);
            std::process::exit(2);
        }
    };

    if let Err(e) = register_metrics() {
        error!(error = %e, "Failed to register Prometheus metrics");
    }
    if let Some(port) = config.metrics_port {
        tokio::spawn(start_metrics_server(port));
    }

    info!(
        base_url = %config.base_url,
        stages = config.plan.stages().len(),
        total_secs = config.plan.total_duration().as_secs_f64(),
        max_target = config.plan.max_target(),
        request_timeout_ms = config.request_timeout.as_millis() as u64,
        "Configuration loaded"
    );

    let load_test = LoadTest::new(config, Arc::new(client));

    let abort = load_test.abort_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => abort.abort("interrupted"),
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl+C"),
        }
    });

    let report = load_test.run().await;
    println!("{}", report.summary());

    std::process::exit(report.exit_code());
}
