//! Integration tests for configuration loading and environment overrides.
//!
//! Precedence is env > yaml > defaults. Every test here touches process
//! environment, so they run serially.

use order_loadtest::config::{Config, ConfigError, CONFIG_PATH_ENV};
use serial_test::serial;
use std::env;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

/// Clear all env vars that could affect config loading.
/// Must be called at the start of every test to prevent leakage
/// from other tests (execution order is not guaranteed).
fn clean_env() {
    for var in [
        CONFIG_PATH_ENV,
        "TARGET_URL",
        "REQUEST_TIMEOUT",
        "SKIP_TLS_VERIFY",
        "CUSTOM_HEADERS",
        "METRICS_PORT",
        "ABORT_ON_FAIL",
    ] {
        env::remove_var(var);
    }
}

fn config_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

const YAML: &str = r#"
version: "1.0"
config:
  baseUrl: "https://yaml.example.com/api/v1"
  timeout: "10s"
  skipTlsVerify: false
load:
  stages:
    - { duration: "1m", target: 25 }
thresholds:
  http_req_duration: ["p(95)<500"]
"#;

#[test]
#[serial]
fn test_yaml_file_without_overrides() {
    clean_env();
    let file = config_file(YAML);
    env::set_var(CONFIG_PATH_ENV, file.path());

    let config = Config::load().unwrap();

    assert_eq!(config.base_url, "https://yaml.example.com/api/v1");
    assert_eq!(config.request_timeout, Duration::from_secs(10));
    assert!(!config.skip_tls_verify);
    assert_eq!(config.plan.max_target(), 25);
    assert_eq!(config.thresholds.len(), 1);
    assert!(!config.thresholds[0].abort_on_fail());

    clean_env();
}

#[test]
#[serial]
fn test_env_overrides_yaml_values() {
    clean_env();
    let file = config_file(YAML);
    env::set_var(CONFIG_PATH_ENV, file.path());
    env::set_var("TARGET_URL", "https://env.example.com");
    env::set_var("REQUEST_TIMEOUT", "2s");
    env::set_var("SKIP_TLS_VERIFY", "true");
    env::set_var("CUSTOM_HEADERS", "X-Env:staging,Authorization:Bearer abc");
    env::set_var("METRICS_PORT", "9100");
    env::set_var("ABORT_ON_FAIL", "true");

    let config = Config::load().unwrap();

    assert_eq!(config.base_url, "https://env.example.com");
    assert_eq!(config.request_timeout, Duration::from_secs(2));
    assert!(config.skip_tls_verify);
    assert_eq!(
        config.custom_headers.as_deref(),
        Some("X-Env:staging,Authorization:Bearer abc")
    );
    assert_eq!(config.metrics_port, Some(9100));
    assert!(config.thresholds.iter().all(|t| t.abort_on_fail()));

    let client_config = config.client_config();
    assert_eq!(client_config.timeout, Duration::from_secs(2));
    assert!(client_config.skip_tls_verify);

    clean_env();
}

#[test]
#[serial]
fn test_missing_default_file_uses_builtin_defaults() {
    clean_env();
    // The default path is relative; run from a directory without it.
    let dir = tempfile::tempdir().unwrap();
    let previous = env::current_dir().unwrap();
    env::set_current_dir(dir.path()).unwrap();
    env::set_var("TARGET_URL", "http://orders.internal:8080/api/v1");

    let result = Config::load();
    env::set_current_dir(previous).unwrap();
    let config = result.unwrap();

    assert_eq!(config.base_url, "http://orders.internal:8080/api/v1");
    assert_eq!(config.plan.total_duration(), Duration::from_secs(120));
    assert_eq!(config.thresholds.len(), 2);
    assert_eq!(config.scenario.steps.len(), 3);

    clean_env();
}

#[test]
#[serial]
fn test_explicit_missing_file_is_an_error() {
    clean_env();
    env::set_var(CONFIG_PATH_ENV, "/nonexistent/loadtest.yaml");

    assert!(matches!(Config::load(), Err(ConfigError::FileRead { .. })));

    clean_env();
}

#[test]
#[serial]
fn test_invalid_env_values() {
    clean_env();
    let file = config_file(YAML);
    env::set_var(CONFIG_PATH_ENV, file.path());

    env::set_var("METRICS_PORT", "not-a-port");
    assert!(matches!(Config::load(), Err(ConfigError::Env { .. })));
    env::remove_var("METRICS_PORT");

    env::set_var("SKIP_TLS_VERIFY", "sometimes");
    assert!(matches!(Config::load(), Err(ConfigError::Env { .. })));
    env::remove_var("SKIP_TLS_VERIFY");

    // Overrides are validated like file values.
    env::set_var("TARGET_URL", "orders.internal");
    let err = Config::load().unwrap_err().to_string();
    assert!(err.contains("config.baseUrl"), "{}", err);

    clean_env();
}

#[test]
#[serial]
fn test_malformed_yaml_is_a_parse_error() {
    clean_env();
    let file = config_file("load:\n  stages: [ { duration: \"1m\"\n");
    env::set_var(CONFIG_PATH_ENV, file.path());

    assert!(matches!(Config::load(), Err(ConfigError::YamlParse(_))));

    clean_env();
}
