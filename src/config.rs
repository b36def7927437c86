//! Run configuration.
//!
//! Configuration comes from a YAML file (path in `LOADTEST_CONFIG`, default
//! `loadtest.yaml`) with environment variable overrides on top. Without a
//! file the built-in defaults describe the reference order test: a 2 minute
//! ramp to 100 users against `http://localhost:8080/api/v1`.
//!
//! Everything is validated up front; [`Config`] is immutable once built.

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::env;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tokio::time::Duration;
use tracing::{debug, info};

use crate::client::ClientConfig;
use crate::config_validation::{
    DurationValidator, HttpMethodValidator, RangeValidator, UrlValidator, ValidationContext,
    ValidationError,
};
use crate::scenario::{Assertion, Check, RandomValue, RequestConfig, Scenario, Step, ThinkTime};
use crate::stages::{Interpolation, Stage, StagePlan};
use crate::thresholds::Threshold;
use crate::workload::OrderWorkload;

pub const CONFIG_PATH_ENV: &str = "LOADTEST_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "loadtest.yaml";
const SUPPORTED_VERSION: &str = "1.0";

/// Errors that can occur while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Invalid value for environment variable {name}: {message}")]
    Env { name: String, message: String },

    #[error("Invalid configuration: {0}")]
    Validation(#[from] ValidationError),
}

// === YAML schema ===

/// Root of the YAML file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct YamlConfig {
    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub config: YamlGlobalConfig,

    #[serde(default)]
    pub load: YamlLoad,

    /// Metric key to threshold expressions. Omitted means the defaults;
    /// an empty map means no thresholds.
    #[serde(default = "default_thresholds")]
    pub thresholds: BTreeMap<String, Vec<YamlThreshold>>,

    #[serde(default)]
    pub workload: YamlWorkload,
}

impl Default for YamlConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            config: YamlGlobalConfig::default(),
            load: YamlLoad::default(),
            thresholds: default_thresholds(),
            workload: YamlWorkload::default(),
        }
    }
}

fn default_version() -> String {
    SUPPORTED_VERSION.to_string()
}

fn default_thresholds() -> BTreeMap<String, Vec<YamlThreshold>> {
    BTreeMap::from([
        (
            "http_req_duration".to_string(),
            vec![YamlThreshold::Expression("p(95)<800".to_string())],
        ),
        (
            "http_req_failed".to_string(),
            vec![YamlThreshold::Expression("rate<0.01".to_string())],
        ),
    ])
}

/// Global settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct YamlGlobalConfig {
    pub base_url: String,
    pub timeout: String,
    pub skip_tls_verify: bool,
    pub custom_headers: Option<String>,
    pub tick: String,
    pub evaluation_interval: String,
    pub metrics_port: Option<u16>,
    /// Abort on the first failing threshold, whatever its own setting
    pub abort_on_fail: bool,
}

impl Default for YamlGlobalConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api/v1".to_string(),
            timeout: "30s".to_string(),
            skip_tls_verify: false,
            custom_headers: None,
            tick: "1s".to_string(),
            evaluation_interval: "5s".to_string(),
            metrics_port: None,
            abort_on_fail: false,
        }
    }
}

/// Stage plan.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct YamlLoad {
    pub start_target: usize,
    pub interpolation: Interpolation,
    pub stages: Vec<YamlStage>,
}

impl Default for YamlLoad {
    fn default() -> Self {
        let stage = |duration: &str, target| YamlStage {
            duration: duration.to_string(),
            target,
        };
        Self {
            start_target: 0,
            interpolation: Interpolation::Linear,
            stages: vec![stage("30s", 50), stage("1m", 100), stage("30s", 0)],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct YamlStage {
    pub duration: String,
    pub target: usize,
}

/// A threshold, either a bare expression or one with abort settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum YamlThreshold {
    Expression(String),
    #[serde(rename_all = "camelCase")]
    Detailed {
        threshold: String,
        #[serde(default)]
        abort_on_fail: bool,
        delay_abort_eval: Option<String>,
    },
}

/// Workload selection.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum YamlWorkload {
    Orders(OrderWorkload),
    Custom(YamlScenario),
}

impl Default for YamlWorkload {
    fn default() -> Self {
        YamlWorkload::Orders(OrderWorkload::default())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct YamlScenario {
    #[serde(default = "default_scenario_name")]
    pub name: String,
    pub steps: Vec<YamlStep>,
}

fn default_scenario_name() -> String {
    "custom".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YamlStep {
    pub name: String,
    pub request: YamlRequest,
    #[serde(default)]
    pub random: Vec<YamlRandomValue>,
    #[serde(default)]
    pub checks: Vec<YamlCheck>,
    pub think_time: Option<YamlThinkTime>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct YamlRequest {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct YamlRandomValue {
    pub name: String,
    pub min: f64,
    pub max: f64,
    #[serde(default = "default_decimals")]
    pub decimals: usize,
}

fn default_decimals() -> usize {
    2
}

#[derive(Debug, Clone, Deserialize)]
pub struct YamlCheck {
    pub name: String,
    #[serde(rename = "assert")]
    pub assertion: YamlAssertion,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum YamlAssertion {
    StatusCode { expected: u16 },
    StatusIn { min: u16, max: u16 },
    ResponseTime { max: String },
    JsonPath { path: String, expected: Option<String> },
    BodyContains { text: String },
    BodyMatches { regex: String },
    HeaderExists { header: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum YamlThinkTime {
    /// Fixed think time (e.g., "3s")
    Fixed(String),

    /// Random think time with min/max range
    Random { min: String, max: String },
}

impl YamlConfig {
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_str(&content)
    }

    /// Apply environment variable overrides (env > yaml > defaults).
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(url) = env::var("TARGET_URL") {
            debug!(base_url = %url, "TARGET_URL overrides config.baseUrl");
            self.config.base_url = url;
        }
        if let Ok(timeout) = env::var("REQUEST_TIMEOUT") {
            self.config.timeout = timeout;
        }
        if let Ok(value) = env::var("SKIP_TLS_VERIFY") {
            self.config.skip_tls_verify = parse_bool_env("SKIP_TLS_VERIFY", &value)?;
        }
        if let Ok(headers) = env::var("CUSTOM_HEADERS") {
            self.config.custom_headers = Some(headers);
        }
        if let Ok(port) = env::var("METRICS_PORT") {
            let port = port.trim().parse::<u16>().map_err(|e| ConfigError::Env {
                name: "METRICS_PORT".to_string(),
                message: e.to_string(),
            })?;
            self.config.metrics_port = Some(port);
        }
        if let Ok(value) = env::var("ABORT_ON_FAIL") {
            self.config.abort_on_fail = parse_bool_env("ABORT_ON_FAIL", &value)?;
        }
        Ok(())
    }
}

fn parse_bool_env(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        other => Err(ConfigError::Env {
            name: name.to_string(),
            message: format!("expected true or false, got '{}'", other),
        }),
    }
}

// === Validated configuration ===

/// Validated, immutable run configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub request_timeout: Duration,
    pub skip_tls_verify: bool,
    pub custom_headers: Option<String>,
    /// Scheduling tick of the stage scheduler
    pub tick: Duration,
    /// Period of live threshold evaluation
    pub evaluation_interval: Duration,
    pub metrics_port: Option<u16>,
    pub plan: StagePlan,
    pub thresholds: Vec<Threshold>,
    pub scenario: Scenario,
}

impl Config {
    /// Load from the file named by `LOADTEST_CONFIG` (or `loadtest.yaml`),
    /// falling back to defaults when that file does not exist, then apply
    /// environment overrides and validate.
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        let mut yaml = if Path::new(&path).exists() {
            info!(path = %path, "Loading configuration file");
            YamlConfig::from_file(&path)?
        } else if env::var(CONFIG_PATH_ENV).is_ok() {
            return Err(ConfigError::FileRead {
                path,
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        } else {
            info!("No configuration file found, using built-in defaults");
            YamlConfig::default()
        };

        yaml.apply_env_overrides()?;
        Self::from_yaml(yaml)
    }

    /// Parse and validate a YAML document. Environment overrides are not applied.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        Self::from_yaml(YamlConfig::from_str(content)?)
    }

    /// Validate a parsed document, reporting every problem at once.
    pub fn from_yaml(yaml: YamlConfig) -> Result<Self, ConfigError> {
        let mut ctx = ValidationContext::new();

        if yaml.version != SUPPORTED_VERSION {
            ctx.enter("version");
            ctx.field_error(format!(
                "Unsupported version '{}', expected '{}'",
                yaml.version, SUPPORTED_VERSION
            ));
            ctx.exit();
        }

        ctx.enter("config");
        let global = &yaml.config;
        ctx.check("baseUrl", UrlValidator::validate(&global.base_url));
        let request_timeout = ctx.check("timeout", DurationValidator::parse_positive(&global.timeout));
        let tick = ctx.check("tick", DurationValidator::parse_positive(&global.tick));
        let evaluation_interval = ctx.check(
            "evaluationInterval",
            DurationValidator::parse_positive(&global.evaluation_interval),
        );
        if let Some(port) = global.metrics_port {
            ctx.check(
                "metricsPort",
                RangeValidator::validate_u64(port as u64, 1, 65535, "metricsPort"),
            );
        }
        ctx.exit();

        ctx.enter("load");
        let plan = build_plan(&yaml.load, &mut ctx);
        ctx.exit();

        ctx.enter("thresholds");
        let thresholds = build_thresholds(&yaml.thresholds, global.abort_on_fail, &mut ctx);
        ctx.exit();

        ctx.enter("workload");
        let scenario = match &yaml.workload {
            YamlWorkload::Orders(orders) => {
                validate_orders(orders, &mut ctx);
                orders.scenario()
            }
            YamlWorkload::Custom(custom) => build_custom_scenario(custom, &mut ctx),
        };
        ctx.exit();

        ctx.into_result()?;

        // All fields were validated above, the fallbacks are unreachable.
        Ok(Config {
            base_url: global.base_url.trim_end_matches('/').to_string(),
            request_timeout: request_timeout.unwrap_or_default(),
            skip_tls_verify: global.skip_tls_verify,
            custom_headers: global.custom_headers.clone(),
            tick: tick.unwrap_or_default(),
            evaluation_interval: evaluation_interval.unwrap_or_default(),
            metrics_port: global.metrics_port,
            plan,
            thresholds,
            scenario,
        })
    }

    /// Settings for the shared HTTP client.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: self.request_timeout,
            skip_tls_verify: self.skip_tls_verify,
            custom_headers: self.custom_headers.clone(),
            ..ClientConfig::default()
        }
    }
}

fn build_plan(load: &YamlLoad, ctx: &mut ValidationContext) -> StagePlan {
    ctx.enter("stages");
    if load.stages.is_empty() {
        ctx.field_error("At least one stage must be defined".to_string());
    }

    let mut stages = Vec::with_capacity(load.stages.len());
    let mut total = Some(Duration::ZERO);
    for (idx, stage) in load.stages.iter().enumerate() {
        ctx.enter(&format!("[{}]", idx));
        if let Some(duration) = ctx.check("duration", DurationValidator::parse(&stage.duration)) {
            total = total.and_then(|t| t.checked_add(duration));
            stages.push(Stage::new(duration, stage.target));
        }
        ctx.exit();
    }
    if total.is_none() {
        ctx.field_error("Total stage duration overflows".to_string());
    }
    ctx.exit();

    if !load.stages.is_empty() && stages.iter().all(|s| s.duration.is_zero()) {
        ctx.field_error("Total stage duration must be greater than zero".to_string());
    }

    StagePlan::new(stages)
        .with_start_target(load.start_target)
        .with_interpolation(load.interpolation)
}

fn build_thresholds(
    entries: &BTreeMap<String, Vec<YamlThreshold>>,
    abort_all: bool,
    ctx: &mut ValidationContext,
) -> Vec<Threshold> {
    let mut thresholds = Vec::new();

    for (metric, expressions) in entries {
        ctx.enter(metric);
        for (idx, entry) in expressions.iter().enumerate() {
            ctx.enter(&format!("[{}]", idx));

            let (expression, abort_on_fail, delay) = match entry {
                YamlThreshold::Expression(expression) => (expression, false, None),
                YamlThreshold::Detailed {
                    threshold,
                    abort_on_fail,
                    delay_abort_eval,
                } => (threshold, *abort_on_fail, delay_abort_eval.as_deref()),
            };

            let delay = match delay {
                Some(raw) => ctx.check("delayAbortEval", DurationValidator::parse(raw)),
                None => Some(Duration::ZERO),
            };

            match Threshold::parse(metric, expression) {
                Ok(threshold) => {
                    thresholds.push(threshold.with_abort_on_fail(
                        abort_on_fail || abort_all,
                        delay.unwrap_or_default(),
                    ));
                }
                Err(e) => ctx.field_error(e.to_string()),
            }
            ctx.exit();
        }
        ctx.exit();
    }

    thresholds
}

fn validate_orders(orders: &OrderWorkload, ctx: &mut ValidationContext) {
    if orders.symbol.trim().is_empty() {
        ctx.enter("symbol");
        ctx.field_error("Symbol cannot be empty".to_string());
        ctx.exit();
    }
    for (name, side) in [("buy", &orders.buy), ("sell", &orders.sell)] {
        ctx.enter(name);
        ctx.check(
            "price",
            RangeValidator::validate_f64_range(side.price_min, side.price_max, "price"),
        );
        if !(side.quantity.is_finite() && side.quantity > 0.0) {
            ctx.enter("quantity");
            ctx.field_error(format!("Quantity must be positive, got {}", side.quantity));
            ctx.exit();
        }
        ctx.exit();
    }
}

fn build_custom_scenario(custom: &YamlScenario, ctx: &mut ValidationContext) -> Scenario {
    ctx.enter("steps");
    if custom.steps.is_empty() {
        ctx.field_error(format!(
            "Scenario '{}' must have at least one step",
            custom.name
        ));
    }

    let mut steps = Vec::with_capacity(custom.steps.len());
    for (idx, step) in custom.steps.iter().enumerate() {
        ctx.enter(&format!("[{}]", idx));
        steps.push(build_step(step, ctx));
        ctx.exit();
    }
    ctx.exit();

    Scenario {
        name: custom.name.clone(),
        steps,
    }
}

fn build_step(step: &YamlStep, ctx: &mut ValidationContext) -> Step {
    if step.name.trim().is_empty() {
        ctx.enter("name");
        ctx.field_error("Step name cannot be empty".to_string());
        ctx.exit();
    }

    ctx.enter("request");
    ctx.check("method", HttpMethodValidator::validate(&step.request.method));
    if step.request.path.is_empty() {
        ctx.enter("path");
        ctx.field_error("Request path cannot be empty".to_string());
        ctx.exit();
    }
    ctx.exit();

    ctx.enter("random");
    let mut random_values = Vec::with_capacity(step.random.len());
    for (idx, value) in step.random.iter().enumerate() {
        ctx.enter(&format!("[{}]", idx));
        ctx.check(
            "max",
            RangeValidator::validate_f64_range(value.min, value.max, &value.name),
        );
        random_values.push(RandomValue::new(
            &value.name,
            value.min..=value.max,
            value.decimals,
        ));
        ctx.exit();
    }
    ctx.exit();

    ctx.enter("checks");
    let mut checks = Vec::with_capacity(step.checks.len());
    for (idx, check) in step.checks.iter().enumerate() {
        ctx.enter(&format!("[{}]", idx));
        if let Some(assertion) = build_assertion(&check.assertion, ctx) {
            checks.push(Check::new(&check.name, assertion));
        }
        ctx.exit();
    }
    ctx.exit();

    let think_time = match &step.think_time {
        None => None,
        Some(YamlThinkTime::Fixed(raw)) => ctx
            .check("thinkTime", DurationValidator::parse(raw))
            .map(ThinkTime::Fixed),
        Some(YamlThinkTime::Random { min, max }) => {
            ctx.enter("thinkTime");
            let min = ctx.check("min", DurationValidator::parse(min));
            let max = ctx.check("max", DurationValidator::parse(max));
            let think_time = match (min, max) {
                (Some(min), Some(max)) if min <= max => Some(ThinkTime::Random { min, max }),
                (Some(_), Some(_)) => {
                    ctx.field_error("min must not exceed max".to_string());
                    None
                }
                _ => None,
            };
            ctx.exit();
            think_time
        }
    };

    Step {
        name: step.name.clone(),
        request: RequestConfig {
            method: step.request.method.to_uppercase(),
            path: step.request.path.clone(),
            body: step.request.body.clone(),
            headers: step.request.headers.clone(),
        },
        random_values,
        checks,
        think_time,
    }
}

fn build_assertion(assertion: &YamlAssertion, ctx: &mut ValidationContext) -> Option<Assertion> {
    match assertion {
        YamlAssertion::StatusCode { expected } => Some(Assertion::StatusCode(*expected)),
        YamlAssertion::StatusIn { min, max } => {
            if min > max {
                ctx.field_error(format!("statusIn min ({}) exceeds max ({})", min, max));
                return None;
            }
            Some(Assertion::StatusIn {
                min: *min,
                max: *max,
            })
        }
        YamlAssertion::ResponseTime { max } => ctx
            .check("max", DurationValidator::parse(max))
            .map(Assertion::ResponseTime),
        YamlAssertion::JsonPath { path, expected } => {
            if let Err(e) = serde_json_path::JsonPath::parse(path) {
                ctx.field_error(format!("Invalid JSONPath '{}': {}", path, e));
                return None;
            }
            Some(Assertion::JsonPath {
                path: path.clone(),
                expected: expected.clone(),
            })
        }
        YamlAssertion::BodyContains { text } => Some(Assertion::BodyContains(text.clone())),
        YamlAssertion::BodyMatches { regex } => {
            if let Err(e) = regex::Regex::new(regex) {
                ctx.field_error(format!("Invalid regex '{}': {}", regex, e));
                return None;
            }
            Some(Assertion::BodyMatches(regex.clone()))
        }
        YamlAssertion::HeaderExists { header } => Some(Assertion::HeaderExists(header.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_reproduce_reference_test() {
        let config = Config::from_yaml(YamlConfig::default()).unwrap();

        assert_eq!(config.base_url, "http://localhost:8080/api/v1");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.tick, Duration::from_secs(1));
        assert_eq!(config.plan.total_duration(), Duration::from_secs(120));
        assert_eq!(config.plan.max_target(), 100);
        assert_eq!(config.scenario.steps.len(), 3);

        let metrics: Vec<&str> = config.thresholds.iter().map(|t| t.metric()).collect();
        assert_eq!(metrics, vec!["http_req_duration", "http_req_failed"]);
        assert!(config.thresholds.iter().all(|t| !t.abort_on_fail()));
    }

    #[test]
    fn test_full_document() {
        let yaml = r#"
version: "1.0"
config:
  baseUrl: "https://orders.staging.example.com/api/v1/"
  timeout: "5s"
  tick: "500ms"
  evaluationInterval: "2s"
  metricsPort: 9090
load:
  startTarget: 5
  interpolation: step
  stages:
    - { duration: "10s", target: 20 }
    - { duration: "20s", target: 0 }
thresholds:
  http_req_failed: ["rate<0.05"]
  http_req_duration{step:get_order_book}:
    - threshold: "p(99)<1s"
      abortOnFail: true
      delayAbortEval: "10s"
workload:
  type: orders
  symbol: "ETH/USD"
"#;
        let config = Config::from_yaml_str(yaml).unwrap();

        assert_eq!(config.base_url, "https://orders.staging.example.com/api/v1");
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.tick, Duration::from_millis(500));
        assert_eq!(config.evaluation_interval, Duration::from_secs(2));
        assert_eq!(config.metrics_port, Some(9090));
        assert_eq!(config.plan.start_target(), 5);
        assert_eq!(config.plan.interpolation(), Interpolation::Step);
        assert_eq!(config.plan.stages().len(), 2);

        let book = config
            .thresholds
            .iter()
            .find(|t| t.metric() == "http_req_duration{step:get_order_book}")
            .unwrap();
        assert!(book.abort_on_fail());
        assert_eq!(book.delay_abort_eval(), Duration::from_secs(10));

        assert_eq!(config.scenario.steps[2].request.path, "/orderbook/ETH_USD");
        assert_eq!(config.client_config().timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_global_abort_on_fail() {
        let yaml = r#"
config:
  abortOnFail: true
thresholds:
  http_req_failed: ["rate<0.01"]
"#;
        let config = Config::from_yaml_str(yaml).unwrap();
        assert_eq!(config.thresholds.len(), 1);
        assert!(config.thresholds[0].abort_on_fail());
    }

    #[test]
    fn test_custom_workload() {
        let yaml = r#"
workload:
  type: custom
  name: health
  steps:
    - name: ping
      request: { method: get, path: "/health" }
      checks:
        - name: "service up"
          assert: { type: statusIn, min: 200, max: 299 }
        - name: "fast"
          assert: { type: responseTime, max: "200ms" }
      thinkTime: { min: "100ms", max: "300ms" }
    - name: echo
      request:
        method: POST
        path: "/echo"
        headers: { Content-Type: "application/json" }
        body: '{"n": ${n}}'
      random:
        - { name: n, min: 1, max: 10, decimals: 0 }
      thinkTime: "1s"
"#;
        let config = Config::from_yaml_str(yaml).unwrap();
        let scenario = &config.scenario;

        assert_eq!(scenario.name, "health");
        assert_eq!(scenario.steps[0].request.method, "GET");
        assert_eq!(
            scenario.steps[0].checks[0].assertion,
            Assertion::StatusIn { min: 200, max: 299 }
        );
        assert_eq!(
            scenario.steps[0].checks[1].assertion,
            Assertion::ResponseTime(Duration::from_millis(200))
        );
        assert_eq!(
            scenario.steps[0].think_time,
            Some(ThinkTime::Random {
                min: Duration::from_millis(100),
                max: Duration::from_millis(300)
            })
        );
        assert_eq!(scenario.steps[1].random_values[0].name, "n");
        assert_eq!(
            scenario.steps[1].think_time,
            Some(ThinkTime::Fixed(Duration::from_secs(1)))
        );
    }

    #[test]
    fn test_validation_reports_every_problem() {
        let yaml = r#"
version: "2.0"
config:
  baseUrl: "localhost:8080"
  tick: "0s"
load:
  stages: []
thresholds:
  http_req_duration: ["p(95) 800"]
  http_req_latency: ["avg<10"]
"#;
        let err = Config::from_yaml_str(yaml).unwrap_err().to_string();

        assert!(err.contains("version"), "{}", err);
        assert!(err.contains("config.baseUrl"), "{}", err);
        assert!(err.contains("config.tick"), "{}", err);
        assert!(err.contains("load.stages"), "{}", err);
        assert!(err.contains("thresholds.http_req_duration[0]"), "{}", err);
        assert!(err.contains("Unknown metric"), "{}", err);
    }

    #[test]
    fn test_stage_duration_overflow_is_an_error() {
        let yaml = r#"
load:
  stages:
    - { duration: "18446744073709551615s", target: 1 }
    - { duration: "1s", target: 1 }
"#;
        let err = Config::from_yaml_str(yaml).unwrap_err().to_string();
        assert!(err.contains("load.stages"), "{}", err);
        assert!(err.contains("overflows"), "{}", err);

        let yaml = r#"
load:
  stages:
    - { duration: "999999999999999d", target: 1 }
"#;
        let err = Config::from_yaml_str(yaml).unwrap_err().to_string();
        assert!(err.contains("load.stages[0].duration"), "{}", err);
        assert!(err.contains("too large"), "{}", err);
    }

    #[test]
    fn test_invalid_custom_steps() {
        let yaml = r#"
workload:
  type: custom
  steps:
    - name: ""
      request: { method: FETCH, path: "" }
      random:
        - { name: price, min: 10, max: 1 }
      checks:
        - name: bad regex
          assert: { type: bodyMatches, regex: "([" }
"#;
        let err = Config::from_yaml_str(yaml).unwrap_err().to_string();

        assert!(err.contains("workload.steps[0].name"), "{}", err);
        assert!(err.contains("workload.steps[0].request.method"), "{}", err);
        assert!(err.contains("workload.steps[0].request.path"), "{}", err);
        assert!(err.contains("workload.steps[0].random[0].max"), "{}", err);
        assert!(err.contains("workload.steps[0].checks[0]"), "{}", err);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let yaml = r#"
config:
  baseUrl: "http://localhost"
  workers: 10
"#;
        assert!(matches!(
            Config::from_yaml_str(yaml),
            Err(ConfigError::YamlParse(_))
        ));
    }

    #[test]
    fn test_empty_thresholds_map_disables_defaults() {
        let config = Config::from_yaml_str("thresholds: {}\n").unwrap();
        assert!(config.thresholds.is_empty());
    }

    #[test]
    fn test_parse_bool_env() {
        assert!(parse_bool_env("X", "TRUE").unwrap());
        assert!(!parse_bool_env("X", "0").unwrap());
        assert!(matches!(
            parse_bool_env("X", "maybe"),
            Err(ConfigError::Env { .. })
        ));
    }
}
