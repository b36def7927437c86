//! Workload script definitions and per-iteration execution context.
//!
//! A scenario is the fixed, ordered list of steps one virtual user performs
//! per iteration. It is built once before the run and shared read-only by
//! every virtual user; all mutable state lives in [`ScenarioContext`].

use rand::Rng;
use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::time::Duration;

/// An ordered workload performed by every virtual user.
///
/// # Example
/// ```
/// use order_loadtest::scenario::{Assertion, Check, RequestConfig, Scenario, Step};
///
/// let scenario = Scenario {
///     name: "health".to_string(),
///     steps: vec![Step {
///         name: "ping".to_string(),
///         request: RequestConfig::get("/health"),
///         random_values: vec![],
///         checks: vec![Check::new("service up", Assertion::StatusCode(200))],
///         think_time: None,
///     }],
/// };
/// assert_eq!(scenario.steps.len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct Scenario {
    /// Name used in logs
    pub name: String,

    /// Sequential steps to execute
    pub steps: Vec<Step>,
}

/// Think time configuration for realistic user pacing.
///
/// Think time is the pause a virtual user takes after a step completes. It
/// does NOT count towards request latency metrics.
#[derive(Debug, Clone, PartialEq)]
pub enum ThinkTime {
    /// Fixed delay (always the same duration)
    Fixed(Duration),

    /// Random delay within a range (min to max, inclusive)
    Random { min: Duration, max: Duration },
}

impl ThinkTime {
    /// Calculate the actual delay to apply.
    pub fn calculate_delay(&self) -> Duration {
        match self {
            ThinkTime::Fixed(duration) => *duration,
            ThinkTime::Random { min, max } => {
                let min_ms = min.as_millis() as u64;
                let max_ms = max.as_millis() as u64;

                if min_ms >= max_ms {
                    return *min;
                }

                let random_ms = rand::thread_rng().gen_range(min_ms..=max_ms);
                Duration::from_millis(random_ms)
            }
        }
    }
}

/// A single step within a scenario.
#[derive(Debug, Clone)]
pub struct Step {
    /// Step name; also the `step` tag of its request metrics
    pub name: String,

    /// HTTP request configuration
    pub request: RequestConfig,

    /// Values drawn fresh every time the step runs, available as `${name}`
    pub random_values: Vec<RandomValue>,

    /// Named checks evaluated against the response
    pub checks: Vec<Check>,

    /// Optional pause after this step completes
    pub think_time: Option<ThinkTime>,
}

/// HTTP request configuration for a step.
#[derive(Debug, Clone)]
pub struct RequestConfig {
    /// HTTP method (GET, POST, PUT, DELETE, etc.)
    pub method: String,

    /// Request path relative to the base URL (may contain `${var}` references)
    pub path: String,

    /// Optional request body template (may contain `${var}` references)
    pub body: Option<String>,

    /// Request headers (values may contain `${var}` references)
    pub headers: HashMap<String, String>,
}

impl RequestConfig {
    pub fn get(path: &str) -> Self {
        Self {
            method: "GET".to_string(),
            path: path.to_string(),
            body: None,
            headers: HashMap::new(),
        }
    }

    /// POST with a JSON body template.
    pub fn post_json(path: &str, body: String) -> Self {
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        Self {
            method: "POST".to_string(),
            path: path.to_string(),
            body: Some(body),
            headers,
        }
    }
}

/// A uniformly distributed number rendered into the context before a step.
///
/// Used to jitter payloads (e.g. order prices) so the load is not a stream of
/// identical requests.
#[derive(Debug, Clone, PartialEq)]
pub struct RandomValue {
    pub name: String,
    pub min: f64,
    pub max: f64,
    /// Digits after the decimal point in the rendered value
    pub decimals: usize,
}

impl RandomValue {
    pub fn new(name: &str, range: RangeInclusive<f64>, decimals: usize) -> Self {
        Self {
            name: name.to_string(),
            min: *range.start(),
            max: *range.end(),
            decimals,
        }
    }

    /// Draw a value and format it with the configured precision.
    pub fn sample(&self) -> String {
        let value = if self.min >= self.max {
            self.min
        } else {
            rand::thread_rng().gen_range(self.min..=self.max)
        };
        format!("{:.*}", self.decimals, value)
    }
}

/// A named boolean predicate evaluated against one response.
#[derive(Debug, Clone, PartialEq)]
pub struct Check {
    pub name: String,
    pub assertion: Assertion,
}

impl Check {
    pub fn new(name: &str, assertion: Assertion) -> Self {
        Self {
            name: name.to_string(),
            assertion,
        }
    }
}

/// Conditions a check can assert on the HTTP response.
#[derive(Debug, Clone, PartialEq)]
pub enum Assertion {
    /// Response status code equals expected value
    StatusCode(u16),

    /// Response status code falls within an inclusive range
    StatusIn { min: u16, max: u16 },

    /// Response time is at or below threshold
    ResponseTime(Duration),

    /// JSON path exists and optionally matches value
    JsonPath {
        path: String,
        expected: Option<String>,
    },

    /// Response body contains substring
    BodyContains(String),

    /// Response body matches regex
    BodyMatches(String),

    /// Response header exists
    HeaderExists(String),
}

/// Execution context for one iteration of a virtual user.
///
/// Each virtual user owns one context and resets it at the start of every
/// iteration, so values never leak between iterations or users.
#[derive(Debug, Clone, Default)]
pub struct ScenarioContext {
    variables: HashMap<String, String>,
    current_step: usize,
    iteration: u64,
}

impl ScenarioContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a variable for use in subsequent substitutions.
    pub fn set_variable(&mut self, name: String, value: String) {
        self.variables.insert(name, value);
    }

    /// Get a previously stored variable.
    pub fn get_variable(&self, name: &str) -> Option<&String> {
        self.variables.get(name)
    }

    /// Draw every random value declared by a step into the context.
    pub fn draw_random_values(&mut self, values: &[RandomValue]) {
        for value in values {
            self.variables.insert(value.name.clone(), value.sample());
        }
    }

    /// Replace variable references in a string with their values.
    ///
    /// Supports syntax:
    /// - `${variable_name}` - Replace with stored variable
    /// - `${timestamp}` - Replace with current Unix timestamp in milliseconds
    /// - `${iteration}` - Replace with the iteration number of this virtual user
    ///
    /// # Example
    /// ```
    /// use order_loadtest::scenario::ScenarioContext;
    ///
    /// let mut ctx = ScenarioContext::new();
    /// ctx.set_variable("price".to_string(), "50012.34".to_string());
    ///
    /// let result = ctx.substitute_variables(r#"{"price":${price}}"#);
    /// assert_eq!(result, r#"{"price":50012.34}"#);
    /// ```
    pub fn substitute_variables(&self, input: &str) -> String {
        if !input.contains("${") {
            return input.to_string();
        }

        let mut result = input.to_string();

        if result.contains("${timestamp}") {
            let timestamp = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or_default()
                .to_string();
            result = result.replace("${timestamp}", &timestamp);
        }

        if result.contains("${iteration}") {
            result = result.replace("${iteration}", &self.iteration.to_string());
        }

        for (name, value) in &self.variables {
            let pattern = format!("${{{}}}", name);
            result = result.replace(&pattern, value);
        }

        result
    }

    /// Get current step index.
    pub fn current_step(&self) -> usize {
        self.current_step
    }

    /// Advance to next step.
    pub fn next_step(&mut self) {
        self.current_step += 1;
    }

    /// Number of iterations started with this context.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Reset the context for a new iteration.
    pub fn begin_iteration(&mut self) {
        self.variables.clear();
        self.current_step = 0;
        self.iteration += 1;
    }
}
