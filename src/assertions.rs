//! Check evaluation.
//!
//! Every step declares named checks; this module evaluates them against the
//! step's response and produces one [`CheckResult`] per check.

use crate::client::{HttpResponse, TransportError};
use crate::scenario::{Assertion, Check};
use regex::Regex;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Result of evaluating one named check.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    /// Why the check failed, for logging
    pub error_message: Option<String>,
}

/// Reasons a check can fail.
#[derive(Error, Debug)]
pub enum AssertionError {
    #[error("Status code mismatch: expected {expected}, got {actual}")]
    StatusCodeMismatch { expected: u16, actual: u16 },

    #[error("Status code {actual} outside {min}..={max}")]
    StatusCodeOutOfRange { min: u16, max: u16, actual: u16 },

    #[error("Response time {actual_ms}ms exceeds threshold {threshold_ms}ms")]
    ResponseTimeTooSlow { actual_ms: u64, threshold_ms: u64 },

    #[error("JSONPath assertion failed: {0}")]
    JsonPathFailed(String),

    #[error("Body does not contain expected substring: {0}")]
    BodyNotContains(String),

    #[error("Body does not match regex: {0}")]
    BodyNotMatches(String),

    #[error("Header '{0}' not found in response")]
    HeaderNotFound(String),

    #[error("Regex compilation failed: {0}")]
    RegexError(#[from] regex::Error),

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("No response: {0}")]
    NoResponse(String),
}

/// Evaluate all checks of a step.
///
/// When the request failed at the transport level every check fails, since
/// there is no response to inspect.
pub fn run_checks(
    checks: &[Check],
    response: Result<&HttpResponse, &TransportError>,
    latency: Duration,
) -> Vec<CheckResult> {
    checks
        .iter()
        .map(|check| {
            let outcome = match response {
                Ok(resp) => run_single_assertion(&check.assertion, resp, latency),
                Err(transport) => Err(AssertionError::NoResponse(transport.to_string())),
            };

            match outcome {
                Ok(()) => CheckResult {
                    name: check.name.clone(),
                    passed: true,
                    error_message: None,
                },
                Err(e) => {
                    debug!(check = %check.name, error = %e, "Check failed");
                    CheckResult {
                        name: check.name.clone(),
                        passed: false,
                        error_message: Some(e.to_string()),
                    }
                }
            }
        })
        .collect()
}

fn run_single_assertion(
    assertion: &Assertion,
    response: &HttpResponse,
    latency: Duration,
) -> Result<(), AssertionError> {
    match assertion {
        Assertion::StatusCode(expected) => {
            if response.status == *expected {
                Ok(())
            } else {
                Err(AssertionError::StatusCodeMismatch {
                    expected: *expected,
                    actual: response.status,
                })
            }
        }

        Assertion::StatusIn { min, max } => {
            if (*min..=*max).contains(&response.status) {
                Ok(())
            } else {
                Err(AssertionError::StatusCodeOutOfRange {
                    min: *min,
                    max: *max,
                    actual: response.status,
                })
            }
        }

        Assertion::ResponseTime(threshold) => {
            if latency <= *threshold {
                Ok(())
            } else {
                Err(AssertionError::ResponseTimeTooSlow {
                    actual_ms: latency.as_millis() as u64,
                    threshold_ms: threshold.as_millis() as u64,
                })
            }
        }

        Assertion::JsonPath { path, expected } => {
            assert_json_path(&response.body, path, expected.as_deref())
        }

        Assertion::BodyContains(substring) => {
            if response.body.contains(substring.as_str()) {
                Ok(())
            } else {
                Err(AssertionError::BodyNotContains(substring.clone()))
            }
        }

        Assertion::BodyMatches(pattern) => {
            let re = Regex::new(pattern)?;
            if re.is_match(&response.body) {
                Ok(())
            } else {
                Err(AssertionError::BodyNotMatches(pattern.clone()))
            }
        }

        Assertion::HeaderExists(header_name) => {
            if response.headers.contains_key(header_name.as_str()) {
                Ok(())
            } else {
                Err(AssertionError::HeaderNotFound(header_name.clone()))
            }
        }
    }
}

fn assert_json_path(
    json_body: &str,
    path: &str,
    expected: Option<&str>,
) -> Result<(), AssertionError> {
    use serde_json_path::JsonPath;

    let json: Value = serde_json::from_str(json_body)
        .map_err(|e| AssertionError::InvalidJson(e.to_string()))?;

    let json_path = JsonPath::parse(path).map_err(|e| {
        AssertionError::JsonPathFailed(format!("Invalid JSONPath '{}': {}", path, e))
    })?;

    let value = json_path.query(&json).exactly_one().map_err(|_| {
        AssertionError::JsonPathFailed(format!(
            "JSONPath '{}' did not match exactly one value",
            path
        ))
    })?;

    let Some(expected_value) = expected else {
        return Ok(());
    };

    let actual_str = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        _ => value.to_string(),
    };

    if actual_str == expected_value {
        Ok(())
    } else {
        Err(AssertionError::JsonPathFailed(format!(
            "JSONPath '{}' value mismatch: expected '{}', got '{}'",
            path, expected_value, actual_str
        )))
    }
}
