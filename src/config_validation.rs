//! Field-level validation for configuration files.
//!
//! Validators return a [`ValidationError`]; [`ValidationContext`] tracks the
//! dotted path of the field being checked and collects every problem so a
//! bad file is reported in one go.

use thiserror::Error;
use tokio::time::Duration;

use crate::utils::parse_duration_string;

/// Validation error with context about which field failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Field '{field}': {message}")]
    FieldError { field: String, message: String },

    #[error("Field '{field}': value {value} is out of range ({min} to {max})")]
    OutOfRange {
        field: String,
        value: String,
        min: String,
        max: String,
    },

    #[error("Field '{field}': invalid format - {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Field '{field}': invalid enum value '{value}'. Expected one of: {expected}")]
    InvalidEnum {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Multiple validation errors: {0}")]
    Multiple(String),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation context for building error messages.
#[derive(Debug, Default)]
pub struct ValidationContext {
    field_path: Vec<String>,
    errors: Vec<ValidationError>,
}

impl ValidationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a nested field context.
    pub fn enter(&mut self, field: &str) {
        self.field_path.push(field.to_string());
    }

    /// Exit the current field context.
    pub fn exit(&mut self) {
        self.field_path.pop();
    }

    /// Current field path, e.g. `load.stages[1].duration`.
    pub fn current_path(&self) -> String {
        let mut path = String::new();
        for segment in &self.field_path {
            if !path.is_empty() && !segment.starts_with('[') {
                path.push('.');
            }
            path.push_str(segment);
        }
        path
    }

    /// Add a field error at the current path.
    pub fn field_error(&mut self, message: String) {
        self.errors.push(ValidationError::FieldError {
            field: self.current_path(),
            message,
        });
    }

    /// Run `check` inside `field`, recording its error at that path.
    pub fn check<T>(&mut self, field: &str, result: ValidationResult<T>) -> Option<T> {
        self.enter(field);
        let value = match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.field_error(e.to_string());
                None
            }
        };
        self.exit();
        value
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    /// Consume the context and return a result.
    pub fn into_result(mut self) -> Result<(), ValidationError> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.remove(0)),
            _ => {
                let messages: Vec<String> = self.errors.iter().map(|e| e.to_string()).collect();
                Err(ValidationError::Multiple(messages.join("; ")))
            }
        }
    }
}

/// Validator for URLs.
pub struct UrlValidator;

impl UrlValidator {
    pub fn validate(url: &str) -> ValidationResult<()> {
        if url.is_empty() {
            return Err(ValidationError::InvalidFormat {
                field: "url".to_string(),
                message: "URL cannot be empty".to_string(),
            });
        }

        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ValidationError::InvalidFormat {
                field: "url".to_string(),
                message: format!("URL must start with http:// or https://, got: {}", url),
            });
        }

        if url.contains(' ') {
            return Err(ValidationError::InvalidFormat {
                field: "url".to_string(),
                message: "URL cannot contain spaces".to_string(),
            });
        }

        Ok(())
    }
}

/// Validator for durations.
pub struct DurationValidator;

impl DurationValidator {
    pub fn parse(duration_str: &str) -> ValidationResult<Duration> {
        parse_duration_string(duration_str).map_err(|e| ValidationError::InvalidFormat {
            field: "duration".to_string(),
            message: format!("Invalid duration format '{}': {}", duration_str, e),
        })
    }

    /// Parse and reject zero.
    pub fn parse_positive(duration_str: &str) -> ValidationResult<Duration> {
        let duration = Self::parse(duration_str)?;
        if duration.is_zero() {
            return Err(ValidationError::OutOfRange {
                field: "duration".to_string(),
                value: duration_str.to_string(),
                min: "1ms".to_string(),
                max: "unlimited".to_string(),
            });
        }
        Ok(duration)
    }
}

/// Validator for numeric ranges.
pub struct RangeValidator;

impl RangeValidator {
    pub fn validate_u64(value: u64, min: u64, max: u64, field: &str) -> ValidationResult<()> {
        if value < min || value > max {
            return Err(ValidationError::OutOfRange {
                field: field.to_string(),
                value: value.to_string(),
                min: min.to_string(),
                max: max.to_string(),
            });
        }
        Ok(())
    }

    /// `min <= max`, both finite.
    pub fn validate_f64_range(min: f64, max: f64, field: &str) -> ValidationResult<()> {
        if !min.is_finite() || !max.is_finite() || min > max {
            return Err(ValidationError::FieldError {
                field: field.to_string(),
                message: format!("min ({}) must not exceed max ({})", min, max),
            });
        }
        Ok(())
    }
}

/// Validator for HTTP methods.
pub struct HttpMethodValidator;

impl HttpMethodValidator {
    const VALID_METHODS: &'static [&'static str] =
        &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

    pub fn validate(method: &str) -> ValidationResult<()> {
        let method_upper = method.to_uppercase();
        if !Self::VALID_METHODS.contains(&method_upper.as_str()) {
            return Err(ValidationError::InvalidEnum {
                field: "method".to_string(),
                value: method.to_string(),
                expected: Self::VALID_METHODS.join(", "),
            });
        }
        Ok(())
    }
}
