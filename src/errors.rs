//! Error categorization for failed requests.
//!
//! A failed request never aborts a virtual user; it is turned into data. This
//! module classifies those failures (client errors, server errors, network
//! issues, timeouts) so the aggregator can count them per category.

use std::fmt;

/// Categories of failures that can occur while driving the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorCategory {
    /// HTTP 4xx errors (client errors)
    ClientError,

    /// HTTP 5xx errors (server errors)
    ServerError,

    /// Network connectivity errors (DNS, connection refused, etc.)
    NetworkError,

    /// Request exceeded the configured maximum wait
    TimeoutError,

    /// TLS/SSL certificate errors
    TlsError,

    /// Other/unknown errors, including unexpected 1xx/3xx statuses
    OtherError,
}

impl ErrorCategory {
    /// Categorize an HTTP status code.
    ///
    /// Returns None for 2xx responses, which count as successful requests.
    pub fn from_status_code(status_code: u16) -> Option<Self> {
        match status_code {
            200..=299 => None,
            400..=499 => Some(ErrorCategory::ClientError),
            500..=599 => Some(ErrorCategory::ServerError),
            _ => Some(ErrorCategory::OtherError),
        }
    }

    /// Categorize a reqwest error.
    pub fn from_reqwest_error(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            ErrorCategory::TimeoutError
        } else if error.is_connect() || error.is_request() {
            ErrorCategory::NetworkError
        } else if error.is_body() || error.is_decode() {
            // Response body errors - usually network or server issues
            ErrorCategory::NetworkError
        } else if error.is_redirect() {
            ErrorCategory::ClientError
        } else {
            Self::from_message(&error.to_string())
        }
    }

    /// Categorize from an error message when no structured information exists.
    pub fn from_message(message: &str) -> Self {
        let error_msg = message.to_lowercase();

        if error_msg.contains("certificate") || error_msg.contains("tls") || error_msg.contains("ssl")
        {
            ErrorCategory::TlsError
        } else if error_msg.contains("timeout") || error_msg.contains("timed out") {
            ErrorCategory::TimeoutError
        } else if error_msg.contains("dns")
            || error_msg.contains("resolve")
            || error_msg.contains("connect")
            || error_msg.contains("connection")
        {
            ErrorCategory::NetworkError
        } else {
            ErrorCategory::OtherError
        }
    }

    /// Get the metric label for this error category.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorCategory::ClientError => "client_error",
            ErrorCategory::ServerError => "server_error",
            ErrorCategory::NetworkError => "network_error",
            ErrorCategory::TimeoutError => "timeout_error",
            ErrorCategory::TlsError => "tls_error",
            ErrorCategory::OtherError => "other_error",
        }
    }

    /// Get a human-readable description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            ErrorCategory::ClientError => "HTTP 4xx Client Errors",
            ErrorCategory::ServerError => "HTTP 5xx Server Errors",
            ErrorCategory::NetworkError => "Network/Connection Errors",
            ErrorCategory::TimeoutError => "Request Timeout Errors",
            ErrorCategory::TlsError => "TLS/SSL Certificate Errors",
            ErrorCategory::OtherError => "Other/Unknown Errors",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}
