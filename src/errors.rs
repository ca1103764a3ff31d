//! Transport error categorization for request failure events.
//!
//! HTTP status classes are handled by the dispatcher's outcome
//! classification; this module only sorts failures where no usable response
//! arrived (timeouts, refused connections, TLS problems).

use std::fmt;

/// Categories of transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Request timeout errors
    TimeoutError,

    /// Network connectivity errors (DNS, connection refused, reset body)
    NetworkError,

    /// TLS/SSL certificate errors
    TlsError,

    /// Other/unknown errors
    OtherError,
}

impl ErrorCategory {
    /// Categorize a reqwest error.
    pub fn from_reqwest_error(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            return ErrorCategory::TimeoutError;
        }

        // Connect errors often wrap TLS handshake failures, so check the
        // message before falling back to the coarse reqwest flags.
        let error_msg = format!("{:?}", error).to_lowercase();
        if error_msg.contains("certificate") || error_msg.contains("tls") {
            ErrorCategory::TlsError
        } else if error.is_connect() || error.is_request() || error.is_body() {
            ErrorCategory::NetworkError
        } else if error_msg.contains("timed out") || error_msg.contains("timeout") {
            ErrorCategory::TimeoutError
        } else if error_msg.contains("dns") || error_msg.contains("connection") {
            ErrorCategory::NetworkError
        } else {
            ErrorCategory::OtherError
        }
    }

    /// Short label used in log fields and metric labels.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorCategory::TimeoutError => "timeout_error",
            ErrorCategory::NetworkError => "network_error",
            ErrorCategory::TlsError => "tls_error",
            ErrorCategory::OtherError => "other_error",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ErrorCategory::TimeoutError => "Request Timeout Errors",
            ErrorCategory::NetworkError => "Network/Connection Errors",
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
