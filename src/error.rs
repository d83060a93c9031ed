//! # Error Module
//!
//! Defines `DriverError`, the single error type flowing through interceptors,
//! transports, continuations and drivers, together with the severity
//! classification the drivers use to decide whether a failure ends one request
//! chain or the whole run.

use crate::request::Request;
use crate::response::Response;
use http::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = DriverError> = std::result::Result<T, E>;

/// How far a failure propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Reported to the failure hook; the run continues with the next request.
    Recoverable,
    /// Terminates the failing request's chain; reported to the failure hook.
    RequestFatal,
    /// Halts the run and is returned to the caller of the driver.
    ProcessFatal,
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Transport error for {url}: {message}")]
    Transport {
        url: String,
        message: String,
        timeout: bool,
    },

    #[error("Server error {status} for {url}")]
    ServerError { url: String, status: StatusCode },

    #[error("Unexpected status {status} for {url}")]
    UnexpectedStatus {
        url: String,
        status: StatusCode,
        severity: Severity,
    },

    #[error("Rate limit wait of {waited:?} exceeds the ceiling of {max_wait:?}")]
    RateLimitExceeded { waited: Duration, max_wait: Duration },

    #[error("Interceptor '{name}' failed: {source}")]
    Interceptor {
        name: String,
        #[source]
        source: Box<DriverError>,
    },

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Invalid record: {0}")]
    InvalidData(String),

    #[error("Continuation failed: {0}")]
    Continuation(#[from] anyhow::Error),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    General(String),
}

impl DriverError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn archive(message: impl Into<String>) -> Self {
        Self::Archive(message.into())
    }

    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData(message.into())
    }

    pub fn transport(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            url: url.into(),
            message: message.into(),
            timeout: false,
        }
    }

    pub fn timeout(url: impl Into<String>, after: Duration) -> Self {
        Self::Transport {
            url: url.into(),
            message: format!("request timed out after {:?}", after),
            timeout: true,
        }
    }

    /// Wraps an error raised inside an interceptor.
    ///
    /// Archive and configuration failures keep their own kind so they still halt
    /// the run; everything else becomes a request-fatal interceptor failure.
    pub fn in_interceptor(name: &str, error: DriverError) -> Self {
        match error {
            err @ (DriverError::Archive(_)
            | DriverError::Configuration(_)
            | DriverError::Io(_)
            | DriverError::Interceptor { .. }) => err,
            other => DriverError::Interceptor {
                name: name.to_string(),
                source: Box::new(other),
            },
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            DriverError::Transport { .. } => Severity::Recoverable,
            DriverError::UnexpectedStatus { severity, .. } => *severity,
            DriverError::ServerError { .. }
            | DriverError::RateLimitExceeded { .. }
            | DriverError::Interceptor { .. }
            | DriverError::Continuation(_)
            | DriverError::InvalidData(_)
            | DriverError::Url(_)
            | DriverError::General(_) => Severity::RequestFatal,
            DriverError::Configuration(_)
            | DriverError::Archive(_)
            | DriverError::Io(_)
            | DriverError::Json(_) => Severity::ProcessFatal,
        }
    }

    pub fn is_process_fatal(&self) -> bool {
        self.severity() == Severity::ProcessFatal
    }
}

/// Context handed to the failure hook for every request-level failure.
#[derive(Debug)]
pub struct FailureReport {
    pub request: Arc<Request>,
    pub error: DriverError,
    pub response: Option<Response>,
}

impl FailureReport {
    pub fn severity(&self) -> Severity {
        self.error.severity()
    }
}

/// What the driver should do after the failure hook has seen a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureAction {
    #[default]
    Continue,
    Stop,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_failures_are_recoverable() {
        let err = DriverError::timeout("https://example.com", Duration::from_secs(30));
        assert_eq!(err.severity(), Severity::Recoverable);
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn interceptor_wrapping_keeps_archive_failures_fatal() {
        let wrapped = DriverError::in_interceptor("warc-capture", DriverError::archive("disk full"));
        assert!(matches!(wrapped, DriverError::Archive(_)));
        assert!(wrapped.is_process_fatal());

        let wrapped = DriverError::in_interceptor("mock", DriverError::General("boom".into()));
        assert!(matches!(wrapped, DriverError::Interceptor { ref name, .. } if name == "mock"));
        assert_eq!(wrapped.severity(), Severity::RequestFatal);
    }

    #[test]
    fn server_errors_end_the_request_chain_only() {
        let err = DriverError::ServerError {
            url: "https://example.com".into(),
            status: StatusCode::BAD_GATEWAY,
        };
        assert_eq!(err.severity(), Severity::RequestFatal);
    }
}
