// Error types for pipekit.
// Covers configuration validation, GitHub API failures, and batch task outcomes.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// A single violated configuration constraint.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{field}: {reason}")]
pub struct ConfigError {
    /// Configuration key, in its lowercase file form (e.g. `cache_ttl`).
    pub field: String,
    /// What was wrong with the value.
    pub reason: String,
}

impl ConfigError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Every hard validation failure found in one loading pass.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct ConfigErrors(pub Vec<ConfigError>);

impl ConfigErrors {
    pub fn errors(&self) -> &[ConfigError] {
        &self.0
    }

    /// Find the first error reported for a field.
    pub fn field(&self, name: &str) -> Option<&ConfigError> {
        self.0.iter().find(|e| e.field == name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ConfigErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid configuration ({} error", self.0.len())?;
        if self.0.len() != 1 {
            write!(f, "s")?;
        }
        write!(f, ")")?;
        for error in &self.0 {
            write!(f, "\n  - {}", error)?;
        }
        Ok(())
    }
}

/// Failure of a remote GitHub API call.
///
/// Detail strings are redacted before they are stored here, so displaying an
/// `ApiError` never leaks the bearer token.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("authentication failed for {endpoint}: invalid or expired token")]
    Unauthorized { endpoint: String },

    #[error("access to {endpoint} forbidden: {detail}")]
    Forbidden { endpoint: String, detail: String },

    #[error("resource not found: {endpoint}")]
    NotFound { endpoint: String },

    #[error("request to {endpoint} rejected (HTTP {status}): {detail}")]
    InvalidRequest {
        endpoint: String,
        status: u16,
        detail: String,
    },

    #[error("rate limit exceeded for {endpoint}, resets at {}", display_reset(.reset_at))]
    RateLimited {
        endpoint: String,
        reset_at: Option<DateTime<Utc>>,
        retry_after: Option<Duration>,
    },

    #[error("server error from {endpoint} (HTTP {status}): {detail}")]
    Server {
        endpoint: String,
        status: u16,
        detail: String,
    },

    #[error("request to {endpoint} timed out after {}s", .after.as_secs())]
    Timeout { endpoint: String, after: Duration },

    #[error("network error calling {endpoint}: {detail}")]
    Network { endpoint: String, detail: String },

    #[error("could not decode response from {endpoint}: {detail}")]
    Decode { endpoint: String, detail: String },

    #[error("HTTP client setup failed: {0}")]
    Client(String),

    #[error("{endpoint} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        endpoint: String,
        attempts: u32,
        #[source]
        last: Box<ApiError>,
    },
}

fn display_reset(reset_at: &Option<DateTime<Utc>>) -> String {
    reset_at
        .map(|dt| dt.format("%H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

impl ApiError {
    /// Whether another attempt could succeed (quota, server, or network trouble).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::RateLimited { .. }
                | ApiError::Server { .. }
                | ApiError::Timeout { .. }
                | ApiError::Network { .. }
        )
    }

    /// Failures no retry can fix: auth, missing resources, malformed requests,
    /// and bodies that do not decode.
    pub fn is_fatal(&self) -> bool {
        match self {
            ApiError::Unauthorized { .. }
            | ApiError::Forbidden { .. }
            | ApiError::NotFound { .. }
            | ApiError::InvalidRequest { .. }
            | ApiError::Decode { .. }
            | ApiError::Client(_) => true,
            ApiError::RetriesExhausted { last, .. } => last.is_fatal(),
            _ => false,
        }
    }

    /// Server-provided hint for how long to wait before retrying.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ApiError::RateLimited {
                retry_after: Some(after),
                ..
            } => Some(*after),
            ApiError::RateLimited {
                reset_at: Some(reset),
                ..
            } => Some(
                reset
                    .signed_duration_since(Utc::now())
                    .to_std()
                    .unwrap_or(Duration::ZERO),
            ),
            _ => None,
        }
    }

    /// The endpoint the failing request targeted, if known.
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            ApiError::Unauthorized { endpoint }
            | ApiError::Forbidden { endpoint, .. }
            | ApiError::NotFound { endpoint }
            | ApiError::InvalidRequest { endpoint, .. }
            | ApiError::RateLimited { endpoint, .. }
            | ApiError::Server { endpoint, .. }
            | ApiError::Timeout { endpoint, .. }
            | ApiError::Network { endpoint, .. }
            | ApiError::Decode { endpoint, .. }
            | ApiError::RetriesExhausted { endpoint, .. } => Some(endpoint),
            ApiError::Client(_) => None,
        }
    }
}

/// Outcome of a batch task that did not produce a value.
#[derive(Error, Debug)]
pub enum TaskError<E> {
    #[error("task failed: {0}")]
    Failed(E),

    #[error("task timed out after {}s", .0.as_secs())]
    TimedOut(Duration),

    #[error("task cancelled before completion")]
    Cancelled,

    #[error("task panicked: {0}")]
    Panicked(String),
}

impl<E> TaskError<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled)
    }
}

/// Top-level error for the CLI and library entry points.
#[derive(Error, Debug)]
pub enum PipekitError {
    #[error(transparent)]
    Config(#[from] ConfigErrors),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, PipekitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_errors_display_lists_every_field() {
        let errors = ConfigErrors(vec![
            ConfigError::new("cache_ttl", "below minimum 60"),
            ConfigError::new("log_level", "must be one of DEBUG, INFO, WARN, ERROR"),
        ]);

        let text = errors.to_string();
        assert!(text.starts_with("invalid configuration (2 errors)"));
        assert!(text.contains("cache_ttl: below minimum 60"));
        assert!(text.contains("log_level: must be one of"));
        assert_eq!(errors.field("cache_ttl").unwrap().reason, "below minimum 60");
    }

    #[test]
    fn test_retry_classification() {
        let endpoint = "/repos/o/r".to_string();
        assert!(
            ApiError::Server {
                endpoint: endpoint.clone(),
                status: 502,
                detail: String::new()
            }
            .is_retryable()
        );
        assert!(
            ApiError::Timeout {
                endpoint: endpoint.clone(),
                after: Duration::from_secs(30)
            }
            .is_retryable()
        );
        assert!(
            !ApiError::Unauthorized {
                endpoint: endpoint.clone()
            }
            .is_retryable()
        );
        assert!(
            ApiError::Unauthorized {
                endpoint: endpoint.clone()
            }
            .is_fatal()
        );
        assert!(
            ApiError::NotFound {
                endpoint: endpoint.clone()
            }
            .is_fatal()
        );
        assert!(
            ApiError::InvalidRequest {
                endpoint: endpoint.clone(),
                status: 422,
                detail: "Validation Failed".into()
            }
            .is_fatal()
        );
        assert!(
            !ApiError::Server {
                endpoint,
                status: 503,
                detail: String::new()
            }
            .is_fatal()
        );
    }

    #[test]
    fn test_retries_exhausted_keeps_fatality_of_last_error() {
        let err = ApiError::RetriesExhausted {
            endpoint: "/x".into(),
            attempts: 3,
            last: Box::new(ApiError::Network {
                endpoint: "/x".into(),
                detail: "connection reset".into(),
            }),
        };
        assert!(!err.is_fatal());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("after 3 attempts"));
    }

    #[test]
    fn test_rate_limited_retry_after_prefers_explicit_hint() {
        let err = ApiError::RateLimited {
            endpoint: "/x".into(),
            reset_at: Some(Utc::now() + chrono::Duration::seconds(600)),
            retry_after: Some(Duration::from_secs(5)),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(5)));
    }
}
