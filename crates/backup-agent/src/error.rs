//! Error types for the backup agent.

use thiserror::Error;

/// Result type alias for agent operations.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Retry policy class for API failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    Retryable,
    Permanent,
    Unauthorized,
    Conflict,
}

/// Errors that can occur during backup and restore operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// API error response from the server
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Another device's restore session holds the server-side guard
    #[error("Restore conflict: session '{active_session_id}' is already in progress")]
    Conflict { active_session_id: String },

    /// Local durable cache failure. Fatal: surfaced to the operator rather
    /// than silently retried.
    #[error("Local cache error: {0}")]
    Cache(#[from] rusqlite::Error),

    /// Invalid request (missing required data, etc.)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl AgentError {
    /// Create an API error from status and message
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create an invalid request error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Classify error for retry policy.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Api { status, .. } => match *status {
                401 | 403 => RetryClass::Unauthorized,
                409 => RetryClass::Conflict,
                408 | 429 => RetryClass::Retryable,
                500..=599 => RetryClass::Retryable,
                _ => RetryClass::Permanent,
            },
            Self::Conflict { .. } => RetryClass::Conflict,
            Self::Http(_) => RetryClass::Retryable,
            Self::Json(_) => RetryClass::Permanent,
            Self::Cache(_) => RetryClass::Permanent,
            Self::InvalidRequest(_) => RetryClass::Permanent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_failures_are_retryable_and_auth_is_not() {
        assert_eq!(AgentError::api(503, "down").retry_class(), RetryClass::Retryable);
        assert_eq!(AgentError::api(429, "slow down").retry_class(), RetryClass::Retryable);
        assert_eq!(
            AgentError::api(401, "bad pin").retry_class(),
            RetryClass::Unauthorized
        );
        assert_eq!(AgentError::api(400, "nope").retry_class(), RetryClass::Permanent);
    }

    #[test]
    fn conflict_is_its_own_class() {
        let err = AgentError::Conflict {
            active_session_id: "restore-9".to_string(),
        };
        assert_eq!(err.retry_class(), RetryClass::Conflict);
        assert_eq!(AgentError::api(409, "busy").retry_class(), RetryClass::Conflict);
    }
}
