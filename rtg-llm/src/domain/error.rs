//! Completion error types
//!
//! Every backend failure is mapped onto one of these kinds so callers can pick
//! a handling strategy without inspecting messages.

use std::fmt;
use std::time::Duration;

/// Completion operation error
#[derive(Debug, Clone, PartialEq)]
pub enum LlmError {
    /// Credentials rejected or missing
    Authentication(String),

    /// Rate limited by the backend
    RateLimited {
        /// Seconds to wait before retrying (if the backend said so)
        retry_after: Option<u64>,
        message: String,
    },

    /// Request was rejected as malformed
    InvalidRequest(String),

    /// Model not found or not pulled
    ModelNotFound(String),

    /// Network/connection error
    Network(String),

    /// Call exceeded its deadline
    Timeout {
        /// Deadline in milliseconds
        millis: u64,
    },

    /// Backend temporarily unavailable (5xx)
    ServiceUnavailable(String),

    /// Backend answered with something that is not a usable completion
    InvalidResponse(String),

    /// Spawned inference process failed
    Process(String),

    /// Backend misconfigured (missing key, bad URL)
    Configuration(String),

    /// Provider name is not one of the registered backends
    UnsupportedProvider(String),

    /// Circuit breaker is open
    CircuitOpen {
        /// Name of the circuit
        circuit: String,
    },

    /// Caller cancelled the call
    Cancelled,
}

impl LlmError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited { .. }
                | LlmError::Network(_)
                | LlmError::Timeout { .. }
                | LlmError::ServiceUnavailable(_)
        )
    }

    /// Whether this failure says something about backend health
    pub fn counts_against_circuit(&self) -> bool {
        !matches!(
            self,
            LlmError::Cancelled
                | LlmError::Configuration(_)
                | LlmError::UnsupportedProvider(_)
                | LlmError::CircuitOpen { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, LlmError::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, LlmError::Cancelled)
    }

    /// Get retry-after duration if available
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::RateLimited { retry_after, .. } => retry_after.map(Duration::from_secs),
            _ => None,
        }
    }

    /// Short stable label, used as a metric tag
    pub fn kind(&self) -> &'static str {
        match self {
            LlmError::Authentication(_) => "authentication",
            LlmError::RateLimited { .. } => "rate_limited",
            LlmError::InvalidRequest(_) => "invalid_request",
            LlmError::ModelNotFound(_) => "model_not_found",
            LlmError::Network(_) => "network",
            LlmError::Timeout { .. } => "timeout",
            LlmError::ServiceUnavailable(_) => "service_unavailable",
            LlmError::InvalidResponse(_) => "invalid_response",
            LlmError::Process(_) => "process",
            LlmError::Configuration(_) => "configuration",
            LlmError::UnsupportedProvider(_) => "unsupported_provider",
            LlmError::CircuitOpen { .. } => "circuit_open",
            LlmError::Cancelled => "cancelled",
        }
    }

    /// Create a rate limited error
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited {
            retry_after: None,
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(deadline: Duration) -> Self {
        Self::Timeout {
            millis: deadline.as_millis() as u64,
        }
    }

    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    /// Create an authentication error
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Authentication(message.into())
    }
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::Authentication(msg) => write!(f, "Authentication failed: {}", msg),
            LlmError::RateLimited {
                message,
                retry_after,
            } => {
                if let Some(secs) = retry_after {
                    write!(f, "Rate limited: {} (retry after {}s)", message, secs)
                } else {
                    write!(f, "Rate limited: {}", message)
                }
            }
            LlmError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            LlmError::ModelNotFound(model) => write!(f, "Model not found: {}", model),
            LlmError::Network(msg) => write!(f, "Network error: {}", msg),
            LlmError::Timeout { millis } => write!(f, "Request timed out after {}ms", millis),
            LlmError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
            LlmError::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
            LlmError::Process(msg) => write!(f, "Inference process failed: {}", msg),
            LlmError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            LlmError::UnsupportedProvider(name) => write!(f, "Unsupported LLM provider: {}", name),
            LlmError::CircuitOpen { circuit } => {
                write!(f, "{} service temporarily unavailable (circuit open)", circuit)
            }
            LlmError::Cancelled => write!(f, "Completion cancelled"),
        }
    }
}

impl std::error::Error for LlmError {}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout { millis: 0 }
        } else if err.is_connect() {
            LlmError::Network(format!("Connection failed: {}", err))
        } else if err.is_decode() {
            LlmError::InvalidResponse(err.to_string())
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        LlmError::InvalidResponse(format!("JSON parse error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LlmError::Authentication("invalid key".to_string());
        assert_eq!(err.to_string(), "Authentication failed: invalid key");

        let err = LlmError::timeout(Duration::from_secs(15));
        assert_eq!(err.to_string(), "Request timed out after 15000ms");
    }

    #[test]
    fn test_is_retryable() {
        assert!(LlmError::network("connection reset").is_retryable());
        assert!(LlmError::timeout(Duration::from_secs(1)).is_retryable());
        assert!(LlmError::rate_limited("quota exceeded").is_retryable());
        assert!(LlmError::ServiceUnavailable("502".into()).is_retryable());

        assert!(!LlmError::auth("bad key").is_retryable());
        assert!(!LlmError::InvalidRequest("bad params".to_string()).is_retryable());
        assert!(!LlmError::Cancelled.is_retryable());
        assert!(!LlmError::InvalidResponse("empty".into()).is_retryable());
    }

    #[test]
    fn test_cancellation_does_not_trip_circuit() {
        assert!(!LlmError::Cancelled.counts_against_circuit());
        assert!(LlmError::network("down").counts_against_circuit());
    }

    #[test]
    fn test_retry_after() {
        let err = LlmError::RateLimited {
            retry_after: Some(60),
            message: "quota".into(),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(60)));
        assert_eq!(LlmError::network("failed").retry_after(), None);
    }
}
