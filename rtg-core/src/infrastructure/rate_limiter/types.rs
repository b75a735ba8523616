//! Rate limiter types

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

/// The parts of an incoming request the limiter can key on
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Caller address (IP or forwarded-for value)
    pub address: String,
    /// Report target, when the request names one
    pub target_id: Option<String>,
}

impl RequestContext {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            target_id: None,
        }
    }

    pub fn with_target(mut self, target_id: impl Into<String>) -> Self {
        self.target_id = Some(target_id.into());
        self
    }
}

/// Pluggable identifier extractor
pub type IdentifierFn = Arc<dyn Fn(&RequestContext) -> String + Send + Sync>;

/// Outcome of an admission check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RateLimitDecision {
    Allowed {
        limit: u32,
        remaining: u32,
        /// Time until the oldest admitted request leaves the window
        reset_after: Duration,
    },
    Limited {
        limit: u32,
        /// Exact wait before the next request can be admitted
        retry_after: Duration,
    },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Limited { retry_after, .. } => Some(*retry_after),
            Self::Allowed { .. } => None,
        }
    }

    /// Response headers for the route layer; seconds are rounded up
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let ceil_secs = |d: &Duration| d.as_millis().div_ceil(1000).to_string();
        match self {
            Self::Allowed {
                limit,
                remaining,
                reset_after,
            } => vec![
                ("X-RateLimit-Limit", limit.to_string()),
                ("X-RateLimit-Remaining", remaining.to_string()),
                ("X-RateLimit-Reset", ceil_secs(reset_after)),
            ],
            Self::Limited { limit, retry_after } => vec![
                ("X-RateLimit-Limit", limit.to_string()),
                ("X-RateLimit-Remaining", "0".to_string()),
                ("X-RateLimit-Reset", ceil_secs(retry_after)),
                ("Retry-After", ceil_secs(retry_after)),
            ],
        }
    }
}
