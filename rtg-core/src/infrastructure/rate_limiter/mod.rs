//! Sliding-window rate limiting
//!
//! Each identifier owns the timestamps of its admitted requests. A request is
//! admitted while fewer than `requests_per_window` timestamps fall inside the
//! trailing window. Histories are pruned lazily, and with a small probability
//! per call every identifier whose history is entirely stale is dropped.

pub mod sliding_window;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use crate::config::{RateLimitConfig, RateLimitPolicy};
use crate::infrastructure::metrics::MetricsCollector;

pub use sliding_window::RateLimiter;
pub use types::{IdentifierFn, RateLimitDecision, RequestContext};

/// Options used to build a [`RateLimiter`]
#[derive(Clone)]
pub struct RateLimiterOptions {
    pub requests_per_window: u32,
    pub window: Duration,
    /// Derives the identifier from a request; defaults to the caller address
    pub identifier_fn: IdentifierFn,
    pub cleanup_probability: f64,
    /// Label used in logs and metrics
    pub name: String,
    /// Receives a `rate_limit_rejections` sample per rejected request
    pub metrics: Option<Arc<MetricsCollector>>,
}

impl std::fmt::Debug for RateLimiterOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiterOptions")
            .field("requests_per_window", &self.requests_per_window)
            .field("window", &self.window)
            .field("cleanup_probability", &self.cleanup_probability)
            .field("name", &self.name)
            .field("metrics", &self.metrics.is_some())
            .finish_non_exhaustive()
    }
}

impl RateLimiterOptions {
    pub fn new(requests_per_window: u32, window: Duration) -> Self {
        Self {
            requests_per_window,
            window,
            identifier_fn: Arc::new(by_address),
            cleanup_probability: 0.01,
            name: "general".to_string(),
            metrics: None,
        }
    }

    pub fn with_identifier<F>(mut self, f: F) -> Self
    where
        F: Fn(&RequestContext) -> String + Send + Sync + 'static,
    {
        self.identifier_fn = Arc::new(f);
        self
    }

    pub fn with_cleanup_probability(mut self, probability: f64) -> Self {
        self.cleanup_probability = probability;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn from_policy(policy: &RateLimitPolicy, cleanup_probability: f64) -> Self {
        Self::new(
            policy.requests_per_window,
            Duration::from_millis(policy.window_ms),
        )
        .with_cleanup_probability(cleanup_probability)
    }
}

/// Identifier for the general limiter: the caller address
pub fn by_address(ctx: &RequestContext) -> String {
    ctx.address.clone()
}

/// Identifier for the report limiter: address plus target, `global` without one
pub fn by_address_and_target(ctx: &RequestContext) -> String {
    format!(
        "{}:{}",
        ctx.address,
        ctx.target_id.as_deref().unwrap_or("global")
    )
}

/// Strict limiter for report generation (5 per minute by default)
pub fn report_limiter(config: &RateLimitConfig) -> RateLimiter {
    RateLimiter::new(
        RateLimiterOptions::from_policy(&config.report, config.cleanup_probability)
            .with_identifier(by_address_and_target)
            .named("report"),
    )
}

/// Looser limiter for everything else (30 per minute by default)
pub fn general_limiter(config: &RateLimitConfig) -> RateLimiter {
    RateLimiter::new(
        RateLimiterOptions::from_policy(&config.general, config.cleanup_probability)
            .named("general"),
    )
}
