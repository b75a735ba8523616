//! Sliding window limiter

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use super::RateLimiterOptions;
use super::types::{RateLimitDecision, RequestContext};
use crate::infrastructure::metrics::{MetricsCollector, names, tags};

/// Per-identifier sliding window admission control
pub struct RateLimiter {
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
    options: RateLimiterOptions,
}

impl RateLimiter {
    pub fn new(options: RateLimiterOptions) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            options,
        }
    }

    pub fn limit(&self) -> u32 {
        self.options.requests_per_window
    }

    pub fn window(&self) -> Duration {
        self.options.window
    }

    /// Report rejections to `metrics` from now on
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.options.metrics = Some(metrics);
        self
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, VecDeque<Instant>>> {
        self.windows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop timestamps that left the window `[now - window, now]`
    fn prune(history: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(oldest) = history.front() {
            if now.saturating_duration_since(*oldest) > window {
                history.pop_front();
            } else {
                break;
            }
        }
    }

    fn maybe_cleanup(&self) {
        if self.options.cleanup_probability > 0.0
            && rand::random::<f64>() < self.options.cleanup_probability
        {
            self.cleanup();
        }
    }

    /// Admit and record the request if the identifier is under its limit
    pub fn is_allowed(&self, identifier: &str) -> bool {
        self.check(identifier).is_allowed()
    }

    /// Admission check with quota metadata
    pub fn check(&self, identifier: &str) -> RateLimitDecision {
        self.maybe_cleanup();

        let now = Instant::now();
        let window = self.options.window;
        let limit = self.options.requests_per_window;

        let mut windows = self.lock();
        let history = windows.entry(identifier.to_string()).or_default();
        Self::prune(history, now, window);

        if (history.len() as u64) < u64::from(limit) {
            history.push_back(now);
            let remaining = limit.saturating_sub(history.len() as u32);
            let reset_after = history
                .front()
                .map(|oldest| (*oldest + window).saturating_duration_since(now))
                .unwrap_or(window);
            RateLimitDecision::Allowed {
                limit,
                remaining,
                reset_after,
            }
        } else {
            let retry_after = history
                .front()
                .map(|oldest| (*oldest + window).saturating_duration_since(now))
                .unwrap_or_default();
            drop(windows);
            if let Some(metrics) = &self.options.metrics {
                metrics.increment(
                    names::RATE_LIMIT_REJECTIONS,
                    tags([("limiter", self.options.name.as_str())]),
                );
            }
            debug!(
                limiter = %self.options.name,
                identifier = %identifier,
                retry_after_ms = retry_after.as_millis() as u64,
                "Request rate limited"
            );
            RateLimitDecision::Limited { limit, retry_after }
        }
    }

    /// Derive the identifier with the configured extractor and check it
    pub fn admit(&self, ctx: &RequestContext) -> RateLimitDecision {
        let identifier = (self.options.identifier_fn)(ctx);
        let decision = self.check(&identifier);
        if !decision.is_allowed() {
            warn!(
                limiter = %self.options.name,
                identifier = %identifier,
                "Rejected request over rate limit"
            );
        }
        decision
    }

    pub fn remaining_requests(&self, identifier: &str) -> u32 {
        let now = Instant::now();
        let mut windows = self.lock();
        match windows.get_mut(identifier) {
            Some(history) => {
                Self::prune(history, now, self.options.window);
                self.options
                    .requests_per_window
                    .saturating_sub(history.len() as u32)
            }
            None => self.options.requests_per_window,
        }
    }

    /// Time until the oldest request in the window expires; `None` with an empty window
    pub fn reset_time(&self, identifier: &str) -> Option<Duration> {
        let now = Instant::now();
        let mut windows = self.lock();
        let history = windows.get_mut(identifier)?;
        Self::prune(history, now, self.options.window);
        history
            .front()
            .map(|oldest| (*oldest + self.options.window).saturating_duration_since(now))
    }

    /// Drop identifiers whose whole history predates `now - 2 * window`
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let horizon = self.options.window * 2;
        let mut windows = self.lock();
        let before = windows.len();
        windows.retain(|_, history| {
            history
                .back()
                .is_some_and(|newest| now.saturating_duration_since(*newest) <= horizon)
        });
        let removed = before - windows.len();
        if removed > 0 {
            debug!(limiter = %self.options.name, removed, "Pruned idle rate limit identifiers");
        }
        removed
    }

    pub fn tracked_identifiers(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(limit: u32, window_ms: u64) -> RateLimiter {
        RateLimiter::new(
            RateLimiterOptions::new(limit, Duration::from_millis(window_ms))
                .with_cleanup_probability(0.0),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejects_after_limit_and_reports_exact_retry_after() {
        let limiter = limiter(3, 60_000);
        assert!(limiter.is_allowed("a"));
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(limiter.is_allowed("a"));
        assert!(limiter.is_allowed("a"));

        match limiter.check("a") {
            RateLimitDecision::Limited { retry_after, limit } => {
                assert_eq!(limit, 3);
                // oldest was admitted 10s ago
                assert_eq!(retry_after, Duration::from_secs(50));
            }
            other => panic!("expected Limited, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_admits_again_after_oldest_leaves_window() {
        let limiter = limiter(2, 1_000);
        assert!(limiter.is_allowed("a"));
        assert!(limiter.is_allowed("a"));
        assert!(!limiter.is_allowed("a"));

        tokio::time::advance(Duration::from_millis(1_001)).await;
        assert!(limiter.is_allowed("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_requests_are_not_recorded() {
        let limiter = limiter(1, 1_000);
        assert!(limiter.is_allowed("a"));
        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(!limiter.is_allowed("a"));
        tokio::time::advance(Duration::from_millis(501)).await;
        // only the first admitted call counted
        assert!(limiter.is_allowed("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_and_reset_time() {
        let limiter = limiter(5, 60_000);
        assert_eq!(limiter.remaining_requests("a"), 5);
        assert_eq!(limiter.reset_time("a"), None);

        limiter.is_allowed("a");
        limiter.is_allowed("a");
        assert_eq!(limiter.remaining_requests("a"), 3);

        tokio::time::advance(Duration::from_secs(15)).await;
        assert_eq!(limiter.reset_time("a"), Some(Duration::from_secs(45)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_drops_only_stale_identifiers() {
        let limiter = limiter(5, 1_000);
        limiter.is_allowed("old");
        tokio::time::advance(Duration::from_millis(2_500)).await;
        limiter.is_allowed("new");

        assert_eq!(limiter.cleanup(), 1);
        assert_eq!(limiter.tracked_identifiers(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_identifiers_are_independent() {
        let limiter = limiter(1, 60_000);
        assert!(limiter.is_allowed("a"));
        assert!(limiter.is_allowed("b"));
        assert!(!limiter.is_allowed("a"));
    }
}
