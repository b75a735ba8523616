//! Retry and circuit breaker wrappers for completion backends
//!
//! - **Retry with backoff**: transient failures are retried with exponential
//!   backoff plus random jitter. The backoff sleep observes cancellation.
//! - **Circuit breaker**: failures are counted inside a monitoring window;
//!   crossing the threshold opens the circuit so callers fail fast until the
//!   recovery timeout allows a single half-open probe.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use rtg_core::config::{CircuitBreakerConfig, RetryConfig};

use crate::domain::LlmError;

/// Exponential backoff schedule
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub jitter_ratio: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig, max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_factor: config.backoff_factor,
            jitter_ratio: config.jitter_ratio,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Delay before retry number `attempt` (1-based), without jitter:
    /// `min(base * factor^(attempt-1), max)`
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exp = self.backoff_factor.powi(attempt.saturating_sub(1) as i32);
        let millis = self.base_delay.as_millis() as f64 * exp;
        Duration::from_millis(millis.min(self.max_delay.as_millis() as f64) as u64)
    }

    /// Delay with up to `jitter_ratio` extra on top
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.base_delay_for(attempt);
        let max_jitter = (delay.as_millis() as f64 * self.jitter_ratio) as u64;
        if max_jitter == 0 {
            return delay;
        }
        delay + Duration::from_millis(rand::thread_rng().gen_range(0..=max_jitter))
    }

    /// Run `op` until it succeeds, fails with a non-retryable error or the
    /// retries are used up. `op` receives the attempt number starting at 0.
    pub async fn run<T, F, Fut>(
        &self,
        provider: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, LlmError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let mut attempt = 0;
        loop {
            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !err.is_retryable() || attempt >= self.max_retries {
                return Err(err);
            }
            attempt += 1;

            let delay = match err.retry_after() {
                Some(hint) if hint < self.max_delay => hint,
                _ => self.delay_for(attempt),
            };
            warn!(
                provider,
                attempt,
                max_retries = self.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying completion request"
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(LlmError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerState {
    state: CircuitState,
    /// Failure times inside the monitoring window
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Per-backend circuit breaker
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    monitoring_period: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: &CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            failure_threshold: config.failure_threshold.max(1),
            recovery_timeout: Duration::from_millis(config.recovery_timeout_ms),
            monitoring_period: Duration::from_millis(config.monitoring_period_ms),
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failures: VecDeque::new(),
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open_error(&self) -> LlmError {
        LlmError::CircuitOpen {
            circuit: self.name.clone(),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Admit a call or fail fast with [`LlmError::CircuitOpen`]
    pub fn check(&self) -> Result<(), LlmError> {
        let mut state = self.lock();
        match state.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let ready = state
                    .opened_at
                    .is_some_and(|at| at.elapsed() >= self.recovery_timeout);
                if ready {
                    debug!(circuit = %self.name, "Circuit breaker transitioning to half-open");
                    state.state = CircuitState::HalfOpen;
                    state.probe_in_flight = true;
                    Ok(())
                } else {
                    Err(self.open_error())
                }
            }
            CircuitState::HalfOpen => {
                if state.probe_in_flight {
                    Err(self.open_error())
                } else {
                    state.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    pub fn on_success(&self) {
        let mut state = self.lock();
        if state.state == CircuitState::HalfOpen {
            info!(circuit = %self.name, "Circuit breaker closed after successful probe");
        }
        state.state = CircuitState::Closed;
        state.failures.clear();
        state.opened_at = None;
        state.probe_in_flight = false;
    }

    pub fn on_failure(&self) {
        let now = Instant::now();
        let mut state = self.lock();
        state.probe_in_flight = false;

        match state.state {
            CircuitState::HalfOpen => {
                warn!(circuit = %self.name, "Circuit breaker reopening after failed probe");
                state.state = CircuitState::Open;
                state.opened_at = Some(now);
            }
            CircuitState::Closed => {
                state.failures.push_back(now);
                while let Some(&oldest) = state.failures.front() {
                    if now.duration_since(oldest) > self.monitoring_period {
                        state.failures.pop_front();
                    } else {
                        break;
                    }
                }
                if state.failures.len() as u32 >= self.failure_threshold {
                    warn!(
                        circuit = %self.name,
                        failures = state.failures.len(),
                        threshold = self.failure_threshold,
                        "Circuit breaker opening due to failures"
                    );
                    state.state = CircuitState::Open;
                    state.opened_at = Some(now);
                    state.failures.clear();
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Release a half-open probe whose outcome says nothing about the backend
    pub fn on_abandoned(&self) {
        self.lock().probe_in_flight = false;
    }
}
