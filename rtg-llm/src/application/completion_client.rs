//! Completion client
//!
//! Dispatches a prompt to a named backend and applies the per-backend call
//! discipline: circuit breaker, per-attempt deadline, retry with backoff and
//! caller cancellation. Responses come back as plain text.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use rtg_core::MetricsCollector;
use rtg_core::config::{CircuitBreakerConfig, LlmConfig, RetryConfig};
use rtg_core::infrastructure::metrics::{names, tags};

use crate::domain::{BackendPolicy, CompletionBackend, CompletionRequest, LlmError};
use crate::infrastructure::{CircuitBreaker, OllamaBackend, OpenAiBackend, RetryPolicy};

/// Per-call options
#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    /// Caller cancellation; a fresh token is used when absent
    pub cancel: Option<CancellationToken>,
    /// Overrides the backend's default per-attempt deadline
    pub timeout: Option<Duration>,
    /// Overrides the backend's default retry count
    pub max_retries: Option<u32>,
    /// Overrides the backend's default output token limit
    pub max_tokens: Option<u32>,
}

impl CompletionOptions {
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

struct BackendSlot {
    backend: Arc<dyn CompletionBackend>,
    policy: BackendPolicy,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
}

/// Registry of completion backends keyed by provider name
pub struct CompletionClient {
    backends: BTreeMap<String, BackendSlot>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Default for CompletionClient {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionClient {
    /// Client without any backend
    pub fn new() -> Self {
        Self {
            backends: BTreeMap::new(),
            metrics: None,
        }
    }

    /// Record a `retry_count` sample for every call that needed retries
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Client with the local and remote backends built from configuration
    pub fn from_config(config: &LlmConfig) -> Self {
        let ollama = &config.ollama;
        let openai = &config.openai;

        Self::new()
            .with_backend(
                Arc::new(OllamaBackend::from_config(ollama)),
                BackendPolicy {
                    timeout: Duration::from_millis(ollama.timeout_ms),
                    max_retries: ollama.max_retries,
                },
                &config.retry,
                &ollama.circuit_breaker,
            )
            .with_backend(
                Arc::new(OpenAiBackend::from_config(openai, config.max_tokens)),
                BackendPolicy {
                    timeout: Duration::from_millis(openai.timeout_ms),
                    max_retries: openai.max_retries,
                },
                &config.retry,
                &openai.circuit_breaker,
            )
    }

    /// Register a backend under its [`CompletionBackend::id`]
    pub fn with_backend(
        mut self,
        backend: Arc<dyn CompletionBackend>,
        policy: BackendPolicy,
        retry: &RetryConfig,
        circuit_breaker: &CircuitBreakerConfig,
    ) -> Self {
        let id = backend.id().to_string();
        info!(
            provider = %id,
            model = backend.default_model(),
            timeout_ms = policy.timeout.as_millis() as u64,
            max_retries = policy.max_retries,
            "Registered completion backend"
        );
        let slot = BackendSlot {
            retry: RetryPolicy::from_config(retry, policy.max_retries),
            breaker: CircuitBreaker::new(id.clone(), circuit_breaker),
            backend,
            policy,
        };
        self.backends.insert(id, slot);
        self
    }

    fn slot(&self, provider: &str) -> Result<&BackendSlot, LlmError> {
        self.backends
            .get(&provider.trim().to_ascii_lowercase())
            .ok_or_else(|| LlmError::UnsupportedProvider(provider.to_string()))
    }

    /// Registered provider names
    pub fn providers(&self) -> Vec<&str> {
        self.backends.keys().map(String::as_str).collect()
    }

    pub fn supports(&self, provider: &str) -> bool {
        self.slot(provider).is_ok()
    }

    /// Default per-attempt deadline of a backend
    pub fn default_timeout(&self, provider: &str) -> Option<Duration> {
        self.slot(provider).ok().map(|s| s.policy.timeout)
    }

    /// Default model of a backend
    pub fn default_model(&self, provider: &str) -> Option<&str> {
        self.slot(provider).ok().map(|s| s.backend.default_model())
    }

    /// Circuit state of a backend
    pub fn circuit_state(&self, provider: &str) -> Option<crate::infrastructure::CircuitState> {
        self.slot(provider).ok().map(|s| s.breaker.state())
    }

    /// Get a completion for `prompt` from `provider`.
    ///
    /// `model` falls back to the backend default. Each attempt is bounded by
    /// the backend deadline (or `options.timeout`); exceeding it yields
    /// [`LlmError::Timeout`], and firing `options.cancel` yields
    /// [`LlmError::Cancelled`] with the in-flight attempt dropped.
    pub async fn complete(
        &self,
        prompt: &str,
        provider: &str,
        model: Option<&str>,
        options: CompletionOptions,
    ) -> Result<String, LlmError> {
        let slot = self.slot(provider)?;
        let cancel = options.cancel.unwrap_or_default();
        if cancel.is_cancelled() {
            return Err(LlmError::Cancelled);
        }

        let backend = slot.backend.as_ref();
        let request = CompletionRequest::new(
            prompt,
            model
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| backend.default_model()),
            options
                .max_tokens
                .unwrap_or_else(|| backend.default_max_tokens()),
        );
        let deadline = options.timeout.unwrap_or(slot.policy.timeout);
        let retry = match options.max_retries {
            Some(n) => slot.retry.clone().with_max_retries(n),
            None => slot.retry.clone(),
        };

        slot.breaker.check()?;

        info!(
            provider = backend.id(),
            model = %request.model,
            prompt_chars = prompt.len(),
            timeout_ms = deadline.as_millis() as u64,
            "Getting completion"
        );
        let started = Instant::now();
        let mut retries = 0;

        let result = retry
            .run(backend.id(), &cancel, |attempt| {
                retries = attempt;
                let request = &request;
                let cancel = &cancel;
                async move {
                    debug!(provider = backend.id(), attempt, "Completion attempt");
                    tokio::select! {
                        _ = cancel.cancelled() => Err(LlmError::Cancelled),
                        outcome = tokio::time::timeout(deadline, backend.complete(request, cancel)) => {
                            match outcome {
                                Ok(payload) => payload?.into_text(),
                                Err(_) => Err(LlmError::timeout(deadline)),
                            }
                        }
                    }
                }
            })
            .await;

        if let Some(metrics) = self.metrics.as_ref().filter(|_| retries > 0) {
            metrics.record(
                names::RETRY_COUNT,
                f64::from(retries),
                tags([("provider", backend.id())]),
            );
        }

        match &result {
            Ok(text) => {
                slot.breaker.on_success();
                info!(
                    provider = backend.id(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    response_chars = text.len(),
                    "Completion received"
                );
            }
            Err(e) if e.counts_against_circuit() => {
                slot.breaker.on_failure();
                error!(provider = backend.id(), error = %e, "Completion failed");
            }
            Err(e) => {
                slot.breaker.on_abandoned();
                debug!(provider = backend.id(), error = %e, "Completion abandoned");
            }
        }

        result
    }

    /// Probe a backend without generating anything
    pub async fn health_check(&self, provider: &str) -> Result<(), LlmError> {
        self.slot(provider)?.backend.health_check().await
    }
}
