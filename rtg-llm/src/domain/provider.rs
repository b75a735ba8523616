//! Completion backend trait and request type

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::error::LlmError;
use super::payload::CompletionPayload;

/// A single prompt-in, text-out request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
    pub model: String,
    pub max_tokens: u32,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>, model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            prompt: prompt.into(),
            model: model.into(),
            max_tokens,
        }
    }
}

/// Core trait for completion backends
///
/// Implementations perform exactly one attempt. Deadlines, retries and the
/// circuit breaker are applied by the
/// [`CompletionClient`](crate::application::CompletionClient). The trait is
/// object-safe and used through `Arc<dyn CompletionBackend>`.
///
/// # Cancellation
///
/// The returned future may be dropped at any await point. Backends that start
/// external work (a child process) must tie its lifetime to the future, and
/// should also watch `cancel` so the work stops as soon as the caller gives up.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Provider identifier (`"openai"`, `"ollama"`)
    fn id(&self) -> &'static str;

    /// Model used when the caller does not name one
    fn default_model(&self) -> &str;

    /// Output token limit used when the caller does not set one
    fn default_max_tokens(&self) -> u32;

    /// Generate a completion
    async fn complete(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<CompletionPayload, LlmError>;

    /// Check if the backend is reachable and can accept requests
    async fn health_check(&self) -> Result<(), LlmError>;
}

/// Per-backend call policy
#[derive(Debug, Clone)]
pub struct BackendPolicy {
    /// Deadline applied to every attempt
    pub timeout: Duration,
    /// Attempts after the first one
    pub max_retries: u32,
}
