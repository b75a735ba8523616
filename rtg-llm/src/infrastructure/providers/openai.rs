//! OpenAI-compatible backend
//!
//! Works with the OpenAI API and any service exposing `/chat/completions`.
//! Chat models answer in `choices[].message.content`, legacy completion
//! models in `choices[].text`; both decode to [`CompletionPayload::Choices`].

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use rtg_core::config::OpenAiConfig;

use super::{error_for_status, http_client};
use crate::domain::{CompletionBackend, CompletionPayload, CompletionRequest, LlmError};

pub struct OpenAiBackend {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl OpenAiBackend {
    pub fn new(api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            base_url: "https://api.openai.com/v1".to_string(),
            model: model.into(),
            max_tokens: 1024,
        }
    }

    pub fn from_config(config: &OpenAiConfig, max_tokens: u32) -> Self {
        Self::new(config.api_key.clone(), &config.model)
            .with_base_url(&config.base_url)
            .with_max_tokens(max_tokens)
    }

    /// Set custom base URL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn api_key(&self) -> Result<&str, LlmError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| LlmError::Configuration("OpenAI API key is not configured".to_string()))
    }
}

#[async_trait]
impl CompletionBackend for OpenAiBackend {
    fn id(&self) -> &'static str {
        "openai"
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    fn default_max_tokens(&self) -> u32 {
        self.max_tokens
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
        _cancel: &CancellationToken,
    ) -> Result<CompletionPayload, LlmError> {
        let api_key = self.api_key()?;
        let body = ChatRequest {
            model: &request.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
            max_tokens: request.max_tokens,
        };

        debug!(model = %request.model, "Sending request to OpenAI-compatible API");

        let response = self
            .client
            .post(self.chat_url())
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_for_status(self.id(), &request.model, response).await);
        }

        let chat: ChatResponse = response.json().await?;
        Ok(chat.into_payload())
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(self.api_key()?)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_for_status(self.id(), &self.model, response).await)
        }
    }
}

// === OpenAI API Types ===

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    #[serde(default)]
    message: Option<ChoiceMessage>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatResponse {
    fn into_payload(self) -> CompletionPayload {
        CompletionPayload::Choices(
            self.choices
                .into_iter()
                .filter_map(|c| c.message.and_then(|m| m.content).or(c.text))
                .collect(),
        )
    }
}
