//! Locally-hosted backend (Ollama)
//!
//! Two transports reach the same model runtime:
//! - HTTP: `POST {base_url}/api/generate` with `stream: false`
//! - CLI: `ollama run <model>` as a child process, prompt on stdin
//!
//! The child process is spawned with `kill_on_drop`, so a call that is
//! cancelled or hits its deadline never leaves inference running.

use std::process::Stdio;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use rtg_core::config::{OllamaConfig, OllamaTransport};

use super::{error_for_status, http_client};
use crate::domain::{CompletionBackend, CompletionPayload, CompletionRequest, LlmError};

pub struct OllamaBackend {
    client: Client,
    base_url: String,
    model: String,
    max_tokens: u32,
    transport: OllamaTransport,
    binary: String,
}

impl OllamaBackend {
    /// HTTP transport against `base_url`
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            max_tokens: 512,
            transport: OllamaTransport::Http,
            binary: "ollama".to_string(),
        }
    }

    pub fn from_config(config: &OllamaConfig) -> Self {
        Self::new(&config.base_url, &config.model)
            .with_max_tokens(config.max_tokens)
            .with_transport(config.transport, &config.binary)
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Select the transport; `binary` is only used by the CLI transport
    pub fn with_transport(mut self, transport: OllamaTransport, binary: impl Into<String>) -> Self {
        self.transport = transport;
        self.binary = binary.into();
        self
    }

    pub fn transport(&self) -> OllamaTransport {
        self.transport
    }

    async fn complete_http(&self, request: &CompletionRequest) -> Result<CompletionPayload, LlmError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model: &request.model,
            prompt: &request.prompt,
            stream: false,
            options: GenerateOptions {
                num_predict: request.max_tokens,
            },
        };

        debug!(model = %request.model, "Sending request to Ollama");

        let response = self.client.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(error_for_status(self.id(), &request.model, response).await);
        }

        let generated: GenerateResponse = response.json().await?;
        Ok(CompletionPayload::Text(generated.response))
    }

    async fn complete_cli(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<CompletionPayload, LlmError> {
        debug!(model = %request.model, binary = %self.binary, "Spawning Ollama process");

        let mut child = Command::new(&self.binary)
            .arg("run")
            .arg(&request.model)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| LlmError::Process(format!("failed to spawn {}: {}", self.binary, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(request.prompt.as_bytes())
                .await
                .map_err(|e| LlmError::Process(format!("failed to write prompt: {}", e)))?;
            // closing stdin ends the prompt
            drop(stdin);
        }

        // Dropping the output future drops the child, which kills it.
        let output = tokio::select! {
            _ = cancel.cancelled() => {
                warn!(model = %request.model, "Ollama process killed on cancellation");
                return Err(LlmError::Cancelled);
            }
            output = child.wait_with_output() => output
                .map_err(|e| LlmError::Process(format!("failed to wait for process: {}", e)))?,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LlmError::Process(format!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                stderr.trim()
            )));
        }

        Ok(CompletionPayload::Text(
            String::from_utf8_lossy(&output.stdout).trim().to_string(),
        ))
    }
}

#[async_trait]
impl CompletionBackend for OllamaBackend {
    fn id(&self) -> &'static str {
        "ollama"
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
        cancel: &CancellationToken,
    ) -> Result<CompletionPayload, LlmError> {
        match self.transport {
            OllamaTransport::Http => self.complete_http(request).await,
            OllamaTransport::Cli => self.complete_cli(request, cancel).await,
        }
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        match self.transport {
            OllamaTransport::Http => {
                let response = self
                    .client
                    .get(format!("{}/api/tags", self.base_url))
                    .send()
                    .await?;
                if response.status().is_success() {
                    Ok(())
                } else {
                    Err(error_for_status(self.id(), &self.model, response).await)
                }
            }
            OllamaTransport::Cli => {
                let output = Command::new(&self.binary)
                    .arg("list")
                    .kill_on_drop(true)
                    .output()
                    .await
                    .map_err(|e| LlmError::Process(format!("failed to run {}: {}", self.binary, e)))?;
                if output.status.success() {
                    Ok(())
                } else {
                    Err(LlmError::Process(format!(
                        "{} list exited with {}",
                        self.binary, output.status
                    )))
                }
            }
        }
    }
}

// === Ollama API Types ===

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config() {
        let config = OllamaConfig {
            base_url: "http://localhost:11434/".to_string(),
            transport: OllamaTransport::Cli,
            ..OllamaConfig::default()
        };
        let backend = OllamaBackend::from_config(&config);
        assert_eq!(backend.base_url, "http://localhost:11434");
        assert_eq!(backend.default_model(), "llama3:latest");
        assert_eq!(backend.default_max_tokens(), 512);
        assert_eq!(backend.transport(), OllamaTransport::Cli);
    }

    #[test]
    fn test_generate_request_shape() {
        let body = GenerateRequest {
            model: "llama3",
            prompt: "hi",
            stream: false,
            options: GenerateOptions { num_predict: 64 },
        };
        let value = serde_json::to_value(body).unwrap();
        assert_eq!(value["stream"], false);
        assert_eq!(value["options"]["num_predict"], 64);
    }
}
