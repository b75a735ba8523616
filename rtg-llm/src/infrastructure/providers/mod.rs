//! Completion backend implementations

pub mod ollama;
pub mod openai;

pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;

use reqwest::{Client, Response, StatusCode};
use tracing::{error, warn};

use crate::domain::LlmError;

/// Shared HTTP client. Deadlines are applied per call by the client wrapper.
pub(crate) fn http_client() -> Client {
    Client::builder()
        .pool_idle_timeout(std::time::Duration::from_secs(90))
        .build()
        .unwrap_or_else(|e| {
            error!(error = %e, "Failed to build HTTP client, using default client");
            Client::new()
        })
}

/// Map a non-success HTTP response onto an error kind
pub(crate) async fn error_for_status(provider: &str, model: &str, response: Response) -> LlmError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let text = response.text().await.unwrap_or_default();

    match status {
        StatusCode::TOO_MANY_REQUESTS => {
            warn!(provider, "Backend rate limited the request");
            LlmError::RateLimited {
                retry_after,
                message: text,
            }
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::auth(text),
        StatusCode::NOT_FOUND => LlmError::ModelNotFound(format!("{}: {}", model, text)),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            LlmError::InvalidRequest(text)
        }
        s if s.is_server_error() => LlmError::ServiceUnavailable(format!("{}: {}", s, text)),
        s => {
            error!(provider, status = %s, "Backend API error: {}", text);
            LlmError::InvalidResponse(format!("API error {}: {}", s, text))
        }
    }
}
