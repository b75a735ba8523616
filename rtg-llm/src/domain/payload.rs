//! Normalized completion payloads
//!
//! Backends decode their native response into a [`CompletionPayload`] and the
//! client turns it into plain text right away. Nothing past the adapter
//! boundary looks at response shape.

use serde::{Deserialize, Serialize};

use super::error::LlmError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum CompletionPayload {
    /// Bare completion string
    Text(String),
    /// Candidate texts in backend order; the first non-empty one wins
    Choices(Vec<String>),
}

impl CompletionPayload {
    /// Plain text of the completion. Whitespace-only output is rejected.
    pub fn into_text(self) -> Result<String, LlmError> {
        let text = match self {
            CompletionPayload::Text(text) => Some(text),
            CompletionPayload::Choices(choices) => {
                choices.into_iter().find(|c| !c.trim().is_empty())
            }
        };

        match text {
            Some(text) if !text.trim().is_empty() => Ok(text),
            _ => Err(LlmError::InvalidResponse(
                "No valid completion text returned".to_string(),
            )),
        }
    }
}
