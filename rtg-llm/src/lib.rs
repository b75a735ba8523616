//! RTG LLM - completion backends for report generation
//!
//! Two interchangeable backends are supported: a locally-hosted one (Ollama,
//! over HTTP or a spawned CLI process) and a remotely-hosted, OpenAI-compatible
//! one. Both are reached through [`CompletionClient`], which normalizes
//! responses to plain text and applies deadlines, retries, circuit breaking
//! and cancellation per backend.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::{CompletionClient, CompletionOptions};
pub use domain::*;
pub use infrastructure::{CircuitState, OllamaBackend, OpenAiBackend};
