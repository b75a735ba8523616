pub mod error;
pub mod payload;
pub mod provider;

pub use error::LlmError;
pub use payload::CompletionPayload;
pub use provider::{BackendPolicy, CompletionBackend, CompletionRequest};
