pub mod providers;
pub mod resilience;

pub use providers::{OllamaBackend, OpenAiBackend};
pub use resilience::{CircuitBreaker, CircuitState, RetryPolicy};
