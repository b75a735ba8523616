//! Common test utilities for rtg-llm
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use rtg_core::config::{CircuitBreakerConfig, RetryConfig};
use rtg_llm::{CompletionBackend, CompletionPayload, CompletionRequest, LlmError};

/// One scripted backend reply
pub enum Step {
    Reply(CompletionPayload),
    Fail(LlmError),
    /// Sleep before answering (observes the per-attempt deadline)
    Delay(Duration, CompletionPayload),
}

/// Backend answering from a script; the last step repeats
pub struct MockBackend {
    id: &'static str,
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicU32,
    pub last_request: Mutex<Option<CompletionRequest>>,
}

impl MockBackend {
    pub fn new(id: &'static str, steps: Vec<Step>) -> Self {
        Self {
            id,
            steps: Mutex::new(steps.into()),
            calls: AtomicU32::new(0),
            last_request: Mutex::new(None),
        }
    }

    pub fn text(id: &'static str, text: &str) -> Self {
        Self::new(id, vec![Step::Reply(CompletionPayload::Text(text.to_string()))])
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Step {
        let mut steps = self.steps.lock().unwrap();
        if steps.len() > 1 {
            return steps.pop_front().unwrap();
        }
        match steps.front() {
            Some(Step::Reply(p)) => Step::Reply(p.clone()),
            Some(Step::Fail(e)) => Step::Fail(e.clone()),
            Some(Step::Delay(d, p)) => Step::Delay(*d, p.clone()),
            None => Step::Fail(LlmError::InvalidResponse("script exhausted".into())),
        }
    }
}

#[async_trait]
impl CompletionBackend for MockBackend {
    fn id(&self) -> &'static str {
        self.id
    }

    fn default_model(&self) -> &str {
        "mock-model"
    }

    fn default_max_tokens(&self) -> u32 {
        256
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
        _cancel: &CancellationToken,
    ) -> Result<CompletionPayload, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());
        match self.next_step() {
            Step::Reply(payload) => Ok(payload),
            Step::Fail(err) => Err(err),
            Step::Delay(delay, payload) => {
                tokio::time::sleep(delay).await;
                Ok(payload)
            }
        }
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        Ok(())
    }
}

pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        base_delay_ms: 10,
        max_delay_ms: 100,
        backoff_factor: 2.0,
        jitter_ratio: 0.1,
    }
}

pub fn breaker(threshold: u32) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: threshold,
        recovery_timeout_ms: 30_000,
        monitoring_period_ms: 60_000,
    }
}
