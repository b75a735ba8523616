//! Common test utilities for rtg-orchestrator
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use rtg_core::config::{CircuitBreakerConfig, RetryConfig};
use rtg_core::{CacheManager, CacheOptions, Config, MetricsCollector, MetricsOptions};
use rtg_llm::{
    BackendPolicy, CompletionBackend, CompletionClient, CompletionPayload, CompletionRequest,
    LlmError,
};
use rtg_orchestrator::{
    Datastore, DatastoreError, ReportError, ReportFilters, ReportGenerator, ReportOptions,
    ReportRunner, ReportType, Row, SettingsStore,
};
use rtg_orchestrator::infrastructure::StaticSettingsStore;

pub const TEMPLATE_ID: &str = "6f1c2b9e-4d3a-4e8b-9c7d-1a2b3c4d5e6f";
pub const PROJECT_ID: &str = "0a4e7c3d-5b1f-4c2a-8e9d-7f6a5b4c3d2e";

enum Route {
    Rows(Vec<Row>),
    Fail(String),
}

/// Datastore answering by statement substring; the first matching route wins
/// and unmatched statements return no rows
#[derive(Default)]
pub struct MockDatastore {
    routes: Mutex<Vec<(String, Route)>>,
    statements: Mutex<Vec<String>>,
}

fn to_row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        other => panic!("mock rows must be objects, got {other}"),
    }
}

impl MockDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, fragment: &str, rows: Vec<Value>) -> Self {
        let rows = rows.into_iter().map(to_row).collect();
        self.routes
            .lock()
            .unwrap()
            .push((fragment.to_string(), Route::Rows(rows)));
        self
    }

    pub fn fail(self, fragment: &str, message: &str) -> Self {
        self.routes
            .lock()
            .unwrap()
            .push((fragment.to_string(), Route::Fail(message.to_string())));
        self
    }

    /// Statements issued so far, in order
    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    pub fn count_matching(&self, fragment: &str) -> usize {
        self.statements
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.contains(fragment))
            .count()
    }
}

#[async_trait]
impl Datastore for MockDatastore {
    async fn query(&self, statement: &str, _params: &[Value]) -> Result<Vec<Row>, DatastoreError> {
        self.statements.lock().unwrap().push(statement.to_string());
        let routes = self.routes.lock().unwrap();
        match routes.iter().find(|(fragment, _)| statement.contains(fragment.as_str())) {
            Some((_, Route::Rows(rows))) => Ok(rows.clone()),
            Some((_, Route::Fail(message))) => Err(DatastoreError::Query(message.clone())),
            None => Ok(Vec::new()),
        }
    }
}

/// How a [`EchoBackend`] answers
#[derive(Clone)]
pub enum Reply {
    /// Return the prompt itself
    Echo,
    Fail(LlmError),
    /// Sleep, then echo
    Delay(Duration),
}

/// Completion backend returning the prompt it was given
pub struct EchoBackend {
    id: &'static str,
    reply: Reply,
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl EchoBackend {
    pub fn new(id: &'static str, reply: Reply) -> Self {
        Self {
            id,
            reply,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn echo(id: &'static str) -> Self {
        Self::new(id, Reply::Echo)
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionBackend for EchoBackend {
    fn id(&self) -> &'static str {
        self.id
    }

    fn default_model(&self) -> &str {
        "echo-model"
    }

    fn default_max_tokens(&self) -> u32 {
        512
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<CompletionPayload, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        match &self.reply {
            Reply::Echo => Ok(CompletionPayload::Text(request.prompt.clone())),
            Reply::Fail(err) => Err(err.clone()),
            Reply::Delay(delay) => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(LlmError::Cancelled),
                    _ = tokio::time::sleep(*delay) => Ok(CompletionPayload::Text(request.prompt.clone())),
                }
            }
        }
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        Ok(())
    }
}

pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        base_delay_ms: 1,
        max_delay_ms: 5,
        backoff_factor: 2.0,
        jitter_ratio: 0.0,
    }
}

pub fn client(backends: Vec<(Arc<EchoBackend>, Duration)>) -> CompletionClient {
    backends
        .into_iter()
        .fold(CompletionClient::new(), |client, (backend, timeout)| {
            client.with_backend(
                backend,
                BackendPolicy {
                    timeout,
                    max_retries: 0,
                },
                &fast_retry(),
                &CircuitBreakerConfig::default(),
            )
        })
}

pub fn metrics() -> Arc<MetricsCollector> {
    Arc::new(MetricsCollector::new(MetricsOptions::default()))
}

pub fn cache() -> Arc<CacheManager> {
    Arc::new(CacheManager::new(CacheOptions::default()))
}

pub fn settings() -> Arc<dyn SettingsStore> {
    Arc::new(StaticSettingsStore::new())
}

/// Runner over the given datastore and backends with default configuration
pub fn runner(
    datastore: Arc<MockDatastore>,
    settings: Arc<dyn SettingsStore>,
    llm: CompletionClient,
    metrics: Arc<MetricsCollector>,
) -> ReportRunner {
    ReportRunner::new(
        datastore,
        settings,
        cache(),
        Arc::new(llm),
        metrics,
        &Config::default(),
    )
}

pub fn template_row(content: &str) -> Value {
    serde_json::json!({ "id": TEMPLATE_ID, "name": "Inventory", "content": content })
}

pub fn project_row() -> Value {
    serde_json::json!({
        "id": PROJECT_ID,
        "name": "Payments Gateway",
        "status": "active",
        "business_unit": "Finance",
        "criticality": "High",
    })
}

/// Report generator that sleeps, then succeeds unless the target is listed
/// as failing. Tracks how many calls are in flight.
pub struct StubGenerator {
    delay: Duration,
    failing: HashSet<String>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    pub calls: Mutex<Vec<Option<String>>>,
    pub cancelled: AtomicUsize,
}

impl StubGenerator {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            failing: HashSet::new(),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            cancelled: AtomicUsize::new(0),
        }
    }

    pub fn failing_for(mut self, target: &str) -> Self {
        self.failing.insert(target.to_string());
        self
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ReportGenerator for StubGenerator {
    async fn generate(
        &self,
        report_type: &ReportType,
        _template_id: &str,
        filters: &ReportFilters,
        options: ReportOptions,
    ) -> Result<String, ReportError> {
        let target = filters.target().map(str::to_string);
        self.calls.lock().unwrap().push(target.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let cancel = options.cancel.unwrap_or_default();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                self.cancelled.fetch_add(1, Ordering::SeqCst);
                Err(ReportError::Aborted)
            }
            _ = tokio::time::sleep(self.delay) => Ok(()),
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome?;

        match target {
            Some(t) if self.failing.contains(&t) => {
                Err(ReportError::ProviderError(format!("backend refused {}", t)))
            }
            Some(t) => Ok(format!("{} report for {}", report_type, t)),
            None => Ok(format!("{} report", report_type)),
        }
    }
}

/// Fixed valid target ids
pub fn targets(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| format!("{:08x}-1111-4222-8333-{:012x}", i + 1, i + 1))
        .collect()
}

pub fn settings_with(pairs: &[(&str, Value)]) -> Arc<dyn SettingsStore> {
    let store = pairs
        .iter()
        .fold(StaticSettingsStore::new(), |store, (k, v)| store.with(*k, v.clone()));
    Arc::new(store)
}

pub fn by_target(results: &[rtg_orchestrator::BatchTargetResult]) -> HashMap<String, String> {
    results
        .iter()
        .map(|r| (r.target_id.clone(), format!("{:?}", r.status)))
        .collect()
}
