//! Ports consumed and provided by the report pipeline

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::entities::{ReportFilters, ReportType, Row};
use super::error::{DatastoreError, ReportError};

/// Read-only relational datastore
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Run a parameterized statement and return its rows as JSON objects
    async fn query(&self, statement: &str, params: &[Value]) -> Result<Vec<Row>, DatastoreError>;
}

/// Persisted application settings
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Look up `key`; any failure yields `default`
    async fn get_setting(&self, key: &str, default: Value) -> Value;

    async fn get_string(&self, key: &str) -> Option<String> {
        match self.get_setting(key, Value::Null).await {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => None,
        }
    }
}

/// Options accompanying a single report request
#[derive(Debug, Clone, Default)]
pub struct ReportOptions {
    pub cancel: Option<CancellationToken>,
    /// Overrides the backend's default completion timeout
    pub timeout: Option<std::time::Duration>,
}

impl ReportOptions {
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Anything able to produce a single report; implemented by the report runner
#[async_trait]
pub trait ReportGenerator: Send + Sync {
    async fn generate(
        &self,
        report_type: &ReportType,
        template_id: &str,
        filters: &ReportFilters,
        options: ReportOptions,
    ) -> Result<String, ReportError>;
}
