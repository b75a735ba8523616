//! In-memory time-series metrics
//!
//! Samples are kept per metric name in a capped, append-only list and pruned
//! by a retention cycle. Everything on the recording path is a short critical
//! section over in-process data; export and health scoring read a snapshot.

mod collector;
mod health;
mod prometheus;

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::MetricsConfig;

pub use collector::{MetricTimer, MetricsCollector};
pub use health::{HealthReport, HealthStatus};

/// Well-known metric names
pub mod names {
    pub const REPORT_GENERATION_DURATION: &str = "report_generation_duration";
    pub const REPORT_GENERATION_ERRORS: &str = "report_generation_errors";
    pub const REPORT_GENERATION_SUCCESS: &str = "report_generation_success";
    pub const TEMPLATE_LOAD_DURATION: &str = "template_load_duration";
    pub const DATA_FETCH_DURATION: &str = "data_fetch_duration";
    pub const LLM_CALL_DURATION: &str = "llm_call_duration";
    pub const CACHE_HIT_RATIO: &str = "cache_hit_ratio";
    pub const RETRY_COUNT: &str = "retry_count";
    pub const BATCH_GENERATION_DURATION: &str = "batch_generation_duration";
    pub const BATCH_TARGET_SUCCESS: &str = "batch_target_success";
    pub const BATCH_TARGET_ERRORS: &str = "batch_target_errors";
    pub const SCHEDULED_RUN_DURATION: &str = "scheduled_run_duration";
    pub const SCHEDULED_RUN_ERRORS: &str = "scheduled_run_errors";
    pub const RATE_LIMIT_REJECTIONS: &str = "rate_limit_rejections";
}

/// Sorted tag set; sorting keeps export grouping stable
pub type Tags = BTreeMap<String, String>;

/// Build a [`Tags`] map from string pairs
pub fn tags<K, V, I>(pairs: I) -> Tags
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// One recorded observation
#[derive(Debug, Clone, Serialize)]
pub struct MetricSample {
    pub name: String,
    pub value: f64,
    pub tags: Tags,
    pub timestamp: DateTime<Utc>,
}

impl MetricSample {
    fn matches(&self, filter: &Tags) -> bool {
        filter
            .iter()
            .all(|(k, v)| self.tags.get(k).is_some_and(|actual| actual == v))
    }
}

/// Aggregate statistics for one metric
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub p95: f64,
    pub p99: f64,
}

impl MetricStats {
    /// Nearest-rank style percentiles: index `floor(n * q)` clamped to the last element
    pub fn from_values(mut values: Vec<f64>) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        values.sort_by(|a, b| a.total_cmp(b));
        let n = values.len();
        let at = |q: f64| values[((n as f64 * q).floor() as usize).min(n - 1)];
        Self {
            count: n,
            min: values[0],
            max: values[n - 1],
            avg: values.iter().sum::<f64>() / n as f64,
            p95: at(0.95),
            p99: at(0.99),
        }
    }
}

/// Options used to build a [`MetricsCollector`]
#[derive(Debug, Clone)]
pub struct MetricsOptions {
    pub retention_period: Duration,
    pub max_samples_per_metric: usize,
    pub enabled: bool,
}

impl Default for MetricsOptions {
    fn default() -> Self {
        Self::from(&MetricsConfig::default())
    }
}

impl From<&MetricsConfig> for MetricsOptions {
    fn from(config: &MetricsConfig) -> Self {
        Self {
            retention_period: Duration::from_millis(config.retention_period_ms),
            max_samples_per_metric: config.max_samples_per_metric,
            enabled: config.enabled,
        }
    }
}
