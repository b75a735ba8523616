//! Report generation domain entities

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single datastore row, decoded column-by-column into JSON
pub type Row = Map<String, Value>;

/// Kind of report requested by the caller
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ReportType {
    ProjectPortfolio,
    ComponentInventory,
    SafeguardStatus,
    ThreatModelSummary,
    /// Any other type; only the general token pass applies
    Custom(String),
}

impl ReportType {
    pub fn as_str(&self) -> &str {
        match self {
            ReportType::ProjectPortfolio => "project_portfolio",
            ReportType::ComponentInventory => "component_inventory",
            ReportType::SafeguardStatus => "safeguard_status",
            ReportType::ThreatModelSummary => "threat_model_summary",
            ReportType::Custom(name) => name,
        }
    }
}

impl From<String> for ReportType {
    fn from(value: String) -> Self {
        match value.trim().to_lowercase().as_str() {
            "project_portfolio" => ReportType::ProjectPortfolio,
            "component_inventory" => ReportType::ComponentInventory,
            "safeguard_status" => ReportType::SafeguardStatus,
            "threat_model_summary" => ReportType::ThreatModelSummary,
            _ => ReportType::Custom(value),
        }
    }
}

impl From<&str> for ReportType {
    fn from(value: &str) -> Self {
        ReportType::from(value.to_string())
    }
}

impl From<ReportType> for String {
    fn from(value: ReportType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a resolved template came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateSource {
    ManagedTemplate,
    TemplateVersion,
    LegacyTemplate,
    CustomPrompt,
}

/// A resolved report template. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub name: String,
    pub content: String,
    pub source: TemplateSource,
    /// Preferred completion backend, if the template carries one
    pub provider: Option<String>,
    pub model: Option<String>,
}

/// Explicit backend selection for one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderOverride {
    pub provider: String,
    pub model: Option<String>,
}

/// Per-request filters. Unknown keys are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportFilters {
    #[serde(
        default,
        alias = "projectUuid",
        alias = "project_id",
        alias = "projectId",
        alias = "target_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub target_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, alias = "ci_example", skip_serializing_if = "Option::is_none")]
    pub ci_example: Option<String>,
    #[serde(default, alias = "pipeline_steps", skip_serializing_if = "Option::is_none")]
    pub pipeline_steps: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Value>,
    #[serde(
        default,
        alias = "aws_accounts",
        alias = "awsAccounts",
        skip_serializing_if = "Option::is_none"
    )]
    pub cloud_accounts: Option<Value>,
    #[serde(default, alias = "provider_override", skip_serializing_if = "Option::is_none")]
    pub provider_override: Option<ProviderOverride>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ReportFilters {
    pub fn for_target(target_id: impl Into<String>) -> Self {
        Self {
            target_id: Some(target_id.into()),
            ..Default::default()
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>, model: Option<String>) -> Self {
        self.provider_override = Some(ProviderOverride {
            provider: provider.into(),
            model,
        });
        self
    }

    /// Target id with surrounding whitespace removed; blank counts as absent
    pub fn target(&self) -> Option<&str> {
        self.target_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

/// Live domain data assembled for one request
#[derive(Debug, Clone, Default, Serialize)]
pub struct DomainContext {
    pub target_id: Option<String>,
    /// The scoped project when a target id was given
    pub selected_project: Option<Value>,
    pub projects: Vec<Value>,
    pub components: Vec<Value>,
    pub threat_models: Vec<Value>,
    pub threats: Vec<Value>,
    pub vulnerabilities: Vec<Value>,
    pub safeguards: Vec<Value>,
    /// Safeguards keyed by threat id
    pub threat_safeguards: Map<String, Value>,
    /// Datasets that fell back to empty because their fetch failed
    pub degraded: Vec<String>,
    pub cache_hits: u32,
    pub cache_misses: u32,
}

impl DomainContext {
    pub fn is_scoped(&self) -> bool {
        self.target_id.is_some()
    }

    pub fn cache_hit_ratio(&self) -> Option<f64> {
        let total = self.cache_hits + self.cache_misses;
        (total > 0).then(|| f64::from(self.cache_hits) / f64::from(total))
    }
}

/// Outcome of a single report generation with its diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedReport {
    pub content: String,
    pub provider: String,
    pub model: Option<String>,
    /// Unresolved placeholders and degraded datasets
    pub warnings: Vec<String>,
    pub prompt_chars: usize,
    pub generated_at: DateTime<Utc>,
}

/// Status of one target inside a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    Success,
    Failed,
}

/// Per-target entry of a batch job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchTargetResult {
    pub target_id: String,
    pub status: TargetStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate of a batch run
///
/// `completed + failed` never exceeds `total_targets`; the two are equal only
/// once the job is finalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    pub batch_id: String,
    pub report_type: ReportType,
    pub template_id: String,
    pub total_targets: usize,
    pub concurrency_limit: usize,
    pub completed: usize,
    pub failed: usize,
    /// Ordered like the validated target list, not by completion
    pub results: Vec<BatchTargetResult>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

impl BatchJob {
    pub fn new(
        batch_id: String,
        report_type: ReportType,
        template_id: String,
        total_targets: usize,
        concurrency_limit: usize,
    ) -> Self {
        Self {
            batch_id,
            report_type,
            template_id,
            total_targets,
            concurrency_limit,
            completed: 0,
            failed: 0,
            results: Vec::with_capacity(total_targets),
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    pub fn errors(&self) -> impl Iterator<Item = &BatchTargetResult> {
        self.results
            .iter()
            .filter(|r| r.status == TargetStatus::Failed)
    }

    pub(crate) fn push(&mut self, result: BatchTargetResult) {
        match result.status {
            TargetStatus::Success => self.completed += 1,
            TargetStatus::Failed => self.failed += 1,
        }
        self.results.push(result);
    }

    pub(crate) fn finish(&mut self) {
        let now = Utc::now();
        self.duration_ms = Some((now - self.started_at).num_milliseconds().max(0) as u64);
        self.finished_at = Some(now);
    }
}

/// Progress notifications emitted by a streaming batch run
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BatchProgress {
    BatchStarted {
        batch_id: String,
        total_targets: usize,
        concurrency_limit: usize,
    },
    TargetStarted {
        batch_id: String,
        target_id: String,
    },
    TargetCompleted {
        batch_id: String,
        target_id: String,
        progress: f64,
    },
    TargetFailed {
        batch_id: String,
        target_id: String,
        error: String,
        progress: f64,
    },
    BatchCompleted {
        batch_id: String,
        completed: usize,
        failed: usize,
        duration_ms: u64,
    },
}

/// Up-front duration estimate for a batch
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BatchEstimate {
    pub serial: DurationEstimate,
    pub parallel: DurationEstimate,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DurationEstimate {
    pub total_ms: u64,
    pub total_minutes: f64,
}

impl DurationEstimate {
    pub fn from_millis(total_ms: u64) -> Self {
        Self {
            total_ms,
            total_minutes: (total_ms as f64 / 60_000.0 * 10.0).round() / 10.0,
        }
    }
}
