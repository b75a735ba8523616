//! Prompt assembly: normalization, budgeted data injection, type-specific
//! tables and the instructional preamble

pub mod budget;
pub mod derived;
pub mod injection;
pub mod ordering;
pub mod tokens;

use chrono::{DateTime, Utc};
use rtg_core::Config;
use rtg_core::config::BudgetConfig;
use serde_json::Value;

use crate::domain::{DomainContext, ReportFilters, ReportType};

pub use budget::{BudgetedJson, serialize_with_budget};
pub use tokens::{TokenMap, normalize, substitute, unresolved};

/// Prepended to every prompt that does not already carry equivalent
/// instructions
pub const PREAMBLE: &str = "Use only the data provided below. Do not invent projects, \
components, threats, vulnerabilities or safeguards that are not present in the data. \
If a section has no data, say so explicitly.\n\n";

const PREAMBLE_MARKERS: &[&str] = &["use only the data provided", "do not invent"];

/// True when `text` already instructs the model to stay within the data
pub fn has_preamble(text: &str) -> bool {
    let lower = text.to_lowercase();
    PREAMBLE_MARKERS.iter().any(|m| lower.contains(m))
}

/// Rendering tunables, taken from configuration
#[derive(Debug, Clone)]
pub struct PromptSettings {
    pub budgets: BudgetConfig,
    pub max_items_per_table: usize,
    pub max_components: usize,
    pub recent_activity_days: i64,
    pub default_author: String,
    pub ci_example: String,
    pub resiliency_target: String,
    pub environment: String,
}

impl From<&Config> for PromptSettings {
    fn from(config: &Config) -> Self {
        let reports = &config.reports;
        Self {
            budgets: reports.budgets.clone(),
            max_items_per_table: reports.max_items_per_table,
            max_components: reports.max_components,
            recent_activity_days: reports.recent_activity_days,
            default_author: reports.default_author.clone(),
            ci_example: reports.ci_example.clone(),
            resiliency_target: reports.resiliency_target.clone(),
            environment: config.environment.clone(),
        }
    }
}

impl Default for PromptSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// Datasets in their deterministic serialization order
pub struct SortedData<'a> {
    pub components: &'a [Value],
    pub threats: &'a [Value],
    pub vulnerabilities: &'a [Value],
}

/// A prompt ready for the completion backend
#[derive(Debug, Clone)]
pub struct BuiltPrompt {
    pub text: String,
    /// Placeholders left unresolved
    pub unresolved: Vec<String>,
}

/// Turn template content into the final prompt for one request.
///
/// Order: legacy syntax normalization, general pass (skipping tokens the
/// type-specific pass owns), type-specific pass, preamble.
pub fn build_prompt(
    template: &str,
    report_type: &ReportType,
    ctx: &DomainContext,
    filters: &ReportFilters,
    settings: &PromptSettings,
    now: DateTime<Utc>,
) -> BuiltPrompt {
    let mut components = ctx.components.clone();
    let mut threats = ctx.threats.clone();
    let mut vulnerabilities = ctx.vulnerabilities.clone();
    ordering::sort_components(&mut components);
    ordering::sort_threats(&mut threats);
    ordering::sort_vulnerabilities(&mut vulnerabilities);
    let data = SortedData {
        components: &components,
        threats: &threats,
        vulnerabilities: &vulnerabilities,
    };

    let owned = injection::owned_tokens(report_type);
    let general = derived::general_tokens(ctx, &data, filters, settings, now);
    let specific = injection::type_specific_tokens(report_type, ctx, &data, settings, now);

    let text = normalize(template);
    let text = substitute(&text, &general, owned);
    let text = if specific.is_empty() {
        text
    } else {
        substitute(&text, &specific, &[])
    };

    let unresolved = unresolved(&text);
    let text = if has_preamble(&text) {
        text
    } else {
        format!("{}{}", PREAMBLE, text)
    };

    BuiltPrompt { text, unresolved }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        injection::parse_timestamp("2026-03-04T10:15:30Z").unwrap()
    }

    fn context() -> DomainContext {
        DomainContext {
            target_id: Some("P1".into()),
            selected_project: Some(json!({"id": "P1", "name": "Payments Core"})),
            projects: vec![json!({"id": "P1", "name": "Payments Core"})],
            components: vec![json!({"id": "c2", "name": "web"}), json!({"id": "c1", "name": "api"})],
            threat_models: vec![json!({
                "id": "tm1", "name": "Checkout", "status": "Active", "project_name": "Payments Core",
                "created_at": "2026-02-01T00:00:00Z", "updated_at": "2026-02-02T00:00:00Z"
            })],
            threats: vec![json!({"title": "SQLi", "severity": "High"})],
            ..Default::default()
        }
    }

    #[test]
    fn test_preamble_added_once() {
        let settings = PromptSettings::default();
        let filters = ReportFilters::default();
        let once = build_prompt("Summarize PROJECT_KEY", &ReportType::Custom("c".into()), &context(), &filters, &settings, now());
        assert!(once.text.starts_with(PREAMBLE));
        assert!(once.text.ends_with("Summarize payments-core"));

        let twice = build_prompt(&once.text, &ReportType::Custom("c".into()), &context(), &filters, &settings, now());
        assert_eq!(once.text, twice.text);
    }

    #[test]
    fn test_type_specific_pass_owns_conflicting_tokens() {
        let settings = PromptSettings::default();
        let built = build_prompt(
            "Do not invent data.\n{{THREAT_MODEL_TABLE}}",
            &ReportType::ThreatModelSummary,
            &context(),
            &ReportFilters::default(),
            &settings,
            now(),
        );
        assert!(built.text.contains("Project | Threat Model | Status | Created | Updated"));
        assert!(built.text.contains("Payments Core | Checkout | Active | 2026-02-01 | 2026-02-02"));
        assert!(!built.text.contains("| Title | Severity |"));
    }

    #[test]
    fn test_general_pass_uses_sorted_components() {
        let built = build_prompt(
            "{{COMPONENT_TABLE}}",
            &ReportType::Custom("c".into()),
            &context(),
            &ReportFilters::default(),
            &PromptSettings::default(),
            now(),
        );
        let api = built.text.find("| api |").unwrap();
        let web = built.text.find("| web |").unwrap();
        assert!(api < web);
    }

    #[test]
    fn test_unresolved_tokens_are_reported() {
        let built = build_prompt(
            "{{AUTHOR}} {{NOT_A_TOKEN}}",
            &ReportType::ProjectPortfolio,
            &context(),
            &ReportFilters::default(),
            &PromptSettings::default(),
            now(),
        );
        assert!(built.text.ends_with("system {{NOT_A_TOKEN}}"));
        assert_eq!(built.unresolved, vec!["{{NOT_A_TOKEN}}".to_string()]);
    }
}
