//! General token values derived from the domain context

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Value, json};

use super::budget::{BudgetedJson, serialize_with_budget};
use super::ordering::str_field;
use super::tokens::TokenMap;
use super::{PromptSettings, SortedData};
use crate::domain::{DomainContext, ReportFilters};

/// Lowercase, hyphen-separated, at most 64 characters
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_dash = false;
    for c in input.trim().chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else {
            pending_dash = true;
        }
    }
    slug.chars().take(64).collect()
}

fn scalar_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Explicit project key, else a slug of the project name
pub fn project_key(project: Option<&Value>) -> String {
    let Some(project) = project else {
        return String::new();
    };
    if let Some(key) = scalar_text(project.get("key")).or_else(|| scalar_text(project.get("project_key"))) {
        return key;
    }
    slugify(str_field(project, &["name", "project_name", "title"]))
}

/// The project's SLO target, looked up in `sla_slo` (object or JSON text)
/// and then in top-level fields
pub fn resiliency_target(project: Option<&Value>, default: &str) -> String {
    let Some(project) = project else {
        return default.to_string();
    };

    let from_sla = match project.get("sla_slo") {
        Some(Value::Object(obj)) => scalar_text(obj.get("slo_target")),
        Some(Value::String(raw)) => serde_json::from_str::<Value>(raw)
            .ok()
            .and_then(|v| scalar_text(v.get("slo_target"))),
        _ => None,
    };

    from_sla
        .or_else(|| scalar_text(project.get("slo_target")))
        .or_else(|| scalar_text(project.get("sloTarget")))
        .unwrap_or_else(|| default.to_string())
}

/// `| a | b |` table; empty when there are no rows
pub fn markdown_table(headers: &[&str], rows: Vec<Vec<String>>) -> String {
    if rows.is_empty() {
        return String::new();
    }
    let mut out = format!("| {} |\n", headers.join(" | "));
    out.push_str(&format!(
        "| {} |",
        headers.iter().map(|_| "---").collect::<Vec<_>>().join(" | ")
    ));
    for row in rows {
        out.push_str(&format!("\n| {} |", row.join(" | ")));
    }
    out
}

fn title_severity_rows(items: &[Value]) -> Vec<Vec<String>> {
    items
        .iter()
        .map(|i| {
            vec![
                str_field(i, &["title", "name"]).to_string(),
                str_field(i, &["severity"]).to_string(),
            ]
        })
        .collect()
}

fn severity_counts(vulnerabilities: &[Value]) -> Value {
    let mut counts = [0u64; 4];
    for v in vulnerabilities {
        match str_field(v, &["severity"]) {
            "Critical" => counts[0] += 1,
            "High" => counts[1] += 1,
            "Medium" => counts[2] += 1,
            "Low" => counts[3] += 1,
            _ => {}
        }
    }
    json!({
        "Critical": counts[0],
        "High": counts[1],
        "Medium": counts[2],
        "Low": counts[3],
    })
}

struct Serialized {
    project: BudgetedJson,
    components: BudgetedJson,
    threats: BudgetedJson,
    vulnerabilities: BudgetedJson,
    safeguards: BudgetedJson,
}

/// Counts, truncation flags and serialized lengths of every dataset
fn statistics(data: &SortedData<'_>, s: &Serialized) -> Value {
    json!({
        "counts": {
            "components": data.components.len(),
            "threats": data.threats.len(),
            "vulnerabilities": data.vulnerabilities.len(),
        },
        "truncation": {
            "project_truncated": s.project.truncated,
            "components_truncated": s.components.truncated,
            "threats_truncated": s.threats.truncated,
            "vulnerabilities_truncated": s.vulnerabilities.truncated,
            "safeguards_truncated": s.safeguards.truncated,
        },
        "lengths": {
            "project_len": s.project.length,
            "components_len": s.components.length,
            "threats_len": s.threats.length,
            "vulnerabilities_len": s.vulnerabilities.length,
            "safeguards_len": s.safeguards.length,
        },
        "vulnerabilities_by_severity": severity_counts(data.vulnerabilities),
        "incidents": { "High": 0, "Medium": 0, "Low": 0 },
    })
}

/// Build the token map for the general substitution pass
pub fn general_tokens(
    ctx: &DomainContext,
    data: &SortedData<'_>,
    filters: &ReportFilters,
    settings: &PromptSettings,
    now: DateTime<Utc>,
) -> TokenMap {
    let budgets = &settings.budgets;
    let selected = ctx.selected_project.as_ref().or_else(|| ctx.projects.first());

    let serialized = Serialized {
        project: serialize_with_budget(&Value::Array(ctx.projects.clone()), budgets.project, "project"),
        components: serialize_with_budget(
            &Value::Array(data.components.to_vec()),
            budgets.components,
            "components",
        ),
        threats: serialize_with_budget(&Value::Array(data.threats.to_vec()), budgets.threats, "threats"),
        vulnerabilities: serialize_with_budget(
            &Value::Array(data.vulnerabilities.to_vec()),
            budgets.vulnerabilities,
            "vulnerabilities",
        ),
        safeguards: serialize_with_budget(
            &Value::Object(ctx.threat_safeguards.clone()),
            budgets.safeguards,
            "safeguards",
        ),
    };
    let stats = serialize_with_budget(
        &statistics(data, &serialized),
        budgets.statistics,
        "statistics",
    );

    let author = filters
        .author
        .as_deref()
        .filter(|a| !a.trim().is_empty())
        .unwrap_or(&settings.default_author);
    let ci_example = filters
        .ci_example
        .as_deref()
        .filter(|c| !c.trim().is_empty())
        .unwrap_or(&settings.ci_example);
    let project_names = ctx
        .projects
        .iter()
        .map(|p| str_field(p, &["name"]))
        .filter(|n| !n.is_empty())
        .collect::<Vec<_>>()
        .join(", ");
    let component_rows = data
        .components
        .iter()
        .map(|c| {
            vec![
                str_field(c, &["name"]).to_string(),
                str_field(c, &["type", "kind", "category"]).to_string(),
            ]
        })
        .collect();

    let mut map = TokenMap::new();
    map.insert("GENERATED_AT", now.to_rfc3339_opts(SecondsFormat::Millis, true));
    map.insert("AUTHOR", author);
    map.insert("ENV", settings.environment.as_str());
    map.insert("CI_EXAMPLE", ci_example);
    map.insert("PROJECT_KEY", project_key(selected));
    map.insert(
        "RESILIENCY_TARGET",
        resiliency_target(selected, &settings.resiliency_target),
    );
    map.insert("PROJECTS_JSON", serialized.project.text);
    map.insert(
        "PROJECT_JSON",
        selected.cloned().unwrap_or_else(|| json!({})).to_string(),
    );
    map.insert("PROJECTS_COUNT", ctx.projects.len().to_string());
    map.insert("PROJECT_NAMES_CSV", project_names);
    map.insert("COMPONENTS_JSON", serialized.components.text);
    map.insert("COMPONENTS_COUNT", ctx.components.len().to_string());
    map.insert("COMPONENT_TABLE", markdown_table(&["Name", "Type"], component_rows));
    map.insert("THREATS_JSON", serialized.threats.text);
    map.insert(
        "THREAT_MODEL_TABLE",
        markdown_table(&["Title", "Severity"], title_severity_rows(data.threats)),
    );
    map.insert("VULNERABILITIES_JSON", serialized.vulnerabilities.text);
    map.insert(
        "VULNERABILITY_TABLE",
        markdown_table(&["Title", "Severity"], title_severity_rows(data.vulnerabilities)),
    );
    map.insert("THREAT_SAFEGUARDS_JSON", serialized.safeguards.text);
    map.insert("STATISTICS_JSON", stats.text);
    map.insert(
        "PIPELINE_STEPS_JSON",
        filters.pipeline_steps.clone().unwrap_or_else(|| json!([])).to_string(),
    );
    map.insert(
        "TERRAFORM_TAGS_JSON",
        filters.tags.clone().unwrap_or_else(|| json!({})).to_string(),
    );
    map.insert(
        "AWS_ACCOUNTS_JSON",
        filters.cloud_accounts.clone().unwrap_or_else(|| json!([])).to_string(),
    );
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("Payments API (v2)", "payments-api-v2")]
    #[case("  --Edge__Gateway--  ", "edge-gateway")]
    #[case("", "")]
    fn test_slugify(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(slugify(input), expected);
    }

    #[test]
    fn test_slug_is_capped() {
        assert_eq!(slugify(&"a".repeat(100)).len(), 64);
    }

    #[test]
    fn test_project_key_prefers_explicit_key() {
        assert_eq!(project_key(Some(&json!({"key": "PAY", "name": "Payments"}))), "PAY");
        assert_eq!(project_key(Some(&json!({"name": "Payments Core"}))), "payments-core");
        assert_eq!(project_key(None), "");
    }

    #[rstest]
    #[case(json!({"sla_slo": {"slo_target": "99.95"}}), "99.95")]
    #[case(json!({"sla_slo": "{\"slo_target\": 99.5}"}), "99.5")]
    #[case(json!({"sla_slo": "not json", "slo_target": "98"}), "98")]
    #[case(json!({"sloTarget": 97}), "97")]
    #[case(json!({"name": "x"}), "99.9")]
    fn test_resiliency_target(#[case] project: Value, #[case] expected: &str) {
        assert_eq!(resiliency_target(Some(&project), "99.9"), expected);
    }

    #[test]
    fn test_markdown_table() {
        let table = markdown_table(
            &["Title", "Severity"],
            vec![vec!["SQLi".to_string(), "High".to_string()]],
        );
        assert_eq!(table, "| Title | Severity |\n| --- | --- |\n| SQLi | High |");
        assert_eq!(markdown_table(&["Title"], Vec::new()), "");
    }

    #[test]
    fn test_severity_counts() {
        let vulns = vec![
            json!({"severity": "High"}),
            json!({"severity": "High"}),
            json!({"severity": "Low"}),
            json!({"severity": "Info"}),
        ];
        assert_eq!(
            severity_counts(&vulns),
            json!({"Critical": 0, "High": 2, "Medium": 0, "Low": 1})
        );
    }
}
