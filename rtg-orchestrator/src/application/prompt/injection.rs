//! Type-specific placeholder passes
//!
//! Each report type fills its own placeholders with a size-limited JSON
//! block and a plain-text table. A template without those placeholders is
//! left unchanged.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde_json::{Map, Value};

use super::tokens::TokenMap;
use super::{PromptSettings, SortedData};
use crate::domain::{DomainContext, ReportType};

const PROJECT_FIELDS: &[&str] = &[
    "id",
    "name",
    "description",
    "status",
    "business_unit",
    "criticality",
    "data_classification",
    "created_at",
    "updated_at",
];

const COMPONENT_FIELDS: &[&str] = &[
    "id",
    "name",
    "type",
    "description",
    "version",
    "is_reusable",
    "tags",
    "projects",
];

const SAFEGUARD_FIELDS: &[&str] = &[
    "id",
    "name",
    "type",
    "implementation_status",
    "effectiveness",
    "components_applied",
];

const THREAT_MODEL_FIELDS: &[&str] = &[
    "id",
    "name",
    "status",
    "project_name",
    "created_at",
    "updated_at",
];

const ACTIVITY_HEADER: &str = "Project | Threat Model | Status | Created | Updated\n\
                               ------- | ------------ | ------ | ------- | -------\n";

/// Placeholders owned by the type-specific pass of `report_type`
pub fn owned_tokens(report_type: &ReportType) -> &'static [&'static str] {
    match report_type {
        ReportType::ProjectPortfolio => &["PROJECT_DATA_JSON", "PROJECT_TABLE"],
        ReportType::ComponentInventory => &["COMPONENT_DATA_JSON", "COMPONENT_TABLE"],
        ReportType::SafeguardStatus => &["SAFEGUARD_DATA_JSON", "SAFEGUARD_TABLE"],
        ReportType::ThreatModelSummary => &[
            "THREAT_MODEL_DATA_JSON",
            "STATUS_SUMMARY",
            "THREAT_MODEL_TABLE",
            "RECENT_ACTIVITY_TABLE",
        ],
        ReportType::Custom(_) => &[],
    }
}

/// Keep only `fields`, dropping those the row does not carry
fn pick(item: &Value, fields: &[&str]) -> Value {
    let mut out = Map::new();
    for field in fields {
        if let Some(v) = item.get(*field) {
            out.insert((*field).to_string(), v.clone());
        }
    }
    Value::Object(out)
}

fn cell(item: &Value, field: &str) -> String {
    match item.get(field) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(", "),
        Some(other) => other.to_string(),
    }
}

fn list_cell(item: &Value, field: &str) -> String {
    match item.get(field) {
        Some(Value::Array(_)) => cell(item, field),
        _ => String::new(),
    }
}

fn date_cell(item: &Value, field: &str) -> String {
    let raw = cell(item, field);
    raw.split('T').next().unwrap_or_default().to_string()
}

fn pretty(items: &[Value]) -> String {
    serde_json::to_string_pretty(items).unwrap_or_else(|_| "[]".to_string())
}

pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|t| t.and_utc())
        })
}

fn is_recent(item: &Value, now: DateTime<Utc>, days: i64) -> bool {
    let horizon = now - Duration::days(days);
    ["created_at", "updated_at"].iter().any(|field| {
        item.get(*field)
            .and_then(Value::as_str)
            .and_then(parse_timestamp)
            .is_some_and(|t| t >= horizon)
    })
}

fn activity_table(models: &[&Value]) -> String {
    let mut table = ACTIVITY_HEADER.to_string();
    for tm in models {
        table.push_str(&format!(
            "{} | {} | {} | {} | {}\n",
            cell(tm, "project_name"),
            cell(tm, "name"),
            cell(tm, "status"),
            date_cell(tm, "created_at"),
            date_cell(tm, "updated_at"),
        ));
    }
    table
}

/// Build the token map for the type-specific pass of `report_type`
pub fn type_specific_tokens(
    report_type: &ReportType,
    ctx: &DomainContext,
    data: &SortedData<'_>,
    settings: &PromptSettings,
    now: DateTime<Utc>,
) -> TokenMap {
    let mut map = TokenMap::new();
    let limit = settings.max_items_per_table;

    match report_type {
        ReportType::ProjectPortfolio => {
            let projects: Vec<Value> = ctx
                .projects
                .iter()
                .take(limit)
                .map(|p| pick(p, PROJECT_FIELDS))
                .collect();
            let mut table = "Name | Status | Business Unit | Criticality\n\
                             ---- | ------ | ------------- | -----------\n"
                .to_string();
            for p in &projects {
                table.push_str(&format!(
                    "{} | {} | {} | {}\n",
                    cell(p, "name"),
                    cell(p, "status"),
                    cell(p, "business_unit"),
                    cell(p, "criticality"),
                ));
            }
            map.insert("PROJECT_DATA_JSON", pretty(&projects));
            map.insert("PROJECT_TABLE", table);
        }
        ReportType::ComponentInventory => {
            let components: Vec<Value> = data
                .components
                .iter()
                .take(settings.max_components.min(limit))
                .map(|c| pick(c, COMPONENT_FIELDS))
                .collect();
            let mut table = "Name | Type | Reusable | Tags | Projects\n\
                             ---- | ---- | -------- | ---- | --------\n"
                .to_string();
            for c in &components {
                let reusable = c.get("is_reusable").and_then(Value::as_bool).unwrap_or(false);
                table.push_str(&format!(
                    "{} | {} | {} | {} | {}\n",
                    cell(c, "name"),
                    cell(c, "type"),
                    if reusable { "Yes" } else { "No" },
                    list_cell(c, "tags"),
                    list_cell(c, "projects"),
                ));
            }
            map.insert("COMPONENT_DATA_JSON", pretty(&components));
            map.insert("COMPONENT_TABLE", table);
        }
        ReportType::SafeguardStatus => {
            let safeguards: Vec<Value> = ctx
                .safeguards
                .iter()
                .take(limit)
                .map(|s| pick(s, SAFEGUARD_FIELDS))
                .collect();
            let mut table = "Name | Type | Status | Effectiveness | Components Applied\n\
                             ---- | ---- | ------ | ------------- | -------------------\n"
                .to_string();
            for s in &safeguards {
                table.push_str(&format!(
                    "{} | {} | {} | {} | {}\n",
                    cell(s, "name"),
                    cell(s, "type"),
                    cell(s, "implementation_status"),
                    cell(s, "effectiveness"),
                    list_cell(s, "components_applied"),
                ));
            }
            map.insert("SAFEGUARD_DATA_JSON", pretty(&safeguards));
            map.insert("SAFEGUARD_TABLE", table);
        }
        ReportType::ThreatModelSummary => {
            let models: Vec<Value> = ctx
                .threat_models
                .iter()
                .take(limit)
                .map(|tm| pick(tm, THREAT_MODEL_FIELDS))
                .collect();

            let mut counts: Vec<(String, usize)> = Vec::new();
            for tm in &models {
                let status = cell(tm, "status");
                match counts.iter_mut().find(|(s, _)| *s == status) {
                    Some((_, n)) => *n += 1,
                    None => counts.push((status, 1)),
                }
            }
            let mut summary = "Status | Count\n------ | -----\n".to_string();
            for (status, n) in counts {
                summary.push_str(&format!("{} | {}\n", status, n));
            }

            let all: Vec<&Value> = models.iter().collect();
            let recent: Vec<&Value> = models
                .iter()
                .filter(|tm| is_recent(tm, now, settings.recent_activity_days))
                .collect();

            map.insert("THREAT_MODEL_DATA_JSON", pretty(&models));
            map.insert("STATUS_SUMMARY", summary);
            map.insert("THREAT_MODEL_TABLE", activity_table(&all));
            map.insert("RECENT_ACTIVITY_TABLE", activity_table(&recent));
        }
        ReportType::Custom(_) => {}
    }

    map
}
