//! Deterministic ordering of datasets before serialization

use std::cmp::Ordering;

use serde_json::Value;

/// Critical > High > Medium > Low; anything else ranks last
pub fn severity_rank(item: &Value) -> u8 {
    let severity = item
        .get("severity")
        .and_then(Value::as_str)
        .unwrap_or_default();
    match severity.trim().to_ascii_lowercase().as_str() {
        "critical" => 4,
        "high" => 3,
        "medium" => 2,
        "low" => 1,
        _ => 0,
    }
}

/// First non-empty string among `keys`
pub(crate) fn str_field<'a>(item: &'a Value, keys: &[&str]) -> &'a str {
    keys.iter()
        .filter_map(|k| item.get(*k).and_then(Value::as_str))
        .find(|s| !s.is_empty())
        .unwrap_or_default()
}

fn by_severity_desc(a: &Value, b: &Value) -> Ordering {
    severity_rank(b).cmp(&severity_rank(a))
}

/// Components by name ascending
pub fn sort_components(items: &mut [Value]) {
    items.sort_by(|a, b| str_field(a, &["name"]).cmp(str_field(b, &["name"])));
}

/// Threats by severity descending, ties by title
pub fn sort_threats(items: &mut [Value]) {
    items.sort_by(|a, b| {
        by_severity_desc(a, b)
            .then_with(|| str_field(a, &["title", "name"]).cmp(str_field(b, &["title", "name"])))
    });
}

/// Vulnerabilities by severity descending, ties newest first
pub fn sort_vulnerabilities(items: &mut [Value]) {
    items.sort_by(|a, b| {
        by_severity_desc(a, b).then_with(|| {
            str_field(b, &["created_at", "createdAt"]).cmp(str_field(a, &["created_at", "createdAt"]))
        })
    });
}
