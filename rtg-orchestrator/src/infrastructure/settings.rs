//! Settings store backed by `threat_model.settings`

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::domain::{Datastore, SettingsStore};

const SETTING_QUERY: &str = "SELECT value FROM threat_model.settings WHERE key = $1";

pub struct DatastoreSettingsStore {
    datastore: Arc<dyn Datastore>,
}

impl DatastoreSettingsStore {
    pub fn new(datastore: Arc<dyn Datastore>) -> Self {
        Self { datastore }
    }
}

/// Interpret a stored setting: booleans, numbers and JSON documents are
/// decoded, everything else stays a string
pub fn parse_setting(raw: &str) -> Value {
    let trimmed = raw.trim();
    match trimmed {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(n) = trimmed.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        if f.is_finite() {
            return Value::from(f);
        }
    }
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(json) = serde_json::from_str(trimmed) {
            return json;
        }
    }
    Value::String(raw.to_string())
}

#[async_trait]
impl SettingsStore for DatastoreSettingsStore {
    async fn get_setting(&self, key: &str, default: Value) -> Value {
        match self
            .datastore
            .query(SETTING_QUERY, &[Value::String(key.to_string())])
            .await
        {
            Ok(rows) => match rows.first().and_then(|row| row.get("value")) {
                Some(Value::String(raw)) => parse_setting(raw),
                Some(Value::Null) | None => default,
                Some(other) => other.clone(),
            },
            Err(e) => {
                warn!(key, error = %e, "Failed to read setting, using default");
                default
            }
        }
    }
}

/// Settings held in memory; used when no datastore is wired and in tests
#[derive(Debug, Default)]
pub struct StaticSettingsStore {
    values: std::collections::HashMap<String, Value>,
}

impl StaticSettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }
}

#[async_trait]
impl SettingsStore for StaticSettingsStore {
    async fn get_setting(&self, key: &str, default: Value) -> Value {
        self.values.get(key).cloned().unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case("true", json!(true))]
    #[case("false", json!(false))]
    #[case("42", json!(42))]
    #[case("0.75", json!(0.75))]
    #[case(r#"{"a": 1}"#, json!({"a": 1}))]
    #[case("[1, 2]", json!([1, 2]))]
    #[case("{not json", json!("{not json"))]
    #[case("ollama", json!("ollama"))]
    fn test_parse_setting(#[case] raw: &str, #[case] expected: Value) {
        assert_eq!(parse_setting(raw), expected);
    }

    #[tokio::test]
    async fn test_static_store_falls_back_to_default() {
        let store = StaticSettingsStore::new().with("reports.llm_provider", json!("ollama"));
        assert_eq!(
            store.get_string("reports.llm_provider").await.as_deref(),
            Some("ollama")
        );
        assert_eq!(store.get_setting("missing", json!(3)).await, json!(3));
        assert_eq!(store.get_string("missing").await, None);
    }
}
