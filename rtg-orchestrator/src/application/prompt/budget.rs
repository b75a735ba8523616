//! Size-bounded JSON serialization

use serde::Serialize;
use serde_json::{Value, json};

/// A dataset serialized under a character budget
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetedJson {
    /// Either the full document or a compact truncation summary
    pub text: String,
    pub truncated: bool,
    /// Length of the full serialization, in characters
    pub length: usize,
    /// Element count of the original collection
    pub count: Option<usize>,
}

fn collection_len(value: &Value) -> Option<usize> {
    match value {
        Value::Array(items) => Some(items.len()),
        Value::Object(map) => Some(map.len()),
        _ => None,
    }
}

/// Serialize `value`, replacing it with `{truncated, count, note}` when the
/// output would exceed `budget` characters.
///
/// The result is always a complete JSON document. The note is dropped when
/// the summary alone would not fit.
pub fn serialize_with_budget(value: &Value, budget: usize, label: &str) -> BudgetedJson {
    let text = value.to_string();
    let length = text.chars().count();
    let count = collection_len(value);

    if length <= budget {
        return BudgetedJson {
            text,
            truncated: false,
            length,
            count,
        };
    }

    let summary = json!({
        "truncated": true,
        "count": count,
        "note": format!("{} exceeded budget ({} > {})", label, length, budget),
    })
    .to_string();

    let text = if summary.chars().count() <= budget {
        summary
    } else {
        json!({ "truncated": true, "count": count }).to_string()
    };

    BudgetedJson {
        text,
        truncated: true,
        length,
        count,
    }
}
