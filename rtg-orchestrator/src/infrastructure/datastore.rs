//! SQLx implementation of the datastore port

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use sqlx::postgres::PgArguments;
use sqlx::query::QueryScalar;
use tracing::debug;

use crate::domain::{Datastore, DatastoreError, Row};

type JsonQuery<'q> = QueryScalar<'q, sqlx::Postgres, Value, PgArguments>;

/// PostgreSQL datastore returning every row as a JSON object
///
/// Statements are wrapped in `row_to_json`, so callers write plain `SELECT`s
/// with `$n` placeholders and never deal with column types.
pub struct SqlxDatastore {
    pool: Arc<PgPool>,
}

impl SqlxDatastore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

fn wrap_statement(statement: &str) -> String {
    let trimmed = statement.trim().trim_end_matches(';');
    format!("SELECT row_to_json(t) AS row FROM ({}) t", trimmed)
}

fn bind_param<'q>(query: JsonQuery<'q>, param: &Value) -> JsonQuery<'q> {
    match param {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => query.bind(s.clone()),
        Value::Array(items) if items.iter().all(Value::is_string) => query.bind(
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect::<Vec<String>>(),
        ),
        other => query.bind(sqlx::types::Json(other.clone())),
    }
}

#[async_trait]
impl Datastore for SqlxDatastore {
    async fn query(&self, statement: &str, params: &[Value]) -> Result<Vec<Row>, DatastoreError> {
        let sql = wrap_statement(statement);
        let mut query = sqlx::query_scalar::<_, Value>(&sql);
        for param in params {
            query = bind_param(query, param);
        }

        let values = query.fetch_all(self.pool.as_ref()).await?;
        debug!(rows = values.len(), "Datastore query completed");

        values
            .into_iter()
            .map(|value| match value {
                Value::Object(row) => Ok(row),
                other => Err(DatastoreError::Decode(format!(
                    "expected a JSON object row, got {}",
                    other
                ))),
            })
            .collect()
    }
}
