//! Domain dataset fetching for report context
//!
//! Every dataset is cache-checked, then fetched live. A failed fetch degrades
//! to an empty dataset and is recorded on the context; it never fails the
//! request. Only a target project that does not exist is fatal.

use std::sync::Arc;
use std::time::Duration;

use rtg_core::CacheManager;
use rtg_core::infrastructure::cache::{CacheContext, CacheNamespace};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::{Datastore, DomainContext, ReportError, ReportFilters, ReportType};

mod sql {
    pub const PROJECT: &str = "SELECT * FROM threat_model.projects WHERE id::text = $1";

    pub const PROJECT_COMPONENTS: &str = "SELECT c.*, COALESCE((\
         SELECT array_agg(p.name ORDER BY p.name) FROM threat_model.project_components pc2 \
         JOIN threat_model.projects p ON p.id = pc2.project_id WHERE pc2.component_id = c.id\
         ), ARRAY[]::text[]) AS projects \
         FROM threat_model.components c \
         JOIN threat_model.project_components pc ON pc.component_id = c.id \
         WHERE pc.project_id::text = $1";

    pub const PROJECT_THREAT_MODELS: &str = "SELECT tm.*, p.name AS project_name \
         FROM threat_model.threat_models tm \
         LEFT JOIN threat_model.projects p ON p.id = tm.project_id \
         WHERE tm.project_id::text = $1";

    pub const LINKED_THREAT_MODELS: &str = "SELECT tm.*, p.name AS project_name \
         FROM threat_model.threat_models tm \
         JOIN threat_model.project_threat_models ptm ON ptm.threat_model_id = tm.id \
         JOIN threat_model.projects p ON p.id = ptm.project_id \
         WHERE ptm.project_id::text = $1";

    pub const THREATS_BY_MODEL: &str =
        "SELECT * FROM threat_model.threats WHERE threat_model_id::text = ANY($1)";

    pub const VULNERABILITIES_BY_COMPONENT: &str =
        "SELECT * FROM threat_model.vulnerabilities WHERE component_id::text = ANY($1)";

    pub const SAFEGUARDS_BY_THREAT: &str = "SELECT ts.threat_id::text AS threat_id, s.* \
         FROM threat_model.safeguards s \
         JOIN threat_model.threat_safeguards ts ON ts.safeguard_id = s.id \
         WHERE ts.threat_id::text = ANY($1)";

    pub const PROJECT_SAFEGUARDS: &str = "SELECT s.*, COALESCE((\
         SELECT array_agg(c.name ORDER BY c.name) FROM threat_model.component_safeguards cs \
         JOIN threat_model.components c ON c.id = cs.component_id WHERE cs.safeguard_id = s.id\
         ), ARRAY[]::text[]) AS components_applied \
         FROM threat_model.safeguards s \
         WHERE EXISTS (SELECT 1 FROM threat_model.component_safeguards cs \
         JOIN threat_model.project_components pc ON pc.component_id = cs.component_id \
         WHERE cs.safeguard_id = s.id AND pc.project_id::text = $1)";

    pub const ALL_PROJECTS: &str = "SELECT * FROM threat_model.projects";

    pub const ALL_COMPONENTS: &str = "SELECT c.*, COALESCE((\
         SELECT array_agg(p.name ORDER BY p.name) FROM threat_model.project_components pc \
         JOIN threat_model.projects p ON p.id = pc.project_id WHERE pc.component_id = c.id\
         ), ARRAY[]::text[]) AS projects \
         FROM threat_model.components c";

    pub const ALL_THREAT_MODELS: &str = "SELECT tm.*, p.name AS project_name \
         FROM threat_model.threat_models tm \
         LEFT JOIN threat_model.projects p ON p.id = tm.project_id";

    pub const ALL_THREATS: &str = "SELECT * FROM threat_model.threats";

    pub const ALL_VULNERABILITIES: &str = "SELECT * FROM threat_model.vulnerabilities";

    pub const ALL_SAFEGUARDS: &str = "SELECT s.*, COALESCE((\
         SELECT array_agg(c.name ORDER BY c.name) FROM threat_model.component_safeguards cs \
         JOIN threat_model.components c ON c.id = cs.component_id WHERE cs.safeguard_id = s.id\
         ), ARRAY[]::text[]) AS components_applied \
         FROM threat_model.safeguards s";
}

/// Render an id column as text, whatever its JSON type
pub(crate) fn id_of(item: &Value) -> Option<String> {
    match item.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn ids_param(items: &[Value]) -> Value {
    Value::Array(items.iter().filter_map(id_of).map(Value::String).collect())
}

struct Fetch<'a> {
    namespace: CacheNamespace,
    key: &'a str,
    label: &'a str,
    statement: &'a str,
    params: Vec<Value>,
}

/// Builds the [`DomainContext`] for a request
pub struct ContextRepository {
    datastore: Arc<dyn Datastore>,
    cache: Arc<CacheManager>,
    ttl: Duration,
}

impl ContextRepository {
    pub fn new(datastore: Arc<dyn Datastore>, cache: Arc<CacheManager>, ttl: Duration) -> Self {
        Self {
            datastore,
            cache,
            ttl,
        }
    }

    /// Assemble the context: scoped to the filter's target when present,
    /// otherwise across the whole corpus
    pub async fn build(
        &self,
        report_type: &ReportType,
        filters: &ReportFilters,
        cancel: &CancellationToken,
    ) -> Result<DomainContext, ReportError> {
        match filters.target() {
            Some(target) => self.build_scoped(report_type, target, cancel).await,
            None => self.build_global(report_type, cancel).await,
        }
    }

    async fn build_scoped(
        &self,
        report_type: &ReportType,
        target: &str,
        cancel: &CancellationToken,
    ) -> Result<DomainContext, ReportError> {
        let mut ctx = DomainContext {
            target_id: Some(target.to_string()),
            ..Default::default()
        };
        let cache_ctx = CacheContext::for_target(target);
        let target_param = || vec![Value::String(target.to_string())];

        ctx.selected_project = self.fetch_project(&mut ctx, target, &cache_ctx).await?;
        ctx.projects = ctx.selected_project.iter().cloned().collect();
        checkpoint(cancel)?;

        ctx.components = self
            .dataset(
                &mut ctx,
                &cache_ctx,
                Fetch {
                    namespace: CacheNamespace::Components,
                    key: "scoped",
                    label: "components",
                    statement: sql::PROJECT_COMPONENTS,
                    params: target_param(),
                },
            )
            .await;
        checkpoint(cancel)?;

        ctx.threat_models = self
            .dataset(
                &mut ctx,
                &cache_ctx,
                Fetch {
                    namespace: CacheNamespace::ThreatModels,
                    key: "scoped",
                    label: "threat_models",
                    statement: sql::PROJECT_THREAT_MODELS,
                    params: target_param(),
                },
            )
            .await;
        if ctx.threat_models.is_empty() {
            ctx.threat_models = self
                .dataset(
                    &mut ctx,
                    &cache_ctx,
                    Fetch {
                        namespace: CacheNamespace::ThreatModels,
                        key: "linked",
                        label: "threat_models",
                        statement: sql::LINKED_THREAT_MODELS,
                        params: target_param(),
                    },
                )
                .await;
        }
        checkpoint(cancel)?;

        if !ctx.threat_models.is_empty() {
            let params = vec![ids_param(&ctx.threat_models)];
            ctx.threats = self
                .dataset(
                    &mut ctx,
                    &cache_ctx,
                    Fetch {
                        namespace: CacheNamespace::Threats,
                        key: "scoped",
                        label: "threats",
                        statement: sql::THREATS_BY_MODEL,
                        params,
                    },
                )
                .await;
        }
        checkpoint(cancel)?;

        if !ctx.components.is_empty() {
            let params = vec![ids_param(&ctx.components)];
            ctx.vulnerabilities = self
                .dataset(
                    &mut ctx,
                    &cache_ctx,
                    Fetch {
                        namespace: CacheNamespace::Vulnerabilities,
                        key: "scoped",
                        label: "vulnerabilities",
                        statement: sql::VULNERABILITIES_BY_COMPONENT,
                        params,
                    },
                )
                .await;
        }
        checkpoint(cancel)?;

        if !ctx.threats.is_empty() {
            let params = vec![ids_param(&ctx.threats)];
            let rows = self
                .dataset(
                    &mut ctx,
                    &cache_ctx,
                    Fetch {
                        namespace: CacheNamespace::Safeguards,
                        key: "by_threat",
                        label: "threat_safeguards",
                        statement: sql::SAFEGUARDS_BY_THREAT,
                        params,
                    },
                )
                .await;
            ctx.threat_safeguards = group_by_threat(&ctx.threats, rows);
        }

        if *report_type == ReportType::SafeguardStatus {
            checkpoint(cancel)?;
            ctx.safeguards = self
                .dataset(
                    &mut ctx,
                    &cache_ctx,
                    Fetch {
                        namespace: CacheNamespace::Safeguards,
                        key: "scoped",
                        label: "safeguards",
                        statement: sql::PROJECT_SAFEGUARDS,
                        params: target_param(),
                    },
                )
                .await;
        }

        debug!(
            target_id = target,
            components = ctx.components.len(),
            threat_models = ctx.threat_models.len(),
            threats = ctx.threats.len(),
            vulnerabilities = ctx.vulnerabilities.len(),
            degraded = ?ctx.degraded,
            "Scoped context built"
        );
        Ok(ctx)
    }

    async fn build_global(
        &self,
        report_type: &ReportType,
        cancel: &CancellationToken,
    ) -> Result<DomainContext, ReportError> {
        let mut ctx = DomainContext::default();
        let cache_ctx = CacheContext::none();

        let fetches = [
            (CacheNamespace::Project, "projects", sql::ALL_PROJECTS),
            (CacheNamespace::Components, "components", sql::ALL_COMPONENTS),
            (
                CacheNamespace::ThreatModels,
                "threat_models",
                sql::ALL_THREAT_MODELS,
            ),
            (CacheNamespace::Threats, "threats", sql::ALL_THREATS),
            (
                CacheNamespace::Vulnerabilities,
                "vulnerabilities",
                sql::ALL_VULNERABILITIES,
            ),
        ];

        for (namespace, label, statement) in fetches {
            checkpoint(cancel)?;
            let items = self
                .dataset(
                    &mut ctx,
                    &cache_ctx,
                    Fetch {
                        namespace,
                        key: "all",
                        label,
                        statement,
                        params: Vec::new(),
                    },
                )
                .await;
            match namespace {
                CacheNamespace::Project => ctx.projects = items,
                CacheNamespace::Components => ctx.components = items,
                CacheNamespace::ThreatModels => ctx.threat_models = items,
                CacheNamespace::Threats => ctx.threats = items,
                _ => ctx.vulnerabilities = items,
            }
        }

        if *report_type == ReportType::SafeguardStatus {
            checkpoint(cancel)?;
            ctx.safeguards = self
                .dataset(
                    &mut ctx,
                    &cache_ctx,
                    Fetch {
                        namespace: CacheNamespace::Safeguards,
                        key: "all",
                        label: "safeguards",
                        statement: sql::ALL_SAFEGUARDS,
                        params: Vec::new(),
                    },
                )
                .await;
        }

        debug!(
            projects = ctx.projects.len(),
            components = ctx.components.len(),
            degraded = ?ctx.degraded,
            "Global context built"
        );
        Ok(ctx)
    }

    async fn fetch_project(
        &self,
        ctx: &mut DomainContext,
        target: &str,
        cache_ctx: &CacheContext,
    ) -> Result<Option<Value>, ReportError> {
        if let Some(project) = self
            .cache
            .get::<Value>(CacheNamespace::Project, "selected", cache_ctx)
            .await
        {
            ctx.cache_hits += 1;
            return Ok(Some(project));
        }
        ctx.cache_misses += 1;

        match self
            .datastore
            .query(sql::PROJECT, &[Value::String(target.to_string())])
            .await
        {
            Ok(rows) => {
                let Some(row) = rows.into_iter().next() else {
                    return Err(ReportError::NotFound(format!(
                        "Project with ID {} not found",
                        target
                    )));
                };
                let project = Value::Object(row);
                self.cache
                    .set(
                        CacheNamespace::Project,
                        "selected",
                        &project,
                        cache_ctx,
                        Some(self.ttl),
                    )
                    .await;
                Ok(Some(project))
            }
            Err(e) => {
                warn!(target_id = target, error = %e, "Project fetch failed, continuing without it");
                ctx.degraded.push("project".to_string());
                Ok(None)
            }
        }
    }

    async fn dataset(
        &self,
        ctx: &mut DomainContext,
        cache_ctx: &CacheContext,
        fetch: Fetch<'_>,
    ) -> Vec<Value> {
        if let Some(items) = self
            .cache
            .get::<Vec<Value>>(fetch.namespace, fetch.key, cache_ctx)
            .await
        {
            ctx.cache_hits += 1;
            return items;
        }
        ctx.cache_misses += 1;

        match self.datastore.query(fetch.statement, &fetch.params).await {
            Ok(rows) => {
                let items: Vec<Value> = rows.into_iter().map(Value::Object).collect();
                if !items.is_empty() {
                    self.cache
                        .set(fetch.namespace, fetch.key, &items, cache_ctx, Some(self.ttl))
                        .await;
                }
                items
            }
            Err(e) => {
                warn!(dataset = fetch.label, error = %e, "Dataset fetch failed, using empty result");
                ctx.degraded.push(fetch.label.to_string());
                Vec::new()
            }
        }
    }
}

fn checkpoint(cancel: &CancellationToken) -> Result<(), ReportError> {
    if cancel.is_cancelled() {
        Err(ReportError::Aborted)
    } else {
        Ok(())
    }
}

/// Group safeguard rows by their `threat_id`; every threat gets an entry
fn group_by_threat(threats: &[Value], rows: Vec<Value>) -> Map<String, Value> {
    let mut map: Map<String, Value> = threats
        .iter()
        .filter_map(id_of)
        .map(|id| (id, Value::Array(Vec::new())))
        .collect();

    for mut row in rows {
        let Some(threat_id) = row
            .as_object_mut()
            .and_then(|obj| obj.remove("threat_id"))
            .and_then(|v| v.as_str().map(str::to_string))
        else {
            continue;
        };
        if let Some(Value::Array(list)) = map.get_mut(&threat_id) {
            list.push(row);
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ids_accept_numbers_and_strings() {
        let items = vec![json!({"id": 7}), json!({"id": "a"}), json!({"name": "x"})];
        assert_eq!(ids_param(&items), json!(["7", "a"]));
    }

    #[test]
    fn test_group_by_threat_keeps_empty_entries() {
        let threats = vec![json!({"id": "t1"}), json!({"id": "t2"})];
        let rows = vec![
            json!({"threat_id": "t1", "name": "MFA"}),
            json!({"threat_id": "t9", "name": "orphan"}),
        ];
        let grouped = group_by_threat(&threats, rows);
        assert_eq!(grouped["t1"], json!([{"name": "MFA"}]));
        assert_eq!(grouped["t2"], json!([]));
        assert!(!grouped.contains_key("t9"));
    }
}
