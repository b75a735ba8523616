//! Template resolution across both template id spaces

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use rtg_core::CacheManager;
use rtg_core::infrastructure::cache::{CacheContext, CacheNamespace};
use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::{Datastore, ReportError, Row, Template, TemplateSource};

static UUID_SHAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$")
        .expect("uuid shape regex is valid")
});

const MANAGED_BY_ID: &str = "SELECT id::text AS id, name, content_md AS content \
     FROM reports.report_templates WHERE id::text = $1";

const LATEST_VERSION: &str = "SELECT v.template_id::text AS id, t.name, v.content_md AS content \
     FROM reports.report_template_versions v \
     LEFT JOIN reports.report_templates t ON t.id = v.template_id \
     WHERE v.template_id::text = $1 ORDER BY v.version DESC LIMIT 1";

const LEGACY_TEMPLATE: &str = "SELECT id::text AS id, name, template AS content \
     FROM report_templates.template WHERE id::text = $1";

const CUSTOM_PROMPT: &str = "SELECT id::text AS id, name, prompt_text AS content, \
     llm_provider AS provider, llm_model AS model \
     FROM threat_model.report_prompts WHERE id::text = $1";

const MANAGED_BY_API_ID: &str = "SELECT id::text AS id, name, content_md AS content \
     FROM reports.report_templates WHERE api_id::text = $1";

const LEGACY_NUMERIC: &str = "SELECT id::text AS id, name, template_content AS content \
     FROM reports.template WHERE id::text = $1";

/// True for ids resolved through the UUID-keyed lookup chain
pub fn is_uuid_shaped(id: &str) -> bool {
    UUID_SHAPE.is_match(id)
}

/// Fallback chain for an id, most authoritative source first
fn lookup_chain(template_id: &str) -> &'static [(TemplateSource, &'static str)] {
    const UUID_CHAIN: &[(TemplateSource, &str)] = &[
        (TemplateSource::ManagedTemplate, MANAGED_BY_ID),
        (TemplateSource::TemplateVersion, LATEST_VERSION),
        (TemplateSource::LegacyTemplate, LEGACY_TEMPLATE),
        (TemplateSource::CustomPrompt, CUSTOM_PROMPT),
    ];
    const API_ID_CHAIN: &[(TemplateSource, &str)] = &[
        (TemplateSource::ManagedTemplate, MANAGED_BY_API_ID),
        (TemplateSource::LegacyTemplate, LEGACY_NUMERIC),
    ];

    if is_uuid_shaped(template_id) {
        UUID_CHAIN
    } else {
        API_ID_CHAIN
    }
}

fn text_field(row: &Row, key: &str) -> Option<String> {
    match row.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Resolves template ids to templates, caching by the raw id
pub struct TemplateRepository {
    datastore: Arc<dyn Datastore>,
    cache: Arc<CacheManager>,
    ttl: Duration,
}

impl TemplateRepository {
    pub fn new(datastore: Arc<dyn Datastore>, cache: Arc<CacheManager>, ttl: Duration) -> Self {
        Self {
            datastore,
            cache,
            ttl,
        }
    }

    /// Resolve `template_id`, walking the fallback chain of its id space.
    ///
    /// A row with empty content is a miss. Query failures are logged and also
    /// treated as misses, so a missing legacy table never hides a later source.
    pub async fn resolve(&self, template_id: &str) -> Result<Template, ReportError> {
        let template_id = template_id.trim();
        if template_id.is_empty() {
            return Err(ReportError::ValidationError(
                "template id must not be empty".to_string(),
            ));
        }

        let ctx = CacheContext::none();
        if let Some(template) = self
            .cache
            .get::<Template>(CacheNamespace::Template, template_id, &ctx)
            .await
        {
            debug!(template_id, "Template served from cache");
            return Ok(template);
        }

        let params = [Value::String(template_id.to_string())];
        let mut fallback_name = None;

        for (source, statement) in lookup_chain(template_id) {
            let rows = match self.datastore.query(statement, &params).await {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(template_id, source = ?source, error = %e, "Template lookup failed, trying next source");
                    continue;
                }
            };

            let Some(row) = rows.first() else {
                continue;
            };
            if fallback_name.is_none() {
                fallback_name = text_field(row, "name");
            }
            let Some(content) = text_field(row, "content") else {
                debug!(template_id, source = ?source, "Template row has no content");
                continue;
            };

            let template = Template {
                id: template_id.to_string(),
                name: text_field(row, "name")
                    .or_else(|| fallback_name.clone())
                    .unwrap_or_else(|| template_id.to_string()),
                content,
                source: *source,
                provider: text_field(row, "provider"),
                model: text_field(row, "model"),
            };
            self.cache
                .set(CacheNamespace::Template, template_id, &template, &ctx, Some(self.ttl))
                .await;
            debug!(template_id, source = ?source, "Template resolved");
            return Ok(template);
        }

        Err(ReportError::NotFound(format!(
            "Template with ID {} not found",
            template_id
        )))
    }
}
