//! Single-report pipeline
//!
//! `resolve template -> build context -> inject tokens -> type-specific pass
//! -> completion`. Cancellation is observed at every suspension point and
//! surfaces as [`ReportError::Aborted`].

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use rtg_core::infrastructure::metrics::{names, tags};
use rtg_core::{CacheManager, Config, MetricsCollector};
use rtg_llm::{CompletionClient, CompletionOptions};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::prompt::{self, PromptSettings};
use crate::domain::{
    Datastore, GeneratedReport, ReportError, ReportFilters, ReportGenerator, ReportOptions,
    ReportType, SettingsStore, Template,
};
use crate::infrastructure::{ContextRepository, TemplateRepository};

/// Backend selected for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendChoice {
    pub provider: String,
    pub model: Option<String>,
}

impl BackendChoice {
    fn new(provider: &str, model: Option<&str>) -> Self {
        Self {
            provider: provider.trim().to_lowercase(),
            model: model
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string),
        }
    }
}

pub struct ReportRunner {
    templates: TemplateRepository,
    contexts: ContextRepository,
    settings: Arc<dyn SettingsStore>,
    llm: Arc<CompletionClient>,
    metrics: Arc<MetricsCollector>,
    prompt_settings: PromptSettings,
    default_provider: String,
    provider_setting_key: String,
    model_setting_key: String,
}

impl ReportRunner {
    pub fn new(
        datastore: Arc<dyn Datastore>,
        settings: Arc<dyn SettingsStore>,
        cache: Arc<CacheManager>,
        llm: Arc<CompletionClient>,
        metrics: Arc<MetricsCollector>,
        config: &Config,
    ) -> Self {
        Self {
            templates: TemplateRepository::new(
                datastore.clone(),
                cache.clone(),
                config.cache.template_ttl(),
            ),
            contexts: ContextRepository::new(datastore, cache, config.cache.dataset_ttl()),
            settings,
            llm,
            metrics,
            prompt_settings: PromptSettings::from(config),
            default_provider: config.llm.default_provider.clone(),
            provider_setting_key: config.reports.provider_setting_key.clone(),
            model_setting_key: config.reports.model_setting_key.clone(),
        }
    }

    /// Generate a report and return its text. Diagnostics are logged.
    pub async fn generate_report(
        &self,
        report_type: &ReportType,
        template_id: &str,
        filters: &ReportFilters,
        options: ReportOptions,
    ) -> Result<String, ReportError> {
        let report = self
            .generate_report_detailed(report_type, template_id, filters, options)
            .await?;
        for warning in &report.warnings {
            warn!(report_type = %report_type, template_id, "{}", warning);
        }
        Ok(report.content)
    }

    /// Generate a report, keeping the diagnostics alongside the content
    pub async fn generate_report_detailed(
        &self,
        report_type: &ReportType,
        template_id: &str,
        filters: &ReportFilters,
        options: ReportOptions,
    ) -> Result<GeneratedReport, ReportError> {
        let cancel = options.cancel.clone().unwrap_or_default();
        let mut timer = self.metrics.start_timer(
            names::REPORT_GENERATION_DURATION,
            tags([("report_type", report_type.as_str())]),
        );

        info!(report_type = %report_type, template_id, target_id = ?filters.target(), "Generating report");

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ReportError::Aborted),
            result = self.run(report_type, template_id, filters, &options, &cancel) => result,
        };

        match &result {
            Ok(report) => {
                timer.tag("outcome", "success");
                self.metrics.increment(
                    names::REPORT_GENERATION_SUCCESS,
                    tags([("report_type", report_type.as_str())]),
                );
                info!(
                    report_type = %report_type,
                    provider = %report.provider,
                    elapsed_ms = timer.elapsed().as_millis() as u64,
                    content_chars = report.content.len(),
                    "Report generated"
                );
            }
            Err(e) => {
                timer.tag("outcome", e.kind());
                self.metrics.increment(
                    names::REPORT_GENERATION_ERRORS,
                    tags([("report_type", report_type.as_str()), ("error_kind", e.kind())]),
                );
                warn!(report_type = %report_type, template_id, error = %e, "Report generation failed");
            }
        }
        timer.stop();

        result
    }

    async fn run(
        &self,
        report_type: &ReportType,
        template_id: &str,
        filters: &ReportFilters,
        options: &ReportOptions,
        cancel: &CancellationToken,
    ) -> Result<GeneratedReport, ReportError> {
        checkpoint(cancel)?;
        let started = Instant::now();
        let template = self.templates.resolve(template_id).await?;
        self.metrics.timing(
            names::TEMPLATE_LOAD_DURATION,
            started.elapsed(),
            tags([("source", format!("{:?}", template.source))]),
        );

        checkpoint(cancel)?;
        let started = Instant::now();
        let context = self.contexts.build(report_type, filters, cancel).await?;
        self.metrics.timing(
            names::DATA_FETCH_DURATION,
            started.elapsed(),
            tags([("scoped", context.is_scoped().to_string())]),
        );
        if let Some(ratio) = context.cache_hit_ratio() {
            self.metrics.record(names::CACHE_HIT_RATIO, ratio, tags([("stage", "context")]));
        }

        checkpoint(cancel)?;
        let now = Utc::now();
        let built = prompt::build_prompt(
            &template.content,
            report_type,
            &context,
            filters,
            &self.prompt_settings,
            now,
        );

        let prompt_chars = built.text.chars().count();
        info!(
            report_type = %report_type,
            prompt_chars,
            token_estimate = prompt_chars.div_ceil(4),
            "Prompt prepared"
        );
        debug!(preview = %built.text.chars().take(500).collect::<String>(), "Prompt preview");

        let mut warnings = Vec::new();
        if !built.unresolved.is_empty() {
            warnings.push(format!(
                "Found unknown/unresolved tokens: {}",
                built.unresolved.join(", ")
            ));
        }
        for dataset in &context.degraded {
            warnings.push(format!("Dataset unavailable, rendered empty: {}", dataset));
        }

        checkpoint(cancel)?;
        let choice = self.resolve_backend(&template, filters).await;
        let mut completion = CompletionOptions::default().with_cancel(cancel.clone());
        if let Some(timeout) = options
            .timeout
            .or_else(|| self.llm.default_timeout(&choice.provider))
        {
            completion = completion.with_timeout(timeout);
        }

        let started = Instant::now();
        let outcome = self
            .llm
            .complete(&built.text, &choice.provider, choice.model.as_deref(), completion)
            .await;
        self.metrics.timing(
            names::LLM_CALL_DURATION,
            started.elapsed(),
            tags([
                ("provider", choice.provider.as_str()),
                ("outcome", if outcome.is_ok() { "success" } else { "error" }),
            ]),
        );
        let content = outcome?;

        Ok(GeneratedReport {
            content,
            provider: choice.provider,
            model: choice.model,
            warnings,
            prompt_chars,
            generated_at: now,
        })
    }

    /// Explicit override, then the template's preference, then the settings
    /// store, then configuration
    pub async fn resolve_backend(&self, template: &Template, filters: &ReportFilters) -> BackendChoice {
        if let Some(choice) = filters
            .provider_override
            .as_ref()
            .filter(|o| !o.provider.trim().is_empty())
        {
            return BackendChoice::new(&choice.provider, choice.model.as_deref());
        }

        if let Some(provider) = template.provider.as_deref() {
            return BackendChoice::new(provider, template.model.as_deref());
        }

        if let Some(provider) = self.settings.get_string(&self.provider_setting_key).await {
            let model = self.settings.get_string(&self.model_setting_key).await;
            return BackendChoice::new(&provider, model.as_deref());
        }

        BackendChoice::new(&self.default_provider, None)
    }
}

fn checkpoint(cancel: &CancellationToken) -> Result<(), ReportError> {
    if cancel.is_cancelled() {
        Err(ReportError::Aborted)
    } else {
        Ok(())
    }
}

#[async_trait]
impl ReportGenerator for ReportRunner {
    async fn generate(
        &self,
        report_type: &ReportType,
        template_id: &str,
        filters: &ReportFilters,
        options: ReportOptions,
    ) -> Result<String, ReportError> {
        self.generate_report(report_type, template_id, filters, options)
            .await
    }
}
