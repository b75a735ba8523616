//! Configuration validation module

use crate::config::{
    BatchConfig, BudgetConfig, CacheConfig, CircuitBreakerConfig, Config, DatabaseConfig,
    LlmConfig, MetricsConfig, RateLimitConfig, RateLimitPolicy, ReportsConfig, SchedulerConfig,
};

/// Smallest per-category budget that still fits a truncation summary
pub const MIN_BUDGET_CHARS: usize = 64;

/// Provider names the completion client can dispatch to
pub const KNOWN_PROVIDERS: &[&str] = &["openai", "ollama"];

/// Trait for validating configuration sections
pub trait Validate {
    fn validate(&self) -> Result<(), ValidationError>;
}

/// Configuration validation error
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Database configuration error: {message}")]
    Database { message: String },

    #[error("Cache configuration error: {message}")]
    Cache { message: String },

    #[error("Metrics configuration error: {message}")]
    Metrics { message: String },

    #[error("Rate limit configuration error: {message}")]
    RateLimit { message: String },

    #[error("LLM configuration error: {message}")]
    Llm { message: String },

    #[error("Reports configuration error: {message}")]
    Reports { message: String },

    #[error("Batch configuration error: {message}")]
    Batch { message: String },

    #[error("Scheduler configuration error: {message}")]
    Scheduler { message: String },
}

impl ValidationError {
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }

    pub fn metrics(message: impl Into<String>) -> Self {
        Self::Metrics {
            message: message.into(),
        }
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::RateLimit {
            message: message.into(),
        }
    }

    pub fn llm(message: impl Into<String>) -> Self {
        Self::Llm {
            message: message.into(),
        }
    }

    pub fn reports(message: impl Into<String>) -> Self {
        Self::Reports {
            message: message.into(),
        }
    }

    pub fn batch(message: impl Into<String>) -> Self {
        Self::Batch {
            message: message.into(),
        }
    }

    pub fn scheduler(message: impl Into<String>) -> Self {
        Self::Scheduler {
            message: message.into(),
        }
    }
}

impl Validate for Config {
    fn validate(&self) -> Result<(), ValidationError> {
        self.database.validate()?;
        self.cache.validate()?;
        self.metrics.validate()?;
        self.rate_limit.validate()?;
        self.llm.validate()?;
        self.reports.validate()?;
        self.batch.validate()?;
        self.scheduler.validate()?;
        Ok(())
    }
}

impl Validate for DatabaseConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.url.is_empty() {
            return Err(ValidationError::database("Database URL cannot be empty"));
        }

        if !self.url.starts_with("postgres://") && !self.url.starts_with("postgresql://") {
            return Err(ValidationError::database(
                "Database URL must start with postgres:// or postgresql://",
            ));
        }

        if self.max_connections == 0 {
            return Err(ValidationError::database(
                "Max connections must be greater than 0",
            ));
        }

        Ok(())
    }
}

impl Validate for CacheConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.default_ttl_seconds == 0 {
            return Err(ValidationError::cache(
                "Default TTL must be greater than 0 seconds",
            ));
        }

        if self.memory_max_size == 0 {
            return Err(ValidationError::cache(
                "memory_max_size must be greater than 0",
            ));
        }

        if self.external_tier_enabled
            && !self.external_tier_url.starts_with("redis://")
            && !self.external_tier_url.starts_with("rediss://")
        {
            return Err(ValidationError::cache(format!(
                "external_tier_url must start with redis:// or rediss://, got: {}",
                self.external_tier_url
            )));
        }

        Ok(())
    }
}

impl Validate for MetricsConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.max_samples_per_metric == 0 {
            return Err(ValidationError::metrics(
                "max_samples_per_metric must be greater than 0",
            ));
        }

        if self.retention_period_ms == 0 {
            return Err(ValidationError::metrics(
                "retention_period_ms must be greater than 0",
            ));
        }

        Ok(())
    }
}

fn validate_policy(name: &str, policy: &RateLimitPolicy) -> Result<(), ValidationError> {
    if policy.requests_per_window == 0 {
        return Err(ValidationError::rate_limit(format!(
            "{name}.requests_per_window must be greater than 0"
        )));
    }
    if policy.window_ms == 0 {
        return Err(ValidationError::rate_limit(format!(
            "{name}.window_ms must be greater than 0"
        )));
    }
    Ok(())
}

impl Validate for RateLimitConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if !(0.0..=1.0).contains(&self.cleanup_probability) {
            return Err(ValidationError::rate_limit(format!(
                "cleanup_probability must be between 0.0 and 1.0, got {}",
                self.cleanup_probability
            )));
        }

        validate_policy("report", &self.report)?;
        validate_policy("general", &self.general)?;
        Ok(())
    }
}

fn validate_breaker(name: &str, breaker: &CircuitBreakerConfig) -> Result<(), ValidationError> {
    if breaker.failure_threshold == 0 {
        return Err(ValidationError::llm(format!(
            "{name}.circuit_breaker.failure_threshold must be greater than 0"
        )));
    }
    Ok(())
}

impl Validate for LlmConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if !KNOWN_PROVIDERS.contains(&self.default_provider.to_lowercase().as_str()) {
            return Err(ValidationError::llm(format!(
                "default_provider must be one of {:?}, got: {}",
                KNOWN_PROVIDERS, self.default_provider
            )));
        }

        for (name, url) in [
            ("ollama.base_url", &self.ollama.base_url),
            ("openai.base_url", &self.openai.base_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ValidationError::llm(format!(
                    "{name} must start with http:// or https://, got: {url}"
                )));
            }
        }

        if self.ollama.timeout_ms == 0 || self.openai.timeout_ms == 0 {
            return Err(ValidationError::llm(
                "Backend timeouts must be greater than 0",
            ));
        }

        if self.retry.backoff_factor < 1.0 {
            return Err(ValidationError::llm("retry.backoff_factor must be >= 1.0"));
        }

        if !(0.0..=1.0).contains(&self.retry.jitter_ratio) {
            return Err(ValidationError::llm(
                "retry.jitter_ratio must be between 0.0 and 1.0",
            ));
        }

        validate_breaker("ollama", &self.ollama.circuit_breaker)?;
        validate_breaker("openai", &self.openai.circuit_breaker)?;
        Ok(())
    }
}

impl Validate for BudgetConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        let budgets = [
            ("project", self.project),
            ("components", self.components),
            ("threats", self.threats),
            ("vulnerabilities", self.vulnerabilities),
            ("safeguards", self.safeguards),
            ("statistics", self.statistics),
        ];
        for (name, budget) in budgets {
            if budget < MIN_BUDGET_CHARS {
                return Err(ValidationError::reports(format!(
                    "budgets.{name} must be at least {MIN_BUDGET_CHARS} characters, got {budget}"
                )));
            }
        }
        Ok(())
    }
}

impl Validate for ReportsConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        self.budgets.validate()?;

        if self.max_items_per_table == 0 {
            return Err(ValidationError::reports(
                "max_items_per_table must be greater than 0",
            ));
        }

        if self.recent_activity_days <= 0 {
            return Err(ValidationError::reports(
                "recent_activity_days must be greater than 0",
            ));
        }

        Ok(())
    }
}

impl Validate for BatchConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.max_concurrent == 0 {
            return Err(ValidationError::batch(
                "max_concurrent must be greater than 0",
            ));
        }

        if self.report_timeout_ms == 0 {
            return Err(ValidationError::batch(
                "report_timeout_ms must be greater than 0",
            ));
        }

        Ok(())
    }
}

impl Validate for SchedulerConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.tick_interval_seconds == 0 {
            return Err(ValidationError::scheduler(
                "tick_interval_seconds must be greater than 0",
            ));
        }

        if self.max_concurrent_jobs == 0 {
            return Err(ValidationError::scheduler(
                "max_concurrent_jobs must be greater than 0",
            ));
        }

        Ok(())
    }
}
