//! Two-tier cache: a bounded in-process map in front of an optional
//! Dragonfly/Redis tier.
//!
//! The cache is an optimization only. Every failure of the shared tier is
//! logged and absorbed here, so callers only ever observe hits and misses.

pub mod dragonfly;
pub mod manager;
pub mod memory;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::CacheConfig;

pub use dragonfly::DragonflyTier;
pub use manager::CacheManager;
pub use memory::MemoryTier;

/// Logical partitions of the key space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheNamespace {
    Template,
    Project,
    Components,
    Threats,
    ThreatModels,
    Vulnerabilities,
    Safeguards,
    Statistics,
}

impl CacheNamespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Template => "template",
            Self::Project => "project",
            Self::Components => "components",
            Self::Threats => "threats",
            Self::ThreatModels => "threat_models",
            Self::Vulnerabilities => "vulnerabilities",
            Self::Safeguards => "safeguards",
            Self::Statistics => "statistics",
        }
    }
}

impl fmt::Display for CacheNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request fields that change what a cached value means
#[derive(Debug, Clone, Default)]
pub struct CacheContext {
    pub target_id: Option<String>,
    pub filters: Option<serde_json::Value>,
}

impl CacheContext {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn for_target(target_id: impl Into<String>) -> Self {
        Self {
            target_id: Some(target_id.into()),
            filters: None,
        }
    }

    pub fn with_filters(mut self, filters: serde_json::Value) -> Self {
        self.filters = Some(filters);
        self
    }
}

/// Options used to build a [`CacheManager`]
#[derive(Debug, Clone)]
pub struct CacheOptions {
    pub ttl: Duration,
    pub memory_max_size: usize,
    pub external_tier_enabled: bool,
    pub external_tier_address: Option<String>,
    pub key_prefix: String,
    pub connect_timeout: Duration,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}

impl From<&CacheConfig> for CacheOptions {
    fn from(config: &CacheConfig) -> Self {
        Self {
            ttl: Duration::from_secs(config.default_ttl_seconds),
            memory_max_size: config.memory_max_size,
            external_tier_enabled: config.external_tier_enabled,
            external_tier_address: Some(config.external_tier_url.clone()),
            key_prefix: config.key_prefix.clone(),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
        }
    }
}

/// Point-in-time view of the cache
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub memory_entries: usize,
    pub memory_max_size: usize,
    pub external_tier_enabled: bool,
    pub external_tier_connected: bool,
}

/// Failures of the shared tier. Never leaves this module.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("External cache tier unavailable: {0}")]
    Unavailable(String),

    #[error("External cache command failed: {0}")]
    Command(#[from] redis::RedisError),

    #[error("Cached value could not be encoded: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// A shared cache tier storing JSON strings with a TTL
#[async_trait]
pub trait ExternalTier: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Remove every key starting with `prefix`
    async fn clear_prefix(&self, prefix: &str) -> Result<(), CacheError>;
}
