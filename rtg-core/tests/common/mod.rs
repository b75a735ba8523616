//! Common test utilities for rtg-core

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use rtg_core::infrastructure::cache::{CacheError, CacheOptions, ExternalTier};

/// Shared tier kept in a map, with call counters
#[derive(Default)]
pub struct InMemoryExternalTier {
    pub entries: Mutex<HashMap<String, String>>,
    pub gets: AtomicUsize,
    pub sets: AtomicUsize,
}

impl InMemoryExternalTier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get_calls(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn set_calls(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExternalTier for InMemoryExternalTier {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str, _ttl: Duration) -> Result<(), CacheError> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn clear_prefix(&self, prefix: &str) -> Result<(), CacheError> {
        self.entries
            .lock()
            .await
            .retain(|k, _| !k.starts_with(prefix));
        Ok(())
    }
}

/// Shared tier whose every call fails
pub struct FailingExternalTier;

#[async_trait]
impl ExternalTier for FailingExternalTier {
    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn clear_prefix(&self, _prefix: &str) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }
}

pub fn test_cache_options(max: usize) -> CacheOptions {
    CacheOptions {
        ttl: Duration::from_secs(300),
        memory_max_size: max,
        external_tier_enabled: false,
        external_tier_address: None,
        key_prefix: "test".to_string(),
        connect_timeout: Duration::from_millis(100),
    }
}
