//! Cache manager combining the memory and shared tiers

use std::borrow::Cow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use super::{
    CacheContext, CacheNamespace, CacheOptions, CacheStats, DragonflyTier, ExternalTier,
    MemoryTier,
};

/// Two-tier key/value cache with TTL and namespacing
pub struct CacheManager {
    memory: MemoryTier,
    external: Option<Arc<dyn ExternalTier>>,
    external_connected: AtomicBool,
    external_enabled: bool,
    default_ttl: Duration,
    key_prefix: String,
}

impl CacheManager {
    /// Memory-only cache
    pub fn new(options: CacheOptions) -> Self {
        Self {
            memory: MemoryTier::new(options.memory_max_size),
            external: None,
            external_connected: AtomicBool::new(false),
            external_enabled: false,
            default_ttl: options.ttl,
            key_prefix: options.key_prefix,
        }
    }

    /// Cache with an already constructed shared tier
    pub fn with_external_tier(options: CacheOptions, tier: Arc<dyn ExternalTier>) -> Self {
        Self {
            external: Some(tier),
            external_connected: AtomicBool::new(true),
            external_enabled: true,
            ..Self::new(options)
        }
    }

    /// Build from options, connecting to the shared tier when enabled.
    ///
    /// A tier that cannot be reached within `connect_timeout` leaves the
    /// cache memory-only.
    pub async fn connect(options: CacheOptions) -> Self {
        let address = match (&options.external_tier_address, options.external_tier_enabled) {
            (Some(address), true) => address.clone(),
            _ => return Self::new(options),
        };

        match tokio::time::timeout(options.connect_timeout, DragonflyTier::connect(&address)).await
        {
            Ok(Ok(tier)) => {
                info!(address = %address, "External cache tier connected");
                Self::with_external_tier(options, Arc::new(tier))
            }
            Ok(Err(e)) => {
                warn!(address = %address, error = %e, "External cache tier unavailable, using memory only");
                Self {
                    external_enabled: true,
                    ..Self::new(options)
                }
            }
            Err(_) => {
                warn!(address = %address, "External cache tier connection timed out, using memory only");
                Self {
                    external_enabled: true,
                    ..Self::new(options)
                }
            }
        }
    }

    /// Deterministic key: `namespace:key[:target:<id>][:filters:<json>]`.
    ///
    /// `\` and `:` inside the key and target are backslash-escaped, so only the
    /// separators above appear unescaped. Filters come last and need no escaping.
    pub fn cache_key(namespace: CacheNamespace, key: &str, context: &CacheContext) -> String {
        let mut out = format!("{}:{}", namespace.as_str(), escape_component(key));
        if let Some(target) = &context.target_id {
            out.push_str(":target:");
            out.push_str(&escape_component(target));
        }
        if let Some(filters) = &context.filters {
            // serde_json::Map keeps keys sorted, so equal filters serialize equally
            out.push_str(":filters:");
            out.push_str(&filters.to_string());
        }
        out
    }

    fn external_key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }

    fn mark_external(&self, ok: bool) {
        self.external_connected.store(ok, Ordering::Relaxed);
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        namespace: CacheNamespace,
        key: &str,
        context: &CacheContext,
    ) -> Option<T> {
        let cache_key = Self::cache_key(namespace, key, context);

        if let Some(value) = self.memory.get(&cache_key) {
            match serde_json::from_value(value) {
                Ok(typed) => {
                    debug!(key = %cache_key, "Memory cache hit");
                    return Some(typed);
                }
                Err(e) => {
                    debug!(key = %cache_key, error = %e, "Cached value has unexpected shape");
                    self.memory.remove(&cache_key);
                }
            }
        }

        let external = self.external.as_ref()?;
        let raw = match external.get(&self.external_key(&cache_key)).await {
            Ok(raw) => {
                self.mark_external(true);
                raw?
            }
            Err(e) => {
                warn!(key = %cache_key, error = %e, "External cache read failed");
                self.mark_external(false);
                return None;
            }
        };

        let value: serde_json::Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                debug!(key = %cache_key, error = %e, "External cache value is not JSON");
                return None;
            }
        };
        let typed = serde_json::from_value(value.clone()).ok()?;
        debug!(key = %cache_key, "External cache hit");
        self.memory.insert(cache_key, value, self.default_ttl);
        Some(typed)
    }

    /// Store `value`; `ttl` falls back to the configured default
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        namespace: CacheNamespace,
        key: &str,
        value: &T,
        context: &CacheContext,
        ttl: Option<Duration>,
    ) {
        let cache_key = Self::cache_key(namespace, key, context);
        let ttl = ttl.unwrap_or(self.default_ttl);

        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %cache_key, error = %e, "Value cannot be cached");
                return;
            }
        };

        if let Some(external) = &self.external {
            let raw = value.to_string();
            match external.set(&self.external_key(&cache_key), &raw, ttl).await {
                Ok(()) => self.mark_external(true),
                Err(e) => {
                    warn!(key = %cache_key, error = %e, "External cache write failed");
                    self.mark_external(false);
                }
            }
        }

        self.memory.insert(cache_key, value, ttl);
    }

    pub async fn delete(&self, namespace: CacheNamespace, key: &str, context: &CacheContext) {
        let cache_key = Self::cache_key(namespace, key, context);
        self.memory.remove(&cache_key);

        if let Some(external) = &self.external {
            if let Err(e) = external.delete(&self.external_key(&cache_key)).await {
                warn!(key = %cache_key, error = %e, "External cache delete failed");
                self.mark_external(false);
            }
        }
    }

    /// Clear one namespace, or everything this cache owns when `None`
    pub async fn clear(&self, namespace: Option<CacheNamespace>) {
        let prefix = match namespace {
            Some(ns) => {
                let prefix = format!("{}:", ns.as_str());
                self.memory.clear_prefix(&prefix);
                prefix
            }
            None => {
                self.memory.clear();
                String::new()
            }
        };

        if let Some(external) = &self.external {
            if let Err(e) = external.clear_prefix(&self.external_key(&prefix)).await {
                warn!(prefix = %prefix, error = %e, "External cache clear failed");
                self.mark_external(false);
            }
        }

        info!(namespace = ?namespace.map(|n| n.as_str()), "Cache cleared");
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            memory_entries: self.memory.len(),
            memory_max_size: self.memory.max_size(),
            external_tier_enabled: self.external_enabled,
            external_tier_connected: self.external.is_some()
                && self.external_connected.load(Ordering::Relaxed),
        }
    }
}

fn escape_component(raw: &str) -> Cow<'_, str> {
    if !raw.contains([':', '\\']) {
        return Cow::Borrowed(raw);
    }
    let mut out = String::with_capacity(raw.len() + 4);
    for ch in raw.chars() {
        if ch == ':' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    Cow::Owned(out)
}
