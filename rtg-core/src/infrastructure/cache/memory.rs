//! Bounded in-process tier

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

/// Share of capacity freed when the map is full
const EVICTION_RATIO: f64 = 0.10;

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Value,
    expires_at: Instant,
}

impl MemoryEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Map of JSON values with per-entry expiry and expiry-ordered eviction
#[derive(Debug)]
pub struct MemoryTier {
    entries: Mutex<HashMap<String, MemoryEntry>>,
    max_size: usize,
}

impl MemoryTier {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_size: max_size.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, MemoryEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Live value for `key`; an expired entry is removed on the way out
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: String, value: Value, ttl: Duration) {
        let mut entries = self.lock();
        if !entries.contains_key(&key) && entries.len() >= self.max_size {
            Self::evict(&mut entries, self.max_size);
        }
        entries.insert(
            key,
            MemoryEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Drop the entries closest to expiry, about a tenth of capacity
    fn evict(entries: &mut HashMap<String, MemoryEntry>, max_size: usize) {
        let to_remove = ((max_size as f64) * EVICTION_RATIO).ceil().max(1.0) as usize;
        let mut by_expiry: Vec<(String, Instant)> = entries
            .iter()
            .map(|(k, e)| (k.clone(), e.expires_at))
            .collect();
        by_expiry.sort_by_key(|(_, expires_at)| *expires_at);
        for (key, _) in by_expiry.into_iter().take(to_remove) {
            entries.remove(&key);
        }
    }

    pub fn remove(&self, key: &str) {
        self.lock().remove(key);
    }

    pub fn clear_prefix(&self, prefix: &str) {
        self.lock().retain(|k, _| !k.starts_with(prefix));
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }
}
