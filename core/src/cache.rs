//! Short-TTL memoization for computed aggregates.
//!
//! One cache is built per process and owned by the service; handlers reach
//! it through `&mut` so there is a single writer and no locking. The clock
//! is passed in by the caller.

use crate::{config::CacheConfig, error::DashResult};
use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct CacheEntry {
    computed_at: DateTime<Utc>,
    value:       Value,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits:    u64,
    pub misses:  u64,
}

#[derive(Debug)]
pub struct MetricsCache {
    ttl:     Duration,
    entries: HashMap<String, CacheEntry>,
    hits:    u64,
    misses:  u64,
}

impl MetricsCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            ttl: Duration::seconds(i64::try_from(ttl_secs).unwrap_or(i64::MAX).min(i64::MAX / 1_000)),
            entries: HashMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.ttl_secs)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn is_fresh(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(entry.computed_at) < self.ttl
    }

    /// Cached value for `key` if it is younger than the TTL.
    pub fn get(&self, key: &str, now: DateTime<Utc>) -> Option<&Value> {
        self.entries
            .get(key)
            .filter(|e| self.is_fresh(e, now))
            .map(|e| &e.value)
    }

    pub fn insert(&mut self, key: &str, now: DateTime<Utc>, value: Value) {
        self.entries.insert(key.to_string(), CacheEntry { computed_at: now, value });
    }

    /// Serve `key` from the cache while fresh, otherwise run `compute` and
    /// store its result. Failed computations are not stored.
    pub fn get_or_compute<T, F>(&mut self, key: &str, now: DateTime<Utc>, compute: F) -> DashResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> DashResult<T>,
    {
        if let Some(value) = self.get(key, now) {
            let cached = serde_json::from_value(value.clone())?;
            self.hits += 1;
            log::debug!("cache: hit {key}");
            return Ok(cached);
        }

        self.misses += 1;
        let fresh = compute()?;
        self.insert(key, now, serde_json::to_value(&fresh)?);
        log::debug!("cache: stored {key}");
        Ok(fresh)
    }

    pub fn invalidate(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn invalidate_all(&mut self) {
        let dropped = self.entries.len();
        self.entries.clear();
        if dropped > 0 {
            log::info!("cache: invalidated {dropped} entries");
        }
    }

    /// Drop stale entries. Returns how many were removed.
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries
            .retain(|_, e| now.signed_duration_since(e.computed_at) < ttl);
        before - self.entries.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits,
            misses: self.misses,
        }
    }
}
