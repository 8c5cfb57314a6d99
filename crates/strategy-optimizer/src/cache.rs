use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use backtest_engine::BacktestConfig;
use dashmap::DashMap;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::OptimizationConfig;
use crate::error::OptimizerError;

/// Internal cache entry with timestamp
struct CacheEntry<V> {
    value: Arc<V>,
    cached_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() < ttl
    }
}

type Slot<V> = Arc<Mutex<Option<CacheEntry<V>>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// TTL cache with single-flight computation per key.
///
/// Each key owns a slot mutex; the first caller computes while concurrent callers
/// for the same key wait and then read the stored value. Failed computations leave
/// the slot empty.
pub struct ResultCache<V> {
    entries: DashMap<String, Slot<V>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V> ResultCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn slot(&self, key: &str) -> Slot<V> {
        self.entries.entry(key.to_string()).or_default().value().clone()
    }

    fn fresh_value(&self, entry: &Option<CacheEntry<V>>) -> Option<Arc<V>> {
        entry
            .as_ref()
            .filter(|e| e.is_fresh(self.ttl))
            .map(|e| e.value.clone())
    }

    /// Cached value for `key`, or the result of `compute` stored under it.
    ///
    /// Blocks the calling thread while another caller computes the same key, so it
    /// must not run on an async executor thread.
    pub fn get_or_try_insert_with<E, F>(&self, key: &str, compute: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let slot = self.slot(key);
        let mut guard = slot.blocking_lock();
        if let Some(value) = self.fresh_value(&guard) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let value = Arc::new(compute()?);
        *guard = Some(CacheEntry {
            value: value.clone(),
            cached_at: Instant::now(),
        });
        Ok(value)
    }

    /// Async variant of [`ResultCache::get_or_try_insert_with`].
    pub async fn get_or_try_insert_with_async<E, F, Fut>(
        &self,
        key: &str,
        compute: F,
    ) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let slot = self.slot(key);
        let mut guard = slot.lock().await;
        if let Some(value) = self.fresh_value(&guard) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!("Cache hit for {}", &key[..key.len().min(12)]);
            return Ok(value);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let value = Arc::new(compute().await?);
        *guard = Some(CacheEntry {
            value: value.clone(),
            cached_at: Instant::now(),
        });
        Ok(value)
    }

    /// Fresh value for `key`; `None` when absent, expired or still being computed.
    pub fn get(&self, key: &str) -> Option<Arc<V>> {
        let slot = self.entries.get(key)?.value().clone();
        let guard = slot.try_lock().ok()?;
        self.fresh_value(&guard)
    }

    pub fn insert(&self, key: &str, value: V) -> Arc<V> {
        let value = Arc::new(value);
        let entry = CacheEntry {
            value: value.clone(),
            cached_at: Instant::now(),
        };
        self.entries
            .insert(key.to_string(), Arc::new(Mutex::new(Some(entry))));
        value
    }

    /// Drop expired and empty slots that nobody is computing. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries.retain(|_, slot| match slot.try_lock() {
            Ok(guard) => matches!(guard.as_ref(), Some(e) if e.is_fresh(ttl)),
            Err(_) => true,
        });
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!("Purged {} expired cache entries", removed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Hex SHA-256 of the canonical JSON form of `value` (object keys sorted).
pub fn cache_key<T: Serialize>(value: &T) -> Result<String, OptimizerError> {
    let canonical = serde_json::to_value(value)
        .and_then(|v| serde_json::to_vec(&v))
        .map_err(|e| OptimizerError::InvalidConfig(format!("unserializable cache key: {e}")))?;
    Ok(hex::encode(Sha256::digest(&canonical)))
}

/// Key for a single backtest; symbol order does not matter.
pub fn backtest_key(config: &BacktestConfig) -> Result<String, OptimizerError> {
    let mut canonical = config.clone();
    canonical.symbols.sort();
    cache_key(&("backtest", &canonical))
}

/// Key for a whole optimization run; base parameters are ignored and symbol order does not matter.
/// Closure constraints contribute only their name, so such configs must not be cached.
pub fn optimization_key(config: &OptimizationConfig) -> Result<String, OptimizerError> {
    let mut canonical = config.clone();
    canonical.base = config.base_config();
    canonical.base.symbols.sort();
    cache_key(&("optimization", &canonical))
}
