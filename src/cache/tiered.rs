//! Two-tier TTL cache for one category.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use moka::ops::compute::Op;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::store::{DurableStore, decode_snapshot, encode_snapshot};
use super::{CacheConfig, CacheEntry};
use crate::telemetry;

/// Values a [`TieredCache`] can hold.
pub trait Cacheable: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Cacheable for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// In-process moka tier backed by a best-effort [`DurableStore`].
///
/// Every entry carries the time it was fetched. [`get`](Self::get) treats
/// entries at least `ttl` old as misses and drops them. Writes go to both
/// tiers; the durable tier receives a full snapshot of the category, at
/// most one per `persist_interval`. [`flush`](Self::flush) and drop write
/// whatever is pending.
///
/// [`invalidate_all`](Self::invalidate_all) also sets a cutoff: writes of
/// values fetched before it are discarded.
pub struct TieredCache<T: Cacheable> {
    category: &'static str,
    ttl: Duration,
    persist_interval: Duration,
    memory: moka::sync::Cache<String, CacheEntry<T>>,
    store: Arc<dyn DurableStore>,
    /// Time of the last snapshot write.
    persisted: Mutex<Option<Instant>>,
    dirty: AtomicBool,
    cleared_at: Mutex<Option<DateTime<Utc>>>,
}

impl<T: Cacheable> TieredCache<T> {
    /// Create the cache and warm it from `store`.
    pub fn new(
        category: &'static str,
        config: &CacheConfig,
        store: Arc<dyn DurableStore>,
    ) -> Self {
        let memory = moka::sync::Cache::builder()
            .max_capacity(config.max_entries)
            .time_to_live(config.ttl)
            .build();
        let cache = Self {
            category,
            ttl: config.ttl,
            persist_interval: config.persist_interval,
            memory,
            store,
            persisted: Mutex::new(None),
            dirty: AtomicBool::new(false),
            cleared_at: Mutex::new(None),
        };
        cache.warm();
        cache
    }

    /// Category name, also the durable snapshot name.
    pub fn category(&self) -> &'static str {
        self.category
    }

    /// Fresh value for `key`, or `None` on miss.
    pub fn get(&self, key: &str) -> Option<T> {
        let now = Utc::now();
        match self.memory.get(key) {
            Some(entry) if entry.is_fresh(self.ttl, now) => {
                metrics::counter!(telemetry::CACHE_HITS_TOTAL, "category" => self.category)
                    .increment(1);
                debug!(category = self.category, key, "cache hit");
                Some(entry.data)
            }
            stale => {
                if stale.is_some() {
                    self.memory.invalidate(key);
                }
                metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "category" => self.category)
                    .increment(1);
                debug!(category = self.category, key, "cache miss");
                None
            }
        }
    }

    /// Store `value` fetched now.
    pub fn put(&self, key: &str, value: T) {
        self.put_at(key, value, Utc::now());
    }

    /// Store every `(key, value)` fetched now, with one durable write.
    pub fn put_many(&self, entries: impl IntoIterator<Item = (String, T)>) {
        let fetched_at = Utc::now();
        let mut stored = false;
        for (key, value) in entries {
            stored |= self.insert_at(&key, value, fetched_at);
        }
        if stored {
            self.persist_soon();
        }
    }

    /// Store `value` fetched at `fetched_at`.
    ///
    /// Last write wins by timestamp: if the cache already holds an entry
    /// fetched later than `fetched_at`, or was cleared after `fetched_at`,
    /// the value is discarded and `false` is returned.
    pub fn put_at(&self, key: &str, value: T, fetched_at: DateTime<Utc>) -> bool {
        let stored = self.insert_at(key, value, fetched_at);
        if stored {
            self.persist_soon();
        }
        stored
    }

    /// In-memory half of [`put_at`](Self::put_at).
    fn insert_at(&self, key: &str, value: T, fetched_at: DateTime<Utc>) -> bool {
        let cleared_at = lock(&self.cleared_at);
        let stored = if cleared_at.is_some_and(|cleared| fetched_at < cleared) {
            false
        } else {
            let result = self
                .memory
                .entry(key.to_string())
                .and_compute_with(|existing| match existing {
                    Some(e) if e.value().timestamp > fetched_at => Op::Nop,
                    _ => Op::Put(CacheEntry {
                        data: value,
                        timestamp: fetched_at,
                    }),
                });
            !matches!(result, moka::ops::compute::CompResult::Unchanged(_))
        };
        if !stored {
            debug!(
                category = self.category,
                key, "discarding result older than cached entry or last clear"
            );
        }
        stored
    }

    /// Drop `key` from both tiers.
    pub fn invalidate(&self, key: &str) {
        self.memory.invalidate(key);
        self.persist_soon();
    }

    /// Drop every entry from both tiers. Values fetched before now are no
    /// longer accepted.
    pub fn invalidate_all(&self) {
        {
            let mut cleared_at = lock(&self.cleared_at);
            *cleared_at = Some(Utc::now());
            self.memory.invalidate_all();
            self.memory.run_pending_tasks();
        }
        let _persisted = lock(&self.persisted);
        self.dirty.store(false, Ordering::SeqCst);
        if let Err(e) = self.store.remove(self.category) {
            warn!(
                category = self.category,
                store = self.store.name(),
                error = %e,
                "failed to clear durable cache"
            );
        }
    }

    /// Remove entries at least `ttl` old. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Utc::now();
        let stale: Vec<Arc<String>> = self
            .memory
            .iter()
            .filter(|(_, entry)| !entry.is_fresh(self.ttl, now))
            .map(|(key, _)| key)
            .collect();
        for key in &stale {
            self.memory.invalidate(key.as_str());
        }
        self.memory.run_pending_tasks();
        if !stale.is_empty() {
            debug!(category = self.category, removed = stale.len(), "swept stale entries");
            self.persist_soon();
        }
        stale.len()
    }

    /// Number of entries held in memory, fresh or not.
    pub fn len(&self) -> u64 {
        self.memory.run_pending_tasks();
        self.memory.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load fresh entries from the durable tier.
    fn warm(&self) {
        let Some(raw) = self.store.get(self.category) else {
            return;
        };
        let now = Utc::now();
        let mut loaded = 0usize;
        for (key, entry) in decode_snapshot::<T>(self.category, &raw) {
            if entry.is_fresh(self.ttl, now) {
                self.memory.insert(key, entry);
                loaded += 1;
            }
        }
        debug!(category = self.category, loaded, "warmed cache from durable store");
    }

    /// Write the category snapshot if anything changed since the last write.
    /// Failures are logged.
    pub fn flush(&self) {
        let mut persisted = lock(&self.persisted);
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return;
        }
        *persisted = Some(Instant::now());
        let now = Utc::now();
        let entries: Vec<(String, CacheEntry<T>)> = self
            .memory
            .iter()
            .filter(|(_, entry)| entry.is_fresh(self.ttl, now))
            .map(|(key, entry)| (key.as_ref().clone(), entry))
            .collect();
        let result = encode_snapshot(&entries).and_then(|raw| self.store.put(self.category, &raw));
        if let Err(e) = result {
            warn!(
                category = self.category,
                store = self.store.name(),
                error = %e,
                "failed to persist cache snapshot"
            );
        }
    }

    /// Mark the durable tier stale and write it if the last write is at
    /// least `persist_interval` old.
    fn persist_soon(&self) {
        self.dirty.store(true, Ordering::SeqCst);
        let due = lock(&self.persisted).is_none_or(|at| at.elapsed() >= self.persist_interval);
        if due {
            self.flush();
        }
    }
}

impl<T: Cacheable> Drop for TieredCache<T> {
    fn drop(&mut self) {
        self.flush();
    }
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl<T> CacheEntry<T> {
    /// Whether `now - timestamp < ttl`.
    pub fn is_fresh(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        let ttl = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX);
        now.signed_duration_since(self.timestamp) < ttl
    }
}
