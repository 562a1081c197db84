//! Caching subsystem.
//!
//! Every cache is a [`TieredCache`]: a moka in-process tier plus a
//! best-effort [`DurableStore`] tier that is written on every put and read
//! once at construction. A non-zero `persist_interval` coalesces those
//! writes, with pending changes flushed by the sweeper and on drop. All
//! categories share one TTL (default 5 minutes).
//!
//! [`AvailabilityCache`] groups the categories the availability service
//! uses:
//!
//! | category          | key               | value                       |
//! |-------------------|-------------------|-----------------------------|
//! | `sessions`        | `all`             | every recurring definition  |
//! | `session-classes` | `all`             | every bookable link         |
//! | `item-sessions`   | item              | definitions linked to item  |
//! | `classes`         | item              | class descriptor            |
//! | `dates`           | item + start date | available dates             |
//! | `times`           | item + date       | display times               |
//! | `spots`           | item + date + time| resolved slot               |
//! | `spots-batch`     | item + date       | display time → slot         |
//!
//! Derived entries are not invalidated when the entity entries they were
//! computed from expire. With a uniform TTL a derived entry can outlive its
//! source by at most one TTL.

pub mod store;
mod tiered;

pub use store::{DurableStore, FileStore, MemoryStore, NullStore, default_cache_dir};
pub use tiered::{Cacheable, TieredCache};

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::types::{BookableLink, ClassInfo, RecurringDefinition, ResolvedSlot};

/// Key of the single entry in the entity caches.
pub const ALL_KEY: &str = "all";

/// A cached value and the time it was fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    pub timestamp: DateTime<Utc>,
}

/// Configuration for every cache category.
///
/// ```rust
/// # use slotwise::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .max_entries(2_000)
///     .ttl(Duration::from_secs(120));
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Time-to-live for every entry. Default: 5 minutes.
    pub ttl: Duration,
    /// Maximum in-memory entries per category. Default: 10,000.
    pub max_entries: u64,
    /// Minimum spacing between durable snapshot writes per category.
    /// Zero writes through on every change. Default: zero.
    pub persist_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_entries: 10_000,
            persist_interval: Duration::ZERO,
        }
    }
}

impl CacheConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the time-to-live for every entry.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the per-category entry bound.
    pub fn max_entries(mut self, n: u64) -> Self {
        self.max_entries = n;
        self
    }

    /// Set the minimum spacing between durable snapshot writes.
    pub fn persist_interval(mut self, interval: Duration) -> Self {
        self.persist_interval = interval;
        self
    }
}

/// The cache categories used by the availability service.
pub struct AvailabilityCache {
    pub(crate) definitions: TieredCache<Vec<RecurringDefinition>>,
    pub(crate) links: TieredCache<Vec<BookableLink>>,
    pub(crate) item_sessions: TieredCache<Vec<RecurringDefinition>>,
    pub(crate) classes: TieredCache<ClassInfo>,
    pub(crate) dates: TieredCache<Vec<NaiveDate>>,
    pub(crate) times: TieredCache<Vec<String>>,
    pub(crate) spots: TieredCache<ResolvedSlot>,
    pub(crate) spots_batch: TieredCache<BTreeMap<String, ResolvedSlot>>,
}

impl AvailabilityCache {
    /// Build every category over one durable store, warming from it.
    pub fn new(config: &CacheConfig, store: Arc<dyn DurableStore>) -> Self {
        Self {
            definitions: TieredCache::new("sessions", config, store.clone()),
            links: TieredCache::new("session-classes", config, store.clone()),
            item_sessions: TieredCache::new("item-sessions", config, store.clone()),
            classes: TieredCache::new("classes", config, store.clone()),
            dates: TieredCache::new("dates", config, store.clone()),
            times: TieredCache::new("times", config, store.clone()),
            spots: TieredCache::new("spots", config, store.clone()),
            spots_batch: TieredCache::new("spots-batch", config, store),
        }
    }

    /// In-memory only: nothing survives the process.
    pub fn in_memory(config: &CacheConfig) -> Self {
        Self::new(config, Arc::new(NullStore))
    }

    /// Drop every entry in every category, in both tiers.
    pub fn invalidate_all(&self) {
        self.definitions.invalidate_all();
        self.links.invalidate_all();
        self.item_sessions.invalidate_all();
        self.classes.invalidate_all();
        self.dates.invalidate_all();
        self.times.invalidate_all();
        self.spots.invalidate_all();
        self.spots_batch.invalidate_all();
        info!("availability cache cleared");
    }

    /// Remove expired entries from every category.
    pub fn sweep(&self) -> usize {
        self.definitions.sweep()
            + self.links.sweep()
            + self.item_sessions.sweep()
            + self.classes.sweep()
            + self.dates.sweep()
            + self.times.sweep()
            + self.spots.sweep()
            + self.spots_batch.sweep()
    }

    /// Write pending changes of every category to the durable tier.
    pub fn flush(&self) {
        self.definitions.flush();
        self.links.flush();
        self.item_sessions.flush();
        self.classes.flush();
        self.dates.flush();
        self.times.flush();
        self.spots.flush();
        self.spots_batch.flush();
    }

    /// Total in-memory entries across categories.
    pub fn len(&self) -> u64 {
        self.definitions.len()
            + self.links.len()
            + self.item_sessions.len()
            + self.classes.len()
            + self.dates.len()
            + self.times.len()
            + self.spots.len()
            + self.spots_batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sweep and flush `cache` every `every` until the last strong reference is
/// dropped.
///
/// # Panics
///
/// Requires a tokio runtime context.
pub fn spawn_sweeper(
    cache: &Arc<AvailabilityCache>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    let weak: Weak<AvailabilityCache> = Arc::downgrade(cache);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(cache) = weak.upgrade() else {
                break;
            };
            let removed = cache.sweep();
            cache.flush();
            if removed > 0 {
                debug!(removed, "periodic cache sweep");
            }
        }
    })
}

/// Key for per-item entries.
pub(crate) fn item_key(item: &str) -> String {
    item.to_string()
}

/// Key for per-item, per-date entries.
pub(crate) fn date_key(item: &str, date: NaiveDate) -> String {
    format!("{item}|{date}")
}

/// Key for per-item, per-date, per-time entries.
pub(crate) fn slot_key(item: &str, date: NaiveDate, time: &str) -> String {
    format!("{item}|{date}|{time}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_config_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.ttl, Duration::from_secs(300));
        assert_eq!(config.max_entries, 10_000);
        assert_eq!(config.persist_interval, Duration::ZERO);
    }

    #[test]
    fn keys_are_distinct_per_component() {
        let d1 = NaiveDate::from_ymd_opt(2026, 10, 12).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2026, 10, 13).unwrap();
        assert_ne!(date_key("a", d1), date_key("a", d2));
        assert_ne!(date_key("a", d1), date_key("b", d1));
        assert_eq!(
            slot_key("a", d1, "18:00 until 19:00"),
            "a|2026-10-12|18:00 until 19:00"
        );
        assert_eq!(item_key("a"), "a");
    }
}
