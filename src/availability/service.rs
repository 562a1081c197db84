//! The availability facade.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{Local, NaiveDate, Utc};
use futures_util::future;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::resolver::{self, LinkedTime, SlotMatch};
use super::{AvailabilityConfig, validate_item};
use crate::cache::{ALL_KEY, AvailabilityCache, date_key, item_key, slot_key};
use crate::providers::{CapacityProvider, ClassProvider, ScheduleProvider, StudioClient};
use crate::schedule::{display_time, expand, match_date, times_for};
use crate::telemetry;
use crate::throttle::{RequestThrottle, with_deadline};
use crate::types::{
    BookableLink, ClassInfo, NOT_OFFERED, RecurringDefinition, ResolvedSlot, SlotTime,
};
use crate::{Result, SlotwiseError};

/// Share of `resolve_timeout` available to throttled retries. The rest is
/// left for the final attempt's round trip.
const RETRY_SHARE: f64 = 0.75;

/// The collaborators the service reads from.
///
/// Providers are expected to route their calls through the same
/// [`RequestThrottle`] the service is built with; [`StudioClient`] does.
#[derive(Clone)]
pub struct Upstream {
    pub schedule: Arc<dyn ScheduleProvider>,
    pub capacity: Arc<dyn CapacityProvider>,
    /// Consulted only to detect unlimited item categories.
    pub classes: Option<Arc<dyn ClassProvider>>,
}

impl Upstream {
    /// Schedule and capacity providers, without class metadata.
    pub fn new(schedule: Arc<dyn ScheduleProvider>, capacity: Arc<dyn CapacityProvider>) -> Self {
        Self {
            schedule,
            capacity,
            classes: None,
        }
    }

    /// Add a class metadata provider.
    pub fn with_classes(mut self, classes: Arc<dyn ClassProvider>) -> Self {
        self.classes = Some(classes);
        self
    }

    /// Every collaborator served by one studio client.
    pub fn studio(client: Arc<StudioClient>) -> Self {
        Self {
            schedule: client.clone(),
            capacity: client.clone(),
            classes: Some(client),
        }
    }
}

/// Cached, throttled, failure-tolerant availability queries.
///
/// Cheap to clone; clones share caches and throttle.
#[derive(Clone)]
pub struct AvailabilityService {
    inner: Arc<Inner>,
}

struct Inner {
    upstream: Upstream,
    cache: Arc<AvailabilityCache>,
    throttle: Arc<RequestThrottle>,
    config: AvailabilityConfig,
}

/// A resolved slot and whether it came from a fallback path. Degraded
/// results are returned but never cached.
struct Resolution {
    slot: ResolvedSlot,
    degraded: bool,
}

impl Resolution {
    fn fresh(slot: ResolvedSlot) -> Self {
        Self {
            slot,
            degraded: false,
        }
    }

    fn degraded(slot: ResolvedSlot) -> Self {
        Self {
            slot,
            degraded: true,
        }
    }
}

impl AvailabilityService {
    pub fn new(
        upstream: Upstream,
        cache: Arc<AvailabilityCache>,
        throttle: Arc<RequestThrottle>,
        config: AvailabilityConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                upstream,
                cache,
                throttle,
                config,
            }),
        }
    }

    pub fn cache(&self) -> &Arc<AvailabilityCache> {
        &self.inner.cache
    }

    pub fn throttle(&self) -> &Arc<RequestThrottle> {
        &self.inner.throttle
    }

    pub fn config(&self) -> &AvailabilityConfig {
        &self.inner.config
    }

    /// Dates in the lookahead window, starting today, on which `item` is
    /// offered.
    pub async fn available_dates(&self, item: &str) -> Result<Vec<NaiveDate>> {
        self.available_dates_from(item, Local::now().date_naive())
            .await
    }

    /// Dates in the lookahead window, starting at `start`, on which `item`
    /// is offered. Ascending, no duplicates.
    pub async fn available_dates_from(
        &self,
        item: &str,
        start: NaiveDate,
    ) -> Result<Vec<NaiveDate>> {
        validate_item(item)?;
        let key = date_key(item, start);
        if let Some(dates) = self.inner.cache.dates.get(&key) {
            return Ok(dates);
        }

        let definitions = match self.item_definitions(item).await {
            Ok(definitions) => definitions,
            Err(e) => return degrade("available_dates", item, e, Vec::new()),
        };
        let dates = expand(&definitions, self.inner.config.horizon_days, start);
        debug!(item, %start, count = dates.len(), "expanded available dates");
        self.inner.cache.dates.put(&key, dates.clone());
        Ok(dates)
    }

    /// Distinct `"HH:MM until HH:MM"` times `item` runs on `date`, sorted.
    pub async fn available_times(&self, item: &str, date: NaiveDate) -> Result<Vec<String>> {
        validate_item(item)?;
        match self.times(item, date).await {
            Ok(times) => Ok(times),
            Err(e) => degrade("available_times", item, e, Vec::new()),
        }
    }

    /// Remaining spots for `item` on `date` at `time`.
    ///
    /// `time` is `"HH:MM until HH:MM"` or a bare `"HH:MM"` start; anything
    /// else is `InvalidInput`. A slot nobody offers, or that the item is
    /// not linked to, resolves to zero spots with the reason as message.
    pub async fn available_spots(
        &self,
        item: &str,
        date: NaiveDate,
        time: &str,
    ) -> Result<ResolvedSlot> {
        validate_item(item)?;
        let time = SlotTime::parse(time)?;
        let key = slot_key(item, date, &time.to_string());
        if let Some(slot) = self.inner.cache.spots.get(&key) {
            return Ok(slot);
        }

        let resolution = self.resolve(item, date, &time).await?;
        if !resolution.degraded {
            self.inner.cache.spots.put(&key, resolution.slot.clone());
        }
        Ok(resolution.slot)
    }

    /// Remaining spots at every time `item` runs on `date`, keyed by
    /// display time.
    ///
    /// Uses one batched capacity call; times the batch fails to cover, or
    /// every time when the batch call itself fails, are resolved one by one.
    pub async fn available_spots_batch(
        &self,
        item: &str,
        date: NaiveDate,
    ) -> Result<BTreeMap<String, ResolvedSlot>> {
        const OPERATION: &str = "available_spots_batch";

        validate_item(item)?;
        let key = date_key(item, date);
        if let Some(grid) = self.inner.cache.spots_batch.get(&key) {
            return Ok(grid);
        }

        let times = match self.times(item, date).await {
            Ok(times) => times,
            Err(e) => return degrade(OPERATION, item, e, BTreeMap::new()),
        };
        let (definitions, links) = match self.schedule().await {
            Ok(schedule) => schedule,
            Err(e) => return degrade(OPERATION, item, e, BTreeMap::new()),
        };

        let mut grid = BTreeMap::new();
        let mut linked: Vec<LinkedTime<'_>> = Vec::new();
        for display in &times {
            let Ok(time) = SlotTime::parse(display) else {
                continue;
            };
            match resolver::match_slot(&definitions, &links, item, date, &time) {
                SlotMatch::Linked { definition, link } => {
                    linked.push((display.clone(), definition, link));
                }
                unmatched => {
                    grid.insert(
                        display.clone(),
                        resolver::unmatched_slot(date, display, &unmatched),
                    );
                }
            }
        }

        let mut degraded = false;
        let mut fresh = Vec::new();
        if !linked.is_empty() && self.is_unlimited(item).await {
            for (display, definition, link) in &linked {
                let slot = resolver::optimistic_slot(date, display, definition, link);
                grid.insert(display.clone(), slot);
            }
        } else if !linked.is_empty() {
            let capacity = self.inner.upstream.capacity.clone();
            let owned_item = item.to_string();
            let batch = self
                .bounded(async move { capacity.capacity_batch(&owned_item, date).await })
                .await;
            let mut index = match batch {
                Ok(reports) => resolver::index_batch(&linked, reports),
                Err(e) if e.is_rate_limited() => return Err(e),
                Err(e) => {
                    warn!(item, %date, error = %e, "batch capacity failed, resolving individually");
                    Default::default()
                }
            };

            for (display, definition, link) in &linked {
                let resolution = match index.remove(display) {
                    Some(report) => Resolution::fresh(resolver::slot_from_report(
                        date, display, definition, link, &report,
                    )),
                    None => {
                        let time = display;
                        debug!(item, %date, %time, "resolving time individually");
                        self.query_capacity(item, date, display, definition, link)
                            .await?
                    }
                };
                if resolution.degraded {
                    degraded = true;
                } else {
                    fresh.push((slot_key(item, date, display), resolution.slot.clone()));
                }
                grid.insert(display.clone(), resolution.slot);
            }
        }

        self.inner.cache.spots.put_many(fresh);
        if !degraded {
            self.inner.cache.spots_batch.put(&key, grid.clone());
        }
        Ok(grid)
    }

    /// Drop every cached entry and all throttle backoff state.
    pub fn clear_cache(&self) {
        self.inner.cache.invalidate_all();
        self.inner.throttle.reset();
    }

    /// Display times for `item` on `date`, errors included.
    async fn times(&self, item: &str, date: NaiveDate) -> Result<Vec<String>> {
        let key = date_key(item, date);
        if let Some(times) = self.inner.cache.times.get(&key) {
            return Ok(times);
        }

        let definitions = self.item_definitions(item).await?;
        let times = times_for(match_date(&definitions, date));
        self.inner.cache.times.put(&key, times.clone());
        Ok(times)
    }

    /// Match the slot, then ask for its capacity.
    async fn resolve(&self, item: &str, date: NaiveDate, time: &SlotTime) -> Result<Resolution> {
        let requested = time.to_string();
        let (definitions, links) = match self.schedule().await {
            Ok(schedule) => schedule,
            Err(e) => {
                let fallback = ResolvedSlot::unavailable(date, &requested, NOT_OFFERED);
                return degrade("available_spots", item, e, fallback).map(Resolution::degraded);
            }
        };

        let (definition, link) =
            match resolver::match_slot(&definitions, &links, item, date, time) {
                SlotMatch::Linked { definition, link } => (definition, link),
                unmatched => {
                    let slot = resolver::unmatched_slot(date, &requested, &unmatched);
                    return Ok(Resolution::fresh(slot));
                }
            };
        let display = display_time(definition).unwrap_or(requested);

        if self.is_unlimited(item).await {
            let slot = resolver::optimistic_slot(date, &display, definition, link);
            return Ok(Resolution::fresh(slot));
        }
        self.query_capacity(item, date, &display, definition, link)
            .await
    }

    /// One capacity call, falling back to the definition's full capacity
    /// on anything but an exhausted rate limit.
    async fn query_capacity(
        &self,
        item: &str,
        date: NaiveDate,
        display: &str,
        definition: &RecurringDefinition,
        link: &BookableLink,
    ) -> Result<Resolution> {
        let capacity = self.inner.upstream.capacity.clone();
        let (owned_item, owned_time) = (item.to_string(), display.to_string());
        let report = self
            .bounded(async move { capacity.capacity(&owned_item, date, &owned_time).await })
            .await;
        match report {
            Ok(report) => Ok(Resolution::fresh(resolver::slot_from_report(
                date, display, definition, link, &report,
            ))),
            Err(e) => {
                let fallback = resolver::optimistic_slot(date, display, definition, link);
                degrade("available_spots", item, e, fallback).map(Resolution::degraded)
            }
        }
    }

    /// Whether `item` belongs to an unlimited category. Metadata failures
    /// count as limited.
    async fn is_unlimited(&self, item: &str) -> bool {
        let unlimited = &self.inner.config.unlimited_categories;
        if self.inner.upstream.classes.is_none() || unlimited.is_empty() {
            return false;
        }
        match self.class_info(item).await {
            Ok(info) => info.is_unlimited(unlimited),
            Err(e) => {
                debug!(item, error = %e, "class metadata unavailable, assuming limited capacity");
                false
            }
        }
    }

    async fn class_info(&self, item: &str) -> Result<ClassInfo> {
        let key = item_key(item);
        if let Some(info) = self.inner.cache.classes.get(&key) {
            return Ok(info);
        }
        let Some(classes) = self.inner.upstream.classes.clone() else {
            return Err(SlotwiseError::Configuration(
                "no class provider configured".to_string(),
            ));
        };

        let inner = self.inner.clone();
        self.bounded(async move {
            let fetched_at = Utc::now();
            let info = classes.class_info(&key).await?;
            inner.cache.classes.put_at(&key, info.clone(), fetched_at);
            Ok(info)
        })
        .await
    }

    /// Active definitions linked to `item`.
    async fn item_definitions(&self, item: &str) -> Result<Vec<RecurringDefinition>> {
        let key = item_key(item);
        if let Some(definitions) = self.inner.cache.item_sessions.get(&key) {
            return Ok(definitions);
        }

        let (definitions, links) = self.schedule().await?;
        let linked = resolver::definitions_for_item(&definitions, &links, item);
        debug!(
            item,
            total = definitions.len(),
            linked = linked.len(),
            "derived item definitions"
        );
        self.inner.cache.item_sessions.put(&key, linked.clone());
        Ok(linked)
    }

    /// Every definition and every link.
    async fn schedule(&self) -> Result<(Vec<RecurringDefinition>, Vec<BookableLink>)> {
        future::try_join(self.definitions(), self.links()).await
    }

    async fn definitions(&self) -> Result<Vec<RecurringDefinition>> {
        if let Some(definitions) = self.inner.cache.definitions.get(ALL_KEY) {
            return Ok(definitions);
        }
        let inner = self.inner.clone();
        self.bounded(async move {
            let fetched_at = Utc::now();
            let definitions = inner.upstream.schedule.definitions().await?;
            inner
                .cache
                .definitions
                .put_at(ALL_KEY, definitions.clone(), fetched_at);
            Ok(definitions)
        })
        .await
    }

    async fn links(&self) -> Result<Vec<BookableLink>> {
        if let Some(links) = self.inner.cache.links.get(ALL_KEY) {
            return Ok(links);
        }
        let inner = self.inner.clone();
        self.bounded(async move {
            let fetched_at = Utc::now();
            let links = inner.upstream.schedule.links().await?;
            inner.cache.links.put_at(ALL_KEY, links.clone(), fetched_at);
            Ok(links)
        })
        .await
    }

    /// Run `fut` as its own task and wait at most `resolve_timeout` for it.
    ///
    /// Throttled retries inside `fut` stop at [`RETRY_SHARE`] of the bound,
    /// so an exhausted rate limit surfaces as `RateLimited` rather than a
    /// timeout. A timed-out task keeps running; whatever it writes to the
    /// cache is stamped with its fetch start, so it never replaces a newer
    /// entry.
    async fn bounded<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let timeout = self.inner.config.resolve_timeout;
        let deadline = Instant::now() + timeout.mul_f64(RETRY_SHARE);
        let task = tokio::spawn(with_deadline(deadline, fut));
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(SlotwiseError::Http(format!("upstream task failed: {e}"))),
            Err(_) => Err(SlotwiseError::Timeout(timeout)),
        }
    }
}

/// Turn a recoverable failure into `fallback`. Rate limits and invalid
/// input pass through.
fn degrade<T>(
    operation: &'static str,
    item: &str,
    error: SlotwiseError,
    fallback: T,
) -> Result<T> {
    if error.is_rate_limited() || matches!(error, SlotwiseError::InvalidInput(_)) {
        return Err(error);
    }
    metrics::counter!(telemetry::FALLBACKS_TOTAL, "operation" => operation).increment(1);
    warn!(operation, item, error = %error, "upstream unavailable, returning fallback");
    Ok(fallback)
}
