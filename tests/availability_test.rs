//! Availability service behaviour against in-process collaborators.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use slotwise::{
    AvailabilityConfig, AvailabilityService, BookableLink, CapacityProvider, CapacityReport,
    ClassInfo, ClassProvider, NOT_LINKED, NOT_OFFERED, RecurringDefinition, Result,
    RequestThrottle, ScheduleProvider, Slotwise, SlotwiseError, SlotTime, ThrottleConfig, Upstream,
    Weekday,
};

// ============================================================================
// Fakes
// ============================================================================

#[derive(Default)]
struct FakeSchedule {
    definitions: Vec<RecurringDefinition>,
    links: Vec<BookableLink>,
    definition_calls: AtomicUsize,
    link_calls: AtomicUsize,
    fail: AtomicBool,
    delay: Option<Duration>,
}

impl FakeSchedule {
    fn new(definitions: Vec<RecurringDefinition>, links: Vec<BookableLink>) -> Self {
        Self {
            definitions,
            links,
            ..Default::default()
        }
    }

    fn calls(&self) -> (usize, usize) {
        (
            self.definition_calls.load(Ordering::SeqCst),
            self.link_calls.load(Ordering::SeqCst),
        )
    }
}

#[async_trait]
impl ScheduleProvider for FakeSchedule {
    fn name(&self) -> &str {
        "fake"
    }

    async fn definitions(&self) -> Result<Vec<RecurringDefinition>> {
        self.definition_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(SlotwiseError::Http("connection refused".to_string()));
        }
        Ok(self.definitions.clone())
    }

    async fn links(&self) -> Result<Vec<BookableLink>> {
        self.link_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(SlotwiseError::Http("connection refused".to_string()));
        }
        Ok(self.links.clone())
    }
}

#[derive(Default)]
struct FakeCapacity {
    /// Remaining spots per display time; unknown times report 5.
    available: HashMap<String, i64>,
    /// Times left out of batch responses.
    omit_from_batch: Vec<String>,
    fail_single: AtomicBool,
    fail_batch: AtomicBool,
    rate_limited: AtomicBool,
    hang: AtomicBool,
    single_calls: AtomicUsize,
    batch_calls: AtomicUsize,
    batch_times: Mutex<Vec<String>>,
}

impl FakeCapacity {
    fn with(available: &[(&str, i64)]) -> Self {
        Self {
            available: available
                .iter()
                .map(|(time, n)| (time.to_string(), *n))
                .collect(),
            ..Default::default()
        }
    }

    fn report(&self, time: &str) -> CapacityReport {
        CapacityReport {
            available: self.available.get(time).copied().unwrap_or(5),
            message: None,
            session_id: None,
            session_class_id: None,
            time: Some(time.to_string()),
        }
    }

    async fn gate(&self) -> Result<()> {
        if self.hang.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        if self.rate_limited.load(Ordering::SeqCst) {
            return Err(SlotwiseError::RateLimited {
                retry_after: Some(Duration::from_secs(4)),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CapacityProvider for FakeCapacity {
    fn name(&self) -> &str {
        "fake"
    }

    async fn capacity(&self, _item: &str, _date: NaiveDate, time: &str) -> Result<CapacityReport> {
        self.single_calls.fetch_add(1, Ordering::SeqCst);
        self.gate().await?;
        if self.fail_single.load(Ordering::SeqCst) {
            return Err(SlotwiseError::MalformedResponse("not json".to_string()));
        }
        Ok(self.report(time))
    }

    async fn capacity_batch(&self, _item: &str, _date: NaiveDate) -> Result<Vec<CapacityReport>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        self.gate().await?;
        if self.fail_batch.load(Ordering::SeqCst) {
            return Err(SlotwiseError::Api {
                status: 502,
                message: "bad gateway".to_string(),
            });
        }
        let times = self.batch_times.lock().unwrap().clone();
        Ok(times
            .iter()
            .filter(|t| !self.omit_from_batch.contains(*t))
            .map(|t| self.report(t))
            .collect())
    }
}

/// Capacity service that answers every call with 429, through a real
/// throttle.
struct SaturatedCapacity {
    throttle: RequestThrottle,
    single_calls: AtomicUsize,
    batch_calls: AtomicUsize,
}

impl SaturatedCapacity {
    fn new(config: ThrottleConfig) -> Self {
        Self {
            throttle: RequestThrottle::new(config),
            single_calls: AtomicUsize::new(0),
            batch_calls: AtomicUsize::new(0),
        }
    }

    async fn refuse<T: Send>(&self, endpoint: &str, calls: &AtomicUsize) -> Result<T> {
        self.throttle
            .schedule(endpoint, || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(SlotwiseError::RateLimited { retry_after: None })
            })
            .await
    }
}

#[async_trait]
impl CapacityProvider for SaturatedCapacity {
    fn name(&self) -> &str {
        "saturated"
    }

    async fn capacity(&self, item: &str, date: NaiveDate, _time: &str) -> Result<CapacityReport> {
        let endpoint = format!("/sessions/capacity/{item}/{date}");
        self.refuse(&endpoint, &self.single_calls).await
    }

    async fn capacity_batch(&self, item: &str, date: NaiveDate) -> Result<Vec<CapacityReport>> {
        let endpoint = format!("/sessions/capacity-batch/{item}/{date}");
        self.refuse(&endpoint, &self.batch_calls).await
    }
}

/// Capacity service whose batch replies identify sessions by id only.
struct KeyedBatchCapacity {
    batch: Vec<CapacityReport>,
    single_calls: AtomicUsize,
}

impl KeyedBatchCapacity {
    fn new(batch: &[(&str, i64)]) -> Self {
        Self {
            batch: batch
                .iter()
                .map(|(session, available)| CapacityReport {
                    available: *available,
                    message: None,
                    session_id: Some(session.to_string()),
                    session_class_id: None,
                    time: None,
                })
                .collect(),
            single_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl CapacityProvider for KeyedBatchCapacity {
    fn name(&self) -> &str {
        "keyed"
    }

    async fn capacity(&self, _item: &str, _date: NaiveDate, _time: &str) -> Result<CapacityReport> {
        self.single_calls.fetch_add(1, Ordering::SeqCst);
        Ok(CapacityReport {
            available: 9,
            message: None,
            session_id: None,
            session_class_id: None,
            time: None,
        })
    }

    async fn capacity_batch(&self, _item: &str, _date: NaiveDate) -> Result<Vec<CapacityReport>> {
        Ok(self.batch.clone())
    }
}

struct FakeClasses {
    category: &'static str,
    calls: AtomicUsize,
}

#[async_trait]
impl ClassProvider for FakeClasses {
    fn name(&self) -> &str {
        "fake"
    }

    async fn class_info(&self, item: &str) -> Result<ClassInfo> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ClassInfo {
            id: item.to_string(),
            name: None,
            category: Some(self.category.to_string()),
        })
    }
}

// ============================================================================
// Fixtures
// ============================================================================

const SIX: &str = "18:00 until 19:00";
const SEVEN: &str = "19:00 until 20:00";

fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn sunday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 11).unwrap()
}

fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 12).unwrap()
}

fn thursday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 15).unwrap()
}

/// Salsa on Monday (two sessions) and Thursday; tango on Tuesday.
fn studio() -> FakeSchedule {
    FakeSchedule::new(
        vec![
            RecurringDefinition::new("mon-6", [Weekday::Monday], hm(18, 0), hm(19, 0), 12),
            RecurringDefinition::new("mon-7", [Weekday::Monday], hm(19, 0), hm(20, 0), 8),
            RecurringDefinition::new("thu-6", [Weekday::Thursday], hm(18, 0), hm(19, 30), 10),
            RecurringDefinition::new("tue-10", [Weekday::Tuesday], hm(10, 0), hm(11, 0), 6),
        ],
        vec![
            BookableLink::new("l1", "mon-6", "salsa"),
            BookableLink::new("l2", "mon-7", "salsa"),
            BookableLink::new("l3", "thu-6", "salsa"),
            BookableLink::new("l4", "tue-10", "tango"),
        ],
    )
}

fn build(upstream: Upstream, config: AvailabilityConfig) -> AvailabilityService {
    Slotwise::builder()
        .upstream(upstream)
        .availability_config(config)
        .in_memory()
        .build()
        .unwrap()
}

fn service(schedule: &Arc<FakeSchedule>, capacity: &Arc<FakeCapacity>) -> AvailabilityService {
    build(
        Upstream::new(schedule.clone(), capacity.clone()),
        AvailabilityConfig::default(),
    )
}

// ============================================================================
// Dates
// ============================================================================

#[tokio::test]
async fn dates_for_monday_and_thursday_from_sunday() {
    let schedule = Arc::new(studio());
    let capacity = Arc::new(FakeCapacity::default());
    let service = service(&schedule, &capacity);

    let dates = service.available_dates_from("salsa", sunday()).await.unwrap();
    assert_eq!(dates, vec![monday(), thursday()]);
}

#[tokio::test]
async fn second_call_is_served_from_cache() {
    let schedule = Arc::new(studio());
    let capacity = Arc::new(FakeCapacity::default());
    let service = service(&schedule, &capacity);

    let first = service.available_dates_from("salsa", sunday()).await.unwrap();
    assert_eq!(schedule.calls(), (1, 1));
    let second = service.available_dates_from("salsa", sunday()).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(schedule.calls(), (1, 1));

    // Other items reuse the cached schedule.
    let tango = service.available_dates_from("tango", sunday()).await.unwrap();
    assert_eq!(tango, vec![sunday().succ_opt().unwrap().succ_opt().unwrap()]);
    assert_eq!(schedule.calls(), (1, 1));
}

#[tokio::test]
async fn dates_skip_inactive_definitions_and_links() {
    let schedule = Arc::new(FakeSchedule::new(
        vec![
            RecurringDefinition::new("mon", [Weekday::Monday], hm(18, 0), hm(19, 0), 12).inactive(),
            RecurringDefinition::new("wed", [Weekday::Wednesday], hm(18, 0), hm(19, 0), 12),
            RecurringDefinition::new("fri", [Weekday::Friday], hm(18, 0), hm(19, 0), 12),
        ],
        vec![
            BookableLink::new("l1", "mon", "salsa"),
            BookableLink::new("l2", "wed", "salsa").inactive(),
            BookableLink::new("l3", "fri", "salsa"),
        ],
    ));
    let capacity = Arc::new(FakeCapacity::default());
    let service = service(&schedule, &capacity);

    let dates = service.available_dates_from("salsa", sunday()).await.unwrap();
    assert_eq!(dates, vec![NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()]);
}

#[tokio::test]
async fn unknown_item_has_no_dates() {
    let schedule = Arc::new(studio());
    let capacity = Arc::new(FakeCapacity::default());
    let service = service(&schedule, &capacity);

    let dates = service.available_dates_from("ballet", sunday()).await.unwrap();
    assert!(dates.is_empty());
}

#[tokio::test]
async fn schedule_outage_degrades_to_empty_and_is_not_cached() {
    let schedule = Arc::new(studio());
    schedule.fail.store(true, Ordering::SeqCst);
    let capacity = Arc::new(FakeCapacity::default());
    let service = service(&schedule, &capacity);

    assert!(service.available_dates_from("salsa", sunday()).await.unwrap().is_empty());
    assert!(service.available_times("salsa", monday()).await.unwrap().is_empty());
    assert!(
        service
            .available_spots_batch("salsa", monday())
            .await
            .unwrap()
            .is_empty()
    );

    schedule.fail.store(false, Ordering::SeqCst);
    let dates = service.available_dates_from("salsa", sunday()).await.unwrap();
    assert_eq!(dates, vec![monday(), thursday()]);
}

#[tokio::test]
async fn empty_item_is_rejected() {
    let schedule = Arc::new(studio());
    let capacity = Arc::new(FakeCapacity::default());
    let service = service(&schedule, &capacity);

    let err = service.available_dates_from(" ", sunday()).await.unwrap_err();
    assert!(matches!(err, SlotwiseError::InvalidInput(_)));
    assert_eq!(schedule.calls(), (0, 0));
}

// ============================================================================
// Times
// ============================================================================

#[tokio::test]
async fn times_are_sorted_and_deduplicated() {
    let mut fixture = studio();
    // A second Monday definition with the 18:00 window.
    fixture.definitions.push(RecurringDefinition::new(
        "mon-6-b",
        [Weekday::Monday],
        hm(18, 0),
        hm(19, 0),
        4,
    ));
    fixture.links.push(BookableLink::new("l5", "mon-6-b", "salsa"));
    let schedule = Arc::new(fixture);
    let capacity = Arc::new(FakeCapacity::default());
    let service = service(&schedule, &capacity);

    let times = service.available_times("salsa", monday()).await.unwrap();
    assert_eq!(times, vec![SIX, SEVEN]);

    let thursday_times = service.available_times("salsa", thursday()).await.unwrap();
    assert_eq!(thursday_times, vec!["18:00 until 19:30"]);

    let tuesday = monday().succ_opt().unwrap();
    assert!(service.available_times("salsa", tuesday).await.unwrap().is_empty());
}

// ============================================================================
// Spots
// ============================================================================

#[tokio::test]
async fn spots_follow_capacity_tiers() {
    let schedule = Arc::new(studio());
    let capacity = Arc::new(FakeCapacity::with(&[(SIX, 1), (SEVEN, -3)]));
    let service = service(&schedule, &capacity);

    let six = service.available_spots("salsa", monday(), SIX).await.unwrap();
    assert_eq!(six.available, 1);
    assert_eq!(six.message, "last spot");
    assert_eq!(six.source_definition_id.as_deref(), Some("mon-6"));
    assert_eq!(six.source_link_id.as_deref(), Some("l1"));

    let seven = service.available_spots("salsa", monday(), SEVEN).await.unwrap();
    assert_eq!(seven.available, 0);
    assert_eq!(seven.message, "full");
    assert!(!seven.is_bookable());
}

#[tokio::test]
async fn bare_start_time_resolves_full_window() {
    let schedule = Arc::new(studio());
    let capacity = Arc::new(FakeCapacity::with(&[(SIX, 2)]));
    let service = service(&schedule, &capacity);

    let slot = service.available_spots("salsa", monday(), "18:00").await.unwrap();
    assert_eq!(slot.display_time, SIX);
    assert_eq!(slot.available, 2);
    assert_eq!(slot.message, "2 available");
}

#[tokio::test]
async fn spots_are_cached() {
    let schedule = Arc::new(studio());
    let capacity = Arc::new(FakeCapacity::default());
    let service = service(&schedule, &capacity);

    let first = service.available_spots("salsa", monday(), SIX).await.unwrap();
    let second = service.available_spots("salsa", monday(), SIX).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(capacity.single_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unscheduled_time_is_not_offered() {
    let schedule = Arc::new(studio());
    let capacity = Arc::new(FakeCapacity::default());
    let service = service(&schedule, &capacity);

    let slot = service.available_spots("salsa", monday(), "07:00 until 08:00").await.unwrap();
    assert_eq!(slot.available, 0);
    assert_eq!(slot.message, NOT_OFFERED);

    let slot = service.available_spots("salsa", thursday(), SIX).await.unwrap();
    assert_eq!(slot.message, NOT_OFFERED);
    assert_eq!(capacity.single_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unlinked_definition_is_not_linked() {
    let schedule = Arc::new(studio());
    let capacity = Arc::new(FakeCapacity::default());
    let service = service(&schedule, &capacity);

    let slot = service.available_spots("tango", monday(), SIX).await.unwrap();
    assert_eq!(slot.available, 0);
    assert_eq!(slot.message, NOT_LINKED);
    assert_eq!(capacity.single_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn malformed_time_is_rejected() {
    let schedule = Arc::new(studio());
    let capacity = Arc::new(FakeCapacity::default());
    let service = service(&schedule, &capacity);

    for time in ["", "6pm", "18:00 to 19:00", "25:00"] {
        let err = service.available_spots("salsa", monday(), time).await.unwrap_err();
        assert!(matches!(err, SlotwiseError::InvalidInput(_)), "{time:?}");
    }
}

#[tokio::test]
async fn capacity_failure_falls_back_to_max_capacity() {
    let schedule = Arc::new(studio());
    let capacity = Arc::new(FakeCapacity::default());
    capacity.fail_single.store(true, Ordering::SeqCst);
    let service = service(&schedule, &capacity);

    let slot = service.available_spots("salsa", monday(), SIX).await.unwrap();
    assert_eq!(slot.available, 12);
    assert_eq!(slot.message, "available");

    // Degraded answers are not cached.
    capacity.fail_single.store(false, Ordering::SeqCst);
    let slot = service.available_spots("salsa", monday(), SIX).await.unwrap();
    assert_eq!(slot.available, 5);
    assert_eq!(capacity.single_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn capacity_timeout_falls_back_to_max_capacity() {
    let schedule = Arc::new(studio());
    let capacity = Arc::new(FakeCapacity::default());
    capacity.hang.store(true, Ordering::SeqCst);
    let service = build(
        Upstream::new(schedule.clone(), capacity.clone()),
        AvailabilityConfig::new().resolve_timeout(Duration::from_secs(3)),
    );

    let started = tokio::time::Instant::now();
    let slot = service.available_spots("salsa", monday(), SEVEN).await.unwrap();
    assert_eq!(slot.available, 8);
    assert_eq!(slot.message, "available");
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn exhausted_rate_limit_is_surfaced() {
    let schedule = Arc::new(studio());
    let capacity = Arc::new(FakeCapacity::default());
    capacity.rate_limited.store(true, Ordering::SeqCst);
    let service = service(&schedule, &capacity);

    let err = service.available_spots("salsa", monday(), SIX).await.unwrap_err();
    assert!(err.is_rate_limited());
    assert_eq!(
        err.wait_hint().unwrap(),
        "too many requests, try again in about 4 seconds"
    );

    let err = service.available_spots_batch("salsa", monday()).await.unwrap_err();
    assert!(err.is_rate_limited());
}

#[tokio::test(start_paused = true)]
async fn throttled_rate_limit_surfaces_within_resolve_timeout() {
    let schedule = Arc::new(studio());
    let capacity = Arc::new(SaturatedCapacity::new(ThrottleConfig::default()));
    let service = build(
        Upstream::new(schedule.clone(), capacity.clone()),
        AvailabilityConfig::default(),
    );

    let started = tokio::time::Instant::now();
    let err = service.available_spots("salsa", monday(), SIX).await.unwrap_err();
    assert!(err.is_rate_limited(), "{err:?}");
    assert!(err.wait_hint().is_some());
    assert!(started.elapsed() < Duration::from_secs(3));
    let attempts = capacity.single_calls.load(Ordering::SeqCst);
    assert!((2..5).contains(&attempts), "{attempts} attempts");

    let err = service.available_spots_batch("salsa", monday()).await.unwrap_err();
    assert!(err.is_rate_limited(), "{err:?}");
    assert!(capacity.batch_calls.load(Ordering::SeqCst) >= 2);
    // No per-time fallback after a rate-limited batch.
    assert_eq!(capacity.single_calls.load(Ordering::SeqCst), attempts);
}

#[tokio::test]
async fn unlimited_items_skip_capacity_service() {
    let schedule = Arc::new(studio());
    let capacity = Arc::new(FakeCapacity::with(&[(SIX, 0)]));
    let classes = Arc::new(FakeClasses {
        category: "Unlimited",
        calls: AtomicUsize::new(0),
    });
    let service = build(
        Upstream::new(schedule.clone(), capacity.clone()).with_classes(classes.clone()),
        AvailabilityConfig::default(),
    );

    let slot = service.available_spots("salsa", monday(), SIX).await.unwrap();
    assert_eq!(slot.available, 12);
    assert_eq!(slot.message, "available");

    let grid = service.available_spots_batch("salsa", monday()).await.unwrap();
    assert_eq!(grid[SEVEN].available, 8);
    assert_eq!(capacity.single_calls.load(Ordering::SeqCst), 0);
    assert_eq!(capacity.batch_calls.load(Ordering::SeqCst), 0);
    assert_eq!(classes.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn limited_category_uses_capacity_service() {
    let schedule = Arc::new(studio());
    let capacity = Arc::new(FakeCapacity::with(&[(SIX, 0)]));
    let classes = Arc::new(FakeClasses {
        category: "group",
        calls: AtomicUsize::new(0),
    });
    let service = build(
        Upstream::new(schedule.clone(), capacity.clone()).with_classes(classes),
        AvailabilityConfig::default(),
    );

    let slot = service.available_spots("salsa", monday(), SIX).await.unwrap();
    assert_eq!(slot.message, "full");
    assert_eq!(capacity.single_calls.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Batch
// ============================================================================

#[tokio::test]
async fn batch_uses_one_upstream_call() {
    let schedule = Arc::new(studio());
    let capacity = Arc::new(FakeCapacity::with(&[(SIX, 3), (SEVEN, 0)]));
    *capacity.batch_times.lock().unwrap() = vec![SIX.to_string(), SEVEN.to_string()];
    let service = service(&schedule, &capacity);

    let grid = service.available_spots_batch("salsa", monday()).await.unwrap();
    assert_eq!(grid.keys().collect::<Vec<_>>(), vec![SIX, SEVEN]);
    assert_eq!(grid[SIX].message, "3 available");
    assert_eq!(grid[SEVEN].message, "full");
    assert_eq!(capacity.batch_calls.load(Ordering::SeqCst), 1);
    assert_eq!(capacity.single_calls.load(Ordering::SeqCst), 0);

    // The batch also fills the per-slot cache.
    let six = service.available_spots("salsa", monday(), SIX).await.unwrap();
    assert_eq!(six, grid[SIX]);
    assert_eq!(capacity.single_calls.load(Ordering::SeqCst), 0);

    service.available_spots_batch("salsa", monday()).await.unwrap();
    assert_eq!(capacity.batch_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_batch_resolves_each_time() {
    let schedule = Arc::new(studio());
    let capacity = Arc::new(FakeCapacity::with(&[(SIX, 1), (SEVEN, 4)]));
    capacity.fail_batch.store(true, Ordering::SeqCst);
    let service = service(&schedule, &capacity);

    let grid = service.available_spots_batch("salsa", monday()).await.unwrap();
    assert_eq!(grid[SIX].message, "last spot");
    assert_eq!(grid[SEVEN].message, "available");
    assert_eq!(capacity.batch_calls.load(Ordering::SeqCst), 1);
    assert_eq!(capacity.single_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn times_missing_from_batch_are_resolved_individually() {
    let schedule = Arc::new(studio());
    let mut fake = FakeCapacity::with(&[(SIX, 2), (SEVEN, 6)]);
    fake.omit_from_batch = vec![SEVEN.to_string()];
    let capacity = Arc::new(fake);
    *capacity.batch_times.lock().unwrap() = vec![SIX.to_string(), SEVEN.to_string()];
    let service = service(&schedule, &capacity);

    let grid = service.available_spots_batch("salsa", monday()).await.unwrap();
    assert_eq!(grid[SIX].available, 2);
    assert_eq!(grid[SEVEN].available, 6);
    assert_eq!(capacity.single_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn batch_reports_are_matched_by_session_id() {
    let schedule = Arc::new(studio());
    let capacity = Arc::new(KeyedBatchCapacity::new(&[("mon-7", 0), ("mon-6", 3)]));
    let service = build(
        Upstream::new(schedule.clone(), capacity.clone()),
        AvailabilityConfig::default(),
    );

    let grid = service.available_spots_batch("salsa", monday()).await.unwrap();

    assert_eq!(grid[SIX].available, 3);
    assert_eq!(grid[SIX].source_definition_id.as_deref(), Some("mon-6"));
    assert_eq!(grid[SEVEN].available, 0);
    assert_eq!(capacity.single_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn batch_without_a_report_for_a_session_resolves_it_individually() {
    let schedule = Arc::new(studio());
    let capacity = Arc::new(KeyedBatchCapacity::new(&[("mon-7", 1)]));
    let service = build(
        Upstream::new(schedule.clone(), capacity.clone()),
        AvailabilityConfig::default(),
    );

    let grid = service.available_spots_batch("salsa", monday()).await.unwrap();

    assert_eq!(grid[SEVEN].message, "last spot");
    assert_eq!(grid[SIX].available, 9);
    assert_eq!(capacity.single_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn batch_for_day_without_sessions_is_empty() {
    let schedule = Arc::new(studio());
    let capacity = Arc::new(FakeCapacity::default());
    let service = service(&schedule, &capacity);

    let grid = service.available_spots_batch("salsa", sunday()).await.unwrap();
    assert!(grid.is_empty());
    assert_eq!(capacity.batch_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn resolved_slots_never_report_negative_or_garbage() {
    let schedule = Arc::new(studio());
    let capacity = Arc::new(FakeCapacity::with(&[(SIX, -100), (SEVEN, i64::MIN)]));
    *capacity.batch_times.lock().unwrap() = vec![SIX.to_string(), SEVEN.to_string()];
    let service = service(&schedule, &capacity);

    let grid = service.available_spots_batch("salsa", monday()).await.unwrap();
    for slot in grid.values() {
        assert_eq!(slot.available, 0);
        assert_eq!(slot.message, "full");
        assert!(SlotTime::parse(&slot.display_time).is_ok());
    }
}

// ============================================================================
// Cache control and late completions
// ============================================================================

#[tokio::test]
async fn clear_cache_forces_refetch() {
    let schedule = Arc::new(studio());
    let capacity = Arc::new(FakeCapacity::default());
    let service = service(&schedule, &capacity);

    service.available_dates_from("salsa", sunday()).await.unwrap();
    service.clear_cache();
    service.available_dates_from("salsa", sunday()).await.unwrap();
    assert_eq!(schedule.calls(), (2, 2));
}

#[tokio::test(start_paused = true)]
async fn late_schedule_fetch_still_populates_cache() {
    let mut fixture = studio();
    fixture.delay = Some(Duration::from_secs(5));
    let schedule = Arc::new(fixture);
    let capacity = Arc::new(FakeCapacity::default());
    let service = build(
        Upstream::new(schedule.clone(), capacity.clone()),
        AvailabilityConfig::new().resolve_timeout(Duration::from_secs(1)),
    );

    let dates = service.available_dates_from("salsa", sunday()).await.unwrap();
    assert!(dates.is_empty(), "timed-out fetch degrades to no dates");

    // Let the abandoned fetch finish in the background.
    tokio::time::sleep(Duration::from_secs(10)).await;

    let dates = service.available_dates_from("salsa", sunday()).await.unwrap();
    assert_eq!(dates, vec![monday(), thursday()]);
    assert_eq!(schedule.calls(), (1, 1));
}

#[tokio::test(start_paused = true)]
async fn fetch_in_flight_during_clear_cache_is_discarded() {
    let mut fixture = studio();
    fixture.delay = Some(Duration::from_secs(5));
    let schedule = Arc::new(fixture);
    let capacity = Arc::new(FakeCapacity::default());
    let service = build(
        Upstream::new(schedule.clone(), capacity.clone()),
        AvailabilityConfig::new().resolve_timeout(Duration::from_secs(1)),
    );

    let dates = service.available_dates_from("salsa", sunday()).await.unwrap();
    assert!(dates.is_empty());
    service.clear_cache();

    // The abandoned fetch completes after the clear.
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert!(service.cache().is_empty());
    assert_eq!(schedule.calls(), (1, 1));
}
