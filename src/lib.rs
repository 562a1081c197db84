//! Slotwise - availability engine for recurring studio sessions
//!
//! A studio publishes weekly recurring session definitions ("Mondays and
//! Thursdays, 18:00 until 19:30, 12 spots") and links them to bookable
//! items. This crate turns those definitions into concrete dates, time
//! slots and remaining-capacity answers for a booking UI, while keeping
//! load on the upstream services low:
//!
//! - every answer is cached in a two-tier TTL cache (in-process plus an
//!   optional on-disk tier that survives restarts);
//! - every upstream call is serialized through one adaptive throttle that
//!   backs off per endpoint on rate-limit responses;
//! - upstream failures degrade to empty or optimistic answers instead of
//!   errors. Only exhausted rate limits and invalid input are surfaced.
//!
//! # Example
//!
//! ```rust,no_run
//! use slotwise::{Slotwise, parse_date};
//!
//! #[tokio::main]
//! async fn main() -> slotwise::Result<()> {
//!     let service = Slotwise::builder()
//!         .base_url("https://studio.example.com/api")
//!         .build()?;
//!
//!     let date = parse_date("2026-10-12")?;
//!     for time in service.available_times("salsa-beginners", date).await? {
//!         let slot = service.available_spots("salsa-beginners", date, &time).await?;
//!         println!("{time}: {} ({})", slot.available, slot.message);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Rate limits
//!
//! ```rust,no_run
//! # async fn demo(service: slotwise::AvailabilityService) {
//! match service.available_dates("salsa-beginners").await {
//!     Ok(dates) => println!("{dates:?}"),
//!     Err(e) => match e.wait_hint() {
//!         Some(hint) => println!("{hint}"),
//!         None => println!("error: {e}"),
//!     },
//! }
//! # }
//! ```

pub mod availability;
pub mod cache;
#[cfg(feature = "config")]
pub mod config;
pub mod error;
pub mod providers;
pub mod schedule;
pub mod telemetry;
pub mod throttle;
pub mod types;
pub mod version;

// Re-export main types at crate root
pub use availability::{
    AvailabilityConfig, AvailabilityService, Slotwise, SlotwiseBuilder, Upstream, parse_date,
};
pub use cache::{AvailabilityCache, CacheConfig, DurableStore, FileStore, MemoryStore, NullStore};
pub use error::{Result, SlotwiseError, describe_wait};
pub use providers::{CapacityProvider, ClassProvider, ScheduleProvider, StudioClient};
pub use throttle::{RequestThrottle, ThrottleConfig, endpoint_key, with_deadline};
pub use version::{PKG_VERSION, version_string};

// Re-export all types
pub use types::{
    BookableLink, CapacityReport, ClassInfo, NOT_LINKED, NOT_OFFERED, RecurringDefinition,
    ResolvedSlot, SlotTime, Weekday, availability_message,
};
