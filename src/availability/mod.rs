//! Availability service.
//!
//! [`AvailabilityService`] answers the four questions a booking UI asks:
//! which dates, which times on a date, how many spots at a time, and how
//! many spots at every time on a date. Every answer is cached, every
//! upstream call goes through the throttle and is bounded by
//! [`AvailabilityConfig::resolve_timeout`], and upstream failures degrade
//! to empty or optimistic answers. Only exhausted rate limits and invalid
//! input reach the caller.

mod builder;
pub mod resolver;
mod service;

pub use builder::{Slotwise, SlotwiseBuilder};
pub use service::{AvailabilityService, Upstream};

use std::time::Duration;

use chrono::NaiveDate;

use crate::schedule::DEFAULT_HORIZON_DAYS;
use crate::{Result, SlotwiseError};

/// Configuration for the availability service.
///
/// ```rust
/// # use slotwise::AvailabilityConfig;
/// # use std::time::Duration;
/// let config = AvailabilityConfig::new()
///     .horizon_days(14)
///     .resolve_timeout(Duration::from_secs(2));
/// ```
#[derive(Debug, Clone)]
pub struct AvailabilityConfig {
    /// Days looked ahead for available dates. Default: 7.
    pub horizon_days: u32,
    /// Bound on each upstream resolution. Default: 3s.
    pub resolve_timeout: Duration,
    /// Item categories without a capacity ceiling. Default: `["unlimited"]`.
    pub unlimited_categories: Vec<String>,
}

impl Default for AvailabilityConfig {
    fn default() -> Self {
        Self {
            horizon_days: DEFAULT_HORIZON_DAYS,
            resolve_timeout: Duration::from_secs(3),
            unlimited_categories: vec!["unlimited".to_string()],
        }
    }
}

impl AvailabilityConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the lookahead window for available dates.
    pub fn horizon_days(mut self, days: u32) -> Self {
        self.horizon_days = days;
        self
    }

    /// Set the bound on each upstream resolution.
    pub fn resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout = timeout;
        self
    }

    /// Replace the unlimited item categories.
    pub fn unlimited_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unlimited_categories = categories.into_iter().map(Into::into).collect();
        self
    }
}

/// Parse a caller-supplied `YYYY-MM-DD` date.
pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|e| SlotwiseError::InvalidInput(format!("malformed date {raw:?}: {e}")))
}

/// Reject empty item ids.
pub(crate) fn validate_item(item: &str) -> Result<()> {
    if item.trim().is_empty() {
        return Err(SlotwiseError::InvalidInput("empty item id".to_string()));
    }
    Ok(())
}
