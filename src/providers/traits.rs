//! Upstream collaborator traits.
//!
//! The availability service talks to three read-only collaborators. Each
//! is a trait so the HTTP client can be swapped for in-process fakes.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::Result;
use crate::types::{BookableLink, CapacityReport, ClassInfo, RecurringDefinition};

// ============================================================================
// Schedule Provider
// ============================================================================

/// Provider for the recurring schedule and its item links.
#[async_trait]
pub trait ScheduleProvider: Send + Sync {
    /// Provider name for logging/debugging.
    fn name(&self) -> &str;

    /// Every recurring session definition, active or not.
    async fn definitions(&self) -> Result<Vec<RecurringDefinition>>;

    /// Every link between a bookable item and a definition.
    async fn links(&self) -> Result<Vec<BookableLink>>;
}

// ============================================================================
// Capacity Provider
// ============================================================================

/// Provider for remaining capacity of concrete occurrences.
#[async_trait]
pub trait CapacityProvider: Send + Sync {
    /// Provider name for logging/debugging.
    fn name(&self) -> &str;

    /// Remaining spots for `item` on `date` at display time `time`.
    async fn capacity(&self, item: &str, date: NaiveDate, time: &str) -> Result<CapacityReport>;

    /// Remaining spots for every distinct time of `item` on `date`.
    async fn capacity_batch(&self, item: &str, date: NaiveDate) -> Result<Vec<CapacityReport>>;
}

// ============================================================================
// Class Provider
// ============================================================================

/// Provider for item metadata. Only consulted to detect unlimited-capacity
/// item categories.
#[async_trait]
pub trait ClassProvider: Send + Sync {
    /// Provider name for logging/debugging.
    fn name(&self) -> &str;

    /// Descriptor for `item`.
    async fn class_info(&self, item: &str) -> Result<ClassInfo>;
}
