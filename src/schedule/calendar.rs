//! Calendar expansion.

use std::collections::BTreeSet;

use chrono::{Datelike, Days, NaiveDate};

use crate::types::{RecurringDefinition, Weekday};

/// Default lookahead: one week.
pub const DEFAULT_HORIZON_DAYS: u32 = 7;

/// Dates in `[start, start + horizon_days)` on which at least one active
/// definition runs, ascending and deduplicated.
///
/// No active definitions (or a zero horizon) yields an empty list.
pub fn expand(
    definitions: &[RecurringDefinition],
    horizon_days: u32,
    start: NaiveDate,
) -> Vec<NaiveDate> {
    let days: BTreeSet<Weekday> = definitions
        .iter()
        .filter(|d| d.is_active)
        .flat_map(|d| d.weekdays.iter().copied())
        .collect();
    if days.is_empty() {
        return Vec::new();
    }

    (0..u64::from(horizon_days))
        .map_while(|offset| start.checked_add_days(Days::new(offset)))
        .filter(|date| days.contains(&Weekday::from(date.weekday())))
        .collect()
}
