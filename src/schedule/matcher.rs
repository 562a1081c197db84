//! Slot matching.

use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDate};

use crate::types::{RecurringDefinition, SlotTime, Weekday};

/// Active definitions that run on `date`'s weekday.
pub fn match_date(
    definitions: &[RecurringDefinition],
    date: NaiveDate,
) -> Vec<&RecurringDefinition> {
    let day = Weekday::from(date.weekday());
    definitions.iter().filter(|d| d.runs_on(day)).collect()
}

/// `"HH:MM until HH:MM"` for a definition, or `None` when either end of
/// its window is missing.
pub fn display_time(definition: &RecurringDefinition) -> Option<String> {
    SlotTime::of(definition).map(|t| t.to_string())
}

/// Distinct display times of `matched`, sorted.
///
/// Definitions with identical windows collapse into one entry. Definitions
/// without a complete window contribute nothing here even though they
/// still make their date available.
pub fn times_for<'a, I>(matched: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a RecurringDefinition>,
{
    matched
        .into_iter()
        .filter_map(display_time)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// The first active definition running on `date` whose window is `time`.
pub fn find_for_time<'a>(
    definitions: &'a [RecurringDefinition],
    date: NaiveDate,
    time: &SlotTime,
) -> Option<&'a RecurringDefinition> {
    match_date(definitions, date)
        .into_iter()
        .find(|d| time.matches(d))
}
