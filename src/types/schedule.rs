//! Schedule entities owned by the schedule storage service.
//!
//! The engine treats these as read-only snapshots: fetched, cached, and
//! never mutated locally.

use std::collections::BTreeSet;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use super::Weekday;

/// One recurring weekly offering (weekdays + time window).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurringDefinition {
    pub id: String,
    #[serde(default)]
    pub weekdays: BTreeSet<Weekday>,
    /// Start of the window. `None` when upstream omitted or garbled it.
    #[serde(default, with = "time_of_day")]
    pub start_time: Option<NaiveTime>,
    #[serde(default, with = "time_of_day")]
    pub end_time: Option<NaiveTime>,
    /// Spots assumed free when the capacity service cannot be reached.
    pub max_capacity: u32,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl RecurringDefinition {
    /// Create an active definition with the given weekdays and window.
    pub fn new(
        id: impl Into<String>,
        weekdays: impl IntoIterator<Item = Weekday>,
        start_time: NaiveTime,
        end_time: NaiveTime,
        max_capacity: u32,
    ) -> Self {
        Self {
            id: id.into(),
            weekdays: weekdays.into_iter().collect(),
            start_time: Some(start_time),
            end_time: Some(end_time),
            max_capacity,
            is_active: true,
        }
    }

    /// Mark the definition inactive.
    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Whether this definition runs on `day`. Inactive definitions never do.
    pub fn runs_on(&self, day: Weekday) -> bool {
        self.is_active && self.weekdays.contains(&day)
    }
}

/// Association between a bookable item (class) and a recurring definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookableLink {
    pub id: String,
    /// The recurring definition this link points at.
    pub session_id: String,
    /// The bookable item.
    pub class_id: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl BookableLink {
    /// Create an active link.
    pub fn new(
        id: impl Into<String>,
        session_id: impl Into<String>,
        class_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            session_id: session_id.into(),
            class_id: class_id.into(),
            is_active: true,
        }
    }

    /// Mark the link inactive.
    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}

/// Descriptor returned by the class metadata service.
///
/// Only the category is consulted, to special-case item types that have
/// no capacity ceiling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassInfo {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, alias = "type", alias = "classType")]
    pub category: Option<String>,
}

impl ClassInfo {
    /// Whether the category matches one of `unlimited` (case-insensitive).
    pub fn is_unlimited(&self, unlimited: &[String]) -> bool {
        self.category.as_deref().is_some_and(|category| {
            unlimited
                .iter()
                .any(|u| u.eq_ignore_ascii_case(category.trim()))
        })
    }
}

fn default_true() -> bool {
    true
}

pub(crate) use time_of_day::parse as parse_time_of_day;

/// Serde adapter for optional time-of-day values.
///
/// Writes `HH:MM:SS`; reads `HH:MM:SS`, `HH:MM:SS.fff` or `HH:MM`. Values
/// that parse as none of those deserialize to `None`.
mod time_of_day {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<NaiveTime>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(t) => s.serialize_str(&t.format("%H:%M:%S").to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveTime>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        Ok(raw.as_deref().and_then(parse))
    }

    pub(crate) fn parse(raw: &str) -> Option<NaiveTime> {
        let raw = raw.trim();
        ["%H:%M:%S%.f", "%H:%M:%S", "%H:%M"]
            .iter()
            .find_map(|fmt| NaiveTime::parse_from_str(raw, fmt).ok())
    }
}
