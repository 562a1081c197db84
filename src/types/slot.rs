//! Derived slot values.

use std::fmt;

use chrono::{NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use super::RecurringDefinition;
use super::schedule::parse_time_of_day;
use crate::{Result, SlotwiseError};

/// Message for a (date, time) that no active definition covers.
pub const NOT_OFFERED: &str = "not offered at this day/time";

/// Message for a matched definition that is not linked to the item.
pub const NOT_LINKED: &str = "not linked";

/// A concrete (date, time) with its remaining capacity.
///
/// Recomputed on every cache miss; never persisted upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedSlot {
    pub date: NaiveDate,
    pub display_time: String,
    pub available: u32,
    pub message: String,
    pub source_definition_id: Option<String>,
    pub source_link_id: Option<String>,
}

impl ResolvedSlot {
    /// A zero-capacity slot carrying `message`, with no source ids.
    pub fn unavailable(date: NaiveDate, display_time: &str, message: &str) -> Self {
        Self {
            date,
            display_time: display_time.to_string(),
            available: 0,
            message: message.to_string(),
            source_definition_id: None,
            source_link_id: None,
        }
    }

    /// Whether at least one spot remains.
    pub fn is_bookable(&self) -> bool {
        self.available > 0
    }
}

/// Wire shape returned by the capacity service.
///
/// `available` is signed because upstream may report overbooking as a
/// negative count. `time` is only present in batch responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityReport {
    pub available: i64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub session_class_id: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
}

impl CapacityReport {
    /// Remaining spots, clamped at zero.
    pub fn normalized(&self) -> u32 {
        self.available.clamp(0, i64::from(u32::MAX)) as u32
    }
}

/// Human-facing availability summary for `available` remaining spots.
pub fn availability_message(available: u32) -> String {
    match available {
        0 => "full".to_string(),
        1 => "last spot".to_string(),
        n @ 2..=3 => format!("{n} available"),
        _ => "available".to_string(),
    }
}

/// A parsed display time: `"HH:MM until HH:MM"` or a bare `"HH:MM"` start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotTime {
    pub start: NaiveTime,
    pub end: Option<NaiveTime>,
}

impl SlotTime {
    /// Parse caller input. Anything else is `InvalidInput`.
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = || SlotwiseError::InvalidInput(format!("malformed time: {raw:?}"));
        let (start, end) = match raw.split_once(" until ") {
            Some((start, end)) => (start, Some(end)),
            None => (raw, None),
        };
        let start = parse_time_of_day(start).ok_or_else(invalid)?;
        let end = match end {
            Some(end) => Some(parse_time_of_day(end).ok_or_else(invalid)?),
            None => None,
        };
        Ok(Self {
            start: to_minute(start),
            end: end.map(to_minute),
        })
    }

    /// The slot time of a definition, if both ends of its window are known.
    pub fn of(def: &RecurringDefinition) -> Option<Self> {
        Some(Self {
            start: to_minute(def.start_time?),
            end: Some(to_minute(def.end_time?)),
        })
    }

    /// Whether `def`'s window is this slot. A bare start matches any end.
    pub fn matches(&self, def: &RecurringDefinition) -> bool {
        match SlotTime::of(def) {
            Some(other) => {
                other.start == self.start && self.end.is_none_or(|end| Some(end) == other.end)
            }
            None => false,
        }
    }
}

impl fmt::Display for SlotTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.start.format("%H:%M"))?;
        if let Some(end) = self.end {
            write!(f, " until {}", end.format("%H:%M"))?;
        }
        Ok(())
    }
}

/// Drop seconds and sub-seconds.
fn to_minute(t: NaiveTime) -> NaiveTime {
    t.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(t)
}
