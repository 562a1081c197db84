//! Capacity resolution building blocks.
//!
//! Pure functions: joining definitions to an item through its links,
//! locating the definition and link behind a (date, time), and turning a
//! capacity report (or its absence) into a [`ResolvedSlot`].

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;

use crate::schedule::match_date;
use crate::types::{
    BookableLink, CapacityReport, NOT_LINKED, NOT_OFFERED, RecurringDefinition, ResolvedSlot,
    SlotTime, availability_message,
};

/// Active definitions reachable from `item` through an active link.
pub fn definitions_for_item(
    definitions: &[RecurringDefinition],
    links: &[BookableLink],
    item: &str,
) -> Vec<RecurringDefinition> {
    let linked: HashSet<&str> = links
        .iter()
        .filter(|l| l.is_active && l.class_id == item)
        .map(|l| l.session_id.as_str())
        .collect();
    definitions
        .iter()
        .filter(|d| d.is_active && linked.contains(d.id.as_str()))
        .cloned()
        .collect()
}

/// Where a (date, time) for an item landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotMatch<'a> {
    /// No active definition covers the date and time.
    NotOffered,
    /// A definition covers it but none is linked to the item.
    NotLinked(&'a RecurringDefinition),
    /// A linked definition covers it.
    Linked {
        definition: &'a RecurringDefinition,
        link: &'a BookableLink,
    },
}

/// Locate the definition and link for `item` at `date` and `time`.
///
/// When several definitions share the window, one linked to the item wins.
pub fn match_slot<'a>(
    definitions: &'a [RecurringDefinition],
    links: &'a [BookableLink],
    item: &str,
    date: NaiveDate,
    time: &SlotTime,
) -> SlotMatch<'a> {
    let candidates: Vec<&RecurringDefinition> = match_date(definitions, date)
        .into_iter()
        .filter(|d| time.matches(d))
        .collect();
    let Some(&first) = candidates.first() else {
        return SlotMatch::NotOffered;
    };
    candidates
        .iter()
        .copied()
        .find_map(|definition| {
            links
                .iter()
                .find(|l| l.is_active && l.class_id == item && l.session_id == definition.id)
                .map(|link| SlotMatch::Linked { definition, link })
        })
        .unwrap_or(SlotMatch::NotLinked(first))
}

/// Slot for a match that never reached the capacity service.
pub fn unmatched_slot(
    date: NaiveDate,
    display_time: &str,
    matched: &SlotMatch<'_>,
) -> ResolvedSlot {
    let message = match matched {
        SlotMatch::NotLinked(_) => NOT_LINKED,
        _ => NOT_OFFERED,
    };
    let mut slot = ResolvedSlot::unavailable(date, display_time, message);
    if let SlotMatch::NotLinked(definition) = matched {
        slot.source_definition_id = Some(definition.id.clone());
    }
    slot
}

/// Slot from a capacity report: negative counts clamp to zero and the
/// message follows the availability tiers.
pub fn slot_from_report(
    date: NaiveDate,
    display_time: &str,
    definition: &RecurringDefinition,
    link: &BookableLink,
    report: &CapacityReport,
) -> ResolvedSlot {
    let available = report.normalized();
    ResolvedSlot {
        date,
        display_time: display_time.to_string(),
        available,
        message: availability_message(available),
        source_definition_id: Some(definition.id.clone()),
        source_link_id: Some(link.id.clone()),
    }
}

/// Slot assuming the definition's full capacity. Used when the capacity
/// service is unreachable and for unlimited item categories.
pub fn optimistic_slot(
    date: NaiveDate,
    display_time: &str,
    definition: &RecurringDefinition,
    link: &BookableLink,
) -> ResolvedSlot {
    ResolvedSlot {
        date,
        display_time: display_time.to_string(),
        available: definition.max_capacity,
        message: "available".to_string(),
        source_definition_id: Some(definition.id.clone()),
        source_link_id: Some(link.id.clone()),
    }
}

/// A display time resolved to the definition and link behind it.
pub type LinkedTime<'a> = (String, &'a RecurringDefinition, &'a BookableLink);

/// Key batch reports by display time.
///
/// A report belongs to the linked time whose link id equals its
/// `session_class_id`, else whose definition id equals its `session_id`,
/// else whose display time equals its parsed `time`. Reports that identify
/// none of `linked` are dropped, so the caller resolves those times one by
/// one.
pub fn index_batch(
    linked: &[LinkedTime<'_>],
    reports: Vec<CapacityReport>,
) -> HashMap<String, CapacityReport> {
    let mut index = HashMap::new();
    for report in reports {
        let by_link = report.session_class_id.as_deref().and_then(|id| {
            linked
                .iter()
                .find(|(_, _, link)| link.id == id)
        });
        let by_definition = || {
            report.session_id.as_deref().and_then(|id| {
                linked
                    .iter()
                    .find(|(_, definition, _)| definition.id == id)
            })
        };
        let by_time = || {
            let time = SlotTime::parse(report.time.as_deref()?).ok()?.to_string();
            linked.iter().find(|(display, _, _)| *display == time)
        };
        if let Some((display, _, _)) = by_link.or_else(by_definition).or_else(by_time) {
            index.insert(display.clone(), report);
        }
    }
    index
}
