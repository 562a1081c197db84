//! Public types for the Slotwise API.

mod schedule;
mod slot;
mod weekday;

pub use schedule::{BookableLink, ClassInfo, RecurringDefinition};
pub use slot::{
    CapacityReport, NOT_LINKED, NOT_OFFERED, ResolvedSlot, SlotTime, availability_message,
};
pub use weekday::Weekday;
