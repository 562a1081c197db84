//! Recurring schedule resolution.
//!
//! Pure, synchronous helpers that turn recurring weekly definitions into
//! concrete calendar dates and display times:
//!
//! - [`calendar`]: expand weekdays into dates within a lookahead horizon.
//! - [`matcher`]: pick the definitions active on a date and format their
//!   time windows.

pub mod calendar;
pub mod matcher;

pub use calendar::{DEFAULT_HORIZON_DAYS, expand};
pub use matcher::{display_time, find_for_time, match_date, times_for};
