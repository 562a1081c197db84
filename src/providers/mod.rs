//! Upstream collaborators.
//!
//! The traits describe what the availability service needs from the
//! studio's schedule, capacity and class services; [`StudioClient`] is the
//! HTTP implementation of all three.

pub mod http;
pub mod traits;

pub use http::{DEFAULT_REQUEST_TIMEOUT, StudioClient};
pub use traits::{CapacityProvider, ClassProvider, ScheduleProvider};
