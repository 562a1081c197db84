//! Telemetry metric name constants.
//!
//! Centralised metric names for slotwise operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `slotwise_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `category`: cache category (e.g. "sessions", "spots")
//! - `endpoint`: throttle endpoint key (request path)
//! - `operation`: availability operation (e.g. "available_dates")
//! - `status`: outcome: "ok" or "error"

/// Total upstream HTTP requests issued.
///
/// Labels: `endpoint`, `status` ("ok" | "error").
pub const UPSTREAM_REQUESTS_TOTAL: &str = "slotwise_upstream_requests_total";

/// Upstream request duration in seconds.
///
/// Labels: `endpoint`.
pub const UPSTREAM_DURATION_SECONDS: &str = "slotwise_upstream_duration_seconds";

/// Time a request waited in the throttle before being sent.
///
/// Labels: `endpoint`.
pub const THROTTLE_DELAY_SECONDS: &str = "slotwise_throttle_delay_seconds";

/// Total rate-limit responses received.
///
/// Labels: `endpoint`.
pub const RATE_LIMITED_TOTAL: &str = "slotwise_rate_limited_total";

/// Total cache hits.
///
/// Labels: `category`.
pub const CACHE_HITS_TOTAL: &str = "slotwise_cache_hits_total";

/// Total cache misses (including expired entries).
///
/// Labels: `category`.
pub const CACHE_MISSES_TOTAL: &str = "slotwise_cache_misses_total";

/// Total degraded results (optimistic capacity, empty schedule) returned
/// because an upstream call failed or timed out.
///
/// Labels: `operation`.
pub const FALLBACKS_TOTAL: &str = "slotwise_fallbacks_total";
