//! Per-endpoint backoff bookkeeping.

use std::time::Duration;

use tokio::time::Instant;

use super::ThrottleConfig;

/// Delay bookkeeping for one endpoint key.
#[derive(Debug, Clone)]
pub(crate) struct ThrottleState {
    last_request: Option<Instant>,
    multiplier: f64,
    consecutive_rate_limits: u32,
}

impl ThrottleState {
    pub(crate) fn new() -> Self {
        Self {
            last_request: None,
            multiplier: 1.0,
            consecutive_rate_limits: 0,
        }
    }

    /// Multiplier in effect at `now`: 1 after a quiet period longer than
    /// the cooldown window.
    fn effective_multiplier(&self, config: &ThrottleConfig, now: Instant) -> f64 {
        match self.last_request {
            Some(last) if now.saturating_duration_since(last) > config.cooldown => 1.0,
            _ => self.multiplier,
        }
    }

    /// Delay the next call at `now` must wait, without mutating state.
    pub(crate) fn delay_at(&self, config: &ThrottleConfig, now: Instant) -> Duration {
        let Some(last) = self.last_request else {
            return Duration::ZERO;
        };
        let interval = config.interval_for(self.effective_multiplier(config, now));
        interval.saturating_sub(now.saturating_duration_since(last))
    }

    /// Apply the cooldown reset and return the delay before the next call.
    pub(crate) fn prepare(&mut self, config: &ThrottleConfig, now: Instant) -> Duration {
        self.multiplier = self.effective_multiplier(config, now);
        self.delay_at(config, now)
    }

    pub(crate) fn record_start(&mut self, now: Instant) {
        self.last_request = Some(now);
    }

    pub(crate) fn record_rate_limited(&mut self, config: &ThrottleConfig) {
        self.consecutive_rate_limits += 1;
        self.multiplier = (self.multiplier * config.backoff_factor).min(config.max_multiplier);
    }

    pub(crate) fn record_success(&mut self, config: &ThrottleConfig) {
        self.consecutive_rate_limits = 0;
        self.multiplier = (self.multiplier / config.backoff_factor).max(1.0);
    }

    pub(crate) fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub(crate) fn consecutive_rate_limits(&self) -> u32 {
        self.consecutive_rate_limits
    }
}
