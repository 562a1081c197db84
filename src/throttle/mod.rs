//! Adaptive outbound request throttle.
//!
//! [`RequestThrottle`] serializes every outbound call in the process
//! through one dispatcher task. Callers queue a ticket for their endpoint
//! key; the dispatcher pops tickets in FIFO order, sleeps for that
//! endpoint's required delay, grants a permit, and waits for the caller to
//! report how the call went before serving the next ticket. At most one
//! upstream call is in flight at a time.
//!
//! Delay per endpoint key:
//!
//! ```text
//! delay = clamp(base_interval * multiplier, base_interval, max_interval)
//!         - time since the last call on that key
//! ```
//!
//! Rate-limit responses multiply the multiplier by `backoff_factor`
//! (capped at `max_multiplier`); successes divide it back towards 1; a
//! quiet period longer than `cooldown` resets it to 1.
//!
//! A caller running under [`with_deadline`] gets `RateLimited` as soon as
//! the next retry could not start before that deadline.

mod backoff;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::telemetry;
use crate::{Result, SlotwiseError};

use backoff::ThrottleState;

/// Configuration for the request throttle.
///
/// ```rust
/// # use slotwise::ThrottleConfig;
/// # use std::time::Duration;
/// let config = ThrottleConfig::new()
///     .base_interval(Duration::from_millis(100))
///     .max_attempts(3);
/// ```
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Minimum spacing between calls on one endpoint. Default: 250ms.
    pub base_interval: Duration,
    /// Upper bound on the spacing. Default: 5s.
    pub max_interval: Duration,
    /// Multiplier growth per rate-limit response (and decay per success).
    /// Default: 1.5.
    pub backoff_factor: f64,
    /// Cap on the multiplier. Default: 10.
    pub max_multiplier: f64,
    /// Attempts per scheduled call, including the first. Default: 5.
    pub max_attempts: u32,
    /// Quiet period after which the multiplier resets. Default: 60s.
    pub cooldown: Duration,
    /// How long the dispatcher waits for a granted call to report back
    /// before serving the next ticket. Default: 30s.
    pub hold_timeout: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(250),
            max_interval: Duration::from_secs(5),
            backoff_factor: 1.5,
            max_multiplier: 10.0,
            max_attempts: 5,
            cooldown: Duration::from_secs(60),
            hold_timeout: Duration::from_secs(30),
        }
    }
}

impl ThrottleConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum spacing between calls on one endpoint.
    pub fn base_interval(mut self, interval: Duration) -> Self {
        self.base_interval = interval;
        self
    }

    /// Set the upper bound on the spacing.
    pub fn max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Set the multiplier growth factor (values below 1 are treated as 1).
    pub fn backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor.max(1.0);
        self
    }

    /// Set the multiplier cap.
    pub fn max_multiplier(mut self, cap: f64) -> Self {
        self.max_multiplier = cap.max(1.0);
        self
    }

    /// Set attempts per scheduled call (at least 1).
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n.max(1);
        self
    }

    /// Set the quiet period after which backoff resets.
    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Set how long a granted call may hold the dispatcher.
    pub fn hold_timeout(mut self, timeout: Duration) -> Self {
        self.hold_timeout = timeout;
        self
    }

    /// Spacing for a given multiplier.
    pub fn interval_for(&self, multiplier: f64) -> Duration {
        self.base_interval
            .mul_f64(multiplier.max(1.0))
            .min(self.max_interval)
            .max(self.base_interval)
    }
}

/// Endpoint key for a request URL: its path, without host or query.
///
/// Requests that differ only in their query string share throttling.
pub fn endpoint_key(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or(url).to_string(),
    }
}

tokio::task_local! {
    static DEADLINE: Instant;
}

/// Run `fut` with a retry deadline.
///
/// [`RequestThrottle::schedule`] calls made inside `fut` stop retrying
/// rate-limited attempts once the next one would start after `deadline`.
pub async fn with_deadline<F: Future>(deadline: Instant, fut: F) -> F::Output {
    DEADLINE.scope(deadline, fut).await
}

fn current_deadline() -> Option<Instant> {
    DEADLINE.try_with(|deadline| *deadline).ok()
}

/// How a granted call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    RateLimited,
    Failed,
}

/// A queued request for a permit.
struct Ticket {
    endpoint: String,
    grant: oneshot::Sender<Permit>,
}

type StateMap = Arc<Mutex<HashMap<String, ThrottleState>>>;

/// Permission to perform one call. Dropping it without completing counts
/// as a failed call.
struct Permit {
    endpoint: String,
    states: StateMap,
    done: oneshot::Sender<()>,
}

impl Permit {
    /// Record the outcome, then release the dispatcher. The endpoint's
    /// backoff is current by the time the caller looks at it again.
    fn complete(self, outcome: Outcome, config: &ThrottleConfig) {
        {
            let mut states = lock(&self.states);
            let state = states
                .entry(self.endpoint)
                .or_insert_with(ThrottleState::new);
            match outcome {
                Outcome::Success => state.record_success(config),
                Outcome::RateLimited => state.record_rate_limited(config),
                Outcome::Failed => {}
            }
        }
        let _ = self.done.send(());
    }
}

/// Process-wide serializing throttle with per-endpoint adaptive delays.
pub struct RequestThrottle {
    config: ThrottleConfig,
    queue: mpsc::UnboundedSender<Ticket>,
    states: StateMap,
}

impl RequestThrottle {
    /// Create the throttle and spawn its dispatcher task.
    ///
    /// The dispatcher stops once the throttle is dropped.
    ///
    /// # Panics
    ///
    /// Requires a tokio runtime context.
    pub fn new(config: ThrottleConfig) -> Self {
        let (queue, rx) = mpsc::unbounded_channel();
        let states: StateMap = Arc::new(Mutex::new(HashMap::new()));
        tokio::spawn(dispatch(rx, states.clone(), config.clone()));
        Self {
            config,
            queue,
            states,
        }
    }

    /// The active configuration.
    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    /// Run `op` under the throttle for `endpoint`.
    ///
    /// Rate-limited attempts are retried (each retry re-queues behind any
    /// waiting callers) up to `max_attempts`. Once a rate limit has been
    /// seen, transport failures also consume attempts. Exhausting the
    /// attempts, or running out of time under [`with_deadline`], surfaces
    /// `RateLimited` with the current wait estimate. Any other error, or a
    /// transport failure before a rate limit, is returned as-is.
    pub async fn schedule<F, Fut, T>(&self, endpoint: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let deadline = current_deadline();
        let mut upstream_hint: Option<Duration> = None;
        let mut rate_limited = false;
        for attempt in 1..=self.config.max_attempts {
            let permit = self.acquire(endpoint).await?;
            match op().await {
                Ok(value) => {
                    permit.complete(Outcome::Success, &self.config);
                    return Ok(value);
                }
                Err(e) if e.is_rate_limited() => {
                    permit.complete(Outcome::RateLimited, &self.config);
                    metrics::counter!(
                        telemetry::RATE_LIMITED_TOTAL,
                        "endpoint" => endpoint.to_owned()
                    )
                    .increment(1);
                    warn!(
                        endpoint,
                        attempt,
                        max_attempts = self.config.max_attempts,
                        wait_ms = self.estimated_wait(endpoint).as_millis() as u64,
                        "rate limited by upstream"
                    );
                    upstream_hint = e.retry_after().or(upstream_hint);
                    rate_limited = true;
                }
                Err(e) if rate_limited && e.is_transient() => {
                    permit.complete(Outcome::Failed, &self.config);
                    warn!(endpoint, attempt, error = %e, "transport failure while backing off");
                }
                Err(e) => {
                    permit.complete(Outcome::Failed, &self.config);
                    return Err(e);
                }
            }

            if let Some(deadline) = deadline {
                let next_start = Instant::now() + self.estimated_wait(endpoint);
                if attempt < self.config.max_attempts && next_start > deadline {
                    debug!(endpoint, attempt, "next retry would miss the deadline");
                    break;
                }
            }
        }

        let wait = self.estimated_wait(endpoint).max(upstream_hint.unwrap_or_default());
        Err(SlotwiseError::RateLimited {
            retry_after: Some(wait.max(self.config.base_interval)),
        })
    }

    /// Delay the next call on `endpoint` would incur if issued now.
    pub fn estimated_wait(&self, endpoint: &str) -> Duration {
        self.lock_states()
            .get(endpoint)
            .map(|state| state.delay_at(&self.config, Instant::now()))
            .unwrap_or(Duration::ZERO)
    }

    /// Forget all per-endpoint backoff state.
    pub fn reset(&self) {
        self.lock_states().clear();
        debug!("throttle state reset");
    }

    async fn acquire(&self, endpoint: &str) -> Result<Permit> {
        let (grant, granted) = oneshot::channel();
        self.queue
            .send(Ticket {
                endpoint: endpoint.to_string(),
                grant,
            })
            .map_err(|_| SlotwiseError::ThrottleClosed)?;
        granted.await.map_err(|_| SlotwiseError::ThrottleClosed)
    }

    fn lock_states(&self) -> MutexGuard<'_, HashMap<String, ThrottleState>> {
        lock(&self.states)
    }
}

fn lock(states: &StateMap) -> MutexGuard<'_, HashMap<String, ThrottleState>> {
    states.lock().unwrap_or_else(|e| e.into_inner())
}

/// Dispatcher loop: one ticket at a time, in arrival order.
async fn dispatch(
    mut rx: mpsc::UnboundedReceiver<Ticket>,
    states: StateMap,
    config: ThrottleConfig,
) {
    while let Some(ticket) = rx.recv().await {
        if ticket.grant.is_closed() {
            continue;
        }

        let delay = lock(&states)
            .entry(ticket.endpoint.clone())
            .or_insert_with(ThrottleState::new)
            .prepare(&config, Instant::now());
        if !delay.is_zero() {
            metrics::histogram!(
                telemetry::THROTTLE_DELAY_SECONDS,
                "endpoint" => ticket.endpoint.clone()
            )
            .record(delay.as_secs_f64());
            debug!(
                endpoint = %ticket.endpoint,
                delay_ms = delay.as_millis() as u64,
                "throttling request"
            );
            tokio::time::sleep(delay).await;
        }

        let (done, finished) = oneshot::channel();
        let permit = Permit {
            endpoint: ticket.endpoint.clone(),
            states: states.clone(),
            done,
        };
        if ticket.grant.send(permit).is_err() {
            // caller gave up while we slept
            continue;
        }
        lock(&states)
            .entry(ticket.endpoint.clone())
            .or_insert_with(ThrottleState::new)
            .record_start(Instant::now());

        if tokio::time::timeout(config.hold_timeout, finished)
            .await
            .is_err()
        {
            warn!(endpoint = %ticket.endpoint, "granted call did not report back in time");
        }
    }
    debug!("throttle dispatcher stopped");
}
