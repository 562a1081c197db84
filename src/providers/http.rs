//! HTTP client for the studio schedule, capacity and class services.
//!
//! Every request goes through the shared [`RequestThrottle`], keyed by its
//! request path, so rate-limit responses back off per endpoint while only
//! one upstream call is in flight per process.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::traits::{CapacityProvider, ClassProvider, ScheduleProvider};
use crate::telemetry;
use crate::throttle::{RequestThrottle, endpoint_key};
use crate::types::{BookableLink, CapacityReport, ClassInfo, RecurringDefinition};
use crate::version;
use crate::{Result, SlotwiseError};

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for the studio's REST services.
///
/// Endpoints (relative to the base URL):
/// - `GET /sessions`: recurring definitions
/// - `GET /sessions/session-classes`: item links
/// - `GET /sessions/capacity/{item}/{date}/{time}`: one occurrence
/// - `GET /sessions/capacity-batch/{item}/{date}`: every time on a date
/// - `GET /classes/{item}`: item descriptor
#[derive(Clone)]
pub struct StudioClient {
    http: Client,
    base_url: Url,
    throttle: Arc<RequestThrottle>,
}

impl StudioClient {
    /// Create a client for `base_url` with the default request timeout.
    pub fn new(base_url: &str, throttle: Arc<RequestThrottle>) -> Result<Self> {
        Self::with_timeout(base_url, throttle, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a client with a custom per-request timeout.
    pub fn with_timeout(
        base_url: &str,
        throttle: Arc<RequestThrottle>,
        timeout: Duration,
    ) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| {
            SlotwiseError::Configuration(format!("invalid base URL {base_url:?}: {e}"))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(SlotwiseError::Configuration(format!(
                "base URL cannot carry a path: {base_url}"
            )));
        }
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(version::user_agent())
            .build()
            .map_err(|e| {
                SlotwiseError::Configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            http,
            base_url,
            throttle,
        })
    }

    /// The base URL requests are resolved against.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The throttle every request passes through.
    pub fn throttle(&self) -> &Arc<RequestThrottle> {
        &self.throttle
    }

    /// Base URL with `segments` appended, each percent-encoded.
    fn url_for(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// GET `url` under the throttle and decode the body.
    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let endpoint = endpoint_key(url.as_str());
        let key = endpoint.as_str();
        let target = &url;
        let body = self
            .throttle
            .schedule(key, move || self.send(target.clone(), key))
            .await?;
        serde_json::from_str(&body)
            .map_err(|e| SlotwiseError::MalformedResponse(format!("{endpoint}: {e}")))
    }

    /// GET a list endpoint, dropping elements that do not decode.
    async fn get_list<T: DeserializeOwned>(&self, url: Url) -> Result<Vec<T>> {
        let endpoint = endpoint_key(url.as_str());
        let payload: ListPayload = self.get_json(url).await?;
        let raw = payload.into_items();
        let total = raw.len();
        let items: Vec<T> = raw
            .into_iter()
            .filter_map(|value| match serde_json::from_value(value) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "dropping malformed list element");
                    None
                }
            })
            .collect();
        debug!(endpoint = %endpoint, total, kept = items.len(), "decoded list response");
        Ok(items)
    }

    /// One attempt: send, classify the status, read the body.
    async fn send(&self, url: Url, endpoint: &str) -> Result<String> {
        let started = Instant::now();
        let result = self.send_inner(url).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(
            telemetry::UPSTREAM_REQUESTS_TOTAL,
            "endpoint" => endpoint.to_owned(),
            "status" => status
        )
        .increment(1);
        metrics::histogram!(
            telemetry::UPSTREAM_DURATION_SECONDS,
            "endpoint" => endpoint.to_owned()
        )
        .record(started.elapsed().as_secs_f64());
        result
    }

    async fn send_inner(&self, url: Url) -> Result<String> {
        let response = self
            .http
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(transport_error)?;

        handle_response_errors(&response)?;

        response.text().await.map_err(transport_error)
    }
}

/// Map a non-success status to an error.
fn handle_response_errors(response: &reqwest::Response) -> Result<()> {
    let status = response.status();

    if status.is_success() {
        return Ok(());
    }

    match status.as_u16() {
        429 => {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            Err(SlotwiseError::RateLimited { retry_after })
        }
        code => Err(SlotwiseError::Api {
            status: code,
            message: format!("studio API error: {status}"),
        }),
    }
}

fn transport_error(e: reqwest::Error) -> SlotwiseError {
    if e.is_decode() {
        SlotwiseError::MalformedResponse(e.to_string())
    } else {
        SlotwiseError::Http(e.to_string())
    }
}

/// List responses arrive either bare or wrapped in `{"data": [...]}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum ListPayload {
    Wrapped { data: Vec<serde_json::Value> },
    Bare(Vec<serde_json::Value>),
}

impl ListPayload {
    fn into_items(self) -> Vec<serde_json::Value> {
        match self {
            ListPayload::Wrapped { data } => data,
            ListPayload::Bare(items) => items,
        }
    }
}

#[async_trait]
impl ScheduleProvider for StudioClient {
    fn name(&self) -> &str {
        "studio"
    }

    async fn definitions(&self) -> Result<Vec<RecurringDefinition>> {
        self.get_list(self.url_for(&["sessions"])).await
    }

    async fn links(&self) -> Result<Vec<BookableLink>> {
        self.get_list(self.url_for(&["sessions", "session-classes"]))
            .await
    }
}

#[async_trait]
impl CapacityProvider for StudioClient {
    fn name(&self) -> &str {
        "studio"
    }

    async fn capacity(&self, item: &str, date: NaiveDate, time: &str) -> Result<CapacityReport> {
        let date = date.to_string();
        let url = self.url_for(&["sessions", "capacity", item, &date, time]);
        self.get_json(url).await
    }

    async fn capacity_batch(&self, item: &str, date: NaiveDate) -> Result<Vec<CapacityReport>> {
        let date = date.to_string();
        let url = self.url_for(&["sessions", "capacity-batch", item, &date]);
        self.get_list(url).await
    }
}

#[async_trait]
impl ClassProvider for StudioClient {
    fn name(&self) -> &str {
        "studio"
    }

    async fn class_info(&self, item: &str) -> Result<ClassInfo> {
        self.get_json(self.url_for(&["classes", item])).await
    }
}
