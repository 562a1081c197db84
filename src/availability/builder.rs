//! Builder for configuring availability service instances

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::{AvailabilityConfig, AvailabilityService, Upstream};
use crate::cache::{
    AvailabilityCache, CacheConfig, DurableStore, FileStore, NullStore, spawn_sweeper,
};
use crate::providers::{DEFAULT_REQUEST_TIMEOUT, StudioClient};
use crate::throttle::{RequestThrottle, ThrottleConfig};
use crate::{Result, SlotwiseError};

/// Main entry point for creating availability services.
///
/// ```rust,no_run
/// use slotwise::Slotwise;
///
/// #[tokio::main]
/// async fn main() -> slotwise::Result<()> {
///     let service = Slotwise::builder()
///         .base_url("https://studio.example.com/api")
///         .build()?;
///
///     for date in service.available_dates("salsa-beginners").await? {
///         println!("{date}");
///     }
///     Ok(())
/// }
/// ```
pub struct Slotwise;

impl Slotwise {
    /// Create a new builder for configuring the service.
    pub fn builder() -> SlotwiseBuilder {
        SlotwiseBuilder::new()
    }
}

/// Builder for configuring availability service instances.
pub struct SlotwiseBuilder {
    base_url: Option<String>,
    request_timeout: Option<Duration>,
    upstream: Option<Upstream>,
    cache: CacheConfig,
    store: Option<Arc<dyn DurableStore>>,
    throttle: ThrottleConfig,
    availability: AvailabilityConfig,
    sweep_interval: Option<Duration>,
}

impl SlotwiseBuilder {
    pub fn new() -> Self {
        Self {
            base_url: None,
            request_timeout: None,
            upstream: None,
            cache: CacheConfig::default(),
            store: None,
            throttle: ThrottleConfig::default(),
            availability: AvailabilityConfig::default(),
            sweep_interval: None,
        }
    }

    /// Use the studio HTTP services at `url` for every collaborator.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the per-request HTTP timeout (default: 10s).
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Use custom collaborators instead of the studio HTTP client.
    ///
    /// Takes precedence over [`base_url`](Self::base_url).
    pub fn upstream(mut self, upstream: Upstream) -> Self {
        self.upstream = Some(upstream);
        self
    }

    /// Set the cache configuration.
    pub fn cache_config(mut self, config: CacheConfig) -> Self {
        self.cache = config;
        self
    }

    /// Set the durable cache tier (default: [`FileStore`] under
    /// `~/.cache/slotwise`).
    pub fn store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Keep the durable cache tier in `dir`.
    pub fn cache_dir(self, dir: impl Into<PathBuf>) -> Self {
        self.store(Arc::new(FileStore::new(dir)))
    }

    /// Keep nothing across restarts.
    pub fn in_memory(self) -> Self {
        self.store(Arc::new(NullStore))
    }

    /// Set the throttle configuration.
    pub fn throttle_config(mut self, config: ThrottleConfig) -> Self {
        self.throttle = config;
        self
    }

    /// Set the availability configuration.
    pub fn availability_config(mut self, config: AvailabilityConfig) -> Self {
        self.availability = config;
        self
    }

    /// Sweep expired cache entries every `every`.
    pub fn sweep_interval(mut self, every: Duration) -> Self {
        self.sweep_interval = Some(every);
        self
    }

    /// Build the service.
    ///
    /// # Panics
    ///
    /// Requires a tokio runtime context: the throttle dispatcher and the
    /// optional sweeper are spawned here.
    pub fn build(self) -> Result<AvailabilityService> {
        let throttle = Arc::new(RequestThrottle::new(self.throttle));

        let upstream = match (self.upstream, self.base_url) {
            (Some(upstream), _) => upstream,
            (None, Some(url)) => {
                let timeout = self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);
                let client = StudioClient::with_timeout(&url, throttle.clone(), timeout)?;
                Upstream::studio(Arc::new(client))
            }
            (None, None) => {
                return Err(SlotwiseError::Configuration(
                    "no upstream configured: set a base URL or custom providers".to_string(),
                ));
            }
        };

        let store: Arc<dyn DurableStore> = match self.store {
            Some(store) => store,
            None => Arc::new(FileStore::default_location()),
        };
        let cache = Arc::new(AvailabilityCache::new(&self.cache, store));
        if let Some(every) = self.sweep_interval {
            spawn_sweeper(&cache, every);
        }

        Ok(AvailabilityService::new(
            upstream,
            cache,
            throttle,
            self.availability,
        ))
    }
}

impl Default for SlotwiseBuilder {
    fn default() -> Self {
        Self::new()
    }
}
