//! Configuration loading.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. explicit path (`--config <path>`)
//! 2. `~/.slotwise/config.toml` (user)
//! 3. `/etc/slotwise/config.toml` (system)
//! 4. built-in defaults
//!
//! Every key is optional:
//!
//! ```toml
//! [upstream]
//! base_url = "https://studio.example.com/api"
//! request_timeout_secs = 10
//!
//! [cache]
//! ttl_secs = 300
//! max_entries = 10000
//! dir = "/var/cache/slotwise"
//! persist = true
//! persist_interval_ms = 0
//! sweep_interval_secs = 60
//!
//! [throttle]
//! base_interval_ms = 250
//! max_interval_ms = 5000
//! backoff_factor = 1.5
//! max_multiplier = 10.0
//! max_attempts = 5
//! cooldown_secs = 60
//!
//! [availability]
//! horizon_days = 7
//! resolve_timeout_ms = 3000
//! unlimited_categories = ["unlimited"]
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::availability::{AvailabilityConfig, Slotwise, SlotwiseBuilder};
use crate::cache::CacheConfig;
use crate::throttle::ThrottleConfig;
use crate::{Result, SlotwiseError};

/// Environment variable consulted when no base URL is configured.
pub const BASE_URL_ENV: &str = "SLOTWISE_BASE_URL";

/// File configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub upstream: UpstreamSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub throttle: ThrottleSection,
    #[serde(default)]
    pub availability: AvailabilitySection,
}

/// Where the studio services live.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamSection {
    pub base_url: Option<String>,
    /// Per-request HTTP timeout in seconds (default: 10).
    pub request_timeout_secs: u64,
}

impl Default for UpstreamSection {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout_secs: 10,
        }
    }
}

/// Cache tiers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    /// Entry time-to-live in seconds (default: 300).
    pub ttl_secs: u64,
    /// In-memory entries per category (default: 10,000).
    pub max_entries: u64,
    /// Durable tier directory (default: `~/.cache/slotwise`).
    pub dir: Option<PathBuf>,
    /// Whether to keep a durable tier at all (default: true).
    pub persist: bool,
    /// Minimum spacing between snapshot writes in milliseconds (default: 0).
    pub persist_interval_ms: u64,
    /// Periodic sweep interval in seconds; unset disables the sweeper.
    pub sweep_interval_secs: Option<u64>,
}

impl Default for CacheSection {
    fn default() -> Self {
        let defaults = CacheConfig::default();
        Self {
            ttl_secs: defaults.ttl.as_secs(),
            max_entries: defaults.max_entries,
            dir: None,
            persist: true,
            persist_interval_ms: defaults.persist_interval.as_millis() as u64,
            sweep_interval_secs: None,
        }
    }
}

/// Request throttle.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThrottleSection {
    pub base_interval_ms: u64,
    pub max_interval_ms: u64,
    pub backoff_factor: f64,
    pub max_multiplier: f64,
    pub max_attempts: u32,
    pub cooldown_secs: u64,
}

impl Default for ThrottleSection {
    fn default() -> Self {
        let defaults = ThrottleConfig::default();
        Self {
            base_interval_ms: defaults.base_interval.as_millis() as u64,
            max_interval_ms: defaults.max_interval.as_millis() as u64,
            backoff_factor: defaults.backoff_factor,
            max_multiplier: defaults.max_multiplier,
            max_attempts: defaults.max_attempts,
            cooldown_secs: defaults.cooldown.as_secs(),
        }
    }
}

/// Availability service.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AvailabilitySection {
    pub horizon_days: u32,
    pub resolve_timeout_ms: u64,
    pub unlimited_categories: Vec<String>,
}

impl Default for AvailabilitySection {
    fn default() -> Self {
        let defaults = AvailabilityConfig::default();
        Self {
            horizon_days: defaults.horizon_days,
            resolve_timeout_ms: defaults.resolve_timeout.as_millis() as u64,
            unlimited_categories: defaults.unlimited_categories,
        }
    }
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// An explicit path that does not exist is an error; with no explicit
    /// path and no file in the standard locations, defaults apply.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        match Self::resolve_config_path(explicit_path)? {
            Some(path) => Self::load_from_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// Parse a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| SlotwiseError::Configuration(format!("Failed to parse config: {e}")))
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            SlotwiseError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            SlotwiseError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })
    }

    /// Resolve the config file path.
    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(SlotwiseError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        // User config
        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".slotwise").join("config.toml");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        // System config
        let system_config = PathBuf::from("/etc/slotwise/config.toml");
        if system_config.exists() {
            return Ok(Some(system_config));
        }

        Ok(None)
    }

    /// Base URL from the file, else from [`BASE_URL_ENV`].
    pub fn base_url(&self) -> Option<String> {
        self.upstream
            .base_url
            .clone()
            .or_else(|| std::env::var(BASE_URL_ENV).ok())
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new()
            .ttl(Duration::from_secs(self.cache.ttl_secs))
            .max_entries(self.cache.max_entries)
            .persist_interval(Duration::from_millis(self.cache.persist_interval_ms))
    }

    pub fn throttle_config(&self) -> ThrottleConfig {
        let t = &self.throttle;
        ThrottleConfig::new()
            .base_interval(Duration::from_millis(t.base_interval_ms))
            .max_interval(Duration::from_millis(t.max_interval_ms))
            .backoff_factor(t.backoff_factor)
            .max_multiplier(t.max_multiplier)
            .max_attempts(t.max_attempts)
            .cooldown(Duration::from_secs(t.cooldown_secs))
    }

    pub fn availability_config(&self) -> AvailabilityConfig {
        let a = &self.availability;
        AvailabilityConfig::new()
            .horizon_days(a.horizon_days)
            .resolve_timeout(Duration::from_millis(a.resolve_timeout_ms))
            .unlimited_categories(a.unlimited_categories.iter().cloned())
    }

    /// A builder carrying every setting in this configuration.
    pub fn builder(&self) -> SlotwiseBuilder {
        let mut builder = Slotwise::builder()
            .request_timeout(Duration::from_secs(self.upstream.request_timeout_secs))
            .cache_config(self.cache_config())
            .throttle_config(self.throttle_config())
            .availability_config(self.availability_config());
        if let Some(url) = self.base_url() {
            builder = builder.base_url(url);
        }
        builder = match (&self.cache.dir, self.cache.persist) {
            (_, false) => builder.in_memory(),
            (Some(dir), true) => builder.cache_dir(dir),
            (None, true) => builder,
        };
        if let Some(secs) = self.cache.sweep_interval_secs {
            builder = builder.sweep_interval(Duration::from_secs(secs));
        }
        builder
    }
}
