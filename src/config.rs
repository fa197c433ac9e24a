//! Configuration for the fetcher and its collaborators.
//!
//! Every section and field is optional; missing values take the defaults
//! documented on each component. Durations are written as `*_secs` (or
//! `*_ms`) numbers.
//!
//! ```toml
//! [cache]
//! path = ".litfetch/cache.db"
//! ttl_secs = 604800
//!
//! [health]
//! failure_threshold = 5
//! failure_window_secs = 60
//! recovery_check_interval_secs = 300
//!
//! [retry]
//! max_retries = 3
//! base_delay_secs = 1.0
//! backoff_factor = 2.0
//!
//! [limiter]
//! max_per_minute = 120
//! cooldown_on_limit_secs = 30
//!
//! [fetch]
//! max_concurrency = 10
//! rate_limit_policy = "wait"
//! max_wait_secs = 10
//!
//! [providers]
//! order = ["semantic_scholar", "crossref", "europe_pmc"]
//! user_agent_mailto = "you@example.org"
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fetcher::{
    DEFAULT_CACHE_TTL, DEFAULT_CONCURRENCY, MAX_CONCURRENCY, MIN_CONCURRENCY, RateLimitPolicy,
};
use crate::health::{
    DEFAULT_FAILURE_THRESHOLD, DEFAULT_FAILURE_WINDOW, DEFAULT_RECOVERY_CHECK_INTERVAL,
    HealthConfig,
};
use crate::provider::{
    BUILTIN_PROVIDERS, DEFAULT_CONNECT_TIMEOUT, DEFAULT_PROVIDER_ORDER, DEFAULT_READ_TIMEOUT,
    HttpClientConfig, ProviderId, ProviderIdError,
};
use crate::rate_limiter::{DEFAULT_COOLDOWN_ON_LIMIT, DEFAULT_MAX_PER_MINUTE, RateLimitConfig};
use crate::request::DEFAULT_REQUEST_TIMEOUT;
use crate::retry::{
    DEFAULT_BACKOFF_FACTOR, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MAX_RETRIES,
    RetryPolicy,
};
use crate::user_agent::provider_user_agent;

/// Default cache database location, relative to the working directory.
pub const DEFAULT_CACHE_PATH: &str = ".litfetch/cache.db";

/// Default longest cooldown the `wait` policy sleeps out.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(10);

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// The file that was read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("invalid config value for {field}: {reason}")]
    InvalidValue {
        /// Dotted field path, e.g. `retry.backoff_factor`.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// `providers.order` holds a malformed id.
    #[error("invalid provider id in providers.order: {0}")]
    ProviderId(#[from] ProviderIdError),
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.into(),
    }
}

/// Converts a seconds value already accepted by [`check_secs`].
fn secs_f64(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
}

/// Rejects seconds values that are negative, non-finite, or too large for a
/// `Duration`; zero is rejected unless `allow_zero`.
fn check_secs(field: &'static str, secs: f64, allow_zero: bool) -> Result<(), ConfigError> {
    let duration = Duration::try_from_secs_f64(secs)
        .map_err(|error| invalid(field, format!("{secs} is not a valid duration: {error}")))?;
    if duration.is_zero() && !allow_zero {
        return Err(invalid(field, "must be > 0"));
    }
    Ok(())
}

/// `[cache]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSettings {
    /// Store responses on disk.
    pub enabled: bool,
    /// SQLite file location.
    pub path: PathBuf,
    /// Time-to-live for stored responses.
    pub ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from(DEFAULT_CACHE_PATH),
            ttl_secs: DEFAULT_CACHE_TTL.as_secs(),
        }
    }
}

impl CacheSettings {
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// `[health]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HealthSettings {
    pub enabled: bool,
    pub failure_threshold: u32,
    pub failure_window_secs: u64,
    pub recovery_check_interval_secs: u64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            failure_window_secs: DEFAULT_FAILURE_WINDOW.as_secs(),
            recovery_check_interval_secs: DEFAULT_RECOVERY_CHECK_INTERVAL.as_secs(),
        }
    }
}

impl HealthSettings {
    #[must_use]
    pub fn to_health_config(&self) -> HealthConfig {
        HealthConfig {
            enabled: self.enabled,
            failure_threshold: self.failure_threshold,
            failure_window: Duration::from_secs(self.failure_window_secs),
            recovery_check_interval: Duration::from_secs(self.recovery_check_interval_secs),
        }
    }
}

/// `[retry]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    pub enabled: bool,
    pub max_retries: u32,
    pub base_delay_secs: f64,
    pub max_delay_secs: f64,
    pub backoff_factor: f64,
    pub jitter_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_secs: DEFAULT_BASE_DELAY.as_secs_f64(),
            max_delay_secs: DEFAULT_MAX_DELAY.as_secs_f64(),
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            jitter_ms: 0,
        }
    }
}

impl RetrySettings {
    #[must_use]
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: secs_f64(self.base_delay_secs),
            max_delay: secs_f64(self.max_delay_secs),
            backoff_factor: self.backoff_factor,
            jitter: Duration::from_millis(self.jitter_ms),
        }
    }
}

/// `[limiter]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimiterSettings {
    pub max_per_minute: u32,
    pub cooldown_on_limit_secs: u64,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            max_per_minute: DEFAULT_MAX_PER_MINUTE,
            cooldown_on_limit_secs: DEFAULT_COOLDOWN_ON_LIMIT.as_secs(),
        }
    }
}

impl LimiterSettings {
    #[must_use]
    pub fn to_rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            max_per_minute: self.max_per_minute,
            cooldown_on_limit: Duration::from_secs(self.cooldown_on_limit_secs),
        }
    }
}

/// How the fetcher reacts to a rate-limit denial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitMode {
    /// Give up on the request immediately.
    #[default]
    FailFast,
    /// Sleep out short cooldowns (up to `max_wait_secs`).
    Wait,
}

/// `[fetch]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchSettings {
    pub max_concurrency: usize,
    /// Per-attempt provider timeout.
    pub request_timeout_secs: f64,
    pub rate_limit_policy: RateLimitMode,
    /// Only used with `rate_limit_policy = "wait"`.
    pub max_wait_secs: u64,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_CONCURRENCY,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT.as_secs_f64(),
            rate_limit_policy: RateLimitMode::default(),
            max_wait_secs: DEFAULT_MAX_WAIT.as_secs(),
        }
    }
}

impl FetchSettings {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        secs_f64(self.request_timeout_secs)
    }

    #[must_use]
    pub fn rate_limit_policy(&self) -> RateLimitPolicy {
        match self.rate_limit_policy {
            RateLimitMode::FailFast => RateLimitPolicy::FailFast,
            RateLimitMode::Wait => RateLimitPolicy::Wait {
                max_wait: Duration::from_secs(self.max_wait_secs),
            },
        }
    }
}

/// `[providers]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProvidersConfig {
    /// Provider ids in fallback order.
    pub order: Vec<String>,
    /// Contact address sent in the User-Agent and to Crossref's polite pool.
    pub user_agent_mailto: Option<String>,
    pub semantic_scholar_api_key: Option<String>,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    /// Base URL overrides, mainly for tests and mirrors.
    pub crossref_base_url: Option<String>,
    pub semantic_scholar_base_url: Option<String>,
    pub europe_pmc_base_url: Option<String>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            order: DEFAULT_PROVIDER_ORDER.iter().map(ToString::to_string).collect(),
            user_agent_mailto: None,
            semantic_scholar_api_key: None,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT.as_secs(),
            read_timeout_secs: DEFAULT_READ_TIMEOUT.as_secs(),
            crossref_base_url: None,
            semantic_scholar_base_url: None,
            europe_pmc_base_url: None,
        }
    }
}

impl ProvidersConfig {
    /// Shared HTTP client policy for the built-in providers.
    #[must_use]
    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            read_timeout: Duration::from_secs(self.read_timeout_secs),
            user_agent: provider_user_agent(self.user_agent_mailto.as_deref()),
        }
    }
}

/// Complete configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    pub cache: CacheSettings,
    pub health: HealthSettings,
    pub retry: RetrySettings,
    pub limiter: LimiterSettings,
    pub fetch: FetchSettings,
    pub providers: ProvidersConfig,
}

impl FetchConfig {
    /// Reads and validates a TOML config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise any
    /// error from [`FetchConfig::from_toml_str`].
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parses and validates TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on malformed TOML or unknown keys, or
    /// any error from [`FetchConfig::validate`].
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.enabled && self.cache.path.as_os_str().is_empty() {
            return Err(invalid("cache.path", "must not be empty"));
        }

        if self.health.failure_threshold == 0 {
            return Err(invalid("health.failure_threshold", "must be > 0"));
        }
        if self.health.failure_window_secs == 0 {
            return Err(invalid("health.failure_window_secs", "must be > 0"));
        }
        if self.health.recovery_check_interval_secs == 0 {
            return Err(invalid("health.recovery_check_interval_secs", "must be > 0"));
        }

        self.validate_retry()?;

        if self.limiter.max_per_minute == 0 {
            return Err(invalid("limiter.max_per_minute", "must be > 0"));
        }

        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&self.fetch.max_concurrency) {
            return Err(invalid(
                "fetch.max_concurrency",
                format!("must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"),
            ));
        }
        check_secs(
            "fetch.request_timeout_secs",
            self.fetch.request_timeout_secs,
            false,
        )?;

        self.validate_providers()
    }

    fn validate_retry(&self) -> Result<(), ConfigError> {
        let retry = &self.retry;
        if !retry.backoff_factor.is_finite() || retry.backoff_factor < 1.0 {
            return Err(invalid("retry.backoff_factor", "must be >= 1.0"));
        }
        check_secs("retry.base_delay_secs", retry.base_delay_secs, true)?;
        check_secs("retry.max_delay_secs", retry.max_delay_secs, true)?;
        if retry.base_delay_secs > retry.max_delay_secs {
            return Err(invalid("retry.max_delay_secs", "must be >= base_delay_secs"));
        }
        Ok(())
    }

    fn validate_providers(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for name in &self.providers.order {
            let id = ProviderId::new(name.as_str())?;
            if !BUILTIN_PROVIDERS.contains(&id.as_str()) {
                return Err(invalid(
                    "providers.order",
                    format!(
                        "unknown provider '{name}' (expected one of: {})",
                        BUILTIN_PROVIDERS.join(", ")
                    ),
                ));
            }
            if !seen.insert(id) {
                return Err(invalid(
                    "providers.order",
                    format!("provider '{name}' is listed more than once"),
                ));
            }
        }

        if let Some(mailto) = &self.providers.user_agent_mailto {
            let well_formed = mailto
                .split_once('@')
                .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
            if !well_formed || mailto.chars().any(|c| c.is_whitespace() || c.is_control()) {
                return Err(invalid(
                    "providers.user_agent_mailto",
                    format!("'{mailto}' is not an email address"),
                ));
            }
        }

        if self.providers.connect_timeout_secs == 0 {
            return Err(invalid("providers.connect_timeout_secs", "must be > 0"));
        }
        if self.providers.read_timeout_secs == 0 {
            return Err(invalid("providers.read_timeout_secs", "must be > 0"));
        }
        Ok(())
    }
}
