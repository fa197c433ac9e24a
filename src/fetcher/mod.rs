//! Multi-source metadata fetcher.
//!
//! [`MultiSourceFetcher`] resolves one logical [`FetchRequest`] against an
//! ordered list of providers. For each request:
//!
//! 1. The response cache is consulted first; a hit returns immediately.
//! 2. Candidates are ordered by research domain (the request's
//!    `domain_hint`, or the [`DomainClassifier`] verdict on its subject).
//! 3. Each candidate must pass the global rate limiter and the health
//!    monitor, then is called through the backoff retry wrapper with a
//!    per-attempt timeout.
//! 4. The first non-empty payload is cached and returned. If every candidate
//!    is skipped or fails, an aggregated [`ExhaustedFailure`] is returned.
//!
//! A [`FetchResult`] is always returned; provider failures never surface as
//! `Err`. Only construction problems do ([`FetcherError`]).
//!
//! # Example
//!
//! ```no_run
//! use litfetch_core::{FetchConfig, FetchRequest, MultiSourceFetcher};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let fetcher = MultiSourceFetcher::from_config(&FetchConfig::default()).await?;
//! let result = fetcher.resolve(&FetchRequest::doi("10.1038/nature12373")?).await;
//! if let Some(metadata) = result.metadata() {
//!     println!("{:?}", metadata.title);
//! }
//! # Ok(())
//! # }
//! ```

mod classifier;
mod result;

pub use classifier::{Domain, DomainClassifier};
pub use result::{
    CancelFlag, ExhaustedFailure, ExhaustionReason, FailureCause, FetchOutcome, FetchResult,
    FetchSource, ProviderFailure,
};

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{StreamExt, stream};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheKey, ResponseCache};
use crate::config::{ConfigError, FetchConfig};
use crate::db::{Database, DbError};
use crate::health::HealthMonitor;
use crate::provider::{
    PaperMetadata, Provider, ProviderError, ProviderId, build_default_providers,
};
use crate::rate_limiter::{Admission, GlobalRateLimiter};
use crate::request::FetchRequest;
use crate::retry::BackoffRetry;

use result::CachedFetch;

/// Minimum allowed batch concurrency.
pub const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed batch concurrency.
pub const MAX_CONCURRENCY: usize = 100;

/// Default batch concurrency.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Default time-to-live for cached responses (7 days).
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Errors raised while assembling a fetcher.
#[derive(Debug, Error)]
pub enum FetcherError {
    /// Concurrency outside the supported range.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The rejected value.
        value: usize,
    },

    /// The same provider id was registered twice.
    #[error(
        "provider '{0}' is registered more than once\n  Suggestion: list each provider only once in providers.order"
    )]
    DuplicateProvider(ProviderId),

    /// The cache database could not be opened.
    #[error("failed to open response cache: {0}")]
    Cache(#[from] DbError),

    /// The configuration failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// What to do when the global rate limiter denies a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RateLimitPolicy {
    /// Stop trying providers for this request.
    #[default]
    FailFast,
    /// Sleep out a cooldown that ends within `max_wait`, then re-check once.
    Wait {
        /// Longest cooldown worth waiting for.
        max_wait: Duration,
    },
}

/// Counters across every `resolve` call on one fetcher.
#[derive(Debug, Default)]
pub struct FetchStats {
    resolved: AtomicU64,
    exhausted: AtomicU64,
    cache_hits: AtomicU64,
    provider_calls: AtomicU64,
}

impl FetchStats {
    /// Requests that produced metadata.
    #[must_use]
    pub fn resolved(&self) -> u64 {
        self.resolved.load(Ordering::SeqCst)
    }

    /// Requests that ended exhausted (cancelled ones included).
    #[must_use]
    pub fn exhausted(&self) -> u64 {
        self.exhausted.load(Ordering::SeqCst)
    }

    /// Requests answered from the cache.
    #[must_use]
    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::SeqCst)
    }

    /// Live provider calls, retries included.
    #[must_use]
    pub fn provider_calls(&self) -> u64 {
        self.provider_calls.load(Ordering::SeqCst)
    }

    fn record(&self, result: &FetchResult) {
        if result.success() {
            self.resolved.fetch_add(1, Ordering::SeqCst);
        } else {
            self.exhausted.fetch_add(1, Ordering::SeqCst);
        }
        if result.source == FetchSource::Cache {
            self.cache_hits.fetch_add(1, Ordering::SeqCst);
        }
        self.provider_calls
            .fetch_add(u64::from(result.attempts), Ordering::SeqCst);
    }
}

/// Assembles a [`MultiSourceFetcher`].
///
/// Every collaborator is optional; unset ones fall back to a disabled cache,
/// a default health monitor, a default rate limiter and default retries.
pub struct FetcherBuilder {
    providers: Vec<Arc<dyn Provider>>,
    cache: Option<Arc<ResponseCache>>,
    health: Option<Arc<HealthMonitor>>,
    limiter: Option<Arc<GlobalRateLimiter>>,
    retry: Option<BackoffRetry>,
    classifier: Option<DomainClassifier>,
    cache_ttl: Duration,
    max_concurrency: usize,
    rate_limit_policy: RateLimitPolicy,
}

impl Default for FetcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FetcherBuilder {
    /// Starts an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            cache: None,
            health: None,
            limiter: None,
            retry: None,
            classifier: None,
            cache_ttl: DEFAULT_CACHE_TTL,
            max_concurrency: DEFAULT_CONCURRENCY,
            rate_limit_policy: RateLimitPolicy::default(),
        }
    }

    /// Appends one provider. Registration order is the fallback order.
    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Appends several providers.
    #[must_use]
    pub fn providers(mut self, providers: impl IntoIterator<Item = Arc<dyn Provider>>) -> Self {
        self.providers.extend(providers);
        self
    }

    /// Response cache consulted before any provider; disabled when unset.
    #[must_use]
    pub fn cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Shared health monitor gating each candidate.
    #[must_use]
    pub fn health(mut self, health: Arc<HealthMonitor>) -> Self {
        self.health = Some(health);
        self
    }

    /// Process-wide rate limiter; share one instance across fetchers.
    #[must_use]
    pub fn rate_limiter(mut self, limiter: Arc<GlobalRateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Backoff retry wrapped around each provider call.
    #[must_use]
    pub fn retry(mut self, retry: BackoffRetry) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Classifier used to order candidates by domain.
    #[must_use]
    pub fn classifier(mut self, classifier: DomainClassifier) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// TTL applied to payloads written through the cache.
    #[must_use]
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Upper bound on concurrently resolving requests in a batch.
    #[must_use]
    pub fn max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Reaction to a rate-limit denial; defaults to fail-fast.
    #[must_use]
    pub fn rate_limit_policy(mut self, policy: RateLimitPolicy) -> Self {
        self.rate_limit_policy = policy;
        self
    }

    /// Validates the settings and builds the fetcher.
    ///
    /// # Errors
    ///
    /// Returns [`FetcherError::InvalidConcurrency`] if concurrency is outside
    /// 1..=100, or [`FetcherError::DuplicateProvider`] if two providers share
    /// an id.
    pub fn build(self) -> Result<MultiSourceFetcher, FetcherError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&self.max_concurrency) {
            return Err(FetcherError::InvalidConcurrency {
                value: self.max_concurrency,
            });
        }

        let mut seen = HashSet::new();
        for provider in &self.providers {
            if !seen.insert(provider.id().clone()) {
                return Err(FetcherError::DuplicateProvider(provider.id().clone()));
            }
        }

        let fetcher = MultiSourceFetcher {
            providers: self.providers,
            cache: self
                .cache
                .unwrap_or_else(|| Arc::new(ResponseCache::disabled())),
            health: self.health.unwrap_or_default(),
            limiter: self.limiter.unwrap_or_default(),
            retry: self.retry.unwrap_or_default(),
            classifier: self.classifier.unwrap_or_default(),
            cache_ttl: self.cache_ttl,
            max_concurrency: self.max_concurrency,
            rate_limit_policy: self.rate_limit_policy,
            stats: FetchStats::default(),
        };

        info!(
            providers = ?fetcher.provider_ids(),
            cache_enabled = fetcher.cache.is_enabled(),
            health_enabled = fetcher.health.is_enabled(),
            retry_enabled = fetcher.retry.is_enabled(),
            max_concurrency = fetcher.max_concurrency,
            "fetcher ready"
        );
        Ok(fetcher)
    }
}

/// Resolves requests across providers with caching, health gating, rate
/// limiting and retries.
///
/// Shareable through `Arc`; `resolve` takes `&self`.
pub struct MultiSourceFetcher {
    providers: Vec<Arc<dyn Provider>>,
    cache: Arc<ResponseCache>,
    health: Arc<HealthMonitor>,
    limiter: Arc<GlobalRateLimiter>,
    retry: BackoffRetry,
    classifier: DomainClassifier,
    cache_ttl: Duration,
    max_concurrency: usize,
    rate_limit_policy: RateLimitPolicy,
    stats: FetchStats,
}

impl std::fmt::Debug for MultiSourceFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiSourceFetcher")
            .field("providers", &self.provider_ids())
            .field("cache_ttl", &self.cache_ttl)
            .field("max_concurrency", &self.max_concurrency)
            .field("rate_limit_policy", &self.rate_limit_policy)
            .finish_non_exhaustive()
    }
}

impl MultiSourceFetcher {
    /// Starts a [`FetcherBuilder`].
    #[must_use]
    pub fn builder() -> FetcherBuilder {
        FetcherBuilder::new()
    }

    /// Builds a fetcher, its collaborators and the built-in providers from
    /// configuration.
    ///
    /// # Errors
    ///
    /// Returns [`FetcherError::Config`] if the configuration is invalid,
    /// [`FetcherError::Cache`] if the cache database cannot be opened, or any
    /// error from [`FetcherBuilder::build`].
    pub async fn from_config(config: &FetchConfig) -> Result<Self, FetcherError> {
        config.validate()?;

        let cache = if config.cache.enabled {
            ResponseCache::new(Database::new(&config.cache.path).await?)
        } else {
            ResponseCache::disabled()
        };
        let health = if config.health.enabled {
            HealthMonitor::new(config.health.to_health_config())
        } else {
            HealthMonitor::disabled()
        };
        let retry = if config.retry.enabled {
            BackoffRetry::new(config.retry.to_policy())
        } else {
            BackoffRetry::disabled()
        };

        Self::builder()
            .providers(build_default_providers(&config.providers))
            .cache(Arc::new(cache))
            .health(Arc::new(health))
            .rate_limiter(Arc::new(GlobalRateLimiter::new(
                config.limiter.to_rate_limit_config(),
            )))
            .retry(retry)
            .cache_ttl(config.cache.ttl())
            .max_concurrency(config.fetch.max_concurrency)
            .rate_limit_policy(config.fetch.rate_limit_policy())
            .build()
    }

    /// Registered providers, in registration order.
    #[must_use]
    pub fn providers(&self) -> &[Arc<dyn Provider>] {
        &self.providers
    }

    /// Registered provider ids, in registration order.
    #[must_use]
    pub fn provider_ids(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.id().as_str()).collect()
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    #[must_use]
    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    #[must_use]
    pub fn rate_limiter(&self) -> &Arc<GlobalRateLimiter> {
        &self.limiter
    }

    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    #[must_use]
    pub fn stats(&self) -> &FetchStats {
        &self.stats
    }

    /// Resolves one request. Always returns a result.
    #[instrument(skip(self, request), fields(identity = %request.identity))]
    pub async fn resolve(&self, request: &FetchRequest) -> FetchResult {
        let result = self.resolve_inner(request).await;
        self.stats.record(&result);
        result
    }

    async fn resolve_inner(&self, request: &FetchRequest) -> FetchResult {
        let identity = request.key();
        let cache_key = CacheKey::for_request(request);

        if let Some(cached) = self.cache.get::<CachedFetch>(&cache_key).await {
            debug!(provider = %cached.provider, "resolved from cache");
            return FetchResult::resolved(
                identity,
                cached.provider,
                cached.metadata,
                0,
                FetchSource::Cache,
            );
        }

        if self.providers.is_empty() {
            warn!(reason = %ExhaustionReason::NoCandidates, "no providers registered");
            return FetchResult::exhausted(
                identity,
                ExhaustedFailure::new(ExhaustionReason::NoCandidates),
                0,
            );
        }

        let domain = request.domain_hint.unwrap_or_else(|| {
            request
                .subject
                .as_deref()
                .map_or(Domain::General, |subject| self.classifier.classify(subject))
        });
        let candidates = self.classifier.order_providers(&self.providers, domain);
        debug!(
            domain = %domain,
            order = ?candidates.iter().map(|p| p.id().as_str()).collect::<Vec<_>>(),
            "provider order selected"
        );

        let mut failures = Vec::with_capacity(candidates.len());
        let mut attempts: u32 = 0;

        for (index, provider) in candidates.iter().enumerate() {
            let id = provider.id();

            let admission = self.admit().await;
            if !admission.allowed {
                info!(
                    provider = %id,
                    skipped = candidates.len() - index,
                    cooldown_ms = admission.cooldown_remaining.as_millis(),
                    "global rate limit denied admission, skipping remaining providers"
                );
                failures.extend(candidates[index..].iter().map(|skipped| {
                    ProviderFailure::rate_limited(
                        skipped.id().clone(),
                        admission.reason,
                        admission.cooldown_remaining,
                    )
                }));
                break;
            }

            if !self.health.is_available(id) {
                let remaining = self.health.blacklist_remaining(id);
                debug!(
                    provider = %id,
                    remaining_ms = remaining.as_millis(),
                    "provider blacklisted, skipping"
                );
                failures.push(ProviderFailure::blacklisted(id.clone(), remaining));
                continue;
            }

            let report = self
                .retry
                .run_if(
                    || self.attempt(provider.as_ref(), request),
                    ProviderError::is_retryable,
                )
                .await;
            attempts = attempts.saturating_add(report.attempts);

            match report.result {
                Ok(metadata) => {
                    self.health.record_success(id);
                    self.write_through(&cache_key, id, &metadata).await;
                    info!(
                        provider = %id,
                        attempts,
                        fallbacks = failures.len(),
                        "request resolved"
                    );
                    return FetchResult::resolved(
                        identity,
                        id.clone(),
                        metadata,
                        attempts,
                        FetchSource::Live,
                    );
                }
                Err(error) => {
                    self.health.record_failure(id);
                    debug!(
                        provider = %id,
                        attempts = report.attempts,
                        kind = ?error.kind(),
                        error = %error,
                        "provider failed, falling back to next candidate"
                    );
                    failures.push(ProviderFailure {
                        provider: id.clone(),
                        cause: FailureCause::Failed {
                            kind: error.kind(),
                            message: error.to_string(),
                            attempts: report.attempts,
                        },
                    });
                }
            }
        }

        let reason = exhaustion_reason(&failures, attempts);
        warn!(
            reason = %reason,
            attempts,
            candidates = candidates.len(),
            "all providers exhausted"
        );
        FetchResult::exhausted(identity, ExhaustedFailure { reason, failures }, attempts)
    }

    /// Resolves many requests, at most `max_concurrency` at a time.
    ///
    /// Results come back in completion order; match them to requests by
    /// [`FetchResult::identity`]. Requests not yet started when `cancel` is
    /// raised end as [`ExhaustionReason::Cancelled`].
    #[instrument(skip(self, requests, cancel), fields(count = requests.len()))]
    pub async fn resolve_batch(
        &self,
        requests: Vec<FetchRequest>,
        cancel: &CancelFlag,
    ) -> Vec<FetchResult> {
        let results: Vec<FetchResult> = stream::iter(requests)
            .map(|request| async move {
                if cancel.is_cancelled() {
                    debug!(identity = %request.identity, "batch cancelled, request not started");
                    let result = FetchResult::exhausted(
                        request.key(),
                        ExhaustedFailure::new(ExhaustionReason::Cancelled),
                        0,
                    );
                    self.stats.record(&result);
                    return result;
                }
                self.resolve(&request).await
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        let resolved = results.iter().filter(|r| r.success()).count();
        info!(
            resolved,
            exhausted = results.len() - resolved,
            "batch complete"
        );
        results
    }

    async fn admit(&self) -> Admission {
        match self.rate_limit_policy {
            RateLimitPolicy::FailFast => self.limiter.can_request(),
            RateLimitPolicy::Wait { max_wait } => self.limiter.wait_for_admission(max_wait).await,
        }
    }

    /// One provider call: counted against the global budget and bounded by
    /// the request timeout.
    async fn attempt(
        &self,
        provider: &dyn Provider,
        request: &FetchRequest,
    ) -> Result<PaperMetadata, ProviderError> {
        let id = provider.id().as_str();
        self.limiter.record_request();

        match tokio::time::timeout(request.timeout, provider.fetch(&request.identity)).await {
            Ok(Ok(metadata)) if metadata.is_empty() => Err(ProviderError::data(
                id,
                "response carried no title, DOI or abstract",
            )),
            Ok(result) => result,
            Err(_) => Err(ProviderError::timeout(
                id,
                u64::try_from(request.timeout.as_millis()).unwrap_or(u64::MAX),
            )),
        }
    }

    async fn write_through(&self, key: &CacheKey, provider: &ProviderId, metadata: &PaperMetadata) {
        let entry = CachedFetch {
            provider: provider.clone(),
            metadata: metadata.clone(),
        };
        if let Err(error) = self.cache.put(key, &entry, self.cache_ttl).await {
            warn!(key = %key, error = %error, "cache write failed, returning live result");
        }
    }
}

/// Summary reason for a request no provider resolved.
fn exhaustion_reason(failures: &[ProviderFailure], attempts: u32) -> ExhaustionReason {
    if attempts > 0 {
        return ExhaustionReason::AllProvidersFailed;
    }
    if failures
        .iter()
        .any(|f| matches!(f.cause, FailureCause::RateLimited { .. }))
    {
        ExhaustionReason::RateLimited
    } else if !failures.is_empty()
        && failures
            .iter()
            .all(|f| matches!(f.cause, FailureCause::Blacklisted { .. }))
    {
        ExhaustionReason::AllProvidersUnavailable
    } else {
        ExhaustionReason::AllProvidersFailed
    }
}
