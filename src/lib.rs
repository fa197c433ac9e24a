//! litfetch Core Library
//!
//! Resilient access to bibliographic metadata sources (Crossref, Semantic
//! Scholar, Europe PMC) for literature-review pipelines. Every lookup goes
//! through a durable response cache, a global rate limiter, a per-provider
//! circuit breaker and exponential-backoff retries, falling back across
//! providers until one answers.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`db`] - SQLite connection and schema management
//! - [`cache`] - TTL-bounded response cache keyed by request fingerprint
//! - [`health`] - Per-provider failure tracking and blacklisting
//! - [`retry`] - Exponential backoff retry wrapper
//! - [`rate_limiter`] - Process-wide sliding-window admission control
//! - [`provider`] - Provider trait and the built-in HTTP providers
//! - [`request`] - Request identities and DOI normalization
//! - [`fetcher`] - Multi-source fetcher, domain classifier and batch mode
//! - [`config`] - TOML configuration
//! - [`pipeline`] - Pipeline stages and the metadata enrichment step

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod config;
pub mod db;
pub mod fetcher;
pub mod health;
pub mod pipeline;
pub mod provider;
pub mod rate_limiter;
pub mod request;
pub mod retry;
mod user_agent;

// Re-export commonly used types
pub use cache::{CacheError, CacheKey, CacheStats, ResponseCache};
pub use config::{ConfigError, FetchConfig, ProvidersConfig};
pub use db::{Database, DbError};
pub use fetcher::{
    CancelFlag, Domain, DomainClassifier, ExhaustedFailure, ExhaustionReason, FetchResult,
    FetchSource, FetcherBuilder, FetcherError, MultiSourceFetcher, RateLimitPolicy,
};
pub use health::{HealthConfig, HealthMonitor, ProviderHealth};
pub use pipeline::{EnrichmentReport, Stage, enrich_metadata};
pub use provider::{
    PaperMetadata, Provider, ProviderError, ProviderErrorKind, ProviderId,
    build_default_providers,
};
pub use rate_limiter::{Admission, GlobalRateLimiter, RateLimitConfig};
pub use request::{FetchRequest, Identity, IdentityError, normalize_doi};
pub use retry::{BackoffRetry, RetryPolicy, RetryReport};
