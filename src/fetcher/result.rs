//! Result types produced by [`super::MultiSourceFetcher::resolve`].

use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::provider::{PaperMetadata, ProviderErrorKind, ProviderId};
use crate::rate_limiter::DenialReason;

/// Where a resolved payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchSource {
    /// Served from the response cache.
    Cache,
    /// Fetched from a provider during this call.
    Live,
}

/// Summary of why no provider produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionReason {
    /// No live call was made and the global rate limit blocked at least one
    /// candidate.
    RateLimited,
    /// Every candidate was blacklisted; no live call was made.
    AllProvidersUnavailable,
    /// At least one provider was called and none succeeded.
    AllProvidersFailed,
    /// No providers are registered.
    NoCandidates,
    /// The batch was cancelled before this request started.
    Cancelled,
}

impl ExhaustionReason {
    /// Snake-case name used in logs and JSON output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::AllProvidersUnavailable => "all_providers_unavailable",
            Self::AllProvidersFailed => "all_providers_failed",
            Self::NoCandidates => "no_candidates",
            Self::Cancelled => "cancelled",
        }
    }
}

impl Display for ExhaustionReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to one candidate provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum FailureCause {
    /// Skipped because the global rate limiter denied admission.
    RateLimited {
        /// Limiter's reason.
        denial: Option<DenialReason>,
        /// Cooldown left when the candidate was skipped.
        cooldown_remaining_ms: u64,
    },
    /// Skipped because the provider is blacklisted.
    Blacklisted {
        /// Blacklist time left.
        remaining_ms: u64,
    },
    /// Called, and every attempt failed.
    Failed {
        /// Classification of the last error.
        kind: ProviderErrorKind,
        /// Last error message.
        message: String,
        /// Attempts made against this provider.
        attempts: u32,
    },
}

/// One entry of an aggregated failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderFailure {
    /// The candidate.
    pub provider: ProviderId,
    /// Why it did not produce a result.
    #[serde(flatten)]
    pub cause: FailureCause,
}

impl ProviderFailure {
    pub(crate) fn rate_limited(
        provider: ProviderId,
        denial: Option<DenialReason>,
        cooldown_remaining: Duration,
    ) -> Self {
        Self {
            provider,
            cause: FailureCause::RateLimited {
                denial,
                cooldown_remaining_ms: millis(cooldown_remaining),
            },
        }
    }

    pub(crate) fn blacklisted(provider: ProviderId, remaining: Duration) -> Self {
        Self {
            provider,
            cause: FailureCause::Blacklisted {
                remaining_ms: millis(remaining),
            },
        }
    }

    /// Returns true when the provider was actually called.
    #[must_use]
    pub fn was_called(&self) -> bool {
        matches!(self.cause, FailureCause::Failed { .. })
    }
}

impl Display for ProviderFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.cause {
            FailureCause::RateLimited { denial, .. } => match denial {
                Some(denial) => write!(f, "{}: skipped ({denial})", self.provider),
                None => write!(f, "{}: skipped (rate limited)", self.provider),
            },
            FailureCause::Blacklisted { remaining_ms } => write!(
                f,
                "{}: skipped (blacklisted for another {remaining_ms}ms)",
                self.provider
            ),
            FailureCause::Failed {
                message, attempts, ..
            } => write!(
                f,
                "{}: failed after {attempts} attempt(s): {message}",
                self.provider
            ),
        }
    }
}

/// Aggregated failure for a request no provider could serve.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("no provider could resolve the request ({reason})")]
pub struct ExhaustedFailure {
    /// Summary reason.
    pub reason: ExhaustionReason,
    /// Per-candidate details, in the order candidates were considered.
    pub failures: Vec<ProviderFailure>,
}

impl ExhaustedFailure {
    /// Creates a failure with no per-provider details.
    #[must_use]
    pub fn new(reason: ExhaustionReason) -> Self {
        Self {
            reason,
            failures: Vec::new(),
        }
    }
}

/// Terminal state of a resolve call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FetchOutcome {
    /// A provider (or the cache) produced metadata.
    Resolved {
        /// The metadata.
        metadata: PaperMetadata,
    },
    /// Every candidate was skipped or failed.
    Exhausted {
        /// Aggregated failure.
        failure: ExhaustedFailure,
    },
}

/// Outcome of one logical request. Never mutated after it is returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchResult {
    /// Identity key of the request.
    pub identity: String,
    /// Provider that served the metadata (originally, for cache hits).
    pub provider: Option<ProviderId>,
    /// Resolved metadata or aggregated failure.
    #[serde(flatten)]
    pub outcome: FetchOutcome,
    /// Live provider calls made, across all candidates.
    pub attempts: u32,
    /// Cache or live. Exhausted results report `live`.
    pub source: FetchSource,
}

impl FetchResult {
    pub(crate) fn resolved(
        identity: String,
        provider: ProviderId,
        metadata: PaperMetadata,
        attempts: u32,
        source: FetchSource,
    ) -> Self {
        Self {
            identity,
            provider: Some(provider),
            outcome: FetchOutcome::Resolved { metadata },
            attempts,
            source,
        }
    }

    pub(crate) fn exhausted(identity: String, failure: ExhaustedFailure, attempts: u32) -> Self {
        Self {
            identity,
            provider: None,
            outcome: FetchOutcome::Exhausted { failure },
            attempts,
            source: FetchSource::Live,
        }
    }

    /// Returns true when metadata was produced.
    #[must_use]
    pub fn success(&self) -> bool {
        matches!(self.outcome, FetchOutcome::Resolved { .. })
    }

    /// The metadata, if resolved.
    #[must_use]
    pub fn metadata(&self) -> Option<&PaperMetadata> {
        match &self.outcome {
            FetchOutcome::Resolved { metadata } => Some(metadata),
            FetchOutcome::Exhausted { .. } => None,
        }
    }

    /// The aggregated failure, if exhausted.
    #[must_use]
    pub fn failure(&self) -> Option<&ExhaustedFailure> {
        match &self.outcome {
            FetchOutcome::Resolved { .. } => None,
            FetchOutcome::Exhausted { failure } => Some(failure),
        }
    }

    /// Converts into a `Result` for callers that prefer `?`.
    ///
    /// # Errors
    ///
    /// Returns the [`ExhaustedFailure`] when no provider succeeded.
    pub fn into_result(self) -> Result<PaperMetadata, ExhaustedFailure> {
        match self.outcome {
            FetchOutcome::Resolved { metadata } => Ok(metadata),
            FetchOutcome::Exhausted { failure } => Err(failure),
        }
    }
}

/// Payload stored in the response cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct CachedFetch {
    pub provider: ProviderId,
    pub metadata: PaperMetadata,
}

/// Cooperative cancellation flag for batch resolution.
///
/// Cloning shares the flag. Requests that have not started when it is
/// raised finish as exhausted with [`ExhaustionReason::Cancelled`];
/// in-flight requests run to completion.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Creates an unraised flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the flag.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true once raised.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
