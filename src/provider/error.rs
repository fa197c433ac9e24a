//! Provider error types and their retry classification.

use serde::Serialize;
use thiserror::Error;

/// How a provider failure should be treated by the fetcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// Timeout, network failure, HTTP 408/429/5xx. Retried with backoff.
    Transient,
    /// The provider has no record for the identity. Not retried.
    NotFound,
    /// Any other 4xx, or a request the provider cannot serve. Not retried.
    Permanent,
    /// Malformed or empty payload. Not retried, never cached.
    Data,
}

impl ProviderErrorKind {
    /// Returns true when another attempt may succeed.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transient)
    }
}

/// Errors returned by a [`super::Provider`] call.
///
/// Providers never retry or rate-limit themselves; they report what went
/// wrong and the fetcher decides.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// The call did not finish within the per-attempt timeout.
    #[error("{provider} did not respond within {timeout_ms}ms")]
    Timeout {
        /// Provider id.
        provider: String,
        /// Timeout that elapsed.
        timeout_ms: u64,
    },

    /// The provider could not be reached.
    #[error("cannot reach {provider}: {reason}\n  Suggestion: check your network connection")]
    Network {
        /// Provider id.
        provider: String,
        /// Transport error description.
        reason: String,
    },

    /// The provider answered with a non-success HTTP status.
    #[error("{provider} returned HTTP {status}")]
    HttpStatus {
        /// Provider id.
        provider: String,
        /// HTTP status code.
        status: u16,
    },

    /// The provider has no record for the identity.
    #[error("{provider} has no record for '{identity}'")]
    NotFound {
        /// Provider id.
        provider: String,
        /// Identity key that was looked up.
        identity: String,
    },

    /// The provider answered, but the payload is unusable.
    #[error("{provider} returned unusable data: {reason}")]
    Data {
        /// Provider id.
        provider: String,
        /// What was wrong with the payload.
        reason: String,
    },

    /// The provider cannot serve this request at all.
    #[error("{provider} cannot handle the request: {reason}")]
    Unsupported {
        /// Provider id.
        provider: String,
        /// Why the request is not supported.
        reason: String,
    },

    /// The provider could not be constructed.
    #[error("failed to set up {provider}: {reason}")]
    Setup {
        /// Provider id.
        provider: String,
        /// What failed.
        reason: String,
    },
}

impl ProviderError {
    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(provider: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            provider: provider.into(),
            timeout_ms,
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Network {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    /// Creates an HTTP status error, mapping 404 to [`ProviderError::NotFound`].
    #[must_use]
    pub fn http_status(provider: impl Into<String>, status: u16, identity: &str) -> Self {
        if status == 404 {
            Self::not_found(provider, identity)
        } else {
            Self::HttpStatus {
                provider: provider.into(),
                status,
            }
        }
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(provider: impl Into<String>, identity: impl Into<String>) -> Self {
        Self::NotFound {
            provider: provider.into(),
            identity: identity.into(),
        }
    }

    /// Creates a data error.
    #[must_use]
    pub fn data(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Data {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    /// Creates an unsupported-request error.
    #[must_use]
    pub fn unsupported(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unsupported {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    /// Creates a setup error.
    #[must_use]
    pub fn setup(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Setup {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    /// Classifies the error for retry and health decisions.
    ///
    /// | Error | Kind |
    /// |-------|------|
    /// | Timeout, Network | Transient |
    /// | HTTP 408, 429, 5xx | Transient |
    /// | HTTP 404 / NotFound | NotFound |
    /// | Other HTTP status, Unsupported, Setup | Permanent |
    /// | Data | Data |
    #[must_use]
    pub fn kind(&self) -> ProviderErrorKind {
        match self {
            Self::Timeout { .. } | Self::Network { .. } => ProviderErrorKind::Transient,
            Self::HttpStatus { status, .. } => classify_http_status(*status),
            Self::NotFound { .. } => ProviderErrorKind::NotFound,
            Self::Data { .. } => ProviderErrorKind::Data,
            Self::Unsupported { .. } | Self::Setup { .. } => ProviderErrorKind::Permanent,
        }
    }

    /// Returns true when another attempt may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

fn classify_http_status(status: u16) -> ProviderErrorKind {
    match status {
        404 => ProviderErrorKind::NotFound,
        408 | 429 | 500..=599 => ProviderErrorKind::Transient,
        _ => ProviderErrorKind::Permanent,
    }
}
