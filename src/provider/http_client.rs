//! Shared HTTP client policy for providers.
//!
//! Every provider builds its client here so timeouts, the User-Agent and
//! compression stay consistent, and maps transport and status failures onto
//! [`ProviderError`] the same way.

use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::ProviderError;

/// Default TCP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default whole-request timeout enforced by the client itself.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeouts and identification shared by provider clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpClientConfig {
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Whole-request timeout.
    pub read_timeout: Duration,
    /// User-Agent header value.
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            user_agent: crate::user_agent::default_provider_user_agent(),
        }
    }
}

/// Builds a provider HTTP client using the shared policy.
///
/// # Errors
///
/// Returns [`ProviderError::Setup`] when client construction fails.
pub fn build_provider_http_client(
    provider: &str,
    config: &HttpClientConfig,
) -> Result<Client, ProviderError> {
    Client::builder()
        .connect_timeout(config.connect_timeout)
        .timeout(config.read_timeout)
        .user_agent(config.user_agent.clone())
        .gzip(true)
        .build()
        .map_err(|error| {
            ProviderError::setup(provider, format!("HTTP client construction failed: {error}"))
        })
}

/// Sends a request and decodes a JSON body, mapping failures by kind.
///
/// | Outcome | Error |
/// |---------|-------|
/// | transport timeout / connect failure | `Network` (transient) |
/// | HTTP 404 | `NotFound` |
/// | other non-2xx | `HttpStatus` (classified by status) |
/// | undecodable body | `Data` |
pub(crate) async fn fetch_json<T: DeserializeOwned>(
    request: RequestBuilder,
    provider: &str,
    identity: &str,
) -> Result<T, ProviderError> {
    let response = request.send().await.map_err(|error| {
        warn!(provider, error = %error, "provider request failed");
        let reason = if error.is_timeout() {
            "request timed out".to_string()
        } else {
            error.to_string()
        };
        ProviderError::network(provider, reason)
    })?;

    let status = response.status();
    if !status.is_success() {
        debug!(provider, status = status.as_u16(), "provider returned error status");
        return Err(ProviderError::http_status(
            provider,
            status.as_u16(),
            identity,
        ));
    }

    response.json::<T>().await.map_err(|error| {
        warn!(provider, error = %error, "failed to parse provider response JSON");
        ProviderError::data(provider, format!("unexpected response format: {error}"))
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_build_provider_http_client_with_defaults() {
        let client = build_provider_http_client("crossref", &HttpClientConfig::default());
        assert!(client.is_ok());
    }

    #[test]
    fn test_default_client_config_uses_shared_user_agent() {
        let config = HttpClientConfig::default();
        assert!(config.user_agent.starts_with("litfetch/"));
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(config.read_timeout, DEFAULT_READ_TIMEOUT);
    }

    #[tokio::test]
    async fn test_fetch_json_unreachable_host_is_transient() {
        let client = build_provider_http_client(
            "p",
            &HttpClientConfig {
                connect_timeout: Duration::from_millis(200),
                read_timeout: Duration::from_millis(500),
                ..HttpClientConfig::default()
            },
        )
        .unwrap();

        // Port 9 (discard) on localhost is closed in test environments.
        let result: Result<serde_json::Value, _> =
            fetch_json(client.get("http://127.0.0.1:9/works"), "p", "doi:10.1234/x").await;

        let error = result.unwrap_err();
        assert!(error.is_retryable(), "unexpected error: {error}");
    }
}
