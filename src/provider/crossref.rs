//! Crossref provider - general scholarly metadata via the Crossref REST API.
//!
//! DOI lookups call `GET {base}/works/{doi}`; title queries call
//! `GET {base}/works?query.bibliographic=...&rows=1`. When a contact address
//! is configured it is sent as `mailto` to use Crossref's polite pool.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::fetcher::Domain;
use crate::request::Identity;

use super::http_client::{HttpClientConfig, build_provider_http_client, fetch_json};
use super::{CROSSREF, PaperMetadata, Provider, ProviderError, ProviderId, clean_text};

/// Default Crossref API base URL.
const DEFAULT_BASE_URL: &str = "https://api.crossref.org";

const DOMAINS: [Domain; 1] = [Domain::General];

// ==================== Crossref API Response Types ====================

/// Top-level single-work response.
#[derive(Debug, Deserialize)]
pub(crate) struct CrossrefWorkResponse {
    pub status: String,
    pub message: CrossrefWork,
}

/// Top-level search response.
#[derive(Debug, Deserialize)]
pub(crate) struct CrossrefSearchResponse {
    pub status: String,
    pub message: CrossrefSearchMessage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CrossrefSearchMessage {
    #[serde(default)]
    pub items: Vec<CrossrefWork>,
}

/// One work record.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct CrossrefWork {
    #[serde(rename = "DOI")]
    pub doi: Option<String>,
    #[serde(rename = "URL")]
    pub url: Option<String>,
    pub title: Option<Vec<String>>,
    pub author: Option<Vec<CrossrefAuthor>>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub container_title: Option<Vec<String>>,
    pub published: Option<CrossrefDate>,
    pub published_print: Option<CrossrefDate>,
    pub published_online: Option<CrossrefDate>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CrossrefAuthor {
    pub given: Option<String>,
    pub family: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct CrossrefDate {
    pub date_parts: Option<Vec<Vec<Option<i32>>>>,
}

// ==================== CrossrefProvider ====================

/// Fetches metadata from the Crossref REST API.
pub struct CrossrefProvider {
    id: ProviderId,
    client: Client,
    base_url: String,
    mailto: Option<String>,
}

impl CrossrefProvider {
    /// Creates a provider against the public Crossref API.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Setup`] if the mailto is malformed or the
    /// HTTP client cannot be built.
    pub fn new(http: &HttpClientConfig, mailto: Option<String>) -> Result<Self, ProviderError> {
        Self::with_base_url(DEFAULT_BASE_URL, http, mailto)
    }

    /// Creates a provider with a custom base URL (for testing with wiremock).
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Setup`] if the mailto is malformed or the
    /// HTTP client cannot be built.
    #[tracing::instrument(skip_all, fields(base_url))]
    pub fn with_base_url(
        base_url: impl Into<String>,
        http: &HttpClientConfig,
        mailto: Option<String>,
    ) -> Result<Self, ProviderError> {
        if let Some(mailto) = &mailto
            && mailto.chars().any(|c| c == '\n' || c == '\r' || c == '\0')
        {
            return Err(ProviderError::setup(
                CROSSREF,
                "mailto contains invalid control characters",
            ));
        }

        Ok(Self {
            id: ProviderId(CROSSREF.to_string()),
            client: build_provider_http_client(CROSSREF, http)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            mailto,
        })
    }

    /// Appends the polite-pool `mailto` query parameter when configured.
    fn with_mailto(&self, mut url: String) -> String {
        if let Some(mailto) = &self.mailto {
            url.push(if url.contains('?') { '&' } else { '?' });
            url.push_str("mailto=");
            url.push_str(&urlencoding::encode(mailto));
        }
        url
    }
}

impl std::fmt::Debug for CrossrefProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrossrefProvider")
            .field("base_url", &self.base_url)
            .field("mailto", &self.mailto)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Provider for CrossrefProvider {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    fn domains(&self) -> &[Domain] {
        &DOMAINS
    }

    #[tracing::instrument(skip(self), fields(provider = CROSSREF, identity = %identity))]
    async fn fetch(&self, identity: &Identity) -> Result<PaperMetadata, ProviderError> {
        let key = identity.key();
        let work = match identity {
            Identity::Doi { doi } => {
                let url = self.with_mailto(format!(
                    "{}/works/{}",
                    self.base_url,
                    urlencoding::encode(doi)
                ));
                debug!(api_url = %url, "calling Crossref works API");
                let body: CrossrefWorkResponse =
                    fetch_json(self.client.get(&url), CROSSREF, &key).await?;
                check_status(&body.status)?;
                body.message
            }
            Identity::Title { title, author } => {
                let mut url = format!(
                    "{}/works?rows=1&query.bibliographic={}",
                    self.base_url,
                    urlencoding::encode(title)
                );
                if let Some(author) = author {
                    url.push_str("&query.author=");
                    url.push_str(&urlencoding::encode(author));
                }
                let url = self.with_mailto(url);
                debug!(api_url = %url, "calling Crossref search API");
                let body: CrossrefSearchResponse =
                    fetch_json(self.client.get(&url), CROSSREF, &key).await?;
                check_status(&body.status)?;
                body.message
                    .items
                    .into_iter()
                    .next()
                    .ok_or_else(|| ProviderError::not_found(CROSSREF, key.clone()))?
            }
        };

        Ok(to_metadata(work))
    }
}

fn check_status(status: &str) -> Result<(), ProviderError> {
    if status.eq_ignore_ascii_case("ok") {
        Ok(())
    } else {
        warn!(status, "Crossref response status was not ok");
        Err(ProviderError::data(
            CROSSREF,
            format!("unexpected response status '{status}'"),
        ))
    }
}

// ==================== Extraction Helpers ====================

fn to_metadata(work: CrossrefWork) -> PaperMetadata {
    let year = extract_year(work.published.as_ref())
        .or_else(|| extract_year(work.published_print.as_ref()))
        .or_else(|| extract_year(work.published_online.as_ref()));

    let authors = work
        .author
        .unwrap_or_default()
        .into_iter()
        .map(|a| match (a.family, a.given) {
            (Some(f), Some(g)) => format!("{f}, {g}"),
            (Some(f), None) => f,
            (None, Some(g)) => g,
            (None, None) => String::new(),
        })
        .filter(|s| !s.is_empty())
        .collect();

    PaperMetadata {
        title: work
            .title
            .and_then(|titles| titles.into_iter().next())
            .and_then(|t| clean_text(&t)),
        doi: work.doi.map(|d| d.to_ascii_lowercase()),
        abstract_text: work.abstract_text.as_deref().and_then(clean_text),
        authors,
        year,
        venue: work
            .container_title
            .and_then(|names| names.into_iter().next()),
        url: work.url,
    }
}

fn extract_year(date: Option<&CrossrefDate>) -> Option<i32> {
    date.and_then(|d| d.date_parts.as_ref())
        .and_then(|parts| parts.first())
        .and_then(|inner| inner.first())
        .copied()
        .flatten()
}
