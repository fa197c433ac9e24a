//! Semantic Scholar provider via the Academic Graph API.
//!
//! DOI lookups call `GET {base}/graph/v1/paper/DOI:{doi}`; title queries use
//! `GET {base}/graph/v1/paper/search?query=...&limit=1`. An API key, when
//! configured, is sent in the `x-api-key` header.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::fetcher::Domain;
use crate::request::Identity;

use super::http_client::{HttpClientConfig, build_provider_http_client, fetch_json};
use super::{PaperMetadata, Provider, ProviderError, ProviderId, SEMANTIC_SCHOLAR, clean_text};

/// Default Semantic Scholar API base URL.
const DEFAULT_BASE_URL: &str = "https://api.semanticscholar.org";

/// Fields requested on every paper lookup.
const PAPER_FIELDS: &str = "title,abstract,year,authors,externalIds,venue,url";

const DOMAINS: [Domain; 2] = [Domain::ComputerScience, Domain::General];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct S2Paper {
    pub title: Option<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub year: Option<i32>,
    pub venue: Option<String>,
    pub url: Option<String>,
    #[serde(default)]
    pub authors: Vec<S2Author>,
    pub external_ids: Option<S2ExternalIds>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct S2Author {
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct S2ExternalIds {
    #[serde(rename = "DOI")]
    pub doi: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct S2SearchResponse {
    #[serde(default)]
    pub data: Vec<S2Paper>,
}

/// Fetches metadata from Semantic Scholar.
pub struct SemanticScholarProvider {
    id: ProviderId,
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl SemanticScholarProvider {
    /// Creates a provider against the public API.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Setup`] if the HTTP client cannot be built.
    pub fn new(http: &HttpClientConfig, api_key: Option<String>) -> Result<Self, ProviderError> {
        Self::with_base_url(DEFAULT_BASE_URL, http, api_key)
    }

    /// Creates a provider with a custom base URL (for testing with wiremock).
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Setup`] if the HTTP client cannot be built.
    pub fn with_base_url(
        base_url: impl Into<String>,
        http: &HttpClientConfig,
        api_key: Option<String>,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            id: ProviderId(SEMANTIC_SCHOLAR.to_string()),
            client: build_provider_http_client(SEMANTIC_SCHOLAR, http)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
        })
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match &self.api_key {
            Some(key) => request.header("x-api-key", key),
            None => request,
        }
    }
}

impl std::fmt::Debug for SemanticScholarProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticScholarProvider")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Provider for SemanticScholarProvider {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    fn domains(&self) -> &[Domain] {
        &DOMAINS
    }

    #[tracing::instrument(skip(self), fields(provider = SEMANTIC_SCHOLAR, identity = %identity))]
    async fn fetch(&self, identity: &Identity) -> Result<PaperMetadata, ProviderError> {
        let key = identity.key();
        let paper = match identity {
            Identity::Doi { doi } => {
                // The API expects the DOI path segment with literal slashes.
                let encoded = urlencoding::encode(doi).replace("%2F", "/");
                let url = format!(
                    "{}/graph/v1/paper/DOI:{encoded}?fields={PAPER_FIELDS}",
                    self.base_url
                );
                debug!(api_url = %url, "calling Semantic Scholar paper API");
                fetch_json::<S2Paper>(self.get(&url), SEMANTIC_SCHOLAR, &key).await?
            }
            Identity::Title { title, author } => {
                let query = match author {
                    Some(author) => format!("{title} {author}"),
                    None => title.clone(),
                };
                let url = format!(
                    "{}/graph/v1/paper/search?query={}&limit=1&fields={PAPER_FIELDS}",
                    self.base_url,
                    urlencoding::encode(&query)
                );
                debug!(api_url = %url, "calling Semantic Scholar search API");
                fetch_json::<S2SearchResponse>(self.get(&url), SEMANTIC_SCHOLAR, &key)
                    .await?
                    .data
                    .into_iter()
                    .next()
                    .ok_or_else(|| ProviderError::not_found(SEMANTIC_SCHOLAR, key.clone()))?
            }
        };

        Ok(to_metadata(paper))
    }
}

fn to_metadata(paper: S2Paper) -> PaperMetadata {
    PaperMetadata {
        title: paper.title.as_deref().and_then(clean_text),
        doi: paper
            .external_ids
            .and_then(|ids| ids.doi)
            .map(|d| d.to_ascii_lowercase()),
        abstract_text: paper.abstract_text.as_deref().and_then(clean_text),
        authors: paper
            .authors
            .into_iter()
            .filter_map(|a| a.name)
            .filter(|n| !n.trim().is_empty())
            .collect(),
        year: paper.year,
        venue: paper.venue.filter(|v| !v.trim().is_empty()),
        url: paper.url,
    }
}
