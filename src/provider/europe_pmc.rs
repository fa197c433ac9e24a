//! Europe PMC provider for biomedical literature.
//!
//! Both DOI and title lookups go through the REST search endpoint
//! (`{base}/europepmc/webservices/rest/search`) with `resultType=core` so the
//! abstract is included.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::fetcher::Domain;
use crate::request::Identity;

use super::http_client::{HttpClientConfig, build_provider_http_client, fetch_json};
use super::{EUROPE_PMC, PaperMetadata, Provider, ProviderError, ProviderId, clean_text};

/// Default Europe PMC base URL.
const DEFAULT_BASE_URL: &str = "https://www.ebi.ac.uk";

const SEARCH_PATH: &str = "/europepmc/webservices/rest/search";

const DOMAINS: [Domain; 1] = [Domain::Biomedical];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EpmcSearchResponse {
    pub result_list: Option<EpmcResultList>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EpmcResultList {
    #[serde(default)]
    pub result: Vec<EpmcRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EpmcRecord {
    pub id: Option<String>,
    pub source: Option<String>,
    pub doi: Option<String>,
    pub title: Option<String>,
    pub author_string: Option<String>,
    pub abstract_text: Option<String>,
    pub pub_year: Option<String>,
    pub journal_info: Option<EpmcJournalInfo>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EpmcJournalInfo {
    pub journal: Option<EpmcJournal>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EpmcJournal {
    pub title: Option<String>,
}

/// Fetches metadata from Europe PMC.
pub struct EuropePmcProvider {
    id: ProviderId,
    client: Client,
    base_url: String,
}

impl EuropePmcProvider {
    /// Creates a provider against the public Europe PMC API.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Setup`] if the HTTP client cannot be built.
    pub fn new(http: &HttpClientConfig) -> Result<Self, ProviderError> {
        Self::with_base_url(DEFAULT_BASE_URL, http)
    }

    /// Creates a provider with a custom base URL (for testing with wiremock).
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Setup`] if the HTTP client cannot be built.
    pub fn with_base_url(
        base_url: impl Into<String>,
        http: &HttpClientConfig,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            id: ProviderId(EUROPE_PMC.to_string()),
            client: build_provider_http_client(EUROPE_PMC, http)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

impl std::fmt::Debug for EuropePmcProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EuropePmcProvider")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Provider for EuropePmcProvider {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    fn domains(&self) -> &[Domain] {
        &DOMAINS
    }

    #[tracing::instrument(skip(self), fields(provider = EUROPE_PMC, identity = %identity))]
    async fn fetch(&self, identity: &Identity) -> Result<PaperMetadata, ProviderError> {
        let key = identity.key();
        let url = format!(
            "{}{SEARCH_PATH}?query={}&resultType=core&format=json&pageSize=1",
            self.base_url,
            urlencoding::encode(&search_query(identity))
        );
        debug!(api_url = %url, "calling Europe PMC search API");

        let body: EpmcSearchResponse = fetch_json(self.client.get(&url), EUROPE_PMC, &key).await?;
        let record = body
            .result_list
            .and_then(|list| list.result.into_iter().next())
            .ok_or_else(|| ProviderError::not_found(EUROPE_PMC, key.clone()))?;

        Ok(to_metadata(record))
    }
}

/// Europe PMC query syntax for an identity.
fn search_query(identity: &Identity) -> String {
    match identity {
        Identity::Doi { doi } => format!("DOI:\"{doi}\""),
        Identity::Title {
            title,
            author: Some(author),
        } => format!("TITLE:\"{title}\" AND AUTH:\"{author}\""),
        Identity::Title {
            title,
            author: None,
        } => format!("TITLE:\"{title}\""),
    }
}

fn to_metadata(record: EpmcRecord) -> PaperMetadata {
    let url = match (&record.source, &record.id) {
        (Some(source), Some(id)) => Some(format!("https://europepmc.org/article/{source}/{id}")),
        _ => None,
    };

    PaperMetadata {
        title: record.title.as_deref().and_then(clean_text),
        doi: record.doi.map(|d| d.to_ascii_lowercase()),
        abstract_text: record.abstract_text.as_deref().and_then(clean_text),
        authors: record
            .author_string
            .as_deref()
            .map(split_author_string)
            .unwrap_or_default(),
        year: record.pub_year.and_then(|y| y.trim().parse().ok()),
        venue: record
            .journal_info
            .and_then(|info| info.journal)
            .and_then(|journal| journal.title),
        url,
    }
}

/// Splits `"Smith J, Doe A."` into individual names.
fn split_author_string(authors: &str) -> Vec<String> {
    authors
        .trim_end_matches('.')
        .split(", ")
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(ToString::to_string)
        .collect()
}
