//! Integration tests for the built-in HTTP providers against wiremock servers.

use std::time::Duration;

use litfetch_core::provider::{
    CrossrefProvider, EuropePmcProvider, HttpClientConfig, SemanticScholarProvider,
};
use litfetch_core::request::Identity;
use litfetch_core::{
    FetchConfig, FetchRequest, FetchSource, MultiSourceFetcher, Provider, ProviderErrorKind,
};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path, path_regex, query_param};
use wiremock::{Mock, ResponseTemplate};

mod support;
use support::socket_guard::start_mock_server_or_skip;

fn doi(value: &str) -> Identity {
    Identity::Doi {
        doi: value.to_string(),
    }
}

fn crossref_work_body() -> serde_json::Value {
    json!({
        "status": "ok",
        "message": {
            "DOI": "10.1234/abc",
            "URL": "https://doi.org/10.1234/abc",
            "title": ["Resilient <i>Metadata</i> Access"],
            "author": [{"given": "Ada", "family": "Lovelace"}],
            "abstract": "<jats:p>An abstract.</jats:p>",
            "container-title": ["Journal of Tests"],
            "published": {"date-parts": [[2023, 2, 1]]}
        }
    })
}

// ==================== Crossref Tests ====================

#[tokio::test]
async fn test_crossref_doi_lookup_with_mailto() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path_regex(r"^/works/10\.1234(/|%2F)abc$"))
        .and(query_param("mailto", "lab@example.org"))
        .respond_with(ResponseTemplate::new(200).set_body_json(crossref_work_body()))
        .expect(1)
        .mount(&server)
        .await;

    let provider = CrossrefProvider::with_base_url(
        server.uri(),
        &HttpClientConfig::default(),
        Some("lab@example.org".to_string()),
    )
    .unwrap();
    let metadata = provider.fetch(&doi("10.1234/abc")).await.unwrap();

    assert_eq!(metadata.title.as_deref(), Some("Resilient Metadata Access"));
    assert_eq!(metadata.abstract_text.as_deref(), Some("An abstract."));
    assert_eq!(metadata.authors, vec!["Lovelace, Ada"]);
    assert_eq!(metadata.year, Some(2023));
}

#[tokio::test]
async fn test_crossref_title_search_uses_bibliographic_query() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/works"))
        .and(query_param("query.bibliographic", "resilient metadata access"))
        .and(query_param("rows", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "ok",
            "message": {"items": [crossref_work_body()["message"].clone()]}
        })))
        .mount(&server)
        .await;

    let provider =
        CrossrefProvider::with_base_url(server.uri(), &HttpClientConfig::default(), None).unwrap();
    let identity = Identity::Title {
        title: "resilient metadata access".to_string(),
        author: None,
    };
    let metadata = provider.fetch(&identity).await.unwrap();

    assert_eq!(metadata.doi.as_deref(), Some("10.1234/abc"));
}

#[tokio::test]
async fn test_crossref_status_mapping() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path_regex(r"^/works/10\.1234(/|%2F)missing$"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/works/10\.1234(/|%2F)down$"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/works/10\.1234(/|%2F)forbidden$"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/works/10\.1234(/|%2F)garbled$"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
        .mount(&server)
        .await;

    let provider =
        CrossrefProvider::with_base_url(server.uri(), &HttpClientConfig::default(), None).unwrap();

    let cases = [
        ("10.1234/missing", ProviderErrorKind::NotFound),
        ("10.1234/down", ProviderErrorKind::Transient),
        ("10.1234/forbidden", ProviderErrorKind::Permanent),
        ("10.1234/garbled", ProviderErrorKind::Data),
    ];
    for (value, expected) in cases {
        let error = provider.fetch(&doi(value)).await.unwrap_err();
        assert_eq!(error.kind(), expected, "unexpected kind for {value}: {error}");
    }
}

// ==================== Semantic Scholar Tests ====================

#[tokio::test]
async fn test_semantic_scholar_sends_api_key() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path_regex(r"^/graph/v1/paper/DOI.*10\.1234/abc$"))
        .and(header("x-api-key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "title": "Graph Paper",
            "abstract": "Nodes and edges.",
            "year": 2021,
            "authors": [{"name": "Grace Hopper"}],
            "externalIds": {"DOI": "10.1234/ABC"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = SemanticScholarProvider::with_base_url(
        server.uri(),
        &HttpClientConfig::default(),
        Some("test-key".to_string()),
    )
    .unwrap();
    let metadata = provider.fetch(&doi("10.1234/abc")).await.unwrap();

    assert_eq!(metadata.title.as_deref(), Some("Graph Paper"));
    assert_eq!(metadata.doi.as_deref(), Some("10.1234/abc"));
    assert_eq!(metadata.authors, vec!["Grace Hopper"]);
}

#[tokio::test]
async fn test_semantic_scholar_empty_search_is_not_found() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/graph/v1/paper/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"total": 0, "data": []})))
        .mount(&server)
        .await;

    let provider =
        SemanticScholarProvider::with_base_url(server.uri(), &HttpClientConfig::default(), None)
            .unwrap();
    let identity = Identity::Title {
        title: "nothing matches this".to_string(),
        author: None,
    };
    let error = provider.fetch(&identity).await.unwrap_err();

    assert_eq!(error.kind(), ProviderErrorKind::NotFound);
}

#[tokio::test]
async fn test_semantic_scholar_rate_limit_is_transient() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let provider =
        SemanticScholarProvider::with_base_url(server.uri(), &HttpClientConfig::default(), None)
            .unwrap();
    let error = provider.fetch(&doi("10.1234/abc")).await.unwrap_err();

    assert!(error.is_retryable());
}

// ==================== Europe PMC Tests ====================

#[tokio::test]
async fn test_europe_pmc_doi_query() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/europepmc/webservices/rest/search"))
        .and(query_param("query", "DOI:\"10.1234/abc\""))
        .and(query_param("resultType", "core"))
        .and(query_param("format", "json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "hitCount": 1,
            "resultList": {"result": [{
                "id": "123",
                "source": "MED",
                "doi": "10.1234/abc",
                "title": "Protein folding in vivo.",
                "authorString": "Smith J, Doe A.",
                "abstractText": "Proteins fold.",
                "pubYear": "2020"
            }]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider =
        EuropePmcProvider::with_base_url(server.uri(), &HttpClientConfig::default()).unwrap();
    let metadata = provider.fetch(&doi("10.1234/abc")).await.unwrap();

    assert_eq!(metadata.authors, vec!["Smith J", "Doe A"]);
    assert_eq!(metadata.year, Some(2020));
    assert_eq!(
        metadata.url.as_deref(),
        Some("https://europepmc.org/article/MED/123")
    );
}

#[tokio::test]
async fn test_europe_pmc_no_hits_is_not_found() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/europepmc/webservices/rest/search"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"hitCount": 0, "resultList": {"result": []}})),
        )
        .mount(&server)
        .await;

    let provider =
        EuropePmcProvider::with_base_url(server.uri(), &HttpClientConfig::default()).unwrap();
    let error = provider.fetch(&doi("10.1234/none")).await.unwrap_err();

    assert_eq!(error.kind(), ProviderErrorKind::NotFound);
}

// ==================== Full Stack Tests ====================

#[tokio::test]
async fn test_configured_fetcher_falls_back_and_persists() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path_regex(r"^/works/"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/europepmc/webservices/rest/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resultList": {"result": [{"title": "Recovered Paper", "doi": "10.1234/abc"}]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let toml = format!(
        r#"
        [cache]
        path = "{cache}"

        [retry]
        max_retries = 1
        base_delay_secs = 0.01
        max_delay_secs = 0.05

        [providers]
        order = ["crossref", "europe_pmc"]
        crossref_base_url = "{base}"
        europe_pmc_base_url = "{base}"
        "#,
        cache = temp_dir.path().join("cache.db").display(),
        base = server.uri(),
    );
    let config = FetchConfig::from_toml_str(&toml).unwrap();
    let fetcher = MultiSourceFetcher::from_config(&config).await.unwrap();
    let request = FetchRequest::doi("https://doi.org/10.1234/ABC")
        .unwrap()
        .with_timeout(Duration::from_secs(5));

    let first = fetcher.resolve(&request).await;
    assert!(first.success(), "expected success, got {first:?}");
    assert_eq!(first.provider.as_ref().unwrap().as_str(), "europe_pmc");
    assert_eq!(first.attempts, 3);

    let second = fetcher.resolve(&request).await;
    assert_eq!(second.source, FetchSource::Cache);
    assert_eq!(second.provider.as_ref().unwrap().as_str(), "europe_pmc");
}
