use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use tempfile::tempdir;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use pullsync::app::App;
use pullsync::clock::ManualClock;
use pullsync::config::Config;
use pullsync::error::SyncError;
use pullsync::fetcher::http::HttpFetcher;
use pullsync::fetcher::soap::SoapFetcher;
use pullsync::fetcher::{Fetcher, Payload};
use pullsync::item::SyncItemCollection;
use pullsync::pipeline::Services;
use pullsync::registry::Registry;
use pullsync::storage::{Database, EntityStore};

#[tokio::test]
async fn http_fetcher_sends_page_and_headers() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/people"))
        .and(query_param("page", "2"))
        .and(query_param("status", "active"))
        .and(header("x-api-key", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"data": []}"#))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = HttpFetcher::new(serde_json::from_value(json!({
        "url": format!("{}/people", server.uri()),
        "query": {"status": "active"},
        "headers": {"x-api-key": "secret"},
        "page_enabled": true
    }))?)?;
    let payload = fetcher.fetch(2, &SyncItemCollection::default()).await?;
    assert_eq!(payload, Payload::Text(r#"{"data": []}"#.to_string()));
    Ok(())
}

#[tokio::test]
async fn http_error_status_is_an_unclassified_error() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let fetcher = HttpFetcher::new(serde_json::from_value(json!({ "url": server.uri() }))?)?;
    let err = fetcher
        .fetch(1, &SyncItemCollection::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Http(_)));
    assert!(!err.is_classified());
    Ok(())
}

#[tokio::test]
async fn soap_fetcher_follows_the_bookmark_of_the_previous_page() -> Result<()> {
    let server = MockServer::start().await;
    let response = r#"<?xml version="1.0" encoding="utf-8"?>
<Soap:Envelope xmlns:Soap="http://schemas.xmlsoap.org/soap/envelope/">
  <Soap:Body>
    <ReadMultiple_Result xmlns="urn:microsoft-dynamics-schemas/page/customer">
      <ReadMultiple_Result>
        <Customer><Key>k3</Key><No>C3</No><Name>Cafe &amp; Co</Name></Customer>
      </ReadMultiple_Result>
    </ReadMultiple_Result>
  </Soap:Body>
</Soap:Envelope>"#;
    Mock::given(method("POST"))
        .and(path("/WS/Page/Customer"))
        .and(header(
            "SOAPAction",
            "urn:microsoft-dynamics-schemas/page/customer:ReadMultiple",
        ))
        .and(body_string_contains("<bookmarkKey>k2</bookmarkKey>"))
        .and(body_string_contains("<setSize>2</setSize>"))
        .respond_with(ResponseTemplate::new(200).set_body_string(response))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = SoapFetcher::new(serde_json::from_value(json!({
        "url": format!("{}/WS", server.uri()),
        "resource_name": "Customer",
        "page_size": 2
    }))?)?;
    let previous = SyncItemCollection::from_values(vec![
        json!({"Key": "k1", "No": "C1"}),
        json!({"Key": "k2", "No": "C2"}),
    ]);
    let payload = fetcher.fetch(2, &previous).await?;
    assert_eq!(
        payload,
        Payload::Records(vec![json!({"Key": "k3", "No": "C3", "Name": "Cafe & Co"})])
    );
    Ok(())
}

#[tokio::test]
async fn paged_http_resource_syncs_every_page() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"id": "1", "name": "Ann"}, {"id": "2", "name": "Bob"}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"id": "3", "name": "Cy"}]
        })))
        .mount(&server)
        .await;

    let dir = tempdir()?;
    let config = Config::from_toml_str(&format!(
        r#"
[[resource]]
id = "people"
entity_type = "person"

[resource.fetcher]
plugin = "http"
settings = {{ url = "{url}/people", page_enabled = true, page_size = 2 }}

[resource.parser]
plugin = "json"
settings = {{ base_key = "data" }}
"#,
        url = server.uri()
    ))?;
    let db = Database::open(dir.path().join("sync.db"))?;
    let services = Services::sqlite(db, Arc::new(ManualClock::new(50)));
    let app = App::new(config, Registry::with_defaults(), services)?;

    let summary = app.sync("people", false).await?;
    // start, two items, page, one item, end
    assert_eq!(summary.jobs, 6);
    assert_eq!(app.services().entities.count("person").await?, 3);
    Ok(())
}
