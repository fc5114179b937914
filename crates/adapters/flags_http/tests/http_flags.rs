// Integration tests for `HttpFlagSource` using wiremock.

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use lumenhub_adapter_flags_http::{DEFAULT_TIMEOUT, FlagSourceError, HttpFlagSource};
use lumenhub_app::ports::FlagSource;
use lumenhub_domain::error::HubError;

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup(body: ResponseTemplate) -> (MockServer, HttpFlagSource, String) {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flags"))
        .respond_with(body)
        .mount(&server)
        .await;
    let source = HttpFlagSource::new(DEFAULT_TIMEOUT).unwrap();
    let url = format!("{}/flags", server.uri());
    (server, source, url)
}

// ── Happy path ──────────────────────────────────────────────────────

#[tokio::test]
async fn should_fetch_boolean_flags() {
    let (_server, source, url) =
        setup(ResponseTemplate::new(200).set_body_json(json!({"away": true, "party": false}))).await;

    let flags = source.fetch(&url).await.unwrap();

    assert_eq!(flags.len(), 2);
    assert_eq!(flags.get("away"), Some(&true));
    assert_eq!(flags.get("party"), Some(&false));
}

#[tokio::test]
async fn should_ignore_non_boolean_entries() {
    let (_server, source, url) = setup(
        ResponseTemplate::new(200).set_body_json(json!({"away": true, "temperature": 21.5, "mode": "eco"})),
    )
    .await;

    let flags = source.fetch_flags(&url).await.unwrap();

    assert_eq!(flags.keys().collect::<Vec<_>>(), vec!["away"]);
}

// ── Failures ────────────────────────────────────────────────────────

#[tokio::test]
async fn should_fail_on_server_error() {
    let (_server, source, url) = setup(ResponseTemplate::new(503)).await;

    let err = source.fetch(&url).await.unwrap_err();
    assert!(matches!(err, FlagSourceError::Request { .. }));
}

#[tokio::test]
async fn should_fail_on_array_body() {
    let (_server, source, url) = setup(ResponseTemplate::new(200).set_body_json(json!([true]))).await;

    let err = source.fetch(&url).await.unwrap_err();
    assert!(matches!(err, FlagSourceError::NotAnObject { .. }));
}

#[tokio::test]
async fn should_surface_transport_error_through_port() {
    let (_server, source, url) = setup(ResponseTemplate::new(404)).await;

    let err = source.fetch_flags(&url).await.unwrap_err();
    assert!(matches!(err, HubError::Transport(_)));
}
