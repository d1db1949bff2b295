//! Integration tests for `instances.list`
//!
//! Verifies request shape, pagination, 429 back-off and status
//! classification against a wiremock Compute Engine mock.

use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use cloudmirror_core::domain::EnumerationRequest;
use cloudmirror_core::ports::IRemoteSource;
use cloudmirror_gcp::{GcpError, GcpInstanceAdapter};

use crate::common;

#[tokio::test]
async fn test_list_sends_token_and_page_size() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(common::instances_path()))
        .and(header("authorization", format!("Bearer {}", common::TOKEN).as_str()))
        .and(query_param("maxResults", "25"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [common::instance(1, "vm-1", "RUNNING", "34.1.1.1")]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let list = common::client(&server).list_instances(None, 25).await.unwrap();
    assert_eq!(list.items.len(), 1);
    assert!(list.next_page_token.is_none());
}

#[tokio::test]
async fn test_adapter_follows_page_tokens() {
    let server = MockServer::start().await;
    common::mount_instances_page(
        &server,
        None,
        json!([common::instance(1, "vm-1", "RUNNING", "34.1.1.1")]),
        Some("p2"),
    )
    .await;
    common::mount_instances_page(
        &server,
        Some("p2"),
        json!([
            common::instance(2, "vm-2", "STOPPED", "34.1.1.2"),
            {"id": "bogus", "name": "broken", "zone": "zones/us-east1-b"}
        ]),
        None,
    )
    .await;

    let request = EnumerationRequest::new(common::link(common::ENDPOINT), common::link(common::POOL));
    let adapter = GcpInstanceAdapter::new(common::client(&server), &request, 10);

    let first = adapter.fetch_page(None).await.unwrap();
    assert_eq!(first.resources.keys().collect::<Vec<_>>(), ["1"]);
    assert_eq!(first.next_page_cursor.as_deref(), Some("p2"));

    let second = adapter.fetch_page(Some("p2")).await.unwrap();
    assert_eq!(second.resources.keys().collect::<Vec<_>>(), ["2"]);
    assert_eq!(second.malformed, 1);
    assert!(second.is_last());
}

#[tokio::test]
async fn test_throttled_request_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(common::instances_path()))
        .respond_with(ResponseTemplate::new(429).append_header("Retry-After", "0"))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(common::instances_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
        .mount(&server)
        .await;

    let list = common::client(&server).list_instances(None, 10).await.unwrap();
    assert!(list.items.is_empty());
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_throttling_gives_up_after_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(common::instances_path()))
        .respond_with(ResponseTemplate::new(429).append_header("Retry-After", "0"))
        .mount(&server)
        .await;

    let err = common::client(&server).list_instances(None, 10).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<GcpError>(),
        Some(GcpError::TooManyRequests { .. })
    ));
    assert_eq!(server.received_requests().await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_error_statuses_are_classified() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(common::instances_path()))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": {"code": 403, "message": "Required 'compute.instances.list' permission"}
        })))
        .mount(&server)
        .await;

    let err = common::client(&server).list_instances(None, 10).await.unwrap_err();
    match err.downcast_ref::<GcpError>() {
        Some(GcpError::Forbidden(message)) => assert!(message.contains("compute.instances.list")),
        other => panic!("expected Forbidden, got {other:?}"),
    }
}

#[tokio::test]
async fn test_server_error_and_garbage_body() {
    let failing = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&failing)
        .await;
    let err = common::client(&failing).list_instances(None, 10).await.unwrap_err();
    assert!(matches!(err.downcast_ref::<GcpError>(), Some(GcpError::ServerError(_))));

    let garbage = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
        .mount(&garbage)
        .await;
    let err = common::client(&garbage).list_instances(None, 10).await.unwrap_err();
    assert!(matches!(err.downcast_ref::<GcpError>(), Some(GcpError::InvalidResponse(_))));
}
