//! End-to-end enumeration tests
//!
//! Drives `GcpEnumerationService` against a wiremock Compute Engine mock
//! and an in-memory resource store, checking the documents left behind
//! and the completion delivered for each invocation.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use cloudmirror_core::domain::{
    ComputeDescription, ComputeState, CycleStatus, DiskState, EnumerationAction,
    EnumerationRequest, OsFamily, PowerState, ResourceKind,
};
use cloudmirror_core::ports::IResourceStore;
use cloudmirror_gcp::GcpEnumerationService;

use crate::common::{self, RecordingSink};

fn request() -> EnumerationRequest {
    EnumerationRequest::new(common::link(common::ENDPOINT), common::link(common::POOL))
        .with_tenant_links([common::link("/tenants/t1")])
}

fn service(store: Arc<dyn IResourceStore>, server: &MockServer) -> GcpEnumerationService {
    GcpEnumerationService::new(store, &common::config(2)).with_base_url(server.uri())
}

async fn mount_two_pages(server: &MockServer) {
    common::mount_instances_page(
        server,
        None,
        json!([
            common::instance(1, "web-1", "RUNNING", "34.1.1.1"),
            common::instance(2, "web-2", "RUNNING", "34.1.1.2")
        ]),
        Some("p2"),
    )
    .await;
    common::mount_instances_page(
        server,
        Some("p2"),
        json!([common::instance(3, "db-1", "TERMINATED", "34.1.1.3")]),
        None,
    )
    .await;
}

#[tokio::test]
async fn test_first_cycle_mirrors_every_instance() {
    let server = MockServer::start().await;
    mount_two_pages(&server).await;
    let store = common::seeded_store(Some(common::TOKEN)).await;
    let sink = RecordingSink::default();

    let completion = service(store.clone(), &server).enumerate(request(), &sink).await;

    assert_eq!(completion.status, CycleStatus::Finished);
    assert_eq!(completion.stats.pages, 2);
    assert_eq!(completion.stats.created, 3);
    assert_eq!(completion.stats.deleted, 0);
    assert_eq!(sink.completions().len(), 1);

    let states = common::documents(store.as_ref(), ResourceKind::ComputeState).await;
    assert_eq!(states.len(), 3);
    assert_eq!(common::documents(store.as_ref(), ResourceKind::ComputeDescription).await.len(), 3);
    assert_eq!(common::documents(store.as_ref(), ResourceKind::Disk).await.len(), 3);
    assert_eq!(common::documents(store.as_ref(), ResourceKind::Tag).await.len(), 1);

    let groups = common::documents(store.as_ref(), ResourceKind::ResourceGroup).await;
    assert_eq!(groups.len(), 1);
    let group_link = groups[0].self_link.clone().unwrap();
    assert_eq!(group_link.as_str(), "/resources/groups/gcp-project-demo-project");

    let db = states.iter().find(|s| s.id == "3").unwrap();
    assert_eq!(db.name.as_deref(), Some("db-1"));
    assert_eq!(db.parent_link, Some(common::link(common::ENDPOINT)));
    assert_eq!(db.resource_pool_link, Some(common::link(common::POOL)));
    assert!(db.group_links.contains(&group_link));
    assert!(db.tenant_links.contains(&common::link("/tenants/t1")));
    assert_eq!(db.tag_links.len(), 1);

    let payload: ComputeState = db.payload().unwrap();
    assert_eq!(payload.power_state, Some(PowerState::Off));
    assert_eq!(payload.address.as_deref(), Some("34.1.1.3"));
    assert_eq!(payload.os_family, Some(OsFamily::Linux));
    assert_eq!(payload.region_id.as_deref(), Some("us-east1"));

    let description = store
        .get(payload.description_link.as_ref().unwrap())
        .await
        .unwrap()
        .unwrap();
    let shape: ComputeDescription = description.payload().unwrap();
    assert_eq!(shape.cpu_count, Some(2));
    assert_eq!(shape.zone_id.as_deref(), Some(common::ZONE));

    let disk = store.get(&payload.disk_links[0]).await.unwrap().unwrap();
    let disk: DiskState = disk.payload().unwrap();
    assert_eq!(disk.capacity_mbytes, Some(10 * 1024));
    assert_eq!(disk.auto_delete, Some(true));
}

#[tokio::test]
async fn test_second_cycle_updates_and_reaps() {
    let store = common::seeded_store(Some(common::TOKEN)).await;

    let first = MockServer::start().await;
    mount_two_pages(&first).await;
    let sink = RecordingSink::default();
    service(store.clone(), &first).enumerate(request(), &sink).await;

    tokio::time::sleep(Duration::from_millis(5)).await;

    // web-1 stopped and lost its address; web-2 and db-1 are gone; api-1 is new
    let second = MockServer::start().await;
    let mut stopped = common::instance(1, "web-1", "STOPPED", "34.9.9.9");
    stopped["disks"][0]["autoDelete"] = json!(false);
    common::mount_instances_page(
        &second,
        None,
        json!([stopped, common::instance(4, "api-1", "RUNNING", "34.1.1.4")]),
        None,
    )
    .await;

    let completion = service(store.clone(), &second).enumerate(request(), &sink).await;
    assert_eq!(completion.status, CycleStatus::Finished);
    assert_eq!(completion.stats.created, 1);
    assert_eq!(completion.stats.updated, 1);
    assert_eq!(completion.stats.deleted, 2);

    let states = common::documents(store.as_ref(), ResourceKind::ComputeState).await;
    let mut ids: Vec<&str> = states.iter().map(|s| s.id.as_str()).collect();
    ids.sort();
    assert_eq!(ids, ["1", "4"]);

    // Owned disks and descriptions went with their compute states
    assert_eq!(common::documents(store.as_ref(), ResourceKind::Disk).await.len(), 2);
    assert_eq!(common::documents(store.as_ref(), ResourceKind::ComputeDescription).await.len(), 2);

    let web = states.iter().find(|s| s.id == "1").unwrap();
    let payload: ComputeState = web.payload().unwrap();
    assert_eq!(payload.power_state, Some(PowerState::Off));
    assert_eq!(payload.address.as_deref(), Some("34.9.9.9"));
    let disk: DiskState = store
        .get(&payload.disk_links[0])
        .await
        .unwrap()
        .unwrap()
        .payload()
        .unwrap();
    assert_eq!(disk.auto_delete, Some(false));
    assert_eq!(sink.completions().len(), 2);
}

#[tokio::test]
async fn test_missing_endpoint_fails_without_remote_calls() {
    let server = MockServer::start().await;
    let store = Arc::new(cloudmirror_cache::MemoryResourceStore::new());
    let sink = RecordingSink::default();

    let completion = service(store, &server).enumerate(request(), &sink).await;

    match &completion.status {
        CycleStatus::Error(message) => assert!(message.contains("not found")),
        other => panic!("expected an error, got {other}"),
    }
    assert_eq!(sink.completions().len(), 1);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_access_token_fails() {
    let server = MockServer::start().await;
    let store = common::seeded_store(None).await;
    let sink = RecordingSink::default();

    let completion = service(store.clone(), &server).enumerate(request(), &sink).await;

    match &completion.status {
        CycleStatus::Error(message) => assert!(message.contains("no access token")),
        other => panic!("expected an error, got {other}"),
    }
    assert!(common::documents(store.as_ref(), ResourceKind::ResourceGroup)
        .await
        .is_empty());
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_remote_failure_ends_in_error_and_keeps_documents() {
    let store = common::seeded_store(Some(common::TOKEN)).await;
    let sink = RecordingSink::default();

    let healthy = MockServer::start().await;
    mount_two_pages(&healthy).await;
    service(store.clone(), &healthy).enumerate(request(), &sink).await;

    let broken = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"code": 401, "message": "Invalid Credentials"}
        })))
        .mount(&broken)
        .await;

    let completion = service(store.clone(), &broken).enumerate(request(), &sink).await;

    match &completion.status {
        CycleStatus::Error(message) => assert!(message.contains("Invalid Credentials")),
        other => panic!("expected an error, got {other}"),
    }
    assert_eq!(completion.stats.deleted, 0);
    assert_eq!(common::documents(store.as_ref(), ResourceKind::ComputeState).await.len(), 3);
}

#[tokio::test]
async fn test_mock_and_stop_requests_do_no_io() {
    let server = MockServer::start().await;
    let store = Arc::new(cloudmirror_cache::MemoryResourceStore::new());
    let service = service(store.clone(), &server);
    let sink = RecordingSink::default();

    let mock = service.enumerate(request().mock(), &sink).await;
    assert_eq!(mock.status, CycleStatus::Finished);

    let stop = service
        .enumerate(request().with_action(EnumerationAction::Stop), &sink)
        .await;
    assert_eq!(stop.status, CycleStatus::Finished);
    assert_eq!(service.in_flight(), 0);

    assert_eq!(sink.completions().len(), 2);
    assert!(store.is_empty());
    assert!(server.received_requests().await.unwrap().is_empty());
}
