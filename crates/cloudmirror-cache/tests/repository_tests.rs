//! Integration tests for SqliteResourceStore
//!
//! These tests verify all IResourceStore methods using an in-memory
//! SQLite database. Each test function creates a fresh database to
//! ensure test isolation.

use chrono::{Duration, Utc};
use serde_json::json;

use cloudmirror_cache::{DatabasePool, SqliteResourceStore};
use cloudmirror_core::domain::{LocalResourceState, ResourceKind, SelfLink, TagState};
use cloudmirror_core::ports::{IResourceStore, ResourceQuery, StoreError};

// ============================================================================
// Test helpers
// ============================================================================

/// Create a fresh in-memory store for each test
async fn setup() -> SqliteResourceStore {
    let pool = DatabasePool::in_memory()
        .await
        .expect("Failed to create in-memory database");
    SqliteResourceStore::new(pool.pool().clone())
}

fn link(s: &str) -> SelfLink {
    SelfLink::new(s).unwrap()
}

fn vm(id: &str) -> LocalResourceState {
    LocalResourceState::new(ResourceKind::ComputeState, id)
        .with_name(format!("vm-{id}"))
        .with_endpoint_link(link("/resources/endpoints/e1"))
        .with_resource_pool_link(link("/resources/pools/p1"))
        .with_parent_link(link("/resources/compute/host-1"))
        .with_tenant_links([link("/tenants/t1")])
}

fn ids(docs: &[LocalResourceState]) -> Vec<String> {
    let mut ids: Vec<String> = docs.iter().map(|d| d.id.clone()).collect();
    ids.sort();
    ids
}

// ============================================================================
// Create / get
// ============================================================================

#[tokio::test]
async fn test_create_and_get_round_trips_every_field() {
    let store = setup().await;
    let mut state = vm("100").with_group_link(link("/resources/groups/gcp-project-p"));
    state.tag_links.insert(link("/resources/tags/abc"));
    state.properties.insert("address".into(), json!("10.0.0.5"));
    state.properties.insert("power_state".into(), json!("on"));

    let created = store.create(&state).await.unwrap();
    let self_link = created.self_link.clone().unwrap();
    assert!(self_link.as_str().starts_with("/resources/compute/"));

    let fetched = store.get(&self_link).await.unwrap().unwrap();
    assert_eq!(fetched.id, "100");
    assert_eq!(fetched.name.as_deref(), Some("vm-100"));
    assert_eq!(fetched.parent_link, Some(link("/resources/compute/host-1")));
    assert_eq!(fetched.group_links.len(), 1);
    assert!(fetched.tag_links.contains(&link("/resources/tags/abc")));
    assert_eq!(fetched.properties["address"], json!("10.0.0.5"));
    assert_eq!(fetched.last_updated_at, created.last_updated_at);
}

#[tokio::test]
async fn test_get_missing_returns_none() {
    let store = setup().await;
    let result = store.get(&link("/resources/compute/nope")).await.unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn test_create_keeps_preassigned_link() {
    let store = setup().await;
    let preassigned = link("/resources/disks/boot-1");
    let disk = LocalResourceState::new(ResourceKind::Disk, "1-boot").with_self_link(preassigned.clone());

    let created = store.create(&disk).await.unwrap();
    assert_eq!(created.self_link, Some(preassigned));
}

#[tokio::test]
async fn test_duplicate_create_is_already_exists() {
    let store = setup().await;
    store.create(&vm("1")).await.unwrap();

    // Same (kind, endpoint, id) under a fresh self link
    let err = store.create(&vm("1")).await.unwrap_err();
    assert!(StoreError::is_already_exists(&err));

    // Same self link
    let tag = TagState::new("env", "prod", [link("/tenants/t1")])
        .unwrap()
        .to_resource_state();
    store.create(&tag).await.unwrap();
    let err = store.create(&tag).await.unwrap_err();
    assert!(StoreError::is_already_exists(&err));
}

#[tokio::test]
async fn test_same_id_on_other_endpoint_is_allowed() {
    let store = setup().await;
    store.create(&vm("1")).await.unwrap();
    let other = vm("1").with_endpoint_link(link("/resources/endpoints/e2"));
    assert!(store.create(&other).await.is_ok());
}

// ============================================================================
// Patch / delete
// ============================================================================

#[tokio::test]
async fn test_patch_merges_and_restamps() {
    let store = setup().await;
    let mut state = vm("1");
    state.tag_links.insert(link("/resources/tags/local"));
    state.properties.insert("zone_id".into(), json!("us-east1-b"));
    let created = store.create(&state).await.unwrap();
    let self_link = created.self_link.clone().unwrap();

    let mut partial = LocalResourceState::patch(ResourceKind::ComputeState);
    partial.tag_links.insert(link("/resources/tags/remote"));
    partial.properties.insert("address".into(), json!("10.0.0.9"));

    let patched = store.patch(&self_link, &partial).await.unwrap();
    assert_eq!(patched.id, "1");
    assert_eq!(patched.tag_links.len(), 2);
    assert_eq!(patched.properties["zone_id"], json!("us-east1-b"));
    assert_eq!(patched.properties["address"], json!("10.0.0.9"));
    assert!(patched.last_updated_at >= created.last_updated_at);

    let fetched = store.get(&self_link).await.unwrap().unwrap();
    assert_eq!(fetched, patched);
}

#[tokio::test]
async fn test_patch_missing_is_not_found() {
    let store = setup().await;
    let err = store
        .patch(
            &link("/resources/compute/missing"),
            &LocalResourceState::patch(ResourceKind::ComputeState),
        )
        .await
        .unwrap_err();
    assert!(StoreError::is_not_found(&err));
}

#[tokio::test]
async fn test_delete() {
    let store = setup().await;
    let created = store.create(&vm("1")).await.unwrap();
    let self_link = created.self_link.unwrap();

    store.delete(&self_link).await.unwrap();
    assert!(store.get(&self_link).await.unwrap().is_none());

    let err = store.delete(&self_link).await.unwrap_err();
    assert!(StoreError::is_not_found(&err));
}

// ============================================================================
// Batched id matching
// ============================================================================

#[tokio::test]
async fn test_get_by_ids_respects_scope() {
    let store = setup().await;
    for id in ["1", "2", "3"] {
        store.create(&vm(id)).await.unwrap();
    }
    let mut foreign_tenant = vm("4");
    foreign_tenant.tenant_links = [link("/tenants/t2")].into_iter().collect();
    store.create(&foreign_tenant).await.unwrap();

    let scope = ResourceQuery::new(ResourceKind::ComputeState)
        .with_endpoint_link(link("/resources/endpoints/e1"))
        .with_tenant_links([link("/tenants/t1")]);
    let wanted: Vec<String> = ["1", "3", "4", "9"].iter().map(|s| s.to_string()).collect();

    let matched = store.get_by_ids(&scope, &wanted).await.unwrap();
    let mut keys: Vec<&String> = matched.keys().collect();
    keys.sort();
    assert_eq!(keys, ["1", "3"]);

    assert!(store.get_by_ids(&scope, &[]).await.unwrap().is_empty());
}

// ============================================================================
// Staleness query and pagination
// ============================================================================

#[tokio::test]
async fn test_updated_before_filters_fresh_documents() {
    let store = setup().await;
    store.create(&vm("old")).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let cutoff = Utc::now();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    store.create(&vm("new")).await.unwrap();

    let query = ResourceQuery::new(ResourceKind::ComputeState).with_updated_before(cutoff);
    let page = store.query_page(&query, None).await.unwrap();
    assert_eq!(ids(&page.documents), ["old"]);
    assert!(page.next_page_link.is_none());

    let none_before = ResourceQuery::new(ResourceKind::ComputeState)
        .with_updated_before(cutoff - Duration::hours(1));
    assert!(store.query_page(&none_before, None).await.unwrap().documents.is_empty());
}

#[tokio::test]
async fn test_pool_and_parent_scope() {
    let store = setup().await;
    store.create(&vm("1")).await.unwrap();
    store
        .create(&vm("2").with_parent_link(link("/resources/compute/host-2")))
        .await
        .unwrap();

    let query = ResourceQuery::new(ResourceKind::ComputeState)
        .with_resource_pool_link(link("/resources/pools/p1"))
        .with_parent_link(link("/resources/compute/host-1"));
    let page = store.query_page(&query, None).await.unwrap();
    assert_eq!(ids(&page.documents), ["1"]);
}

#[tokio::test]
async fn test_keyset_pagination_is_stable_under_deletes() {
    let store = setup().await;
    for i in 0..7 {
        store.create(&vm(&i.to_string())).await.unwrap();
    }
    let query = ResourceQuery::new(ResourceKind::ComputeState).with_limit(3);

    let mut pages = 0;
    let mut seen = Vec::new();
    let mut page_link: Option<String> = None;
    loop {
        let page = store.query_page(&query, page_link.as_deref()).await.unwrap();
        pages += 1;
        assert!(page.documents.len() <= 3);
        for doc in &page.documents {
            seen.push(doc.id.clone());
            store.delete(doc.self_link.as_ref().unwrap()).await.unwrap();
        }
        match page.next_page_link {
            Some(next) => page_link = Some(next),
            None => break,
        }
    }

    assert_eq!(pages, 3);
    seen.sort();
    assert_eq!(seen, ["0", "1", "2", "3", "4", "5", "6"]);
}

#[tokio::test]
async fn test_invalid_page_link_is_rejected() {
    let store = setup().await;
    let query = ResourceQuery::new(ResourceKind::ComputeState);
    assert!(store.query_page(&query, Some("not base64!")).await.is_err());
}

#[tokio::test]
async fn test_file_backed_store_persists_across_pools() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("resources.db");

    let self_link = {
        let pool = DatabasePool::new(&path).await.unwrap();
        let store = SqliteResourceStore::new(pool.pool().clone());
        let created = store.create(&vm("1")).await.unwrap();
        pool.pool().close().await;
        created.self_link.unwrap()
    };

    let pool = DatabasePool::new(&path).await.unwrap();
    let store = SqliteResourceStore::new(pool.pool().clone());
    let fetched = store.get(&self_link).await.unwrap().unwrap();
    assert_eq!(fetched.id, "1");
}
