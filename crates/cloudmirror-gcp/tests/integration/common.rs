//! Shared test helpers for Compute Engine integration tests
//!
//! Provides wiremock mounts for `instances.list`, seeded endpoint and
//! credential documents, and a recording completion sink.

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use wiremock::matchers::{method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

use cloudmirror_cache::MemoryResourceStore;
use cloudmirror_core::config::{Config, ConfigBuilder, RemoteConfig};
use cloudmirror_core::domain::{
    AuthCredentials, CycleCompletion, EndpointDescription, LocalResourceState, ResourceKind,
    SelfLink,
};
use cloudmirror_core::ports::{ICompletionSink, IResourceStore, ResourceQuery};
use cloudmirror_gcp::client::GcpComputeClient;

pub const PROJECT: &str = "demo-project";
pub const ZONE: &str = "us-east1-b";
pub const TOKEN: &str = "test-access-token";
pub const ENDPOINT: &str = "/resources/endpoints/gcp-1";
pub const CREDENTIALS: &str = "/resources/auth-credentials/gcp-1";
pub const POOL: &str = "/resources/pools/default";

pub fn link(s: &str) -> SelfLink {
    SelfLink::new(s).unwrap()
}

pub fn instances_path() -> String {
    format!("/projects/{PROJECT}/zones/{ZONE}/instances")
}

/// Returns a client pointed at the mock server
pub fn client(server: &MockServer) -> GcpComputeClient {
    GcpComputeClient::with_base_url(TOKEN, PROJECT, ZONE, &RemoteConfig::default(), server.uri())
        .unwrap()
}

pub fn config(page_size: usize) -> Config {
    ConfigBuilder::new().page_size(page_size).build()
}

/// A running instance with one NAT address and a boot disk
pub fn instance(id: u64, name: &str, status: &str, nat_ip: &str) -> Value {
    json!({
        "id": id.to_string(),
        "name": name,
        "zone": format!("https://www.googleapis.com/compute/v1/projects/{PROJECT}/zones/{ZONE}"),
        "machineType": format!(
            "https://www.googleapis.com/compute/v1/projects/{PROJECT}/zones/{ZONE}/machineTypes/n1-standard-2"
        ),
        "status": status,
        "creationTimestamp": "2026-01-15T10:00:00.000-08:00",
        "networkInterfaces": [{
            "networkIP": "10.128.0.2",
            "accessConfigs": [{"natIP": nat_ip}]
        }],
        "disks": [{
            "boot": true,
            "autoDelete": true,
            "type": "PERSISTENT",
            "diskSizeGb": "10",
            "licenses": ["https://www.googleapis.com/compute/v1/projects/debian-cloud/global/licenses/debian-12-bookworm"]
        }],
        "labels": {"env": "prod"}
    })
}

/// Mounts the page served for `page_token` (`None` for the first page)
pub async fn mount_instances_page(
    server: &MockServer,
    page_token: Option<&str>,
    items: Value,
    next_page_token: Option<&str>,
) {
    let mut body = json!({ "kind": "compute#instanceList", "items": items });
    if let Some(next) = next_page_token {
        body["nextPageToken"] = json!(next);
    }
    let mock = Mock::given(method("GET")).and(path(instances_path()));
    let mock = match page_token {
        Some(token) => mock.and(query_param("pageToken", token)),
        None => mock.and(query_param_is_missing("pageToken")),
    };
    mock.respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// A store holding the endpoint description and its credentials
pub async fn seeded_store(access_token: Option<&str>) -> Arc<MemoryResourceStore> {
    let store = Arc::new(MemoryResourceStore::new());

    let endpoint = LocalResourceState::new(ResourceKind::Endpoint, "gcp-1")
        .with_self_link(link(ENDPOINT))
        .with_payload(&EndpointDescription {
            project_id: Some(PROJECT.to_string()),
            zone_id: Some(ZONE.to_string()),
            region_id: None,
            auth_credentials_link: Some(link(CREDENTIALS)),
        })
        .unwrap();
    store.create(&endpoint).await.unwrap();

    let credentials = LocalResourceState::new(ResourceKind::AuthCredentials, "gcp-1")
        .with_self_link(link(CREDENTIALS))
        .with_payload(&AuthCredentials {
            client_email: Some("svc@demo-project.iam.gserviceaccount.com".to_string()),
            access_token: access_token.map(str::to_string),
        })
        .unwrap();
    store.create(&credentials).await.unwrap();

    store
}

/// All documents of `kind`
pub async fn documents(store: &dyn IResourceStore, kind: ResourceKind) -> Vec<LocalResourceState> {
    let query = ResourceQuery::new(kind).with_limit(1000);
    store.query_page(&query, None).await.unwrap().documents
}

/// Records every completion it receives
#[derive(Default)]
pub struct RecordingSink {
    completions: Mutex<Vec<CycleCompletion>>,
}

impl RecordingSink {
    pub fn completions(&self) -> Vec<CycleCompletion> {
        self.completions.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ICompletionSink for RecordingSink {
    async fn complete(&self, completion: &CycleCompletion) -> anyhow::Result<()> {
        self.completions.lock().unwrap().push(completion.clone());
        Ok(())
    }
}
