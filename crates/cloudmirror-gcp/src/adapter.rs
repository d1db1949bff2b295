//! GcpInstanceAdapter - EnumerationAdapter implementation for Compute Engine
//!
//! Wraps a [`GcpComputeClient`] for one project and zone and maps each
//! listed instance to local documents.
//!
//! ## Design Notes
//!
//! - A new instance fans out into three creates: compute description, root
//!   disk and compute state. Description and disk links are generated up
//!   front so the state can reference them while all three are written
//!   concurrently.
//! - A known instance is patched with address, power state and instance
//!   type only; the root disk's `auto_delete` flag is patched through the
//!   state's first disk link.
//! - Staleness and matching are scoped to the request's resource pool and
//!   to the endpoint as parent.

use anyhow::Result;
use tracing::debug;

use cloudmirror_core::domain::{
    ComputeDescription, ComputeState, DiskState, EnumerationRequest, LocalResourceState, OsFamily,
    ResourceKind, SelfLink,
};
use cloudmirror_core::ports::{IRemoteSource, RemotePage, ResourceQuery};
use cloudmirror_sync::{CompanionWrite, EnumerationAdapter, LocalStateBuild, MirrorPlan};

use crate::client::GcpComputeClient;
use crate::instances::{self, RemoteInstance};
use crate::mapping;

/// Adapter name recorded on compute descriptions
pub const INSTANCE_ADAPTER_REFERENCE: &str = "gcp-instance-adapter";

/// Maps Compute Engine instances of one endpoint to local documents
pub struct GcpInstanceAdapter {
    client: GcpComputeClient,
    endpoint_link: SelfLink,
    resource_pool_link: SelfLink,
    group_link: Option<SelfLink>,
    region_override: Option<String>,
    page_size: usize,
}

impl GcpInstanceAdapter {
    /// Creates an adapter for the endpoint and pool named by `request`
    pub fn new(client: GcpComputeClient, request: &EnumerationRequest, page_size: usize) -> Self {
        Self {
            client,
            endpoint_link: request.endpoint_link.clone(),
            resource_pool_link: request.resource_pool_link.clone(),
            group_link: None,
            region_override: request.region_override.clone(),
            page_size,
        }
    }

    /// Adds the project resource group to new compute states
    pub fn with_group_link(mut self, link: SelfLink) -> Self {
        self.group_link = Some(link);
        self
    }

    pub fn client(&self) -> &GcpComputeClient {
        &self.client
    }

    fn region_for(&self, zone: &str) -> String {
        self.region_override
            .clone()
            .unwrap_or_else(|| mapping::region_from_zone(zone))
    }

    fn tags_of(remote: &RemoteInstance) -> Vec<(String, String)> {
        remote
            .labels
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Builds the description, root disk and state for a new instance
    fn create_plan(&self, remote: &RemoteInstance) -> Result<MirrorPlan> {
        let id = remote.remote_id();
        let zone = remote.zone.clone();
        let region = self.region_for(&zone);
        let machine = remote
            .machine_type
            .as_deref()
            .and_then(mapping::parse_machine_type);

        let description_link = SelfLink::generate(ResourceKind::ComputeDescription);
        let description = LocalResourceState::new(ResourceKind::ComputeDescription, id.clone())
            .with_self_link(description_link.clone())
            .with_name(remote.name.clone())
            .with_payload(&ComputeDescription {
                cpu_count: machine.map(|m| m.cpu_count),
                total_memory_bytes: machine.and_then(|m| m.memory_bytes()),
                instance_type: remote.machine_type.clone(),
                zone_id: Some(zone.clone()),
                region_id: Some(region.clone()),
                instance_adapter_reference: Some(INSTANCE_ADAPTER_REFERENCE.to_string()),
            })?;

        let (disk_payload, os_family) = match mapping::boot_disk(&remote.disks) {
            Some(disk) => (
                mapping::boot_disk_state(disk),
                OsFamily::from_licenses(&disk.licenses),
            ),
            None => {
                debug!(id = %id, "Instance reports no boot disk, using default root disk");
                (mapping::default_root_disk(), OsFamily::Linux)
            }
        };
        let disk_link = SelfLink::generate(ResourceKind::Disk);
        let disk = LocalResourceState::new(ResourceKind::Disk, format!("{id}-boot"))
            .with_self_link(disk_link.clone())
            .with_name(format!("{}-boot", remote.name))
            .with_payload(&disk_payload)?;

        let mut state = LocalResourceState::new(ResourceKind::ComputeState, id)
            .with_name(remote.name.clone())
            .with_parent_link(self.endpoint_link.clone())
            .with_payload(&ComputeState {
                description_link: Some(description_link),
                disk_links: vec![disk_link],
                address: mapping::primary_address(&remote.network_interfaces),
                power_state: Some(mapping::power_state(remote.status.as_deref())),
                os_family: Some(os_family),
                instance_type: remote.machine_type.clone(),
                zone_id: Some(zone),
                region_id: Some(region),
                creation_time_micros: remote.creation_time.map(|t| t.timestamp_micros()),
            })?;
        if let Some(group) = &self.group_link {
            state = state.with_group_link(group.clone());
        }

        Ok(MirrorPlan::new(state)
            .with_tags(Self::tags_of(remote))
            .with_companion(CompanionWrite::Create(description))
            .with_companion(CompanionWrite::Create(disk)))
    }

    /// Builds the partial updates for a known instance
    fn update_plan(
        &self,
        remote: &RemoteInstance,
        existing: &LocalResourceState,
    ) -> Result<MirrorPlan> {
        let state = LocalResourceState::patch(ResourceKind::ComputeState).with_payload(
            &ComputeState {
                address: mapping::primary_address(&remote.network_interfaces),
                power_state: Some(mapping::power_state(remote.status.as_deref())),
                instance_type: remote.machine_type.clone(),
                ..Default::default()
            },
        )?;
        let mut plan = MirrorPlan::new(state).with_tags(Self::tags_of(remote));

        let auto_delete = mapping::boot_disk(&remote.disks).and_then(|disk| disk.auto_delete);
        let root_disk = existing.payload::<ComputeState>()?.disk_links.into_iter().next();
        if let (Some(auto_delete), Some(link)) = (auto_delete, root_disk) {
            let disk = LocalResourceState::patch(ResourceKind::Disk)
                .with_self_link(link)
                .with_payload(&DiskState {
                    auto_delete: Some(auto_delete),
                    ..Default::default()
                })?;
            plan = plan.with_companion(CompanionWrite::Patch(disk));
        }
        Ok(plan)
    }
}

#[async_trait::async_trait]
impl IRemoteSource for GcpInstanceAdapter {
    type Remote = RemoteInstance;

    async fn fetch_page(&self, cursor: Option<&str>) -> Result<RemotePage<RemoteInstance>> {
        let list = self.client.list_instances(cursor, self.page_size).await?;
        Ok(instances::into_remote_page(list))
    }
}

#[async_trait::async_trait]
impl EnumerationAdapter for GcpInstanceAdapter {
    fn kind(&self) -> ResourceKind {
        ResourceKind::ComputeState
    }

    fn provider(&self) -> &'static str {
        "gcp"
    }

    fn resource_noun(&self) -> &'static str {
        "VMS"
    }

    async fn build_local_state(
        &self,
        remote: &RemoteInstance,
        existing: Option<&LocalResourceState>,
    ) -> Result<LocalStateBuild> {
        let plan = match existing {
            Some(existing) => self.update_plan(remote, existing)?,
            None => self.create_plan(remote)?,
        };
        Ok(LocalStateBuild::Mirror(plan))
    }

    fn customize_query(&self, query: ResourceQuery) -> ResourceQuery {
        query
            .with_resource_pool_link(self.resource_pool_link.clone())
            .with_parent_link(self.endpoint_link.clone())
    }

    /// Disks and the description of a compute state
    fn owned_links(&self, candidate: &LocalResourceState) -> Vec<SelfLink> {
        match candidate.payload::<ComputeState>() {
            Ok(state) => state
                .disk_links
                .into_iter()
                .chain(state.description_link)
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}
