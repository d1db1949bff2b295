//! Compute Engine instance wire types
//!
//! Raw `instances.list` JSON is deserialized leniently into `Gcp*` structs,
//! then validated into [`RemoteInstance`]. An instance whose `id` is not an
//! unsigned 64-bit integer, or that has no `name` or `zone`, is dropped and
//! counted as malformed so one bad record never fails a page.
//!
//! See: <https://cloud.google.com/compute/docs/reference/rest/v1/instances/list>

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;

use cloudmirror_core::ports::RemotePage;

// ============================================================================
// Compute Engine API response types (JSON deserialization)
// ============================================================================

/// Response of `GET .../zones/{zone}/instances`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcpInstanceList {
    #[serde(default)]
    pub items: Vec<GcpInstance>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcpInstance {
    /// Numeric id, serialized as a string by the API
    pub id: Option<serde_json::Value>,
    pub name: Option<String>,
    /// Full zone URL
    pub zone: Option<String>,
    /// Full machine type URL
    pub machine_type: Option<String>,
    pub status: Option<String>,
    pub creation_timestamp: Option<String>,
    #[serde(default)]
    pub network_interfaces: Vec<GcpNetworkInterface>,
    #[serde(default)]
    pub disks: Vec<GcpAttachedDisk>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcpNetworkInterface {
    #[serde(rename = "networkIP")]
    pub network_ip: Option<String>,
    #[serde(default)]
    pub access_configs: Vec<GcpAccessConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GcpAccessConfig {
    #[serde(rename = "natIP")]
    pub nat_ip: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcpAttachedDisk {
    #[serde(default)]
    pub boot: bool,
    pub auto_delete: Option<bool>,
    /// `PERSISTENT` or `SCRATCH`
    #[serde(rename = "type")]
    pub disk_type: Option<String>,
    /// Decimal string in the API; non-numeric values are ignored
    pub disk_size_gb: Option<serde_json::Value>,
    pub source: Option<String>,
    pub index: Option<u32>,
    #[serde(default)]
    pub licenses: Vec<String>,
}

impl GcpAttachedDisk {
    /// Disk size in GiB when it parses as an unsigned integer
    pub fn size_gb(&self) -> Option<u64> {
        self.disk_size_gb.as_ref().and_then(json_u64)
    }
}

// ============================================================================
// Validated instances
// ============================================================================

/// An instance that passed validation
#[derive(Debug, Clone)]
pub struct RemoteInstance {
    pub id: u64,
    pub name: String,
    pub zone: String,
    pub machine_type: Option<String>,
    pub status: Option<String>,
    pub creation_time: Option<DateTime<Utc>>,
    pub network_interfaces: Vec<GcpNetworkInterface>,
    pub disks: Vec<GcpAttachedDisk>,
    pub labels: BTreeMap<String, String>,
}

impl RemoteInstance {
    /// Remote id as used for matching
    pub fn remote_id(&self) -> String {
        self.id.to_string()
    }
}

/// Accepts integers and decimal strings
fn json_u64(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Last path segment of a Compute Engine resource URL
pub fn last_segment(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

impl TryFrom<GcpInstance> for RemoteInstance {
    type Error = String;

    fn try_from(raw: GcpInstance) -> Result<Self, Self::Error> {
        let id = raw
            .id
            .as_ref()
            .and_then(json_u64)
            .ok_or_else(|| format!("id {:?} is not an unsigned integer", raw.id))?;
        let name = raw
            .name
            .filter(|n| !n.is_empty())
            .ok_or_else(|| format!("instance {id} has no name"))?;
        let zone = raw
            .zone
            .as_deref()
            .map(last_segment)
            .filter(|z| !z.is_empty())
            .map(str::to_string)
            .ok_or_else(|| format!("instance {id} has no zone"))?;

        let creation_time = raw
            .creation_timestamp
            .as_deref()
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc));

        Ok(Self {
            id,
            name,
            zone,
            machine_type: raw.machine_type.as_deref().map(last_segment).map(str::to_string),
            status: raw.status,
            creation_time,
            network_interfaces: raw.network_interfaces,
            disks: raw.disks,
            labels: raw.labels,
        })
    }
}

/// Validates a listing page into a [`RemotePage`] keyed by instance id
pub fn into_remote_page(list: GcpInstanceList) -> RemotePage<RemoteInstance> {
    let mut malformed = 0;
    let mut resources = Vec::with_capacity(list.items.len());
    for raw in list.items {
        match RemoteInstance::try_from(raw) {
            Ok(instance) => resources.push((instance.remote_id(), instance)),
            Err(reason) => {
                warn!(%reason, "Skipping malformed instance");
                malformed += 1;
            }
        }
    }
    RemotePage::new(resources, list.next_page_token).with_malformed(malformed)
}
