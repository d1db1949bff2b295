//! Instance field mapping
//!
//! Pure helpers turning Compute Engine instance fields into the values
//! stored on compute, description and disk documents.

use cloudmirror_core::domain::{DiskState, PowerState};
use tracing::warn;

use crate::instances::{GcpAttachedDisk, GcpNetworkInterface};

// ============================================================================
// Machine types
// ============================================================================

/// CPU and memory implied by a machine type name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineSpec {
    pub cpu_count: u32,
    pub memory_mb: u64,
}

const BYTES_PER_MB: u64 = 1024 * 1024;

impl MachineSpec {
    /// Memory in bytes, or `None` when it does not fit in a `u64`
    pub fn memory_bytes(&self) -> Option<u64> {
        self.memory_mb.checked_mul(BYTES_PER_MB)
    }
}

/// Shared-core types whose names carry no CPU count
const SHARED_CORE: &[(&str, MachineSpec)] = &[
    ("f1-micro", MachineSpec { cpu_count: 1, memory_mb: 614 }),
    ("g1-small", MachineSpec { cpu_count: 1, memory_mb: 1740 }),
    ("e2-micro", MachineSpec { cpu_count: 2, memory_mb: 1024 }),
    ("e2-small", MachineSpec { cpu_count: 2, memory_mb: 2048 }),
    ("e2-medium", MachineSpec { cpu_count: 2, memory_mb: 4096 }),
];

/// Memory per vCPU in MB for `family-class-N` names
fn memory_per_cpu_mb(family: &str, class: &str) -> Option<u64> {
    match (family, class) {
        ("n1", "standard") => Some(3840),
        ("n1", "highmem") => Some(6656),
        ("n1", "highcpu") => Some(922),
        (_, "standard") => Some(4096),
        (_, "highmem") => Some(8192),
        (_, "highcpu") => Some(1024),
        _ => None,
    }
}

/// Derives CPU count and memory from a machine type name
///
/// Understands `custom-C-M` (optionally family-prefixed and with an `-ext`
/// suffix), predefined `family-class-N` names and the shared-core types.
/// Returns `None` for anything else, including sizes whose memory in bytes
/// overflows.
pub fn parse_machine_type(name: &str) -> Option<MachineSpec> {
    if let Some((_, spec)) = SHARED_CORE.iter().find(|(known, _)| *known == name) {
        return Some(*spec);
    }

    let parts: Vec<&str> = name.split('-').collect();
    let spec = if let Some(pos) = parts.iter().position(|p| *p == "custom") {
        MachineSpec {
            cpu_count: parts.get(pos + 1)?.parse().ok()?,
            memory_mb: parts.get(pos + 2)?.parse().ok()?,
        }
    } else {
        match parts.as_slice() {
            [family, class, cpus] => {
                let cpu_count: u32 = cpus.parse().ok()?;
                let per_cpu = memory_per_cpu_mb(family, class)?;
                match per_cpu.checked_mul(u64::from(cpu_count)) {
                    Some(memory_mb) => MachineSpec {
                        cpu_count,
                        memory_mb,
                    },
                    None => {
                        warn!(machine_type = name, "Machine type memory overflows, ignoring");
                        return None;
                    }
                }
            }
            _ => return None,
        }
    };

    if spec.memory_bytes().is_none() {
        warn!(machine_type = name, "Machine type memory overflows, ignoring");
        return None;
    }
    Some(spec)
}

// ============================================================================
// Location, status and addressing
// ============================================================================

/// Region of a zone: the zone without its trailing `-x` suffix
pub fn region_from_zone(zone: &str) -> String {
    match zone.rsplit_once('-') {
        Some((region, suffix)) if !region.is_empty() && !suffix.is_empty() => region.to_string(),
        _ => zone.to_string(),
    }
}

/// Maps an instance status to a power state
pub fn power_state(status: Option<&str>) -> PowerState {
    match status {
        Some("RUNNING") => PowerState::On,
        Some("STOPPING" | "STOPPED" | "SUSPENDING" | "SUSPENDED" | "TERMINATED") => PowerState::Off,
        _ => PowerState::Unknown,
    }
}

/// First external NAT address of the first interface, else its internal IP
pub fn primary_address(interfaces: &[GcpNetworkInterface]) -> Option<String> {
    let first = interfaces.first()?;
    first
        .access_configs
        .first()
        .and_then(|config| config.nat_ip.clone())
        .or_else(|| first.network_ip.clone())
}

// ============================================================================
// Disks
// ============================================================================

/// Boot order assigned to root disks
pub const ROOT_BOOT_ORDER: u32 = 0;

/// The first disk flagged as boot disk
pub fn boot_disk(disks: &[GcpAttachedDisk]) -> Option<&GcpAttachedDisk> {
    disks.iter().find(|disk| disk.boot)
}

/// Disk document payload for an attached boot disk
pub fn boot_disk_state(disk: &GcpAttachedDisk) -> DiskState {
    DiskState {
        disk_type: disk.disk_type.clone(),
        boot_order: Some(ROOT_BOOT_ORDER),
        capacity_mbytes: disk.size_gb().and_then(|gb| gb.checked_mul(1024)),
        auto_delete: disk.auto_delete,
        licenses: disk.licenses.clone(),
        source: disk.source.clone(),
    }
}

/// Disk payload used when an instance reports no boot disk
pub fn default_root_disk() -> DiskState {
    DiskState {
        disk_type: Some("PERSISTENT".to_string()),
        boot_order: Some(ROOT_BOOT_ORDER),
        auto_delete: Some(true),
        ..Default::default()
    }
}
