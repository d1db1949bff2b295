//! Enumeration cycle outcomes
//!
//! Counters accumulated over one cycle and the completion record handed to
//! the caller when the cycle reaches `FINISHED` or `ERROR`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::SelfLink;

/// Per-cycle counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleStats {
    /// Remote pages fetched
    pub pages: u64,
    /// Remote resources received across all pages
    pub fetched: u64,
    /// Local resources created
    pub created: u64,
    /// Local resources patched (including benign create conflicts)
    pub updated: u64,
    /// Remote resources intentionally not mirrored
    pub skipped: u64,
    /// Stale local resources deleted
    pub deleted: u64,
    /// Per-resource upsert or delete failures
    pub failed: u64,
    /// Remote records dropped because they could not be parsed
    pub malformed: u64,
}

impl CycleStats {
    /// Total number of local writes performed
    pub fn writes(&self) -> u64 {
        self.created + self.updated + self.deleted
    }

    /// Returns true if any per-resource operation failed
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// Terminal status of a cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    /// Cycle converged (possibly with per-resource failures in the stats)
    Finished,
    /// Cycle aborted before converging
    Error(String),
}

impl CycleStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, CycleStatus::Finished)
    }

    /// Label used in logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            CycleStatus::Finished => "finished",
            CycleStatus::Error(_) => "error",
        }
    }
}

impl std::fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleStatus::Finished => write!(f, "FINISHED"),
            CycleStatus::Error(msg) => write!(f, "ERROR: {}", msg),
        }
    }
}

/// Completion record delivered once per cycle invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleCompletion {
    pub endpoint_link: SelfLink,
    pub task_link: Option<SelfLink>,
    pub status: CycleStatus,
    pub stats: CycleStats,
    /// Cycle start timestamp, absent when the cycle never started
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
}

impl CycleCompletion {
    /// Wall-clock duration of the cycle in milliseconds
    pub fn duration_ms(&self) -> u64 {
        self.started_at
            .map(|start| (self.finished_at - start).num_milliseconds().max(0) as u64)
            .unwrap_or(0)
    }
}
