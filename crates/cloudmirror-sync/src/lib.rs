//! cloudmirror Sync - Remote-to-local reconciliation engine
//!
//! Provides:
//! - Paginated enumeration of a remote source into a per-cycle context
//! - Batched matching of remote ids against local documents
//! - Concurrent, idempotent create/patch with optional tag reconciliation
//! - Timestamp-based deletion of local documents not seen this cycle
//!
//! ## Modules
//!
//! - [`adapter`] - The callback trait concrete providers implement
//! - [`context`] - Per-cycle mutable state
//! - [`stage`] - Sub-stage state machine and its transition table
//! - [`engine`] - The [`Reconciler`](engine::Reconciler) driving a cycle
//! - [`tags`] - Content-addressed tag creation
//! - [`reaper`] - Staleness reaper

pub mod adapter;
pub mod context;
pub mod engine;
pub mod reaper;
pub mod stage;
pub mod tags;

pub use adapter::{CompanionWrite, EnumerationAdapter, LocalStateBuild, MirrorPlan};
pub use context::EnumerationContext;
pub use engine::Reconciler;
pub use stage::{PageFacts, SubStage};

use cloudmirror_core::domain::DomainError;
use thiserror::Error;

/// Errors that abort a reconciliation cycle
///
/// Per-resource failures never surface here; they are logged and counted
/// in the cycle stats.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The remote source failed to return a page
    #[error("Remote fetch failed: {0:#}")]
    Fetch(anyhow::Error),

    /// The local store failed to answer a match or staleness query
    #[error("Local query failed: {0:#}")]
    Query(anyhow::Error),

    /// The enumeration request is malformed
    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] DomainError),
}
