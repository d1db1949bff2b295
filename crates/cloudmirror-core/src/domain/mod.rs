//! Domain entities
//!
//! This module contains the core domain types for cloudmirror:
//! - Newtypes for persisted identities and resource kinds
//! - The generic local resource document and its merge rules
//! - Typed payloads for compute, disk, endpoint and credential documents
//! - Content-addressed tag states
//! - Enumeration requests and cycle outcomes
//! - Domain-specific error types

pub mod compute;
pub mod cycle;
pub mod errors;
pub mod newtypes;
pub mod request;
pub mod resource;
pub mod tag;

// Re-export commonly used types
pub use compute::{
    AuthCredentials, ComputeDescription, ComputeState, DiskState, EndpointDescription, OsFamily,
    PowerState,
};
pub use cycle::{CycleCompletion, CycleStats, CycleStatus};
pub use errors::DomainError;
pub use newtypes::{ResourceKind, SelfLink};
pub use request::{EnumerationAction, EnumerationRequest};
pub use resource::LocalResourceState;
pub use tag::TagState;
