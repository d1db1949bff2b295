//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. Ports are interfaces that the engine depends
//! on, but whose implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`IRemoteSource`] - Paginated listing of a cloud provider's resources
//! - [`IResourceStore`] - Persistence and filtered queries for local documents
//! - [`ICompletionSink`] - Terminal notification for each cycle invocation

pub mod completion;
pub mod remote_source;
pub mod resource_store;

pub use completion::ICompletionSink;
pub use remote_source::{IRemoteSource, RemotePage};
pub use resource_store::{IResourceStore, QueryPage, ResourceQuery, StoreError, DEFAULT_QUERY_LIMIT};
