//! cloudmirror GCP - Google Compute Engine enumeration
//!
//! Provides:
//! - A typed async client for the Compute Engine `instances.list` API
//! - Mapping of instances to compute state, description and disk documents
//! - The enumeration service driving a full cycle for one GCP endpoint
//!
//! ## Modules
//!
//! - [`client`] - Compute Engine HTTP client
//! - [`instances`] - Wire types and validation of listed instances
//! - [`mapping`] - Machine types, regions, power states and addresses
//! - [`adapter`] - [`EnumerationAdapter`](cloudmirror_sync::EnumerationAdapter) for instances
//! - [`service`] - Endpoint-level stage machine

pub mod adapter;
pub mod client;
pub mod instances;
pub mod mapping;
pub mod service;

pub use adapter::GcpInstanceAdapter;
pub use client::GcpComputeClient;
pub use service::{GcpEnumerationService, Stage};

use std::time::Duration;

use cloudmirror_core::domain::{DomainError, SelfLink};
use thiserror::Error;

/// Errors returned by the Compute Engine API
#[derive(Debug, Error)]
pub enum GcpError {
    /// The access token is invalid or expired
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The credentials lack permission on the project
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The project or zone does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Rate limit exceeded; retry after the specified duration
    #[error("Too many requests, retry after {retry_after:?}")]
    TooManyRequests {
        /// Duration to wait before retrying
        retry_after: Duration,
    },

    /// A server-side error occurred (5xx)
    #[error("Server error: {0}")]
    ServerError(String),

    /// A network-level error occurred, including timeouts
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The API response could not be parsed
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Errors that end an endpoint enumeration in the `ERROR` stage
#[derive(Debug, Error)]
pub enum EnumerationError {
    /// The endpoint document does not exist
    #[error("Endpoint {0} not found")]
    MissingEndpoint(SelfLink),

    /// The endpoint document has no zone
    #[error("Endpoint {0} has no zone")]
    MissingZone(SelfLink),

    /// The credentials link, document or token is missing
    #[error("Endpoint {endpoint} has no usable credentials: {reason}")]
    MissingCredentials {
        endpoint: SelfLink,
        reason: String,
    },

    /// The request or a stored document failed validation
    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] DomainError),

    /// The client or a store lookup failed before enumeration began
    #[error("Client error: {0:#}")]
    Client(anyhow::Error),
}
