//! Domain error types
//!
//! This module defines error types specific to domain operations:
//! malformed links, invalid enumeration requests, and payload decoding.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A self link was empty or not rooted at `/`
    #[error("Invalid link: {0}")]
    InvalidLink(String),

    /// An unknown resource kind string
    #[error("Invalid resource kind: {0}")]
    InvalidKind(String),

    /// An enumeration request failed validation
    #[error("Invalid enumeration request: {0}")]
    InvalidRequest(String),

    /// A tag had an empty key
    #[error("Invalid tag: {0}")]
    InvalidTag(String),

    /// A required field is missing from a document
    #[error("Missing field `{field}` on {kind}")]
    MissingField {
        /// The resource kind the field belongs to
        kind: String,
        /// The missing field name
        field: String,
    },

    /// A kind-specific payload could not be decoded
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}
