//! Domain newtypes with validation
//!
//! This module provides strongly-typed wrappers for persisted identities.
//! Each newtype ensures data validity at construction time.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::DomainError;

// ============================================================================
// SelfLink
// ============================================================================

/// Opaque persisted identity of a document in the resource store
///
/// Links are rooted paths such as `/resources/compute/7f3c...`. They are
/// compared byte-wise and ordered lexicographically, which the stores rely
/// on for keyset pagination.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SelfLink(String);

impl SelfLink {
    /// Create a new SelfLink with validation
    ///
    /// # Errors
    /// Returns `DomainError::InvalidLink` if the link is empty, not rooted at
    /// `/`, or contains whitespace.
    pub fn new(link: impl Into<String>) -> Result<Self, DomainError> {
        let link = link.into();
        if link.len() < 2 || !link.starts_with('/') {
            return Err(DomainError::InvalidLink(link));
        }
        if link.chars().any(char::is_whitespace) {
            return Err(DomainError::InvalidLink(link));
        }
        Ok(Self(link))
    }

    /// Generate a fresh link under the collection of `kind`
    #[must_use]
    pub fn generate(kind: ResourceKind) -> Self {
        Self(format!("{}/{}", kind.collection(), Uuid::new_v4()))
    }

    /// Build a deterministic link for `name` under the collection of `kind`
    ///
    /// # Errors
    /// Returns `DomainError::InvalidLink` if `name` is empty or contains `/`.
    pub fn for_name(kind: ResourceKind, name: &str) -> Result<Self, DomainError> {
        if name.is_empty() || name.contains('/') {
            return Err(DomainError::InvalidLink(name.to_string()));
        }
        Self::new(format!("{}/{}", kind.collection(), name))
    }

    /// Get the link as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment of the link
    #[must_use]
    pub fn last_segment(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl Display for SelfLink {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SelfLink {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for SelfLink {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SelfLink> for String {
    fn from(link: SelfLink) -> Self {
        link.0
    }
}

impl AsRef<str> for SelfLink {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// ResourceKind
// ============================================================================

/// Kind of document held in the resource store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// A running or stopped virtual machine
    ComputeState,
    /// Hardware shape of a virtual machine
    ComputeDescription,
    /// A block device attached to a compute state
    Disk,
    /// A content-addressed key/value tag
    Tag,
    /// A logical grouping of resources (project, resource group)
    ResourceGroup,
    /// Description of the remote endpoint (compute host)
    Endpoint,
    /// Credentials used to reach an endpoint
    AuthCredentials,
}

impl ResourceKind {
    /// All kinds, in schema order
    pub const ALL: [ResourceKind; 7] = [
        ResourceKind::ComputeState,
        ResourceKind::ComputeDescription,
        ResourceKind::Disk,
        ResourceKind::Tag,
        ResourceKind::ResourceGroup,
        ResourceKind::Endpoint,
        ResourceKind::AuthCredentials,
    ];

    /// Stable storage name of the kind
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::ComputeState => "compute_state",
            ResourceKind::ComputeDescription => "compute_description",
            ResourceKind::Disk => "disk",
            ResourceKind::Tag => "tag",
            ResourceKind::ResourceGroup => "resource_group",
            ResourceKind::Endpoint => "endpoint",
            ResourceKind::AuthCredentials => "auth_credentials",
        }
    }

    /// Collection path under which documents of this kind are linked
    #[must_use]
    pub const fn collection(&self) -> &'static str {
        match self {
            ResourceKind::ComputeState => "/resources/compute",
            ResourceKind::ComputeDescription => "/resources/compute-descriptions",
            ResourceKind::Disk => "/resources/disks",
            ResourceKind::Tag => "/resources/tags",
            ResourceKind::ResourceGroup => "/resources/groups",
            ResourceKind::Endpoint => "/resources/endpoints",
            ResourceKind::AuthCredentials => "/resources/auth-credentials",
        }
    }
}

impl Display for ResourceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| DomainError::InvalidKind(s.to_string()))
    }
}
