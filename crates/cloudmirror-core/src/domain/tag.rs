//! Content-addressed tag states
//!
//! A tag's self link is derived from the SHA-256 of its key, value and
//! tenant scope. Creating the same tag twice therefore targets the same
//! document, and a store conflict on the second create means "already there".

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::errors::DomainError;
use super::newtypes::{ResourceKind, SelfLink};
use super::resource::LocalResourceState;

/// A `(key, value, tenant scope)` tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagState {
    key: String,
    value: String,
    tenant_links: BTreeSet<SelfLink>,
}

impl TagState {
    /// Creates a tag, rejecting empty keys
    ///
    /// # Errors
    /// Returns `DomainError::InvalidTag` when `key` is empty or blank.
    pub fn new(
        key: impl Into<String>,
        value: impl Into<String>,
        tenant_links: impl IntoIterator<Item = SelfLink>,
    ) -> Result<Self, DomainError> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(DomainError::InvalidTag("tag key must not be empty".to_string()));
        }
        Ok(Self {
            key,
            value: value.into(),
            tenant_links: tenant_links.into_iter().collect(),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn tenant_links(&self) -> &BTreeSet<SelfLink> {
        &self.tenant_links
    }

    /// Hex SHA-256 over the length-prefixed key, value and sorted tenants
    pub fn content_id(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [self.key.as_str(), self.value.as_str()]
            .into_iter()
            .chain(self.tenant_links.iter().map(SelfLink::as_str))
        {
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    /// Deterministic self link of this tag
    pub fn self_link(&self) -> SelfLink {
        tag_link(&self.content_id())
    }

    /// Document to persist for this tag
    pub fn to_resource_state(&self) -> LocalResourceState {
        let mut state = LocalResourceState::new(ResourceKind::Tag, self.content_id())
            .with_self_link(self.self_link())
            .with_tenant_links(self.tenant_links.iter().cloned());
        state
            .properties
            .insert("key".to_string(), self.key.clone().into());
        state
            .properties
            .insert("value".to_string(), self.value.clone().into());
        state
    }
}

/// Hex digests are always valid link segments
fn tag_link(content_id: &str) -> SelfLink {
    SelfLink::for_name(ResourceKind::Tag, content_id)
        .unwrap_or_else(|_| SelfLink::generate(ResourceKind::Tag))
}
