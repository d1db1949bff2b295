//! LocalResourceState domain entity
//!
//! The persisted replica of a remote resource. Common scoping fields are
//! first-class; kind-specific fields live in a JSON `properties` object that
//! the typed payloads in [`super::compute`] serialize into.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

use super::errors::DomainError;
use super::newtypes::{ResourceKind, SelfLink};

/// A document in the local resource store
///
/// When used as the argument of a patch, every `None`/empty field means
/// "leave unchanged"; see [`LocalResourceState::merge_patch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalResourceState {
    /// Remote identifier, unique per endpoint and kind
    pub id: String,
    /// Kind of the document
    pub kind: ResourceKind,
    /// Persisted identity; assigned by the store on create when absent
    pub self_link: Option<SelfLink>,
    /// Human-readable name
    pub name: Option<String>,
    /// Endpoint this resource was enumerated from
    pub endpoint_link: Option<SelfLink>,
    /// Ownership/visibility boundary
    #[serde(default)]
    pub tenant_links: BTreeSet<SelfLink>,
    /// Resource pool the resource is placed in
    pub resource_pool_link: Option<SelfLink>,
    /// Parent (compute host) of the resource
    pub parent_link: Option<SelfLink>,
    /// Groups the resource belongs to
    #[serde(default)]
    pub group_links: BTreeSet<SelfLink>,
    /// Tags attached to the resource
    #[serde(default)]
    pub tag_links: BTreeSet<SelfLink>,
    /// Stamped by the store on every write
    pub last_updated_at: Option<DateTime<Utc>>,
    /// Kind-specific fields
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl LocalResourceState {
    /// Creates an empty document of `kind` with the given id
    pub fn new(kind: ResourceKind, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            self_link: None,
            name: None,
            endpoint_link: None,
            tenant_links: BTreeSet::new(),
            resource_pool_link: None,
            parent_link: None,
            group_links: BTreeSet::new(),
            tag_links: BTreeSet::new(),
            last_updated_at: None,
            properties: Map::new(),
        }
    }

    /// Creates an empty patch document of `kind`
    ///
    /// The id is left empty because patches address documents by self link.
    pub fn patch(kind: ResourceKind) -> Self {
        Self::new(kind, String::new())
    }

    pub fn with_self_link(mut self, link: SelfLink) -> Self {
        self.self_link = Some(link);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_endpoint_link(mut self, link: SelfLink) -> Self {
        self.endpoint_link = Some(link);
        self
    }

    pub fn with_resource_pool_link(mut self, link: SelfLink) -> Self {
        self.resource_pool_link = Some(link);
        self
    }

    pub fn with_parent_link(mut self, link: SelfLink) -> Self {
        self.parent_link = Some(link);
        self
    }

    pub fn with_tenant_links(mut self, links: impl IntoIterator<Item = SelfLink>) -> Self {
        self.tenant_links.extend(links);
        self
    }

    pub fn with_group_link(mut self, link: SelfLink) -> Self {
        self.group_links.insert(link);
        self
    }

    /// Serializes `payload` into `properties`, replacing keys it sets
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPayload` if `payload` does not serialize
    /// to a JSON object.
    pub fn with_payload<T: Serialize>(mut self, payload: &T) -> Result<Self, DomainError> {
        match serde_json::to_value(payload) {
            Ok(Value::Object(map)) => {
                self.properties.extend(map);
                Ok(self)
            }
            Ok(other) => Err(DomainError::InvalidPayload(format!(
                "expected an object for {}, got {}",
                self.kind, other
            ))),
            Err(e) => Err(DomainError::InvalidPayload(e.to_string())),
        }
    }

    /// Decodes `properties` as the typed payload `T`
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPayload` if the properties do not match `T`.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, DomainError> {
        serde_json::from_value(Value::Object(self.properties.clone()))
            .map_err(|e| DomainError::InvalidPayload(format!("{} {}: {e}", self.kind, self.id)))
    }

    /// Self link of a persisted document
    ///
    /// # Errors
    /// Returns `DomainError::MissingField` if the document was never persisted.
    pub fn require_self_link(&self) -> Result<&SelfLink, DomainError> {
        self.self_link.as_ref().ok_or_else(|| DomainError::MissingField {
            kind: self.kind.to_string(),
            field: "self_link".to_string(),
        })
    }

    /// Applies `patch` with store merge semantics
    ///
    /// - `id`, `kind` and `self_link` never change
    /// - optional scalar fields are overwritten only when set on the patch
    /// - link sets are unioned, so tag links are additive
    /// - properties are merged key by key
    pub fn merge_patch(&mut self, patch: &LocalResourceState) {
        if let Some(name) = &patch.name {
            self.name = Some(name.clone());
        }
        if let Some(link) = &patch.endpoint_link {
            self.endpoint_link = Some(link.clone());
        }
        if let Some(link) = &patch.resource_pool_link {
            self.resource_pool_link = Some(link.clone());
        }
        if let Some(link) = &patch.parent_link {
            self.parent_link = Some(link.clone());
        }
        self.tenant_links.extend(patch.tenant_links.iter().cloned());
        self.group_links.extend(patch.group_links.iter().cloned());
        self.tag_links.extend(patch.tag_links.iter().cloned());
        for (key, value) in &patch.properties {
            self.properties.insert(key.clone(), value.clone());
        }
    }
}
