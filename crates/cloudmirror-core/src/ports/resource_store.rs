//! Resource store port (driven/secondary port)
//!
//! This module defines the interface for persisting and querying local
//! resource documents.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because storage errors are adapter-specific.
//!   Adapters wrap a [`StoreError`] when the caller needs to classify the
//!   failure (a duplicate create is benign during reconciliation).
//! - The `ResourceQuery` struct provides a composable filter without
//!   exposing storage implementation details.
//! - Pagination is keyset-based and stable while documents are deleted.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::domain::{LocalResourceState, ResourceKind, SelfLink};

// ============================================================================
// StoreError
// ============================================================================

/// Classified store failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// A document with the same self link or `(kind, endpoint, id)` exists
    #[error("Document already exists: {0}")]
    AlreadyExists(String),

    /// The addressed document does not exist
    #[error("Document not found: {0}")]
    NotFound(String),

    /// Any other backend failure
    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Returns true when `err` wraps [`StoreError::AlreadyExists`]
    pub fn is_already_exists(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::AlreadyExists(_))
        )
    }

    /// Returns true when `err` wraps [`StoreError::NotFound`]
    pub fn is_not_found(err: &anyhow::Error) -> bool {
        matches!(err.downcast_ref::<StoreError>(), Some(StoreError::NotFound(_)))
    }
}

// ============================================================================
// ResourceQuery
// ============================================================================

/// Default number of documents per query page
pub const DEFAULT_QUERY_LIMIT: usize = 100;

/// Filter criteria for querying resource documents
///
/// `kind` is mandatory; every other field is optional and combined with AND
/// logic. Tenant scope matches when any of the query's tenants is on the
/// document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceQuery {
    pub kind: ResourceKind,
    pub endpoint_link: Option<SelfLink>,
    pub tenant_links: Vec<SelfLink>,
    pub resource_pool_link: Option<SelfLink>,
    pub parent_link: Option<SelfLink>,
    /// Only documents last written strictly before this instant
    pub updated_before: Option<DateTime<Utc>>,
    /// Maximum documents per page
    pub limit: usize,
}

impl ResourceQuery {
    /// Creates a query matching every document of `kind`
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            endpoint_link: None,
            tenant_links: Vec::new(),
            resource_pool_link: None,
            parent_link: None,
            updated_before: None,
            limit: DEFAULT_QUERY_LIMIT,
        }
    }

    pub fn with_endpoint_link(mut self, link: SelfLink) -> Self {
        self.endpoint_link = Some(link);
        self
    }

    pub fn with_tenant_links(mut self, links: impl IntoIterator<Item = SelfLink>) -> Self {
        self.tenant_links.extend(links);
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

    pub fn with_updated_before(mut self, cutoff: DateTime<Utc>) -> Self {
        self.updated_before = Some(cutoff);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }

    /// Evaluates every filter except `limit` against `state`
    ///
    /// Stores that filter in memory use this directly; SQL stores translate
    /// the same predicate.
    pub fn matches(&self, state: &LocalResourceState) -> bool {
        if state.kind != self.kind {
            return false;
        }
        if let Some(endpoint) = &self.endpoint_link {
            if state.endpoint_link.as_ref() != Some(endpoint) {
                return false;
            }
        }
        if !self.tenant_links.is_empty()
            && !self
                .tenant_links
                .iter()
                .any(|tenant| state.tenant_links.contains(tenant))
        {
            return false;
        }
        if let Some(pool) = &self.resource_pool_link {
            if state.resource_pool_link.as_ref() != Some(pool) {
                return false;
            }
        }
        if let Some(parent) = &self.parent_link {
            if state.parent_link.as_ref() != Some(parent) {
                return false;
            }
        }
        if let Some(cutoff) = self.updated_before {
            match state.last_updated_at {
                Some(updated) if updated < cutoff => {}
                _ => return false,
            }
        }
        true
    }
}

/// One page of query results
#[derive(Debug, Clone, Default)]
pub struct QueryPage {
    pub documents: Vec<LocalResourceState>,
    /// Opaque link to the next page; `None` when exhausted
    pub next_page_link: Option<String>,
}

// ============================================================================
// IResourceStore trait
// ============================================================================

/// Port trait for the local resource document store
///
/// ## Implementation Notes
///
/// - `create` assigns a self link when the document has none, and stamps
///   `last_updated_at`. Duplicates fail with [`StoreError::AlreadyExists`].
/// - `patch` applies [`LocalResourceState::merge_patch`] and stamps
///   `last_updated_at`; a missing target fails with [`StoreError::NotFound`].
/// - `last_updated_at` must be non-decreasing across writes, since the
///   staleness reaper compares it against the cycle start.
#[async_trait::async_trait]
pub trait IResourceStore: Send + Sync {
    /// Point lookup by self link
    async fn get(&self, self_link: &SelfLink) -> Result<Option<LocalResourceState>>;

    /// Batched lookup of documents in `scope` whose id is in `ids`
    ///
    /// The result is keyed by id and holds at most `scope.limit` entries.
    async fn get_by_ids(
        &self,
        scope: &ResourceQuery,
        ids: &[String],
    ) -> Result<HashMap<String, LocalResourceState>>;

    /// Persists a new document and returns it as stored
    async fn create(&self, state: &LocalResourceState) -> Result<LocalResourceState>;

    /// Merges `partial` into the document at `self_link` and returns the result
    async fn patch(
        &self,
        self_link: &SelfLink,
        partial: &LocalResourceState,
    ) -> Result<LocalResourceState>;

    /// Deletes the document at `self_link`
    async fn delete(&self, self_link: &SelfLink) -> Result<()>;

    /// Returns one page of documents matching `query`, ordered by self link
    ///
    /// Pass the previous page's `next_page_link` to continue.
    async fn query_page(&self, query: &ResourceQuery, page_link: Option<&str>)
        -> Result<QueryPage>;
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn link(s: &str) -> SelfLink {
        SelfLink::new(s).unwrap()
    }

    fn vm() -> LocalResourceState {
        let mut state = LocalResourceState::new(ResourceKind::ComputeState, "1")
            .with_endpoint_link(link("/resources/endpoints/e1"))
            .with_resource_pool_link(link("/resources/pools/p1"))
            .with_parent_link(link("/resources/compute/host"))
            .with_tenant_links([link("/tenants/t1")]);
        state.last_updated_at = Some(Utc::now() - Duration::hours(1));
        state
    }

    #[test]
    fn test_matches_kind_and_scope() {
        let state = vm();
        let query = ResourceQuery::new(ResourceKind::ComputeState)
            .with_endpoint_link(link("/resources/endpoints/e1"))
            .with_tenant_links([link("/tenants/other"), link("/tenants/t1")]);
        assert!(query.matches(&state));

        assert!(!ResourceQuery::new(ResourceKind::Disk).matches(&state));
        assert!(!ResourceQuery::new(ResourceKind::ComputeState)
            .with_endpoint_link(link("/resources/endpoints/e2"))
            .matches(&state));
        assert!(!ResourceQuery::new(ResourceKind::ComputeState)
            .with_tenant_links([link("/tenants/t2")])
            .matches(&state));
    }

    #[test]
    fn test_matches_pool_and_parent() {
        let state = vm();
        assert!(ResourceQuery::new(ResourceKind::ComputeState)
            .with_resource_pool_link(link("/resources/pools/p1"))
            .with_parent_link(link("/resources/compute/host"))
            .matches(&state));
        assert!(!ResourceQuery::new(ResourceKind::ComputeState)
            .with_parent_link(link("/resources/compute/other"))
            .matches(&state));
    }

    #[test]
    fn test_matches_updated_before_is_strict() {
        let state = vm();
        let updated = state.last_updated_at.unwrap();

        assert!(ResourceQuery::new(ResourceKind::ComputeState)
            .with_updated_before(updated + Duration::seconds(1))
            .matches(&state));
        assert!(!ResourceQuery::new(ResourceKind::ComputeState)
            .with_updated_before(updated)
            .matches(&state));

        let mut never_written = vm();
        never_written.last_updated_at = None;
        assert!(!ResourceQuery::new(ResourceKind::ComputeState)
            .with_updated_before(Utc::now())
            .matches(&never_written));
    }

    #[test]
    fn test_limit_is_at_least_one() {
        assert_eq!(ResourceQuery::new(ResourceKind::Tag).with_limit(0).limit, 1);
        assert_eq!(ResourceQuery::new(ResourceKind::Tag).limit, DEFAULT_QUERY_LIMIT);
    }

    #[test]
    fn test_store_error_classification() {
        let err: anyhow::Error = StoreError::AlreadyExists("/resources/tags/x".into()).into();
        assert!(StoreError::is_already_exists(&err));
        assert!(!StoreError::is_not_found(&err));

        let wrapped = anyhow::Error::from(StoreError::NotFound("x".into())).context("patching");
        assert!(StoreError::is_not_found(&wrapped));

        let other = anyhow::anyhow!("boom");
        assert!(!StoreError::is_already_exists(&other));
    }
}
