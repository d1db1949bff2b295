//! In-memory implementation of IResourceStore
//!
//! Documents live in a `DashMap` keyed by self link. Filtering reuses
//! [`ResourceQuery::matches`], and pagination uses the same keyset scheme as
//! the SQLite store so both backends page identically.

use std::collections::HashMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use dashmap::DashMap;

use cloudmirror_core::domain::{LocalResourceState, SelfLink};
use cloudmirror_core::ports::{IResourceStore, QueryPage, ResourceQuery, StoreError};

use crate::CacheError;

/// Concurrent in-memory document store
#[derive(Default)]
pub struct MemoryResourceStore {
    documents: DashMap<SelfLink, LocalResourceState>,
}

impl MemoryResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Matching documents sorted by self link
    fn select(&self, query: &ResourceQuery) -> Vec<LocalResourceState> {
        let mut selected: Vec<LocalResourceState> = self
            .documents
            .iter()
            .filter(|entry| query.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        selected.sort_by(|a, b| a.self_link.cmp(&b.self_link));
        selected
    }

    fn conflicts_with(&self, state: &LocalResourceState) -> bool {
        let Some(endpoint) = &state.endpoint_link else {
            return false;
        };
        self.documents.iter().any(|entry| {
            let doc = entry.value();
            doc.kind == state.kind && doc.id == state.id && doc.endpoint_link.as_ref() == Some(endpoint)
        })
    }
}

#[async_trait::async_trait]
impl IResourceStore for MemoryResourceStore {
    async fn get(&self, self_link: &SelfLink) -> anyhow::Result<Option<LocalResourceState>> {
        Ok(self.documents.get(self_link).map(|doc| doc.value().clone()))
    }

    async fn get_by_ids(
        &self,
        scope: &ResourceQuery,
        ids: &[String],
    ) -> anyhow::Result<HashMap<String, LocalResourceState>> {
        Ok(self
            .select(scope)
            .into_iter()
            .filter(|doc| ids.contains(&doc.id))
            .take(scope.limit)
            .map(|doc| (doc.id.clone(), doc))
            .collect())
    }

    async fn create(&self, state: &LocalResourceState) -> anyhow::Result<LocalResourceState> {
        let mut stored = state.clone();
        let self_link = stored
            .self_link
            .get_or_insert_with(|| SelfLink::generate(state.kind))
            .clone();
        stored.last_updated_at = Some(Utc::now());

        if self.conflicts_with(&stored) {
            return Err(StoreError::AlreadyExists(self_link.to_string()).into());
        }
        match self.documents.entry(self_link) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                Err(StoreError::AlreadyExists(entry.key().to_string()).into())
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(stored.clone());
                Ok(stored)
            }
        }
    }

    async fn patch(
        &self,
        self_link: &SelfLink,
        partial: &LocalResourceState,
    ) -> anyhow::Result<LocalResourceState> {
        let mut doc = self
            .documents
            .get_mut(self_link)
            .ok_or_else(|| StoreError::NotFound(self_link.to_string()))?;
        doc.merge_patch(partial);
        doc.last_updated_at = Some(Utc::now());
        Ok(doc.value().clone())
    }

    async fn delete(&self, self_link: &SelfLink) -> anyhow::Result<()> {
        self.documents
            .remove(self_link)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(self_link.to_string()).into())
    }

    async fn query_page(
        &self,
        query: &ResourceQuery,
        page_link: Option<&str>,
    ) -> anyhow::Result<QueryPage> {
        let after = page_link
            .map(|link| {
                URL_SAFE_NO_PAD
                    .decode(link)
                    .ok()
                    .and_then(|bytes| String::from_utf8(bytes).ok())
                    .ok_or_else(|| {
                        CacheError::SerializationError(format!("Invalid page link: {}", link))
                    })
            })
            .transpose()?;

        let mut remaining = self
            .select(query)
            .into_iter()
            .filter(|doc| match (&after, &doc.self_link) {
                (Some(after), Some(link)) => link.as_str() > after.as_str(),
                _ => true,
            })
            .peekable();

        let documents: Vec<LocalResourceState> = remaining.by_ref().take(query.limit).collect();
        let next_page_link = if remaining.peek().is_some() {
            documents
                .last()
                .and_then(|doc| doc.self_link.as_ref())
                .map(|link| URL_SAFE_NO_PAD.encode(link.as_str()))
        } else {
            None
        };

        Ok(QueryPage {
            documents,
            next_page_link,
        })
    }
}

#[cfg(test)]
mod tests {
    use cloudmirror_core::domain::ResourceKind;

    use super::*;

    fn link(s: &str) -> SelfLink {
        SelfLink::new(s).unwrap()
    }

    fn vm(id: &str) -> LocalResourceState {
        LocalResourceState::new(ResourceKind::ComputeState, id)
            .with_endpoint_link(link("/resources/endpoints/e1"))
    }

    #[tokio::test]
    async fn test_create_assigns_link_and_timestamp() {
        let store = MemoryResourceStore::new();
        let created = store.create(&vm("1")).await.unwrap();

        assert!(created.self_link.is_some());
        assert!(created.last_updated_at.is_some());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_endpoint_id_conflicts() {
        let store = MemoryResourceStore::new();
        store.create(&vm("1")).await.unwrap();

        let err = store.create(&vm("1")).await.unwrap_err();
        assert!(StoreError::is_already_exists(&err));

        let tag = LocalResourceState::new(ResourceKind::Tag, "t").with_self_link(link("/resources/tags/t"));
        store.create(&tag).await.unwrap();
        let err = store.create(&tag).await.unwrap_err();
        assert!(StoreError::is_already_exists(&err));
    }

    #[tokio::test]
    async fn test_patch_and_delete_missing() {
        let store = MemoryResourceStore::new();
        let missing = link("/resources/compute/none");

        let err = store
            .patch(&missing, &LocalResourceState::patch(ResourceKind::ComputeState))
            .await
            .unwrap_err();
        assert!(StoreError::is_not_found(&err));
        assert!(StoreError::is_not_found(&store.delete(&missing).await.unwrap_err()));
    }

    #[tokio::test]
    async fn test_pagination_survives_deletes() {
        let store = MemoryResourceStore::new();
        for i in 0..5 {
            store.create(&vm(&i.to_string())).await.unwrap();
        }
        let query = ResourceQuery::new(ResourceKind::ComputeState).with_limit(2);

        let mut seen = Vec::new();
        let mut page_link: Option<String> = None;
        loop {
            let page = store.query_page(&query, page_link.as_deref()).await.unwrap();
            for doc in &page.documents {
                seen.push(doc.id.clone());
                store.delete(doc.self_link.as_ref().unwrap()).await.unwrap();
            }
            match page.next_page_link {
                Some(next) => page_link = Some(next),
                None => break,
            }
        }

        seen.sort();
        assert_eq!(seen, ["0", "1", "2", "3", "4"]);
        assert!(store.is_empty());
    }
}
