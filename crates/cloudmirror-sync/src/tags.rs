//! Idempotent tag creation
//!
//! Tags are content-addressed, so the reconciler can attach a tag link
//! without first looking the tag up. The first create of a link in a cycle
//! goes to the store; later requests for the same link are served from the
//! per-cycle cache.

use std::sync::Arc;

use anyhow::Context;
use dashmap::DashSet;
use tracing::debug;

use cloudmirror_core::domain::{SelfLink, TagState};
use cloudmirror_core::ports::{IResourceStore, StoreError};

/// Creates tag documents and returns their links
pub struct TagReconciler {
    store: Arc<dyn IResourceStore>,
    known: DashSet<SelfLink>,
}

impl TagReconciler {
    pub fn new(store: Arc<dyn IResourceStore>) -> Self {
        Self {
            store,
            known: DashSet::new(),
        }
    }

    /// Ensures every `(key, value)` pair exists as a tag in `tenant_links`
    ///
    /// A store conflict means the tag already exists and is not an error.
    ///
    /// # Errors
    /// Returns an error for an invalid tag or any other store failure.
    pub async fn ensure_tags(
        &self,
        tags: &[(String, String)],
        tenant_links: &[SelfLink],
    ) -> anyhow::Result<Vec<SelfLink>> {
        let mut links = Vec::with_capacity(tags.len());
        for (key, value) in tags {
            let tag = TagState::new(key.as_str(), value.as_str(), tenant_links.iter().cloned())?;
            links.push(self.ensure(&tag).await?);
        }
        Ok(links)
    }

    async fn ensure(&self, tag: &TagState) -> anyhow::Result<SelfLink> {
        let link = tag.self_link();
        if self.known.contains(&link) {
            return Ok(link);
        }

        match self.store.create(&tag.to_resource_state()).await {
            Ok(_) => debug!(tag = %link, key = %tag.key(), "Created tag"),
            Err(e) if StoreError::is_already_exists(&e) => {
                debug!(tag = %link, "Tag already exists")
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to create tag {}", tag.key()));
            }
        }

        self.known.insert(link.clone());
        Ok(link)
    }

    /// Number of distinct tag links seen so far
    pub fn known_count(&self) -> usize {
        self.known.len()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use cloudmirror_core::domain::LocalResourceState;
    use cloudmirror_core::ports::{QueryPage, ResourceQuery};
    use tokio::sync::Mutex;

    use super::*;

    /// Records creates and rejects duplicates like a real store
    #[derive(Default)]
    struct RecordingStore {
        created: Mutex<Vec<SelfLink>>,
    }

    #[async_trait]
    impl IResourceStore for RecordingStore {
        async fn get(&self, _: &SelfLink) -> anyhow::Result<Option<LocalResourceState>> {
            Ok(None)
        }

        async fn get_by_ids(
            &self,
            _: &ResourceQuery,
            _: &[String],
        ) -> anyhow::Result<HashMap<String, LocalResourceState>> {
            Ok(HashMap::new())
        }

        async fn create(&self, state: &LocalResourceState) -> anyhow::Result<LocalResourceState> {
            let link = state.require_self_link()?.clone();
            let mut created = self.created.lock().await;
            if created.contains(&link) {
                return Err(StoreError::AlreadyExists(link.to_string()).into());
            }
            created.push(link);
            Ok(state.clone())
        }

        async fn patch(
            &self,
            _: &SelfLink,
            partial: &LocalResourceState,
        ) -> anyhow::Result<LocalResourceState> {
            Ok(partial.clone())
        }

        async fn delete(&self, _: &SelfLink) -> anyhow::Result<()> {
            Ok(())
        }

        async fn query_page(&self, _: &ResourceQuery, _: Option<&str>) -> anyhow::Result<QueryPage> {
            Ok(QueryPage::default())
        }
    }

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_same_tag_created_once_per_cycle() {
        let store = Arc::new(RecordingStore::default());
        let reconciler = TagReconciler::new(store.clone());
        let tenants = vec![SelfLink::new("/tenants/t1").unwrap()];

        let first = reconciler
            .ensure_tags(&pairs(&[("env", "prod")]), &tenants)
            .await
            .unwrap();
        let second = reconciler
            .ensure_tags(&pairs(&[("env", "prod"), ("team", "infra")]), &tenants)
            .await
            .unwrap();

        assert_eq!(first[0], second[0]);
        assert_eq!(store.created.lock().await.len(), 2);
        assert_eq!(reconciler.known_count(), 2);
    }

    #[tokio::test]
    async fn test_existing_tag_is_not_an_error() {
        let store = Arc::new(RecordingStore::default());
        let tags = pairs(&[("env", "prod")]);

        // Two cycles share the store but not the cache
        let a = TagReconciler::new(store.clone()).ensure_tags(&tags, &[]).await.unwrap();
        let b = TagReconciler::new(store.clone()).ensure_tags(&tags, &[]).await.unwrap();

        assert_eq!(a, b);
        assert_eq!(store.created.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_blank_key_is_rejected() {
        let reconciler = TagReconciler::new(Arc::new(RecordingStore::default()));
        let result = reconciler.ensure_tags(&pairs(&[(" ", "x")]), &[]).await;
        assert!(result.is_err());
    }
}
