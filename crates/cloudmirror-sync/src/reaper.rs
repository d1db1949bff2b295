//! Staleness reaper
//!
//! Deletes local documents that were not written since the cycle started and
//! whose remote id was not seen by any page of the cycle. Deletes are
//! spawned as they are discovered; the next query page is requested without
//! waiting for them. The handles are joined once pagination ends so the
//! cycle can report what was deleted.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use cloudmirror_core::domain::{LocalResourceState, SelfLink};
use cloudmirror_core::ports::{IResourceStore, ResourceQuery, StoreError};

/// Tally of one reaper pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapOutcome {
    pub deleted: u64,
    pub failed: u64,
    /// Stale candidates kept because their id was seen this cycle
    pub protected: u64,
}

pub struct StalenessReaper {
    store: Arc<dyn IResourceStore>,
}

impl StalenessReaper {
    pub fn new(store: Arc<dyn IResourceStore>) -> Self {
        Self { store }
    }

    /// Walks every page of `query` and deletes unseen candidates
    ///
    /// `owned_links` names the documents deleted along with a candidate.
    ///
    /// # Errors
    /// Returns an error when a query page cannot be read. Individual delete
    /// failures are logged and counted instead.
    pub async fn reap<F>(
        &self,
        query: &ResourceQuery,
        seen: &HashSet<String>,
        owned_links: F,
    ) -> anyhow::Result<ReapOutcome>
    where
        F: Fn(&LocalResourceState) -> Vec<SelfLink>,
    {
        let mut outcome = ReapOutcome::default();
        let mut handles: Vec<JoinHandle<anyhow::Result<()>>> = Vec::new();
        let mut page_link: Option<String> = None;

        loop {
            let page = self
                .store
                .query_page(query, page_link.as_deref())
                .await
                .context("Failed to query stale resources")?;

            if page.documents.is_empty() {
                break;
            }

            for candidate in page.documents {
                if seen.contains(&candidate.id) {
                    outcome.protected += 1;
                    continue;
                }
                let Some(self_link) = candidate.self_link.clone() else {
                    warn!(id = %candidate.id, "Stale resource has no self link");
                    outcome.failed += 1;
                    continue;
                };
                let owned = owned_links(&candidate);
                handles.push(tokio::spawn(delete_with_owned(
                    Arc::clone(&self.store),
                    self_link,
                    owned,
                )));
            }

            match page.next_page_link {
                Some(next) => page_link = Some(next),
                None => break,
            }
        }

        for handle in handles {
            match handle.await {
                Ok(Ok(())) => outcome.deleted += 1,
                Ok(Err(e)) => {
                    warn!(error = %format!("{e:#}"), "Failed to delete stale resource");
                    outcome.failed += 1;
                }
                Err(e) => {
                    warn!(error = %e, "Delete task panicked");
                    outcome.failed += 1;
                }
            }
        }

        Ok(outcome)
    }
}

async fn delete_with_owned(
    store: Arc<dyn IResourceStore>,
    self_link: SelfLink,
    owned: Vec<SelfLink>,
) -> anyhow::Result<()> {
    for link in owned {
        match store.delete(&link).await {
            Ok(()) => debug!(link = %link, owner = %self_link, "Deleted owned resource"),
            Err(e) if StoreError::is_not_found(&e) => {}
            Err(e) => warn!(link = %link, error = %e, "Failed to delete owned resource"),
        }
    }
    match store.delete(&self_link).await {
        Ok(()) => debug!(link = %self_link, "Deleted stale resource"),
        Err(e) if StoreError::is_not_found(&e) => {
            debug!(link = %self_link, "Stale resource already gone")
        }
        Err(e) => return Err(e).with_context(|| format!("Failed to delete {self_link}")),
    }
    Ok(())
}
