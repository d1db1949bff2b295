//! Per-cycle enumeration context
//!
//! Page-scoped maps are wiped before every fetch. The set of seen remote ids
//! lives for the whole cycle and only grows, so the staleness reaper can
//! protect an id no matter which page it arrived on.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};

use cloudmirror_core::domain::{CycleStats, EnumerationRequest, LocalResourceState};
use cloudmirror_core::ports::RemotePage;

use crate::stage::{PageFacts, SubStage};

/// Mutable state of one enumeration cycle
#[derive(Debug)]
pub struct EnumerationContext<D> {
    request: EnumerationRequest,
    started_at: Option<DateTime<Utc>>,
    next_page_cursor: Option<String>,
    /// Remote resources of the current page
    pub remote_resources: BTreeMap<String, D>,
    /// Local counterparts of the current page, keyed by remote id
    pub local_resource_states: HashMap<String, LocalResourceState>,
    seen_remote_ids: HashSet<String>,
    pub stats: CycleStats,
    pub sub_stage: SubStage,
}

impl<D> EnumerationContext<D> {
    pub fn new(request: EnumerationRequest) -> Self {
        Self {
            request,
            started_at: None,
            next_page_cursor: None,
            remote_resources: BTreeMap::new(),
            local_resource_states: HashMap::new(),
            seen_remote_ids: HashSet::new(),
            stats: CycleStats::default(),
            sub_stage: SubStage::ListRemote,
        }
    }

    pub fn request(&self) -> &EnumerationRequest {
        &self.request
    }

    /// Captures the cycle start; later calls keep the first value
    pub fn seed_started_at(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        *self.started_at.get_or_insert(now)
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn next_page_cursor(&self) -> Option<&str> {
        self.next_page_cursor.as_deref()
    }

    /// Wipes the page-scoped maps; the seen set is untouched
    pub fn clear_page(&mut self) {
        self.remote_resources.clear();
        self.local_resource_states.clear();
    }

    /// Merges a fetched page into the context
    pub fn absorb_page(&mut self, page: RemotePage<D>) {
        self.stats.pages += 1;
        self.stats.fetched += page.resources.len() as u64;
        self.stats.malformed += page.malformed;
        self.seen_remote_ids
            .extend(page.resources.keys().cloned());
        self.remote_resources.extend(page.resources);
        self.next_page_cursor = page.next_page_cursor;
    }

    pub fn is_seen(&self, id: &str) -> bool {
        self.seen_remote_ids.contains(id)
    }

    pub fn seen_remote_ids(&self) -> &HashSet<String> {
        &self.seen_remote_ids
    }

    /// Ids of the current page with a local counterpart
    pub fn matched_ids(&self) -> Vec<String> {
        self.remote_resources
            .keys()
            .filter(|id| self.local_resource_states.contains_key(*id))
            .cloned()
            .collect()
    }

    /// Ids of the current page without a local counterpart
    pub fn new_ids(&self) -> Vec<String> {
        self.remote_resources
            .keys()
            .filter(|id| !self.local_resource_states.contains_key(*id))
            .cloned()
            .collect()
    }

    /// Facts the sub-stage transition table decides on
    pub fn page_facts(&self) -> PageFacts {
        let matched = self
            .remote_resources
            .keys()
            .filter(|id| self.local_resource_states.contains_key(*id))
            .count();
        PageFacts {
            matched,
            new: self.remote_resources.len() - matched,
            has_next_page: self.next_page_cursor.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use cloudmirror_core::domain::{ResourceKind, SelfLink};

    use super::*;

    fn ctx() -> EnumerationContext<u32> {
        EnumerationContext::new(EnumerationRequest::new(
            SelfLink::new("/resources/endpoints/e1").unwrap(),
            SelfLink::new("/resources/pools/p1").unwrap(),
        ))
    }

    fn page(ids: &[&str], cursor: Option<&str>) -> RemotePage<u32> {
        RemotePage::new(
            ids.iter().map(|id| (id.to_string(), 0)),
            cursor.map(str::to_string),
        )
    }

    #[test]
    fn test_started_at_is_seeded_once() {
        let mut ctx = ctx();
        assert!(ctx.started_at().is_none());
        let first = Utc::now();
        ctx.seed_started_at(first);
        ctx.seed_started_at(first + chrono::Duration::seconds(5));
        assert_eq!(ctx.started_at(), Some(first));
    }

    #[test]
    fn test_seen_ids_survive_page_clear() {
        let mut ctx = ctx();
        ctx.absorb_page(page(&["a"], Some("p2")));
        assert_eq!(ctx.next_page_cursor(), Some("p2"));

        ctx.clear_page();
        assert!(ctx.remote_resources.is_empty());
        ctx.absorb_page(page(&["b"], None));

        assert!(ctx.is_seen("a"));
        assert!(ctx.is_seen("b"));
        assert_eq!(ctx.remote_resources.len(), 1);
        assert_eq!(ctx.next_page_cursor(), None);
        assert_eq!(ctx.stats.pages, 2);
        assert_eq!(ctx.stats.fetched, 2);
    }

    #[test]
    fn test_matched_and_new_ids() {
        let mut ctx = ctx();
        ctx.absorb_page(page(&["a", "b", "c"], Some("next")).with_malformed(1));
        ctx.local_resource_states.insert(
            "b".to_string(),
            LocalResourceState::new(ResourceKind::ComputeState, "b"),
        );

        assert_eq!(ctx.matched_ids(), vec!["b".to_string()]);
        assert_eq!(ctx.new_ids(), vec!["a".to_string(), "c".to_string()]);
        assert_eq!(
            ctx.page_facts(),
            PageFacts {
                matched: 1,
                new: 2,
                has_next_page: true
            }
        );
        assert_eq!(ctx.stats.malformed, 1);
    }
}
