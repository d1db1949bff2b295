//! Adapter seam between the generic engine and a concrete provider
//!
//! A provider supplies paginated listing through [`IRemoteSource`] and
//! describes how each remote descriptor maps to local documents. The engine
//! owns every store write.

use cloudmirror_core::domain::{LocalResourceState, ResourceKind, SelfLink};
use cloudmirror_core::ports::{IRemoteSource, ResourceQuery};

/// A record written alongside the primary state of a resource
#[derive(Debug, Clone, PartialEq)]
pub enum CompanionWrite {
    /// Created when the primary is created; must carry its own self link
    Create(LocalResourceState),
    /// Partial update applied to the document at the state's self link
    Patch(LocalResourceState),
}

impl CompanionWrite {
    pub fn state(&self) -> &LocalResourceState {
        match self {
            CompanionWrite::Create(state) | CompanionWrite::Patch(state) => state,
        }
    }
}

/// Local documents to write for one remote resource
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorPlan {
    /// Primary document, or the partial update when a local state exists
    pub state: LocalResourceState,
    /// Remote `(key, value)` tags to attach to the primary
    pub tags: Vec<(String, String)>,
    pub companions: Vec<CompanionWrite>,
}

impl MirrorPlan {
    pub fn new(state: LocalResourceState) -> Self {
        Self {
            state,
            tags: Vec::new(),
            companions: Vec::new(),
        }
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = (String, String)>) -> Self {
        self.tags.extend(tags);
        self
    }

    pub fn with_companion(mut self, companion: CompanionWrite) -> Self {
        self.companions.push(companion);
        self
    }
}

/// Outcome of [`EnumerationAdapter::build_local_state`]
#[derive(Debug, Clone, PartialEq)]
pub enum LocalStateBuild {
    /// Leave this remote resource unmirrored
    Skip,
    Mirror(MirrorPlan),
}

/// Provider callbacks used by the [`Reconciler`](crate::engine::Reconciler)
#[async_trait::async_trait]
pub trait EnumerationAdapter: IRemoteSource {
    /// Kind of the primary documents this adapter mirrors
    fn kind(&self) -> ResourceKind;

    /// Provider name used in logs and metrics
    fn provider(&self) -> &'static str;

    /// Upper-case noun qualifying sub-stage labels in logs
    fn resource_noun(&self) -> &'static str {
        "RESOURCES"
    }

    /// Builds the documents for `remote`
    ///
    /// `existing` is the matched local state, if any. When it is present the
    /// returned plan is applied as a patch, so only changed fields need to be
    /// set.
    async fn build_local_state(
        &self,
        remote: &Self::Remote,
        existing: Option<&LocalResourceState>,
    ) -> anyhow::Result<LocalStateBuild>;

    /// Narrows the match and staleness queries
    fn customize_query(&self, query: ResourceQuery) -> ResourceQuery {
        query
    }

    /// Documents owned by `candidate` that are deleted along with it
    fn owned_links(&self, _candidate: &LocalResourceState) -> Vec<SelfLink> {
        Vec::new()
    }
}
