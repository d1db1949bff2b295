//! Reconciliation engine
//!
//! The [`Reconciler`] drives one enumeration cycle of one adapter against the
//! local resource store.
//!
//! ## Cycle Flow
//!
//! 1. **Dispatch**: `START` seeds the cycle timestamp, `REFRESH` runs the
//!    pass, `STOP` finishes immediately. Mock requests finish without I/O.
//! 2. **Per page**: fetch, match ids against the store, patch matched
//!    resources, create new ones.
//! 3. **Reap**: delete local documents not written since the cycle started
//!    and not seen on any page.
//!
//! Per-resource failures are logged and counted; only fetch and query
//! failures abort the cycle. The cancellation token is checked before every
//! sub-stage, so a stop request lets dispatched writes finish and starts no
//! new ones.

use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cloudmirror_core::config::EnumerationConfig;
use cloudmirror_core::domain::{
    CycleCompletion, CycleStats, CycleStatus, EnumerationAction, EnumerationRequest,
    LocalResourceState, SelfLink,
};
use cloudmirror_core::ports::{ICompletionSink, IResourceStore, ResourceQuery, StoreError};
use cloudmirror_telemetry::MetricsRegistry;

use crate::adapter::{CompanionWrite, EnumerationAdapter, LocalStateBuild, MirrorPlan};
use crate::context::EnumerationContext;
use crate::reaper::StalenessReaper;
use crate::stage::SubStage;
use crate::tags::TagReconciler;
use crate::ReconcileError;

// ============================================================================
// UpsertOutcome
// ============================================================================

/// Result of reconciling one remote resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpsertOutcome {
    Created,
    Updated,
    Skipped,
    Failed,
}

impl UpsertOutcome {
    fn operation(self, existed: bool) -> &'static str {
        if existed {
            "update"
        } else {
            "create"
        }
    }

    fn status(self) -> &'static str {
        match self {
            UpsertOutcome::Created | UpsertOutcome::Updated => "success",
            UpsertOutcome::Skipped => "skipped",
            UpsertOutcome::Failed => "failure",
        }
    }
}

// ============================================================================
// Reconciler
// ============================================================================

/// Drives enumeration cycles for any [`EnumerationAdapter`]
pub struct Reconciler {
    store: Arc<dyn IResourceStore>,
    config: EnumerationConfig,
    metrics: Option<Arc<MetricsRegistry>>,
    cancel: CancellationToken,
}

impl Reconciler {
    pub fn new(store: Arc<dyn IResourceStore>, config: EnumerationConfig) -> Self {
        Self {
            store,
            config,
            metrics: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Uses `token` to stop the cycle before its next sub-stage
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &EnumerationConfig {
        &self.config
    }

    /// Runs one invocation and returns the cycle counters
    ///
    /// # Errors
    /// Returns [`ReconcileError`] when the request is invalid or a remote
    /// fetch or local query fails.
    pub async fn run<A: EnumerationAdapter>(
        &self,
        request: EnumerationRequest,
        adapter: &A,
    ) -> Result<CycleStats, ReconcileError> {
        let mut ctx = EnumerationContext::new(request);
        self.dispatch(&mut ctx, adapter).await?;
        Ok(ctx.stats)
    }

    /// Runs one invocation and reports it to `sink` exactly once
    pub async fn execute<A: EnumerationAdapter>(
        &self,
        request: EnumerationRequest,
        adapter: &A,
        sink: &dyn ICompletionSink,
    ) -> CycleCompletion {
        let mut ctx = EnumerationContext::new(request);
        let status = match self.dispatch(&mut ctx, adapter).await {
            Ok(()) => CycleStatus::Finished,
            Err(e) => {
                warn!(
                    endpoint = %ctx.request().endpoint_link,
                    error = %e,
                    "Enumeration cycle failed"
                );
                CycleStatus::Error(e.to_string())
            }
        };

        let completion = CycleCompletion {
            endpoint_link: ctx.request().endpoint_link.clone(),
            task_link: ctx.request().task_link.clone(),
            status,
            stats: ctx.stats,
            started_at: ctx.started_at(),
            finished_at: Utc::now(),
        };
        self.record_cycle(&completion);

        if let Err(e) = sink.complete(&completion).await {
            warn!(error = %e, "Failed to deliver cycle completion");
        }
        completion
    }

    /// Dispatches on the request action
    ///
    /// # Errors
    /// See [`Reconciler::run`].
    pub async fn dispatch<A: EnumerationAdapter>(
        &self,
        ctx: &mut EnumerationContext<A::Remote>,
        adapter: &A,
    ) -> Result<(), ReconcileError> {
        ctx.request().validate()?;

        if ctx.request().is_mock_request {
            debug!(endpoint = %ctx.request().endpoint_link, "Mock request, skipping enumeration");
            ctx.sub_stage = SubStage::Finished;
            return Ok(());
        }

        match ctx.request().action {
            EnumerationAction::Start => {
                ctx.seed_started_at(Utc::now());
                self.refresh(ctx, adapter).await
            }
            EnumerationAction::Refresh => self.refresh(ctx, adapter).await,
            EnumerationAction::Stop => {
                info!(endpoint = %ctx.request().endpoint_link, "Enumeration stopped");
                ctx.sub_stage = SubStage::Finished;
                Ok(())
            }
        }
    }

    /// Drives the sub-stage machine until it finishes
    ///
    /// Seeds the cycle timestamp when the caller has not.
    ///
    /// # Errors
    /// Returns [`ReconcileError::Fetch`] or [`ReconcileError::Query`].
    #[tracing::instrument(skip_all, fields(endpoint = %ctx.request().endpoint_link, provider = adapter.provider()))]
    pub async fn refresh<A: EnumerationAdapter>(
        &self,
        ctx: &mut EnumerationContext<A::Remote>,
        adapter: &A,
    ) -> Result<(), ReconcileError> {
        let started_at = ctx.seed_started_at(Utc::now());
        let tags = TagReconciler::new(Arc::clone(&self.store));
        info!(%started_at, "Enumeration cycle started");

        while !ctx.sub_stage.is_terminal() {
            if self.cancel.is_cancelled() {
                info!(
                    stage = %ctx.sub_stage.label_for(adapter.resource_noun()),
                    "Enumeration cancelled"
                );
                ctx.sub_stage = SubStage::Finished;
                break;
            }

            debug!(stage = %ctx.sub_stage.label_for(adapter.resource_noun()), "Entering stage");
            match ctx.sub_stage {
                SubStage::ListRemote => self.list_remote(ctx, adapter).await?,
                SubStage::QueryLocal => self.query_local(ctx, adapter).await?,
                SubStage::UpdateLocal => {
                    let ids = ctx.matched_ids();
                    self.upsert(ctx, adapter, &tags, ids).await;
                }
                SubStage::CreateLocal => {
                    let ids = ctx.new_ids();
                    self.upsert(ctx, adapter, &tags, ids).await;
                }
                SubStage::DeleteLocal => self.delete_local(ctx, adapter).await?,
                SubStage::Finished => {}
            }
            ctx.sub_stage = ctx.sub_stage.next(&ctx.page_facts());
        }

        let stats = ctx.stats;
        info!(
            pages = stats.pages,
            fetched = stats.fetched,
            created = stats.created,
            updated = stats.updated,
            skipped = stats.skipped,
            deleted = stats.deleted,
            failed = stats.failed,
            malformed = stats.malformed,
            "Enumeration cycle finished"
        );
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Sub-stages
    // ------------------------------------------------------------------------

    async fn list_remote<A: EnumerationAdapter>(
        &self,
        ctx: &mut EnumerationContext<A::Remote>,
        adapter: &A,
    ) -> Result<(), ReconcileError> {
        ctx.clear_page();
        let page = adapter
            .fetch_page(ctx.next_page_cursor())
            .await
            .map_err(ReconcileError::Fetch)?;

        if let Some(metrics) = &self.metrics {
            metrics.record_remote_page(adapter.provider(), page.malformed);
        }
        debug!(
            resources = page.resources.len(),
            malformed = page.malformed,
            last = page.is_last(),
            "Fetched remote page"
        );
        ctx.absorb_page(page);
        Ok(())
    }

    async fn query_local<A: EnumerationAdapter>(
        &self,
        ctx: &mut EnumerationContext<A::Remote>,
        adapter: &A,
    ) -> Result<(), ReconcileError> {
        if ctx.remote_resources.is_empty() {
            return Ok(());
        }
        let ids: Vec<String> = ctx.remote_resources.keys().cloned().collect();
        let query = self
            .scope_query(ctx.request(), adapter)
            .with_limit(ids.len().max(self.config.page_size));

        let matched = self
            .store
            .get_by_ids(&query, &ids)
            .await
            .map_err(ReconcileError::Query)?;
        debug!(matched = matched.len(), page = ids.len(), "Matched local resources");
        ctx.local_resource_states = matched;
        Ok(())
    }

    async fn delete_local<A: EnumerationAdapter>(
        &self,
        ctx: &mut EnumerationContext<A::Remote>,
        adapter: &A,
    ) -> Result<(), ReconcileError> {
        let Some(started_at) = ctx.started_at() else {
            return Ok(());
        };
        let query = self
            .scope_query(ctx.request(), adapter)
            .with_updated_before(started_at)
            .with_limit(self.config.delete_batch_size);

        let outcome = StalenessReaper::new(Arc::clone(&self.store))
            .reap(&query, ctx.seen_remote_ids(), |candidate| {
                adapter.owned_links(candidate)
            })
            .await
            .map_err(ReconcileError::Query)?;

        ctx.stats.deleted += outcome.deleted;
        ctx.stats.failed += outcome.failed;
        if let Some(metrics) = &self.metrics {
            for _ in 0..outcome.deleted {
                metrics.record_reconcile_operation("delete", "success");
            }
            for _ in 0..outcome.failed {
                metrics.record_reconcile_operation("delete", "failure");
            }
        }
        info!(
            deleted = outcome.deleted,
            failed = outcome.failed,
            protected = outcome.protected,
            "Stale resources reaped"
        );
        Ok(())
    }

    /// Base query for the adapter's kind within the request scope
    fn scope_query<A: EnumerationAdapter>(
        &self,
        request: &EnumerationRequest,
        adapter: &A,
    ) -> ResourceQuery {
        adapter.customize_query(
            ResourceQuery::new(adapter.kind())
                .with_endpoint_link(request.endpoint_link.clone())
                .with_tenant_links(request.tenant_links.iter().cloned()),
        )
    }

    // ------------------------------------------------------------------------
    // Upsert
    // ------------------------------------------------------------------------

    async fn upsert<A: EnumerationAdapter>(
        &self,
        ctx: &mut EnumerationContext<A::Remote>,
        adapter: &A,
        tags: &TagReconciler,
        ids: Vec<String>,
    ) {
        let outcomes = {
            let request = ctx.request();
            let tasks = ids.iter().filter_map(|id| {
                let remote = ctx.remote_resources.get(id)?;
                let existing = ctx.local_resource_states.get(id);
                Some(async move {
                    let outcome = self
                        .upsert_one(adapter, request, tags, id, remote, existing)
                        .await;
                    (outcome, existing.is_some())
                })
            });
            join_all(tasks).await
        };

        for (outcome, existed) in outcomes {
            match outcome {
                UpsertOutcome::Created => ctx.stats.created += 1,
                UpsertOutcome::Updated => ctx.stats.updated += 1,
                UpsertOutcome::Skipped => ctx.stats.skipped += 1,
                UpsertOutcome::Failed => ctx.stats.failed += 1,
            }
            if let Some(metrics) = &self.metrics {
                metrics.record_reconcile_operation(outcome.operation(existed), outcome.status());
            }
        }
    }

    async fn upsert_one<A: EnumerationAdapter>(
        &self,
        adapter: &A,
        request: &EnumerationRequest,
        tags: &TagReconciler,
        id: &str,
        remote: &A::Remote,
        existing: Option<&LocalResourceState>,
    ) -> UpsertOutcome {
        match self
            .try_upsert(adapter, request, tags, id, remote, existing)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(id, error = %format!("{e:#}"), "Failed to reconcile resource");
                UpsertOutcome::Failed
            }
        }
    }

    async fn try_upsert<A: EnumerationAdapter>(
        &self,
        adapter: &A,
        request: &EnumerationRequest,
        tags: &TagReconciler,
        id: &str,
        remote: &A::Remote,
        existing: Option<&LocalResourceState>,
    ) -> anyhow::Result<UpsertOutcome> {
        let MirrorPlan {
            mut state,
            tags: remote_tags,
            companions,
        } = match adapter.build_local_state(remote, existing).await? {
            LocalStateBuild::Skip => {
                debug!(id, "Skipping remote resource");
                return Ok(UpsertOutcome::Skipped);
            }
            LocalStateBuild::Mirror(plan) => plan,
        };

        if self.config.reconcile_tags && !remote_tags.is_empty() {
            let links = tags.ensure_tags(&remote_tags, &request.tenant_links).await?;
            state.tag_links.extend(links);
        }

        let mut writes = Vec::with_capacity(companions.len() + 1);
        match existing {
            Some(existing) => {
                state.self_link = Some(existing.require_self_link()?.clone());
                writes.push(CompanionWrite::Patch(state));
                writes.extend(companions);
            }
            None => {
                state.id = id.to_string();
                apply_request_scope(&mut state, request);
                writes.push(CompanionWrite::Create(state));
                writes.extend(companions.into_iter().map(|companion| match companion {
                    CompanionWrite::Create(mut c) => {
                        apply_request_scope(&mut c, request);
                        CompanionWrite::Create(c)
                    }
                    patch => patch,
                }));
            }
        }

        let results = self.apply_writes(&writes).await;

        let mut primary_conflict = false;
        let mut created_companions = Vec::new();
        for (index, (write, result)) in writes.iter().zip(results).enumerate() {
            match result {
                Ok(stored) => {
                    if index > 0 && matches!(write, CompanionWrite::Create(_)) {
                        created_companions.extend(stored.self_link);
                    }
                }
                Err(e) if StoreError::is_already_exists(&e) => {
                    debug!(id, write = index, "Create conflict, document already present");
                    primary_conflict |= index == 0;
                }
                Err(e) => return Err(e),
            }
        }

        if existing.is_none() && primary_conflict {
            self.discard_companions(id, &created_companions).await;
        }

        Ok(match (existing, primary_conflict) {
            (None, false) => UpsertOutcome::Created,
            _ => UpsertOutcome::Updated,
        })
    }

    /// Deletes companions created alongside a primary that already existed
    ///
    /// The existing primary keeps pointing at its own companions, so the
    /// fresh ones would be orphans.
    async fn discard_companions(&self, id: &str, links: &[SelfLink]) {
        for link in links {
            match self.store.delete(link).await {
                Ok(()) => debug!(id, companion = %link, "Discarded orphaned companion"),
                Err(e) if StoreError::is_not_found(&e) => {}
                Err(e) => warn!(
                    id,
                    companion = %link,
                    error = %format!("{e:#}"),
                    "Failed to discard orphaned companion"
                ),
            }
        }
    }

    /// Issues every write concurrently and joins them in order
    async fn apply_writes(
        &self,
        writes: &[CompanionWrite],
    ) -> Vec<anyhow::Result<LocalResourceState>> {
        join_all(writes.iter().map(|write| self.apply_write(write))).await
    }

    async fn apply_write(&self, write: &CompanionWrite) -> anyhow::Result<LocalResourceState> {
        match write {
            CompanionWrite::Create(state) => self.store.create(state).await,
            CompanionWrite::Patch(state) => {
                let link = state.require_self_link()?;
                self.store.patch(link, state).await
            }
        }
    }

    fn record_cycle(&self, completion: &CycleCompletion) {
        if let Some(metrics) = &self.metrics {
            metrics.record_cycle(
                completion.status.label(),
                completion.duration_ms() as f64 / 1000.0,
            );
        }
    }
}

/// Fills unset scope fields of a new document from the request
fn apply_request_scope(state: &mut LocalResourceState, request: &EnumerationRequest) {
    if state.tenant_links.is_empty() {
        state.tenant_links = request.tenant_links.iter().cloned().collect();
    }
    if state.endpoint_link.is_none() {
        state.endpoint_link = Some(request.endpoint_link.clone());
    }
    if state.resource_pool_link.is_none() {
        state.resource_pool_link = Some(request.resource_pool_link.clone());
    }
}
