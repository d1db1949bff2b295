//! Endpoint-level enumeration service
//!
//! [`GcpEnumerationService`] resolves everything one cycle needs from the
//! local store (endpoint description, credentials, project group), builds a
//! [`GcpComputeClient`] and hands the instance adapter to the
//! [`Reconciler`].
//!
//! ## Stage Flow
//!
//! ```text
//! HostDesc -> ParentAuth -> ResourceGroup -> Client -> Enumerate -> Finished
//!     \___________\______________\____________\___________\-------> Error
//! ```
//!
//! Every invocation reports to the completion sink exactly once. A `STOP`
//! request cancels the in-flight cycle of the same endpoint.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cloudmirror_core::config::{Config, EnumerationConfig, RemoteConfig};
use cloudmirror_core::domain::{
    AuthCredentials, CycleCompletion, CycleStats, CycleStatus, DomainError, EndpointDescription,
    EnumerationAction, EnumerationRequest, LocalResourceState, ResourceKind, SelfLink,
};
use cloudmirror_core::ports::{ICompletionSink, IResourceStore, StoreError};
use cloudmirror_sync::Reconciler;
use cloudmirror_telemetry::MetricsRegistry;

use crate::adapter::GcpInstanceAdapter;
use crate::client::GcpComputeClient;
use crate::EnumerationError;

// ============================================================================
// Stage
// ============================================================================

/// Top-level stage of an endpoint enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Load the endpoint description
    HostDesc,
    /// Load the endpoint credentials
    ParentAuth,
    /// Ensure the project resource group exists
    ResourceGroup,
    /// Build the Compute Engine client
    Client,
    /// Run the reconciliation cycle
    Enumerate,
    Finished,
    Error,
}

impl Stage {
    /// Stage after the current one completes with `succeeded`
    ///
    /// Terminal stages never move.
    pub fn next(self, succeeded: bool) -> Stage {
        match (self, succeeded) {
            (Stage::Finished, _) => Stage::Finished,
            (_, false) => Stage::Error,
            (Stage::HostDesc, true) => Stage::ParentAuth,
            (Stage::ParentAuth, true) => Stage::ResourceGroup,
            (Stage::ResourceGroup, true) => Stage::Client,
            (Stage::Client, true) => Stage::Enumerate,
            (Stage::Enumerate, true) => Stage::Finished,
            (Stage::Error, true) => Stage::Error,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Finished | Stage::Error)
    }

    pub fn label(self) -> &'static str {
        match self {
            Stage::HostDesc => "HOSTDESC",
            Stage::ParentAuth => "PARENTAUTH",
            Stage::ResourceGroup => "RESOURCE_GROUP",
            Stage::Client => "CLIENT",
            Stage::Enumerate => "ENUMERATE",
            Stage::Finished => "FINISHED",
            Stage::Error => "ERROR",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Resolved endpoint facts carried between stages
struct EndpointContext {
    project: String,
    zone: String,
    access_token: String,
    group_link: SelfLink,
}

/// Link of the resource group holding a project's resources
///
/// # Errors
/// Returns `DomainError::InvalidLink` for an empty or `/`-containing project.
pub fn project_group_link(project: &str) -> Result<SelfLink, DomainError> {
    SelfLink::for_name(ResourceKind::ResourceGroup, &format!("gcp-project-{project}"))
}

// ============================================================================
// GcpEnumerationService
// ============================================================================

/// Runs Compute Engine enumeration cycles for any number of endpoints
pub struct GcpEnumerationService {
    store: Arc<dyn IResourceStore>,
    enumeration: EnumerationConfig,
    remote: RemoteConfig,
    metrics: Option<Arc<MetricsRegistry>>,
    base_url: Option<String>,
    shutdown: CancellationToken,
    /// In-flight cycle per endpoint, tagged with a generation number
    cycles: DashMap<SelfLink, (u64, CancellationToken)>,
    generation: AtomicU64,
}

impl GcpEnumerationService {
    pub fn new(store: Arc<dyn IResourceStore>, config: &Config) -> Self {
        Self {
            store,
            enumeration: config.enumeration.clone(),
            remote: config.remote.clone(),
            metrics: None,
            base_url: None,
            shutdown: CancellationToken::new(),
            cycles: DashMap::new(),
            generation: AtomicU64::new(0),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Overrides the Compute Engine base URL (useful for testing)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Stops every in-flight cycle when `token` is cancelled
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Number of cycles currently running
    pub fn in_flight(&self) -> usize {
        self.cycles.len()
    }

    /// Runs one invocation for `request.endpoint_link`
    ///
    /// Always returns the completion that was delivered to `sink`.
    #[tracing::instrument(
        skip(self, request, sink),
        fields(endpoint = %request.endpoint_link, action = %request.action)
    )]
    pub async fn enumerate(
        &self,
        request: EnumerationRequest,
        sink: &dyn ICompletionSink,
    ) -> CycleCompletion {
        if let Err(e) = request.validate() {
            return self
                .finish(&request, Err(EnumerationError::InvalidRequest(e)), sink)
                .await;
        }
        if request.is_mock_request {
            debug!("Mock request, completing without enumeration");
            return self.finish(&request, Ok(()), sink).await;
        }
        if request.action == EnumerationAction::Stop {
            self.stop(&request.endpoint_link);
            return self.finish(&request, Ok(()), sink).await;
        }

        let mut stage = Stage::HostDesc;
        let endpoint = match self.prepare(&request, &mut stage).await {
            Ok(endpoint) => endpoint,
            Err(e) => {
                warn!(stage = %stage, error = %e, "Enumeration aborted");
                return self.finish(&request, Err(e), sink).await;
            }
        };

        stage = stage.next(true);
        let client = match self.build_client(&endpoint) {
            Ok(client) => client,
            Err(e) => {
                warn!(stage = %stage, error = %e, "Enumeration aborted");
                return self.finish(&request, Err(e), sink).await;
            }
        };

        stage = stage.next(true);
        debug!(stage = %stage, project = %endpoint.project, zone = %endpoint.zone, "Enumerating");
        let adapter = GcpInstanceAdapter::new(client, &request, self.enumeration.page_size)
            .with_group_link(endpoint.group_link);

        let (generation, token) = self.register(&request.endpoint_link);
        let mut reconciler = Reconciler::new(Arc::clone(&self.store), self.enumeration.clone())
            .with_cancellation(token);
        if let Some(metrics) = &self.metrics {
            reconciler = reconciler.with_metrics(Arc::clone(metrics));
        }
        let completion = reconciler.execute(request.clone(), &adapter, sink).await;
        self.unregister(&request.endpoint_link, generation);

        stage = stage.next(completion.status.is_finished());
        info!(
            stage = %stage,
            created = completion.stats.created,
            updated = completion.stats.updated,
            deleted = completion.stats.deleted,
            duration_ms = completion.duration_ms(),
            "Endpoint enumeration complete"
        );
        completion
    }

    /// Cancels the in-flight cycle of `endpoint`, if any
    pub fn stop(&self, endpoint: &SelfLink) -> bool {
        match self.cycles.get(endpoint) {
            Some(entry) => {
                entry.value().1.cancel();
                info!(endpoint = %endpoint, "Stop requested for in-flight cycle");
                true
            }
            None => {
                debug!(endpoint = %endpoint, "Stop requested, no cycle in flight");
                false
            }
        }
    }

    // ------------------------------------------------------------------------
    // Stages
    // ------------------------------------------------------------------------

    /// Runs `HostDesc`, `ParentAuth` and `ResourceGroup`
    ///
    /// Leaves `stage` at the stage that failed, or at `ResourceGroup`.
    async fn prepare(
        &self,
        request: &EnumerationRequest,
        stage: &mut Stage,
    ) -> Result<EndpointContext, EnumerationError> {
        let endpoint_link = &request.endpoint_link;

        let host = self.load_host(endpoint_link).await?;
        let project = host.project_id.clone().ok_or_else(|| DomainError::MissingField {
            kind: ResourceKind::Endpoint.to_string(),
            field: "project_id".to_string(),
        })?;
        let zone = host
            .zone_id
            .clone()
            .ok_or_else(|| EnumerationError::MissingZone(endpoint_link.clone()))?;
        let auth_link = host.auth_credentials_link.clone().ok_or_else(|| {
            EnumerationError::MissingCredentials {
                endpoint: endpoint_link.clone(),
                reason: "no auth credentials link".to_string(),
            }
        })?;

        *stage = stage.next(true);
        let access_token = self.load_access_token(endpoint_link, &auth_link).await?;

        *stage = stage.next(true);
        let group_link = self.ensure_project_group(request, &project).await?;

        Ok(EndpointContext {
            project,
            zone,
            access_token,
            group_link,
        })
    }

    async fn load_host(&self, endpoint_link: &SelfLink) -> Result<EndpointDescription, EnumerationError> {
        let document = self
            .store
            .get(endpoint_link)
            .await
            .map_err(EnumerationError::Client)?
            .ok_or_else(|| EnumerationError::MissingEndpoint(endpoint_link.clone()))?;
        Ok(document.payload::<EndpointDescription>()?)
    }

    async fn load_access_token(
        &self,
        endpoint_link: &SelfLink,
        auth_link: &SelfLink,
    ) -> Result<String, EnumerationError> {
        let missing = |reason: &str| EnumerationError::MissingCredentials {
            endpoint: endpoint_link.clone(),
            reason: reason.to_string(),
        };

        let document = self
            .store
            .get(auth_link)
            .await
            .map_err(EnumerationError::Client)?
            .ok_or_else(|| missing("credentials document not found"))?;
        let credentials = document.payload::<AuthCredentials>()?;
        credentials
            .access_token
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| missing("no access token"))
    }

    /// Creates the project group document unless it already exists
    async fn ensure_project_group(
        &self,
        request: &EnumerationRequest,
        project: &str,
    ) -> Result<SelfLink, EnumerationError> {
        let link = project_group_link(project)?;
        let group = LocalResourceState::new(ResourceKind::ResourceGroup, project)
            .with_self_link(link.clone())
            .with_name(project)
            .with_endpoint_link(request.endpoint_link.clone())
            .with_tenant_links(request.tenant_links.iter().cloned());

        match self.store.create(&group).await {
            Ok(_) => {
                info!(group = %link, "Created project resource group");
                Ok(link)
            }
            Err(e) if StoreError::is_already_exists(&e) => Ok(link),
            Err(e) => Err(EnumerationError::Client(
                e.context(format!("Failed to ensure resource group {link}")),
            )),
        }
    }

    fn build_client(&self, endpoint: &EndpointContext) -> Result<GcpComputeClient, EnumerationError> {
        let base_url = self
            .base_url
            .clone()
            .unwrap_or_else(|| self.remote.base_url.clone());
        GcpComputeClient::with_base_url(
            endpoint.access_token.clone(),
            endpoint.project.clone(),
            endpoint.zone.clone(),
            &self.remote,
            base_url,
        )
        .map_err(EnumerationError::Client)
    }

    // ------------------------------------------------------------------------
    // Bookkeeping
    // ------------------------------------------------------------------------

    fn register(&self, endpoint: &SelfLink) -> (u64, CancellationToken) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let token = self.shutdown.child_token();
        self.cycles
            .insert(endpoint.clone(), (generation, token.clone()));
        (generation, token)
    }

    fn unregister(&self, endpoint: &SelfLink, generation: u64) {
        self.cycles
            .remove_if(endpoint, |_, (current, _)| *current == generation);
    }

    /// Builds the completion for an invocation that never reached the engine
    async fn finish(
        &self,
        request: &EnumerationRequest,
        result: Result<(), EnumerationError>,
        sink: &dyn ICompletionSink,
    ) -> CycleCompletion {
        let status = match result {
            Ok(()) => CycleStatus::Finished,
            Err(e) => CycleStatus::Error(e.to_string()),
        };
        let completion = CycleCompletion {
            endpoint_link: request.endpoint_link.clone(),
            task_link: request.task_link.clone(),
            status,
            stats: CycleStats::default(),
            started_at: None,
            finished_at: Utc::now(),
        };
        if let Some(metrics) = &self.metrics {
            metrics.record_cycle(completion.status.label(), 0.0);
        }
        if let Err(e) = sink.complete(&completion).await {
            warn!(error = %e, "Failed to deliver cycle completion");
        }
        completion
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_happy_path() {
        let mut stage = Stage::HostDesc;
        let mut seen = vec![stage];
        while !stage.is_terminal() {
            stage = stage.next(true);
            seen.push(stage);
        }
        assert_eq!(
            seen,
            [
                Stage::HostDesc,
                Stage::ParentAuth,
                Stage::ResourceGroup,
                Stage::Client,
                Stage::Enumerate,
                Stage::Finished
            ]
        );
    }

    #[test]
    fn test_stage_failure_goes_to_error() {
        for stage in [
            Stage::HostDesc,
            Stage::ParentAuth,
            Stage::ResourceGroup,
            Stage::Client,
            Stage::Enumerate,
        ] {
            assert_eq!(stage.next(false), Stage::Error);
        }
        assert_eq!(Stage::Error.next(true), Stage::Error);
        assert_eq!(Stage::Finished.next(false), Stage::Finished);
    }

    #[test]
    fn test_stage_labels() {
        assert_eq!(Stage::HostDesc.to_string(), "HOSTDESC");
        assert_eq!(Stage::ResourceGroup.label(), "RESOURCE_GROUP");
        assert!(Stage::Error.is_terminal());
        assert!(!Stage::Enumerate.is_terminal());
    }

    #[test]
    fn test_project_group_link() {
        assert_eq!(
            project_group_link("demo-123").unwrap().as_str(),
            "/resources/groups/gcp-project-demo-123"
        );
        assert!(project_group_link("a/b").is_err());
    }
}
