//! Enumeration request
//!
//! Caller-supplied description of one enumeration cycle for one endpoint.

use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::SelfLink;

/// What the caller wants the enumeration to do
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EnumerationAction {
    /// Seed a new cycle timestamp, then refresh
    #[default]
    Start,
    /// Run the list/match/upsert/delete pass
    Refresh,
    /// Finish immediately; an in-flight cycle stops before its next stage
    Stop,
}

impl std::fmt::Display for EnumerationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnumerationAction::Start => write!(f, "START"),
            EnumerationAction::Refresh => write!(f, "REFRESH"),
            EnumerationAction::Stop => write!(f, "STOP"),
        }
    }
}

/// Per-cycle enumeration request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumerationRequest {
    /// Endpoint (compute host) whose resources are enumerated
    pub endpoint_link: SelfLink,
    /// Tenant scope assigned to newly created resources
    #[serde(default)]
    pub tenant_links: Vec<SelfLink>,
    /// Resource pool new resources are placed in; also scopes deletion
    pub resource_pool_link: SelfLink,
    /// Overrides the region derived from the endpoint's zone
    #[serde(default)]
    pub region_override: Option<String>,
    #[serde(default)]
    pub action: EnumerationAction,
    /// Completes successfully without any store or network activity
    #[serde(default)]
    pub is_mock_request: bool,
    /// Caller task to report completion against
    #[serde(default)]
    pub task_link: Option<SelfLink>,
}

impl EnumerationRequest {
    /// Creates a `START` request for the given endpoint and pool
    pub fn new(endpoint_link: SelfLink, resource_pool_link: SelfLink) -> Self {
        Self {
            endpoint_link,
            tenant_links: Vec::new(),
            resource_pool_link,
            region_override: None,
            action: EnumerationAction::Start,
            is_mock_request: false,
            task_link: None,
        }
    }

    pub fn with_action(mut self, action: EnumerationAction) -> Self {
        self.action = action;
        self
    }

    pub fn with_tenant_links(mut self, links: impl IntoIterator<Item = SelfLink>) -> Self {
        self.tenant_links.extend(links);
        self
    }

    pub fn with_region_override(mut self, region: impl Into<String>) -> Self {
        self.region_override = Some(region.into());
        self
    }

    pub fn with_task_link(mut self, link: SelfLink) -> Self {
        self.task_link = Some(link);
        self
    }

    pub fn mock(mut self) -> Self {
        self.is_mock_request = true;
        self
    }

    /// Checks the request before any I/O is attempted
    ///
    /// # Errors
    /// Returns `DomainError::InvalidRequest` for a blank region override or
    /// duplicated tenant links.
    pub fn validate(&self) -> Result<(), DomainError> {
        if let Some(region) = &self.region_override {
            if region.trim().is_empty() {
                return Err(DomainError::InvalidRequest(
                    "region_override must not be blank".to_string(),
                ));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for tenant in &self.tenant_links {
            if !seen.insert(tenant) {
                return Err(DomainError::InvalidRequest(format!(
                    "duplicate tenant link {tenant}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> EnumerationRequest {
        EnumerationRequest::new(
            SelfLink::new("/resources/endpoints/gcp-1").unwrap(),
            SelfLink::new("/resources/pools/default").unwrap(),
        )
    }

    #[test]
    fn test_defaults() {
        let req = request();
        assert_eq!(req.action, EnumerationAction::Start);
        assert!(!req.is_mock_request);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_blank_region_override_rejected() {
        let req = request().with_region_override("  ");
        assert!(matches!(req.validate(), Err(DomainError::InvalidRequest(_))));
    }

    #[test]
    fn test_duplicate_tenants_rejected() {
        let t = SelfLink::new("/tenants/t1").unwrap();
        let req = request().with_tenant_links([t.clone(), t]);
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let req: EnumerationRequest = serde_json::from_str(
            r#"{"endpoint_link":"/resources/endpoints/e","resource_pool_link":"/resources/pools/p","action":"REFRESH"}"#,
        )
        .unwrap();
        assert_eq!(req.action, EnumerationAction::Refresh);
        assert!(req.tenant_links.is_empty());
        assert!(req.task_link.is_none());
    }

    #[test]
    fn test_action_display() {
        assert_eq!(EnumerationAction::Stop.to_string(), "STOP");
    }
}
