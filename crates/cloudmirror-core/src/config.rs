//! Configuration module for cloudmirror.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{EnumerationAction, EnumerationRequest, SelfLink};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for cloudmirror.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub enumeration: EnumerationConfig,
    pub remote: RemoteConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
    /// Endpoints enumerated by the daemon on every poll.
    pub targets: Vec<EnumerationTarget>,
}

/// Reconciliation engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnumerationConfig {
    /// Remote resources requested per page; also bounds the local match query.
    pub page_size: usize,
    /// Seconds between enumeration cycles in daemon mode.
    pub poll_interval_secs: u64,
    /// Whether remote labels are reconciled into tag documents.
    pub reconcile_tags: bool,
    /// Candidates fetched per staleness query page.
    pub delete_batch_size: usize,
}

/// Remote provider HTTP settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the provider REST API.
    pub base_url: String,
    /// Per-call timeout for ordinary requests, in seconds.
    pub request_timeout_secs: u64,
    /// Per-call timeout for listing requests, in seconds. Listing large
    /// projects is slow, so this is much larger than the default.
    pub list_timeout_secs: u64,
}

/// Which resource store backend to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Memory,
}

/// Resource store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Path to the SQLite database file.
    pub database_path: PathBuf,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Output format: `pretty` or `json`.
    pub format: String,
}

/// Prometheus metrics settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Address the `/metrics` endpoint binds to.
    pub endpoint: String,
}

/// One endpoint to enumerate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumerationTarget {
    pub endpoint_link: SelfLink,
    pub resource_pool_link: SelfLink,
    #[serde(default)]
    pub tenant_links: Vec<SelfLink>,
    #[serde(default)]
    pub region_override: Option<String>,
}

impl EnumerationTarget {
    /// Builds the enumeration request for one cycle of this target.
    pub fn to_request(&self, action: EnumerationAction) -> EnumerationRequest {
        let mut request =
            EnumerationRequest::new(self.endpoint_link.clone(), self.resource_pool_link.clone())
                .with_action(action)
                .with_tenant_links(self.tenant_links.iter().cloned());
        request.region_override = self.region_override.clone();
        request
    }
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/cloudmirror/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("cloudmirror")
            .join("config.yaml")
    }
}

impl RemoteConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn list_timeout(&self) -> Duration {
        Duration::from_secs(self.list_timeout_secs)
    }
}

impl EnumerationConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for EnumerationConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            poll_interval_secs: 300,
            reconcile_tags: true,
            delete_batch_size: 100,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://compute.googleapis.com/compute/v1".to_string(),
            request_timeout_secs: 30,
            list_timeout_secs: 300,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            database_path: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("~/.local/share"))
                .join("cloudmirror")
                .join("resources.db"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "127.0.0.1:9187".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"enumeration.page_size"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Valid values for `logging.format`.
const VALID_LOG_FORMATS: &[&str] = &["pretty", "json"];

/// Upper bound on `enumeration.page_size`; providers cap list pages at 500.
const MAX_PAGE_SIZE: usize = 500;

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- enumeration ---
        if self.enumeration.page_size == 0 || self.enumeration.page_size > MAX_PAGE_SIZE {
            errors.push(ValidationError {
                field: "enumeration.page_size".into(),
                message: format!("must be in range 1..={MAX_PAGE_SIZE}"),
            });
        }
        if self.enumeration.poll_interval_secs == 0 {
            errors.push(ValidationError {
                field: "enumeration.poll_interval_secs".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.enumeration.delete_batch_size == 0 {
            errors.push(ValidationError {
                field: "enumeration.delete_batch_size".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- remote ---
        if !self.remote.base_url.starts_with("http://")
            && !self.remote.base_url.starts_with("https://")
        {
            errors.push(ValidationError {
                field: "remote.base_url".into(),
                message: format!("must be an http(s) URL, got '{}'", self.remote.base_url),
            });
        }
        if self.remote.request_timeout_secs == 0 {
            errors.push(ValidationError {
                field: "remote.request_timeout_secs".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.remote.list_timeout_secs < self.remote.request_timeout_secs {
            errors.push(ValidationError {
                field: "remote.list_timeout_secs".into(),
                message: format!(
                    "list_timeout_secs ({}) must not be below request_timeout_secs ({})",
                    self.remote.list_timeout_secs, self.remote.request_timeout_secs
                ),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }
        if !VALID_LOG_FORMATS.contains(&self.logging.format.as_str()) {
            errors.push(ValidationError {
                field: "logging.format".into(),
                message: format!(
                    "invalid format '{}'; valid options: {}",
                    self.logging.format,
                    VALID_LOG_FORMATS.join(", ")
                ),
            });
        }

        // --- metrics ---
        if self.metrics.enabled && self.metrics.endpoint.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError {
                field: "metrics.endpoint".into(),
                message: format!("not a socket address: '{}'", self.metrics.endpoint),
            });
        }

        // --- targets ---
        let mut seen = HashSet::new();
        for (index, target) in self.targets.iter().enumerate() {
            if !seen.insert(&target.endpoint_link) {
                errors.push(ValidationError {
                    field: format!("targets[{index}].endpoint_link"),
                    message: format!("duplicate endpoint '{}'", target.endpoint_link),
                });
            }
            if let Err(e) = target.to_request(EnumerationAction::Start).validate() {
                errors.push(ValidationError {
                    field: format!("targets[{index}]"),
                    message: e.to_string(),
                });
            }
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use cloudmirror_core::config::ConfigBuilder;
///
/// let config = ConfigBuilder::new()
///     .page_size(50)
///     .reconcile_tags(false)
///     .logging_level("debug")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- enumeration ---

    pub fn page_size(mut self, n: usize) -> Self {
        self.config.enumeration.page_size = n;
        self
    }

    pub fn poll_interval_secs(mut self, seconds: u64) -> Self {
        self.config.enumeration.poll_interval_secs = seconds;
        self
    }

    pub fn reconcile_tags(mut self, enabled: bool) -> Self {
        self.config.enumeration.reconcile_tags = enabled;
        self
    }

    pub fn delete_batch_size(mut self, n: usize) -> Self {
        self.config.enumeration.delete_batch_size = n;
        self
    }

    // --- remote ---

    pub fn remote_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.remote.base_url = url.into();
        self
    }

    pub fn request_timeout_secs(mut self, seconds: u64) -> Self {
        self.config.remote.request_timeout_secs = seconds;
        self
    }

    pub fn list_timeout_secs(mut self, seconds: u64) -> Self {
        self.config.remote.list_timeout_secs = seconds;
        self
    }

    // --- store ---

    pub fn store_backend(mut self, backend: StoreBackend) -> Self {
        self.config.store.backend = backend;
        self
    }

    pub fn database_path(mut self, path: PathBuf) -> Self {
        self.config.store.database_path = path;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_format(mut self, format: impl Into<String>) -> Self {
        self.config.logging.format = format.into();
        self
    }

    // --- metrics ---

    pub fn metrics_enabled(mut self, enabled: bool) -> Self {
        self.config.metrics.enabled = enabled;
        self
    }

    pub fn metrics_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.metrics.endpoint = endpoint.into();
        self
    }

    // --- targets ---

    pub fn target(mut self, target: EnumerationTarget) -> Self {
        self.config.targets.push(target);
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
