//! cloudmirror Daemon - Background enumeration service
//!
//! This binary runs as a long-lived service and handles:
//! - Periodic enumeration of every configured target
//! - Optional Prometheus metrics endpoint
//! - Graceful shutdown on SIGTERM/SIGINT
//!
//! # Architecture
//!
//! The daemon opens the configured resource store, builds one
//! `GcpEnumerationService` and enters a loop that runs a `START` cycle for
//! each target on every tick. The loop and every in-flight cycle are
//! controlled by a `CancellationToken` triggered on SIGTERM or SIGINT.

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use cloudmirror_cache::{DatabasePool, MemoryResourceStore, SqliteResourceStore};
use cloudmirror_core::{
    config::{Config, StoreBackend, StoreConfig},
    domain::{CycleCompletion, CycleStatus, EnumerationAction},
    ports::{ICompletionSink, IResourceStore},
};
use cloudmirror_gcp::GcpEnumerationService;
use cloudmirror_telemetry::{MetricsRegistry, MetricsServer};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Command line
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "cloudmirrord", version, about = "Mirror cloud compute inventory locally")]
struct Args {
    /// Use alternate config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run one pass over all targets, then exit
    #[arg(long)]
    once: bool,

    /// Log output format (`pretty` or `json`), overrides `logging.format`
    #[arg(long)]
    log_format: Option<String>,
}

// ============================================================================
// Completion sink
// ============================================================================

/// Reports every cycle outcome to the log
struct LogCompletionSink;

#[async_trait::async_trait]
impl ICompletionSink for LogCompletionSink {
    async fn complete(&self, completion: &CycleCompletion) -> Result<()> {
        match &completion.status {
            CycleStatus::Finished => info!(
                endpoint = %completion.endpoint_link,
                created = completion.stats.created,
                updated = completion.stats.updated,
                deleted = completion.stats.deleted,
                failed = completion.stats.failed,
                duration_ms = completion.duration_ms(),
                "Cycle finished"
            ),
            CycleStatus::Error(reason) => warn!(
                endpoint = %completion.endpoint_link,
                %reason,
                "Cycle failed"
            ),
        }
        Ok(())
    }
}

// ============================================================================
// DaemonService
// ============================================================================

/// Owns the configuration, the enumeration service and the shutdown token
struct DaemonService {
    config: Config,
    service: GcpEnumerationService,
    metrics: Option<Arc<MetricsRegistry>>,
    shutdown: CancellationToken,
}

impl DaemonService {
    /// Opens the store and builds the enumeration service
    async fn new(config: Config, shutdown: CancellationToken) -> Result<Self> {
        let store = open_store(&config.store).await?;

        let metrics = if config.metrics.enabled {
            Some(Arc::new(
                MetricsRegistry::new().context("Failed to create metrics registry")?,
            ))
        } else {
            None
        };

        let mut service =
            GcpEnumerationService::new(store, &config).with_shutdown(shutdown.child_token());
        if let Some(metrics) = &metrics {
            service = service.with_metrics(Arc::clone(metrics));
        }

        Ok(Self {
            config,
            service,
            metrics,
            shutdown,
        })
    }

    /// Starts the metrics server in the background, if enabled
    fn spawn_metrics_server(&self) -> Result<()> {
        let Some(metrics) = &self.metrics else {
            return Ok(());
        };
        let server = MetricsServer::new(Arc::clone(metrics), &self.config.metrics.endpoint)
            .with_context(|| {
                format!("Invalid metrics endpoint {}", self.config.metrics.endpoint)
            })?;
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = server.run(shutdown).await {
                error!(error = %format!("{e:#}"), "Metrics server stopped");
            }
        });
        Ok(())
    }

    /// Runs one `START` cycle per target, one after another
    ///
    /// Returns the number of cycles that ended in error.
    async fn run_pass(&self) -> usize {
        let sink = LogCompletionSink;
        let mut failed = 0;
        for target in &self.config.targets {
            if self.shutdown.is_cancelled() {
                break;
            }
            let request = target.to_request(EnumerationAction::Start);
            let completion = self.service.enumerate(request, &sink).await;
            if !completion.status.is_finished() {
                failed += 1;
            }
        }
        failed
    }

    /// Main loop with periodic polling
    ///
    /// The first tick fires immediately.
    async fn run(&self, once: bool) -> Result<()> {
        if self.config.targets.is_empty() {
            warn!("No enumeration targets configured");
        }

        if once {
            let failed = self.run_pass().await;
            if failed > 0 {
                anyhow::bail!("{failed} enumeration cycle(s) failed");
            }
            return Ok(());
        }

        self.spawn_metrics_server()?;

        let poll = self.config.enumeration.poll_interval();
        info!(
            poll_interval_secs = poll.as_secs(),
            targets = self.config.targets.len(),
            "Starting enumeration loop"
        );
        let mut interval = tokio::time::interval(poll);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let failed = self.run_pass().await;
                    if failed > 0 {
                        warn!(failed, "Enumeration pass finished with errors");
                    }
                }
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        info!("Enumeration loop terminated");
        Ok(())
    }
}

/// Opens the resource store selected by `store.backend`
async fn open_store(store: &StoreConfig) -> Result<Arc<dyn IResourceStore>> {
    match store.backend {
        StoreBackend::Sqlite => {
            let pool = DatabasePool::new(&store.database_path)
                .await
                .with_context(|| {
                    format!("Failed to open database {}", store.database_path.display())
                })?;
            info!(path = %store.database_path.display(), "Opened SQLite resource store");
            Ok(Arc::new(SqliteResourceStore::new(pool.pool().clone())))
        }
        StoreBackend::Memory => {
            info!("Using in-memory resource store");
            Ok(Arc::new(MemoryResourceStore::new()))
        }
    }
}

/// Loads the config from `--config` or the default path and validates it
fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::load_or_default(&Config::default_path()),
    };
    if let Some(format) = &args.log_format {
        config.logging.format = format.clone();
    }

    let errors = config.validate();
    if !errors.is_empty() {
        let details: Vec<String> = errors.iter().map(ToString::to_string).collect();
        anyhow::bail!("Invalid configuration: {}", details.join("; "));
    }
    Ok(config)
}

/// Installs the global subscriber; `RUST_LOG` overrides `logging.level`
fn init_tracing(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    if config.logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}

// ============================================================================
// Graceful shutdown signal handler
// ============================================================================

/// Waits for SIGTERM or SIGINT and triggers the cancellation token
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

// ============================================================================
// Main entry point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    init_tracing(&config);

    info!("cloudmirror daemon starting (cloudmirrord)");

    let shutdown_token = CancellationToken::new();
    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    let daemon = DaemonService::new(config, shutdown_token).await?;
    let result = daemon.run(args.once).await;

    match &result {
        Ok(()) => info!("cloudmirror daemon shut down gracefully"),
        Err(e) => error!(error = %format!("{e:#}"), "cloudmirror daemon exiting with error"),
    }

    result
}

// ============================================================================
// Tests
// ============================================================================
