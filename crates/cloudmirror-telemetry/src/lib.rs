//! cloudmirror Telemetry - Observability
//!
//! Provides:
//! - `MetricsRegistry`: Prometheus counters and histograms for reconciliation
//! - `MetricsServer`: HTTP server for Prometheus scraping

pub mod metrics;
pub mod server;

pub use metrics::MetricsRegistry;
pub use server::MetricsServer;
