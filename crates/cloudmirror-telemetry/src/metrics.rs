//! Prometheus metrics registry for cloudmirror
//!
//! Provides typed, labeled counters and histograms for the reconciliation
//! engine and the remote sources feeding it.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Central metrics registry holding all Prometheus metrics.
pub struct MetricsRegistry {
    registry: Registry,
    /// Counter: per-resource reconcile operations by (operation, status)
    pub reconcile_operations_total: IntCounterVec,
    /// Counter: remote pages fetched by provider
    pub remote_pages_total: IntCounterVec,
    /// Counter: remote records dropped as malformed, by provider
    pub malformed_records_total: IntCounterVec,
    /// Counter: completed cycles by outcome (finished, error)
    pub cycles_total: IntCounterVec,
    /// Histogram: cycle duration in seconds by outcome
    pub cycle_duration_seconds: HistogramVec,
}

impl MetricsRegistry {
    /// Creates a new `MetricsRegistry` with all metrics registered.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new_custom(Some("cloudmirror".to_string()), None)?;

        let reconcile_operations_total = IntCounterVec::new(
            Opts::new(
                "reconcile_operations_total",
                "Per-resource reconcile operations",
            ),
            &["operation", "status"],
        )?;
        registry.register(Box::new(reconcile_operations_total.clone()))?;

        let remote_pages_total = IntCounterVec::new(
            Opts::new("remote_pages_total", "Remote listing pages fetched"),
            &["provider"],
        )?;
        registry.register(Box::new(remote_pages_total.clone()))?;

        let malformed_records_total = IntCounterVec::new(
            Opts::new(
                "malformed_records_total",
                "Remote records skipped because they could not be parsed",
            ),
            &["provider"],
        )?;
        registry.register(Box::new(malformed_records_total.clone()))?;

        let cycles_total = IntCounterVec::new(
            Opts::new("cycles_total", "Enumeration cycles by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(cycles_total.clone()))?;

        let cycle_duration_seconds = HistogramVec::new(
            HistogramOpts::new("cycle_duration_seconds", "Enumeration cycle duration in seconds")
                .buckets(vec![1.0, 10.0, 60.0, 300.0, 1800.0, f64::INFINITY]),
            &["outcome"],
        )?;
        registry.register(Box::new(cycle_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            reconcile_operations_total,
            remote_pages_total,
            malformed_records_total,
            cycles_total,
            cycle_duration_seconds,
        })
    }

    // ========================================================================
    // Recording helpers
    // ========================================================================

    /// Record a per-resource reconcile operation outcome.
    pub fn record_reconcile_operation(&self, operation: &str, status: &str) {
        self.reconcile_operations_total
            .with_label_values(&[operation, status])
            .inc();
    }

    /// Record a fetched remote page and its malformed record count.
    pub fn record_remote_page(&self, provider: &str, malformed: u64) {
        self.remote_pages_total.with_label_values(&[provider]).inc();
        if malformed > 0 {
            self.malformed_records_total
                .with_label_values(&[provider])
                .inc_by(malformed);
        }
    }

    /// Record a completed cycle.
    pub fn record_cycle(&self, outcome: &str, duration_secs: f64) {
        self.cycles_total.with_label_values(&[outcome]).inc();
        self.cycle_duration_seconds
            .with_label_values(&[outcome])
            .observe(duration_secs);
    }

    // ========================================================================
    // Encoding
    // ========================================================================

    /// Encode all metrics in Prometheus text exposition format.
    pub fn encode(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
