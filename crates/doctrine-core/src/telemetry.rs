//! Prometheus metrics for doctrine enforcement
//!
//! - `doctrine_enforcements_total` (counter) - enforcement outcomes by tool
//! - `doctrine_violations_total` (counter) - violations by schema kind and rule
//! - `doctrine_projections_total` (counter) - sink projections by sink
//! - `doctrine_validation_duration_seconds` (histogram) - validation latency by kind
//! - `doctrine_violation_log_size` (gauge) - entries currently held by the log
//!
//! # Example
//!
//! ```rust,no_run
//! use doctrine_core::telemetry::MetricsRegistry;
//!
//! let registry = MetricsRegistry::new().unwrap();
//! registry.metrics().record_enforcement("neon-sync", "validated");
//! let text = registry.encode_text().unwrap();
//! ```

use prometheus::{CounterVec, Gauge, HistogramOpts, HistogramVec, Opts, Registry};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Telemetry errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Metrics error: {0}")]
    MetricsError(#[from] prometheus::Error),

    #[error("Failed to encode metrics: {0}")]
    EncodingFailed(String),
}

pub type Result<T> = std::result::Result<T, TelemetryError>;

const NAMESPACE: &str = "doctrine";

/// Enforcement metrics
#[derive(Clone)]
pub struct DoctrineMetrics {
    /// Enforcement outcomes (by tool, outcome)
    enforcements_total: CounterVec,

    /// Recorded violations (by kind, rule)
    violations_total: CounterVec,

    /// Sink projections (by sink)
    projections_total: CounterVec,

    /// Validation duration in seconds (by kind)
    validation_duration_seconds: HistogramVec,

    /// Current violation log size
    violation_log_size: Gauge,
}

impl DoctrineMetrics {
    /// Create the metric set and register it with the provided registry
    pub fn new(registry: &Registry) -> Result<Self> {
        let enforcements_total = CounterVec::new(
            Opts::new("enforcements_total", "Total number of enforcement calls by outcome")
                .namespace(NAMESPACE),
            &["tool", "outcome"],
        )?;

        let violations_total = CounterVec::new(
            Opts::new("violations_total", "Total number of recorded contract violations")
                .namespace(NAMESPACE),
            &["kind", "rule"],
        )?;

        let projections_total = CounterVec::new(
            Opts::new("projections_total", "Total number of sink projections").namespace(NAMESPACE),
            &["sink"],
        )?;

        let validation_duration_seconds = HistogramVec::new(
            HistogramOpts::new("validation_duration_seconds", "Contract validation duration in seconds")
                .namespace(NAMESPACE)
                .buckets(vec![0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05]),
            &["kind"],
        )?;

        let violation_log_size = Gauge::with_opts(
            Opts::new("violation_log_size", "Number of entries in the violation log").namespace(NAMESPACE),
        )?;

        registry.register(Box::new(enforcements_total.clone()))?;
        registry.register(Box::new(violations_total.clone()))?;
        registry.register(Box::new(projections_total.clone()))?;
        registry.register(Box::new(validation_duration_seconds.clone()))?;
        registry.register(Box::new(violation_log_size.clone()))?;

        Ok(Self {
            enforcements_total,
            violations_total,
            projections_total,
            validation_duration_seconds,
            violation_log_size,
        })
    }

    /// Record an enforcement outcome (`validated`, `repaired`, `bypassed`, `rejected`)
    pub fn record_enforcement(&self, tool: &str, outcome: &str) {
        self.enforcements_total.with_label_values(&[tool, outcome]).inc();
    }

    pub fn record_violation(&self, kind: &str, rule: &str) {
        self.violations_total.with_label_values(&[kind, rule]).inc();
    }

    pub fn record_projection(&self, sink: &str) {
        self.projections_total.with_label_values(&[sink]).inc();
    }

    pub fn observe_validation(&self, kind: &str, duration_secs: f64) {
        self.validation_duration_seconds
            .with_label_values(&[kind])
            .observe(duration_secs);
    }

    pub fn set_log_size(&self, size: usize) {
        self.violation_log_size.set(size as f64);
    }

    /// Start a validation timer (records the duration on drop)
    pub fn start_timer(&self, kind: &str) -> ValidationTimer<'_> {
        ValidationTimer {
            start: Instant::now(),
            kind: kind.to_string(),
            metrics: self,
        }
    }
}

/// RAII guard for timing validations
pub struct ValidationTimer<'a> {
    start: Instant,
    kind: String,
    metrics: &'a DoctrineMetrics,
}

impl Drop for ValidationTimer<'_> {
    fn drop(&mut self) {
        self.metrics
            .observe_validation(&self.kind, self.start.elapsed().as_secs_f64());
    }
}

/// Registry holding the doctrine metrics
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Arc<Registry>,
    metrics: DoctrineMetrics,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        Self::with_registry(Arc::new(Registry::new()))
    }

    /// Register into an existing Prometheus registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let metrics = DoctrineMetrics::new(&registry)?;
        Ok(Self { registry, metrics })
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    pub fn metrics(&self) -> &DoctrineMetrics {
        &self.metrics
    }

    /// Encode metrics as text for scraping
    pub fn encode_text(&self) -> Result<String> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::EncodingFailed(e.to_string()))
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new().expect("Failed to create doctrine metrics registry")
    }
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry").finish_non_exhaustive()
    }
}
