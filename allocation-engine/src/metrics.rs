//! Metrics collection for the allocation engine
//!
//! # Metrics
//!
//! - `allocation_transitions_total{from, to}` - Allocation status changes
//! - `allocation_check_runs_total{job, status}` - Periodic check outcomes
//! - `allocation_row_failures_total{job}` - Rows skipped because of data errors
//! - `allocation_settlements_total{outcome}` - Settlements by outcome
//! - `allocation_check_duration_seconds{job}` - Check latencies

use crate::types::AllocationStatus;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone, Debug)]
pub struct Metrics {
    /// Allocation status changes
    pub transitions_total: IntCounterVec,

    /// Periodic check outcomes ("ok", "failed", "skipped")
    pub check_runs_total: IntCounterVec,

    /// Rows skipped with a logged error
    pub row_failures_total: IntCounterVec,

    /// Settlements ("settled", "deferred")
    pub settlements_total: IntCounterVec,

    /// Check duration histogram
    pub check_duration: HistogramVec,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let transitions_total = IntCounterVec::new(
            Opts::new("allocation_transitions_total", "Allocation status changes"),
            &["from", "to"],
        )?;
        registry.register(Box::new(transitions_total.clone()))?;

        let check_runs_total = IntCounterVec::new(
            Opts::new("allocation_check_runs_total", "Periodic check runs by outcome"),
            &["job", "status"],
        )?;
        registry.register(Box::new(check_runs_total.clone()))?;

        let row_failures_total = IntCounterVec::new(
            Opts::new(
                "allocation_row_failures_total",
                "Rows skipped by a periodic check",
            ),
            &["job"],
        )?;
        registry.register(Box::new(row_failures_total.clone()))?;

        let settlements_total = IntCounterVec::new(
            Opts::new("allocation_settlements_total", "Settlements by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(settlements_total.clone()))?;

        let check_duration = HistogramVec::new(
            HistogramOpts::new(
                "allocation_check_duration_seconds",
                "Periodic check duration in seconds",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.050, 0.100, 0.500, 1.0, 5.0]),
            &["job"],
        )?;
        registry.register(Box::new(check_duration.clone()))?;

        Ok(Self {
            transitions_total,
            check_runs_total,
            row_failures_total,
            settlements_total,
            check_duration,
            registry,
        })
    }

    /// Record a status change
    pub fn record_transition(&self, from: AllocationStatus, to: AllocationStatus) {
        self.transitions_total
            .with_label_values(&[from.as_str(), to.as_str()])
            .inc();
    }

    /// Record a check run
    pub fn record_check(&self, job: &str, status: &str, duration_seconds: f64) {
        self.check_runs_total.with_label_values(&[job, status]).inc();
        self.check_duration
            .with_label_values(&[job])
            .observe(duration_seconds);
    }

    /// Record a skipped row
    pub fn record_row_failure(&self, job: &str) {
        self.row_failures_total.with_label_values(&[job]).inc();
    }

    /// Record a settlement outcome
    pub fn record_settlement(&self, outcome: &str) {
        self.settlements_total.with_label_values(&[outcome]).inc();
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
