//! Metrics collection for observability
//!
//! # Metrics
//!
//! - `wallet_ledger_postings_total{tx_type, status}` - Postings by type and outcome
//! - `wallet_ledger_posting_duration_seconds` - Histogram of posting latencies

use crate::types::TransactionType;
use prometheus::{Histogram, HistogramOpts, IntCounterVec, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
///
/// Each ledger owns its registry, so several ledgers can live in one process.
#[derive(Clone, Debug)]
pub struct Metrics {
    /// Postings by type and outcome
    pub postings_total: IntCounterVec,

    /// Posting duration histogram
    pub posting_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let postings_total = IntCounterVec::new(
            Opts::new(
                "wallet_ledger_postings_total",
                "Wallet postings by transaction type and outcome",
            ),
            &["tx_type", "status"],
        )?;
        registry.register(Box::new(postings_total.clone()))?;

        let posting_duration = Histogram::with_opts(
            HistogramOpts::new(
                "wallet_ledger_posting_duration_seconds",
                "Histogram of posting latencies",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
        )?;
        registry.register(Box::new(posting_duration.clone()))?;

        Ok(Self {
            postings_total,
            posting_duration,
            registry,
        })
    }

    /// Record a posting outcome ("applied", "duplicate", "appended", "error")
    pub fn record_posting(&self, tx_type: TransactionType, status: &str) {
        self.postings_total
            .with_label_values(&[tx_type.as_str(), status])
            .inc();
    }

    /// Record posting duration
    pub fn record_posting_duration(&self, duration_seconds: f64) {
        self.posting_duration.observe(duration_seconds);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
