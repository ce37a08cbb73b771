//! Control loop metrics
//!
//! Counters exported on `/metrics`. The binary registers them on the default
//! registry; tests use a private one.

use crate::error::Result;
use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

/// Reconcile counters
#[derive(Clone)]
pub struct Metrics {
    /// Ticks run
    pub reconciles: IntCounter,
    /// Ticks that returned an error
    pub reconcile_failures: IntCounter,
    /// Soft component failures, by component
    pub component_failures: IntCounterVec,
    /// Teardown steps, by resulting status
    pub teardown_steps: IntCounterVec,
}

impl Metrics {
    /// Create the counters and register them on `registry`
    pub fn register(registry: &Registry) -> Result<Self> {
        let metrics = Self::unregistered()?;
        registry.register(Box::new(metrics.reconciles.clone()))?;
        registry.register(Box::new(metrics.reconcile_failures.clone()))?;
        registry.register(Box::new(metrics.component_failures.clone()))?;
        registry.register(Box::new(metrics.teardown_steps.clone()))?;
        Ok(metrics)
    }

    /// Counters that are not exported anywhere
    pub fn unregistered() -> Result<Self> {
        Ok(Self {
            reconciles: IntCounter::new(
                "storage_cluster_reconciles_total",
                "Total number of StorageCluster reconciles",
            )?,
            reconcile_failures: IntCounter::new(
                "storage_cluster_reconcile_failures_total",
                "Number of StorageCluster reconciles that returned an error",
            )?,
            component_failures: IntCounterVec::new(
                Opts::new(
                    "storage_cluster_component_failures_total",
                    "Component failures reported as events",
                ),
                &["component"],
            )?,
            teardown_steps: IntCounterVec::new(
                Opts::new(
                    "storage_cluster_teardown_steps_total",
                    "Teardown steps by resulting delete status",
                ),
                &["status"],
            )?,
        })
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("reconciles", &self.reconciles.get())
            .field("reconcile_failures", &self.reconcile_failures.get())
            .finish_non_exhaustive()
    }
}
