//! StorageCluster Control Loop
//!
//! One [`Controller::sync`] call is one level-triggered tick for one
//! StorageCluster:
//!
//! - a live cluster gets the teardown finalizer, driver defaults and then
//!   every registered component in registration order
//! - a deleting cluster first loses the objects of components disabled by the
//!   deletion, then runs one teardown step; once the storage is gone every
//!   component is removed and the finalizer released
//!
//! Critical component errors abort the tick and are returned. Every other
//! component error becomes a Warning event on the cluster.

pub mod metrics;
pub mod runtime;

pub use metrics::Metrics;

use crate::component::{
    schema, stork, ComponentContext, ComponentRegistry, ComponentRegistryBuilder,
    SchemaInstaller, StorkComponent,
};
use crate::config::OperatorConfig;
use crate::crd::{
    ClusterPhase, DeleteStatus, DeleteStatusType, StorageCluster, StorageClusterStatus,
    STORAGE_CLUSTER_FINALIZER,
};
use crate::domain::ports::EventType;
use crate::error::{Error, Result};
use crate::events::reasons;
use crate::store;
use chrono::Utc;
use kube::ResourceExt;
use tracing::{debug, error, info, instrument, warn};

/// Result of one tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Components ran; the cluster is in this phase
    Converged(ClusterPhase),
    /// Teardown is still running
    Uninstalling(DeleteStatus),
    /// Teardown finished and the finalizer was released
    Removed,
}

/// Register the built-in components in their reconcile order
pub fn default_components(config: &OperatorConfig) -> Result<ComponentRegistryBuilder> {
    let mut builder = ComponentRegistryBuilder::new();
    builder
        .register(
            schema::COMPONENT_NAME,
            Box::new(SchemaInstaller::with_timing(
                config.schema_interval,
                config.schema_timeout,
            )),
        )?
        .register(stork::COMPONENT_NAME, Box::new(StorkComponent::new()))?;
    Ok(builder)
}

/// Drives the registered components for StorageClusters
pub struct Controller {
    registry: ComponentRegistry,
    ctx: ComponentContext,
    metrics: Metrics,
}

impl Controller {
    /// Initialize every registered component with `ctx`
    pub fn new(builder: ComponentRegistryBuilder, ctx: ComponentContext, metrics: Metrics) -> Self {
        Self {
            registry: builder.build(&ctx),
            ctx,
            metrics,
        }
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Run one tick for `cluster`
    #[instrument(skip_all, fields(cluster = %cluster.name_any()))]
    pub async fn sync(&self, cluster: &StorageCluster) -> Result<SyncOutcome> {
        self.metrics.reconciles.inc();
        let result = if cluster.is_deleting() {
            self.uninstall(cluster).await
        } else {
            self.install(cluster).await
        };
        if let Err(e) = &result {
            self.metrics.reconcile_failures.inc();
            error!("Reconcile failed: {}", e);
        }
        result
    }

    async fn install(&self, cluster: &StorageCluster) -> Result<SyncOutcome> {
        let mut cluster = if cluster.has_finalizer() {
            cluster.clone()
        } else {
            self.add_finalizer(cluster).await?
        };
        self.ctx.driver.set_defaults(&mut cluster);

        let failures = match self.reconcile_components(&cluster).await {
            Ok(failures) => failures,
            Err(e) => {
                let written = self.write_status(&cluster, ClusterPhase::Failed, None).await;
                if let Err(status_err) = written {
                    warn!("Failed to record cluster status: {}", status_err);
                }
                return Err(e);
            }
        };

        let phase = if failures == 0 {
            ClusterPhase::Online
        } else {
            ClusterPhase::Initializing
        };
        self.write_status(&cluster, phase, None).await?;
        Ok(SyncOutcome::Converged(phase))
    }

    /// Reconcile enabled components and delete disabled ones.
    ///
    /// Returns the number of soft failures reported as events.
    async fn reconcile_components(&self, cluster: &StorageCluster) -> Result<usize> {
        let mut failures = 0;
        for (name, component) in self.registry.iter() {
            let (result, action) = if component.is_enabled(cluster) {
                debug!(component = name, "Reconciling component");
                (component.reconcile(cluster).await, "setup")
            } else {
                let result = component.delete(cluster).await;
                if result.is_ok() {
                    component.mark_deleted();
                }
                (result, "cleanup")
            };

            match result {
                Ok(()) => {}
                Err(e) if e.is_critical() => {
                    error!(component = name, "Aborting reconcile: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    failures += 1;
                    self.report_failure(cluster, name, action, &e).await;
                }
            }
        }
        Ok(failures)
    }

    /// Delete the objects of components disabled for a deleting cluster.
    /// Failures never block the teardown.
    async fn delete_disabled_components(&self, cluster: &StorageCluster) {
        for (name, component) in self.registry.iter() {
            if component.is_enabled(cluster) {
                continue;
            }
            match component.delete(cluster).await {
                Ok(()) => component.mark_deleted(),
                Err(e) => self.report_failure(cluster, name, "cleanup", &e).await,
            }
        }
    }

    async fn report_failure(&self, cluster: &StorageCluster, name: &str, action: &str, e: &Error) {
        self.metrics
            .component_failures
            .with_label_values(&[name])
            .inc();
        let message = format!("Failed to {} {}. {}", action, name, e);
        self.ctx
            .recorder
            .record(cluster, EventType::Warning, reasons::FAILED_COMPONENT, &message)
            .await;
    }

    async fn uninstall(&self, cluster: &StorageCluster) -> Result<SyncOutcome> {
        if !cluster.has_finalizer() {
            debug!("Cluster is deleting without our finalizer");
            return Ok(SyncOutcome::Removed);
        }

        let mut defaulted = cluster.clone();
        self.ctx.driver.set_defaults(&mut defaulted);
        self.delete_disabled_components(&defaulted).await;

        let status = self.ctx.driver.delete_storage(&defaulted).await?;
        let label = format!("{:?}", status.status);
        self.metrics
            .teardown_steps
            .with_label_values(&[label.as_str()])
            .inc();

        match status.status {
            DeleteStatusType::Completed => {
                self.remove_components(cluster).await;
                self.ctx
                    .recorder
                    .record(
                        cluster,
                        EventType::Normal,
                        reasons::UNINSTALL_COMPLETED,
                        &format!("Storage cluster {} uninstalled", cluster.name_any()),
                    )
                    .await;
                self.remove_finalizer(cluster).await?;
                info!("Teardown completed, finalizer removed");
                Ok(SyncOutcome::Removed)
            }
            DeleteStatusType::Failed => {
                let message = status.message.clone().unwrap_or_default();
                self.ctx
                    .recorder
                    .record(cluster, EventType::Warning, reasons::FAILED_UNINSTALL, &message)
                    .await;
                self.write_status(cluster, ClusterPhase::Uninstalling, Some(status.clone()))
                    .await?;
                Ok(SyncOutcome::Uninstalling(status))
            }
            DeleteStatusType::InProgress => {
                self.write_status(cluster, ClusterPhase::Uninstalling, Some(status.clone()))
                    .await?;
                Ok(SyncOutcome::Uninstalling(status))
            }
        }
    }

    /// Delete every component's objects. Failures are logged; the storage is
    /// already gone and owner references collect what is left.
    async fn remove_components(&self, cluster: &StorageCluster) {
        for (name, component) in self.registry.iter() {
            match component.delete(cluster).await {
                Ok(()) => component.mark_deleted(),
                Err(e) => warn!(component = name, "Failed to remove component: {}", e),
            }
        }
    }

    async fn add_finalizer(&self, cluster: &StorageCluster) -> Result<StorageCluster> {
        let mut updated = cluster.clone();
        updated
            .finalizers_mut()
            .push(STORAGE_CLUSTER_FINALIZER.to_string());
        let updated = store::update(self.ctx.store.as_ref(), &updated).await?;
        debug!("Added finalizer {}", STORAGE_CLUSTER_FINALIZER);
        Ok(updated)
    }

    async fn remove_finalizer(&self, cluster: &StorageCluster) -> Result<()> {
        let namespace = cluster.namespace();
        let mut live: StorageCluster = store::get(
            self.ctx.store.as_ref(),
            &cluster.name_any(),
            namespace.as_deref(),
        )
        .await?;
        live.finalizers_mut()
            .retain(|f| f != STORAGE_CLUSTER_FINALIZER);
        store::update(self.ctx.store.as_ref(), &live).await?;
        Ok(())
    }

    /// Write the status when the phase or delete status changed
    async fn write_status(
        &self,
        cluster: &StorageCluster,
        phase: ClusterPhase,
        delete_status: Option<DeleteStatus>,
    ) -> Result<()> {
        let current = cluster.status.as_ref();
        if current.and_then(|s| s.phase) == Some(phase)
            && current.and_then(|s| s.delete_status.as_ref()) == delete_status.as_ref()
        {
            return Ok(());
        }

        let status = StorageClusterStatus {
            phase: Some(phase),
            delete_status,
            last_reconcile_time: Some(Utc::now()),
        };
        store::update_status(self.ctx.store.as_ref(), cluster, &status).await?;
        info!(%phase, "Cluster status updated");
        Ok(())
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("registry", &self.registry)
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests;
