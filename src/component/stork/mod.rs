//! Stork Component
//!
//! Installs Stork, the storage-aware scheduler extender, with its own
//! kube-scheduler instance. Owns eleven objects:
//!
//! - config map `stork-config` with the scheduler extender policy
//! - service accounts, cluster roles and bindings `stork` and `stork-scheduler`
//! - service `stork-service`
//! - deployments `stork` and `stork-scheduler`
//! - storage class `stork-snapshot-sc`
//!
//! CPU requests can be overridden per deployment with the
//! `portworx.io/stork-cpu` and `portworx.io/stork-scheduler-cpu` annotations.

pub mod resources;


use self::resources::*;
use super::{initialized, Component, ComponentContext};
use crate::convergence::{self, apply, parse_cpu};
use crate::crd::StorageCluster;
use crate::domain::ports::ObjectStore;
use crate::error::{Error, Result};
use crate::store;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

/// Registered name of the Stork component
pub const COMPONENT_NAME: &str = "Stork";

/// Annotation overriding the Stork CPU request
pub const ANNOTATION_STORK_CPU: &str = "portworx.io/stork-cpu";

/// Annotation overriding the Stork scheduler CPU request
pub const ANNOTATION_STORK_SCHED_CPU: &str = "portworx.io/stork-scheduler-cpu";

/// Stork installation
#[derive(Default)]
pub struct StorkComponent {
    ctx: Option<ComponentContext>,
}

impl StorkComponent {
    pub fn new() -> Self {
        Self::default()
    }

    /// CPU request for one deployment.
    ///
    /// An unparsable annotation keeps the live request (or the default when
    /// the deployment does not exist yet) and is returned as the second value.
    async fn resolve_cpu(
        &self,
        store: &dyn ObjectStore,
        cluster: &StorageCluster,
        deployment: &str,
        annotation: &str,
    ) -> Result<(Quantity, Option<Error>)> {
        let Some(raw) = cluster.annotation(annotation) else {
            return Ok((default_cpu(), None));
        };

        match parse_cpu(raw) {
            Ok(cpu) => Ok((cpu, None)),
            Err(e) => {
                let namespace = cluster.namespace_or_default();
                let live: Option<Deployment> =
                    store::get_opt(store, deployment, Some(&namespace)).await?;
                let kept = live.as_ref().and_then(live_cpu).unwrap_or_else(default_cpu);
                warn!(
                    cluster = %cluster.name_any(),
                    annotation,
                    value = raw,
                    kept = %kept.0,
                    "Ignoring invalid CPU override"
                );
                let err = Error::InvalidSpec(format!(
                    "invalid CPU value {:?} in annotation {}: {}",
                    raw, annotation, e
                ));
                Ok((kept, Some(err)))
            }
        }
    }

    async fn install(
        &self,
        ctx: &ComponentContext,
        cluster: &StorageCluster,
        driver_name: &str,
    ) -> Result<()> {
        let store = ctx.store.as_ref();
        let plan = StorkPlan::new(
            cluster,
            driver_name,
            ctx.driver.stork_env_list(cluster),
            &ctx.k8s_version,
        )?;

        apply(store, &config_map(&plan)?).await?;
        for account in service_accounts(&plan) {
            apply(store, &account).await?;
        }
        for role in cluster_roles(&plan) {
            apply(store, &role).await?;
        }
        for binding in cluster_role_bindings(&plan) {
            apply(store, &binding).await?;
        }
        apply(store, &service(&plan)).await?;

        let (stork_cpu, stork_err) = self
            .resolve_cpu(store, cluster, STORK_DEPLOYMENT, ANNOTATION_STORK_CPU)
            .await?;
        apply(store, &stork_deployment(&plan, stork_cpu)).await?;

        let (sched_cpu, sched_err) = self
            .resolve_cpu(store, cluster, STORK_SCHED_DEPLOYMENT, ANNOTATION_STORK_SCHED_CPU)
            .await?;
        apply(store, &scheduler_deployment(&plan, sched_cpu)).await?;

        apply(store, &snapshot_storage_class(&plan)).await?;

        // Everything else converged; surface a single override failure
        match stork_err.or(sched_err) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn remove_all(&self, store: &dyn ObjectStore, cluster: &StorageCluster) -> Result<()> {
        let namespace = cluster.namespace_or_default();
        let ns = Some(namespace.as_str());

        convergence::remove::<Deployment>(store, STORK_DEPLOYMENT, ns).await?;
        convergence::remove::<Deployment>(store, STORK_SCHED_DEPLOYMENT, ns).await?;
        convergence::remove::<Service>(store, STORK_SERVICE, ns).await?;
        convergence::remove::<ClusterRoleBinding>(store, STORK_CLUSTER_ROLE_BINDING, None).await?;
        convergence::remove::<ClusterRoleBinding>(store, STORK_SCHED_CLUSTER_ROLE_BINDING, None)
            .await?;
        convergence::remove::<ClusterRole>(store, STORK_CLUSTER_ROLE, None).await?;
        convergence::remove::<ClusterRole>(store, STORK_SCHED_CLUSTER_ROLE, None).await?;
        convergence::remove::<ServiceAccount>(store, STORK_SERVICE_ACCOUNT, ns).await?;
        convergence::remove::<ServiceAccount>(store, STORK_SCHED_SERVICE_ACCOUNT, ns).await?;
        convergence::remove::<ConfigMap>(store, STORK_CONFIG_MAP, ns).await?;
        convergence::remove::<StorageClass>(store, STORK_SNAPSHOT_STORAGE_CLASS, None).await?;
        Ok(())
    }
}

#[async_trait]
impl Component for StorkComponent {
    fn initialize(&mut self, ctx: &ComponentContext) {
        self.ctx = Some(ctx.clone());
    }

    fn is_enabled(&self, cluster: &StorageCluster) -> bool {
        cluster.stork_enabled() && !cluster.is_deleting()
    }

    #[instrument(skip_all, fields(component = COMPONENT_NAME, cluster = %cluster.name_any()))]
    async fn reconcile(&self, cluster: &StorageCluster) -> Result<()> {
        let ctx = initialized(&self.ctx, COMPONENT_NAME)?;

        let driver_name = match ctx.driver.stork_driver_name() {
            Ok(name) => name,
            Err(e) => {
                info!(
                    driver = ctx.driver.name(),
                    "Stork is not supported by the storage driver, removing it: {}", e
                );
                return self.remove_all(ctx.store.as_ref(), cluster).await;
            }
        };

        debug!("Reconciling Stork for driver {}", driver_name);
        self.install(ctx, cluster, &driver_name).await
    }

    #[instrument(skip_all, fields(component = COMPONENT_NAME, cluster = %cluster.name_any()))]
    async fn delete(&self, cluster: &StorageCluster) -> Result<()> {
        let ctx = initialized(&self.ctx, COMPONENT_NAME)?;
        self.remove_all(ctx.store.as_ref(), cluster).await
    }

    fn mark_deleted(&self) {}
}
