//! Controller runtimes
//!
//! Two ways to drive [`Controller::sync`]:
//! - [`run`]: `kube::runtime::Controller` watching StorageClusters and the
//!   objects they own
//! - [`run_standalone`]: a fixed interval loop over an in-memory store

use super::{Controller, SyncOutcome};
use crate::crd::StorageCluster;
use crate::domain::ports::ObjectStore;
use crate::error::{Error, ErrorAction, Result};
use crate::store;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service, ServiceAccount};
use kube::runtime::controller::{Action, Controller as KubeController};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client, ResourceExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Requeue interval while a teardown is running
pub const TEARDOWN_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Retry interval for transient errors
pub const RETRY_INTERVAL: Duration = Duration::from_secs(15);

/// Shared state handed to the kube-runtime callbacks
pub struct RuntimeContext {
    pub controller: Arc<Controller>,
    pub requeue_interval: Duration,
}

/// Map a tick outcome to the next requeue
pub fn next_action(outcome: &SyncOutcome, requeue_interval: Duration) -> Action {
    match outcome {
        SyncOutcome::Converged(_) => Action::requeue(requeue_interval),
        SyncOutcome::Uninstalling(_) => Action::requeue(TEARDOWN_POLL_INTERVAL),
        SyncOutcome::Removed => Action::await_change(),
    }
}

async fn reconcile(cluster: Arc<StorageCluster>, ctx: Arc<RuntimeContext>) -> Result<Action> {
    let outcome = ctx.controller.sync(&cluster).await?;
    debug!(cluster = %cluster.name_any(), ?outcome, "Tick finished");
    Ok(next_action(&outcome, ctx.requeue_interval))
}

fn error_policy(cluster: Arc<StorageCluster>, error: &Error, _ctx: Arc<RuntimeContext>) -> Action {
    warn!(cluster = %cluster.name_any(), "Reconcile error: {}", error);
    match error.action() {
        ErrorAction::RequeueWithBackoff => Action::requeue(RETRY_INTERVAL),
        ErrorAction::RequeueAfter(delay) => Action::requeue(delay),
        ErrorAction::NoRequeue => Action::await_change(),
    }
}

/// Watch StorageClusters until a shutdown signal arrives
pub async fn run(client: Client, ctx: Arc<RuntimeContext>) -> Result<()> {
    let clusters: Api<StorageCluster> = Api::all(client.clone());

    // Fail fast when the CRD is not installed
    if let Err(e) = clusters.list(&Default::default()).await {
        error!("StorageCluster CRD is not available: {}", e);
        return Err(Error::Configuration(
            "StorageCluster CRD not installed".to_string(),
        ));
    }

    info!("Starting StorageCluster controller");
    KubeController::new(clusters, WatcherConfig::default())
        .owns::<Deployment>(Api::all(client.clone()), WatcherConfig::default())
        .owns::<Service>(Api::all(client.clone()), WatcherConfig::default())
        .owns::<ServiceAccount>(Api::all(client.clone()), WatcherConfig::default())
        .owns::<ConfigMap>(Api::all(client), WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((object, _)) => debug!("Reconciled {}", object),
                Err(e) => warn!("Controller error: {}", e),
            }
        })
        .await;

    info!("StorageCluster controller stopped");
    Ok(())
}

/// Sync every StorageCluster in `store` once. Returns how many were synced.
///
/// Errors are logged per cluster so one broken cluster does not starve the
/// others.
pub async fn tick_all(controller: &Controller, store: &dyn ObjectStore) -> Result<usize> {
    let clusters: Vec<StorageCluster> = store::list(store, None).await?;
    for cluster in &clusters {
        if let Err(e) = controller.sync(cluster).await {
            warn!(cluster = %cluster.name_any(), "Standalone tick failed: {}", e);
        }
    }
    Ok(clusters.len())
}

/// Tick every `interval` until Ctrl-C
pub async fn run_standalone(
    controller: Arc<Controller>,
    store: Arc<dyn ObjectStore>,
    interval: Duration,
) -> Result<()> {
    info!(?interval, "Starting standalone control loop");
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let synced = tick_all(&controller, store.as_ref()).await?;
                debug!(synced, "Standalone tick");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down standalone control loop");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::SchemaInstaller;
    use crate::config::OperatorConfig;
    use crate::controller::{default_components, Metrics};
    use crate::crd::{ClusterPhase, DeleteStatus};
    use crate::testing::{cluster, established, Harness};

    #[test]
    fn test_next_action() {
        let interval = Duration::from_secs(300);
        assert_eq!(
            next_action(&SyncOutcome::Converged(ClusterPhase::Online), interval),
            Action::requeue(interval)
        );
        assert_eq!(
            next_action(
                &SyncOutcome::Uninstalling(DeleteStatus::in_progress("wiping")),
                interval
            ),
            Action::requeue(TEARDOWN_POLL_INTERVAL)
        );
        assert_eq!(
            next_action(&SyncOutcome::Removed, interval),
            Action::await_change()
        );
    }

    #[tokio::test]
    async fn test_tick_all_syncs_stored_clusters() {
        let harness = Harness::new();
        harness.seed(&established(SchemaInstaller::definition()));
        harness.seed(&cluster());

        let builder = default_components(&OperatorConfig::default()).unwrap();
        let controller =
            Controller::new(builder, harness.context(), Metrics::unregistered().unwrap());

        let synced = tick_all(&controller, harness.store.as_ref()).await.unwrap();
        assert_eq!(synced, 1);
        assert_eq!(controller.metrics().reconciles.get(), 1);

        let live: StorageCluster = harness
            .get(&cluster().name_any(), cluster().namespace().as_deref())
            .await
            .unwrap();
        assert!(live.has_finalizer());
        assert_eq!(live.status.unwrap().phase, Some(ClusterPhase::Online));
    }
}
