use super::*;
use crate::component::Component;
use crate::crd::STORAGE_CLUSTER_FINALIZER;
use crate::error::Error;
use crate::events::RecordedEvent;
use crate::testing::{cluster, established, Harness, TEST_NAMESPACE};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use parking_lot::Mutex;
use std::sync::Arc;

/// Component with a scripted outcome that logs every call
struct Scripted {
    name: &'static str,
    enabled: bool,
    failure: Option<fn() -> Error>,
    log: Arc<Mutex<Vec<String>>>,
}

impl Scripted {
    fn boxed(
        name: &'static str,
        enabled: bool,
        failure: Option<fn() -> Error>,
        log: &Arc<Mutex<Vec<String>>>,
    ) -> Box<dyn Component> {
        Box::new(Self {
            name,
            enabled,
            failure,
            log: log.clone(),
        })
    }

    fn outcome(&self, call: &str) -> crate::error::Result<()> {
        self.log.lock().push(format!("{} {}", call, self.name));
        match self.failure {
            Some(failure) => Err(failure()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Component for Scripted {
    fn initialize(&mut self, _ctx: &ComponentContext) {}

    fn is_enabled(&self, _cluster: &StorageCluster) -> bool {
        self.enabled
    }

    async fn reconcile(&self, _cluster: &StorageCluster) -> crate::error::Result<()> {
        self.outcome("reconcile")
    }

    async fn delete(&self, _cluster: &StorageCluster) -> crate::error::Result<()> {
        self.outcome("delete")
    }

    fn mark_deleted(&self) {
        self.log.lock().push(format!("mark_deleted {}", self.name));
    }
}

fn controller(harness: &Harness, builder: ComponentRegistryBuilder) -> Controller {
    Controller::new(builder, harness.context(), Metrics::unregistered().unwrap())
}

fn builtin(harness: &Harness) -> Controller {
    harness.seed(&established(SchemaInstaller::definition()));
    controller(harness, default_components(&OperatorConfig::default()).unwrap())
}

async fn live(harness: &Harness) -> Option<StorageCluster> {
    harness.get("px-cluster", Some(TEST_NAMESPACE)).await
}

/// Seed a cluster holding the finalizer and request its deletion
async fn deleting(harness: &Harness, mut cluster: StorageCluster) -> StorageCluster {
    cluster
        .finalizers_mut()
        .push(STORAGE_CLUSTER_FINALIZER.to_string());
    harness.seed(&cluster);
    store::delete::<StorageCluster>(harness.store.as_ref(), "px-cluster", Some(TEST_NAMESPACE))
        .await
        .unwrap();
    harness.store.reset_writes();
    live(harness).await.unwrap()
}

fn messages(events: &[RecordedEvent]) -> Vec<String> {
    events.iter().map(ToString::to_string).collect()
}

// =============================================================================
// Component loop
// =============================================================================

#[tokio::test]
async fn test_install_goes_online_then_idles() {
    let harness = Harness::new();
    let controller = builtin(&harness);
    harness.seed(&cluster());

    let outcome = controller.sync(&live(&harness).await.unwrap()).await.unwrap();
    assert_eq!(outcome, SyncOutcome::Converged(ClusterPhase::Online));

    let cluster = live(&harness).await.unwrap();
    assert!(cluster.has_finalizer());
    assert_eq!(cluster.status.as_ref().unwrap().phase, Some(ClusterPhase::Online));
    assert!(harness
        .get::<Deployment>("stork", Some(TEST_NAMESPACE))
        .await
        .is_some());
    assert!(harness.recorder.is_empty());

    // Nothing changed, nothing is written
    harness.store.reset_writes();
    controller.sync(&cluster).await.unwrap();
    assert_eq!(harness.store.writes(), 0);
    assert_eq!(controller.metrics().reconciles.get(), 2);
}

#[tokio::test]
async fn test_soft_failure_is_reported_and_loop_continues() {
    let harness = Harness::new();
    harness.seed(&cluster());
    let log = Arc::new(Mutex::new(Vec::new()));

    let mut builder = ComponentRegistryBuilder::new();
    builder
        .register(
            "Broken",
            Scripted::boxed("Broken", true, Some(|| Error::InvalidSpec("bad input".into())), &log),
        )
        .unwrap()
        .register("Healthy", Scripted::boxed("Healthy", true, None, &log))
        .unwrap();
    let controller = controller(&harness, builder);

    let outcome = controller.sync(&live(&harness).await.unwrap()).await.unwrap();
    assert_eq!(outcome, SyncOutcome::Converged(ClusterPhase::Initializing));
    assert_eq!(*log.lock(), vec!["reconcile Broken", "reconcile Healthy"]);
    assert_eq!(
        messages(&harness.recorder.events()),
        vec!["Warning FailedComponent Failed to setup Broken. bad input"]
    );
    assert_eq!(
        controller
            .metrics()
            .component_failures
            .with_label_values(&["Broken"])
            .get(),
        1
    );
}

#[tokio::test]
async fn test_critical_failure_aborts_tick() {
    let harness = Harness::new();
    harness.seed(&cluster());
    let log = Arc::new(Mutex::new(Vec::new()));

    let mut builder = ComponentRegistryBuilder::new();
    builder
        .register(
            "Schema",
            Scripted::boxed(
                "Schema",
                true,
                Some(|| Error::critical(Error::Internal("apiserver down".into()))),
                &log,
            ),
        )
        .unwrap()
        .register("Later", Scripted::boxed("Later", true, None, &log))
        .unwrap();
    let controller = controller(&harness, builder);

    let err = controller
        .sync(&live(&harness).await.unwrap())
        .await
        .unwrap_err();
    assert!(err.is_critical());
    assert_eq!(*log.lock(), vec!["reconcile Schema"]);
    assert!(harness.recorder.is_empty());
    assert_eq!(controller.metrics().reconcile_failures.get(), 1);

    let status = live(&harness).await.unwrap().status.unwrap();
    assert_eq!(status.phase, Some(ClusterPhase::Failed));
}

#[tokio::test]
async fn test_disabled_component_is_deleted_and_reset() {
    let harness = Harness::new();
    harness.seed(&cluster());
    let log = Arc::new(Mutex::new(Vec::new()));

    let mut builder = ComponentRegistryBuilder::new();
    builder
        .register("Off", Scripted::boxed("Off", false, None, &log))
        .unwrap()
        .register(
            "OffBroken",
            Scripted::boxed("OffBroken", false, Some(|| Error::Internal("stuck".into())), &log),
        )
        .unwrap();
    let controller = controller(&harness, builder);

    controller.sync(&live(&harness).await.unwrap()).await.unwrap();
    assert_eq!(
        *log.lock(),
        vec!["delete Off", "mark_deleted Off", "delete OffBroken"]
    );
    assert_eq!(
        messages(&harness.recorder.events()),
        vec!["Warning FailedComponent Failed to cleanup OffBroken. Internal error: stuck"]
    );
}

#[tokio::test]
async fn test_empty_stork_image_warns_without_error() {
    let harness = Harness::new();
    let controller = builtin(&harness);
    let mut cluster = cluster();
    cluster.spec.stork.as_mut().unwrap().image = None;
    harness.seed(&cluster);

    let outcome = controller.sync(&live(&harness).await.unwrap()).await.unwrap();
    assert_eq!(outcome, SyncOutcome::Converged(ClusterPhase::Initializing));
    assert_eq!(
        messages(&harness.recorder.events()),
        vec!["Warning FailedComponent Failed to setup Stork. stork image cannot be empty"]
    );
}

#[tokio::test]
async fn test_invalid_cpu_warns_once_per_tick() {
    let harness = Harness::new();
    let controller = builtin(&harness);
    let mut cluster = cluster();
    cluster.annotations_mut().insert(
        stork::ANNOTATION_STORK_CPU.to_string(),
        "invalid-cpu".to_string(),
    );
    harness.seed(&cluster);

    controller.sync(&live(&harness).await.unwrap()).await.unwrap();
    assert_eq!(harness.recorder.drain().len(), 1);

    controller.sync(&live(&harness).await.unwrap()).await.unwrap();
    let events = harness.recorder.drain();
    assert_eq!(events.len(), 1);
    assert!(events[0]
        .message
        .starts_with("Failed to setup Stork. invalid CPU value"));
}

// =============================================================================
// Teardown
// =============================================================================

#[tokio::test]
async fn test_teardown_in_progress_records_status() {
    let harness = Harness::new();
    let controller = builtin(&harness);
    let in_progress = DeleteStatus::in_progress(
        "Wipe operation still in progress: Completed [1] In Progress [2] Total [3]",
    );
    harness.driver.set_delete_status(in_progress.clone());
    let cluster = deleting(&harness, cluster()).await;

    let outcome = controller.sync(&cluster).await.unwrap();
    assert_eq!(outcome, SyncOutcome::Uninstalling(in_progress.clone()));

    let cluster = live(&harness).await.unwrap();
    assert!(cluster.has_finalizer());
    let status = cluster.status.clone().unwrap();
    assert_eq!(status.phase, Some(ClusterPhase::Uninstalling));
    assert_eq!(status.delete_status, Some(in_progress));

    // Same progress again writes nothing
    harness.store.reset_writes();
    controller.sync(&cluster).await.unwrap();
    assert_eq!(harness.store.writes(), 0);
    assert_eq!(harness.driver.delete_calls(), 2);
}

#[tokio::test]
async fn test_teardown_removes_stork_before_wipe_completes() {
    let harness = Harness::new();
    let controller = builtin(&harness);
    harness.seed(&cluster());
    controller.sync(&live(&harness).await.unwrap()).await.unwrap();
    assert!(harness
        .get::<Deployment>("stork", Some(TEST_NAMESPACE))
        .await
        .is_some());

    harness.driver.set_delete_status(DeleteStatus::in_progress("wiping"));
    store::delete::<StorageCluster>(harness.store.as_ref(), "px-cluster", Some(TEST_NAMESPACE))
        .await
        .unwrap();

    let outcome = controller.sync(&live(&harness).await.unwrap()).await.unwrap();
    assert_matches::assert_matches!(outcome, SyncOutcome::Uninstalling(_));
    assert!(harness
        .get::<Deployment>("stork", Some(TEST_NAMESPACE))
        .await
        .is_none());
    // Schema definition and the cluster itself remain
    assert_eq!(harness.store.len(), 2);
    assert!(live(&harness).await.unwrap().has_finalizer());
    assert!(harness.recorder.is_empty());
}

#[tokio::test]
async fn test_teardown_cleanup_failure_does_not_block_wipe() {
    let harness = Harness::new();
    harness.driver.set_delete_status(DeleteStatus::in_progress("wiping"));
    let log = Arc::new(Mutex::new(Vec::new()));

    let mut builder = ComponentRegistryBuilder::new();
    builder
        .register(
            "Stuck",
            Scripted::boxed(
                "Stuck",
                false,
                Some(|| Error::critical(Error::Internal("busy".into()))),
                &log,
            ),
        )
        .unwrap()
        .register("Live", Scripted::boxed("Live", true, None, &log))
        .unwrap();
    let controller = controller(&harness, builder);
    let cluster = deleting(&harness, cluster()).await;

    let outcome = controller.sync(&cluster).await.unwrap();
    assert_matches::assert_matches!(outcome, SyncOutcome::Uninstalling(_));
    assert_eq!(*log.lock(), vec!["delete Stuck"]);
    assert_eq!(harness.driver.delete_calls(), 1);
    assert_eq!(harness.recorder.events().len(), 1);
    assert!(harness.recorder.events()[0]
        .message
        .starts_with("Failed to cleanup Stuck."));
}

#[tokio::test]
async fn test_teardown_failure_emits_warning() {
    let harness = Harness::new();
    let controller = builtin(&harness);
    harness
        .driver
        .set_delete_status(DeleteStatus::failed("Failed to run node wiper: no nodes"));
    let cluster = deleting(&harness, cluster()).await;

    let outcome = controller.sync(&cluster).await.unwrap();
    assert_matches::assert_matches!(outcome, SyncOutcome::Uninstalling(_));
    assert_eq!(
        messages(&harness.recorder.events()),
        vec!["Warning FailedUninstall Failed to run node wiper: no nodes"]
    );
    assert!(live(&harness).await.unwrap().has_finalizer());
}

#[tokio::test]
async fn test_teardown_completed_removes_everything() {
    let harness = Harness::new();
    let controller = builtin(&harness);
    harness.seed(&cluster());
    controller.sync(&live(&harness).await.unwrap()).await.unwrap();
    // Schema definition, cluster and the eleven Stork objects
    assert_eq!(harness.store.len(), 13);

    store::delete::<StorageCluster>(harness.store.as_ref(), "px-cluster", Some(TEST_NAMESPACE))
        .await
        .unwrap();
    let cluster = live(&harness).await.unwrap();
    assert!(cluster.is_deleting());

    let outcome = controller.sync(&cluster).await.unwrap();
    assert_eq!(outcome, SyncOutcome::Removed);
    assert!(live(&harness).await.is_none());

    // Only the schema definition survives
    assert_eq!(harness.store.len(), 1);
    assert_eq!(
        messages(&harness.recorder.events()),
        vec!["Normal UninstallCompleted Storage cluster px-cluster uninstalled"]
    );
}

#[tokio::test]
async fn test_deleting_without_finalizer_is_left_alone() {
    let harness = Harness::new();
    let controller = builtin(&harness);
    let mut cluster = cluster();
    cluster.metadata.deletion_timestamp = Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(
        Utc::now(),
    ));

    let outcome = controller.sync(&cluster).await.unwrap();
    assert_eq!(outcome, SyncOutcome::Removed);
    assert_eq!(harness.driver.delete_calls(), 0);
}
