//! Node wiper backed by the object store
//!
//! Runs the wipe task as the `px-node-wiper` DaemonSet. Each pod turns ready
//! once its node has been cleaned, so the DaemonSet status doubles as the
//! progress counters.

use crate::crd::StorageCluster;
use crate::domain::ports::{NodeWiper, NodeWiperProgress, ObjectStoreRef};
use crate::error::{Error, Result};
use crate::store;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, ExecAction, HostPathVolumeSource, PodSpec, PodTemplateSpec, Probe,
    SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::ResourceExt;
use std::collections::BTreeMap;
use tracing::{debug, info};

pub const NODE_WIPER_NAME: &str = "px-node-wiper";

/// Namespace holding the driver's cluster metadata
pub const METADATA_NAMESPACE: &str = "kube-system";

/// Marker file each wiper pod writes when its node is clean
const WIPE_DONE_MARKER: &str = "/tmp/px-node-wipe-done";

/// Host paths the wiper needs access to
const HOST_PATHS: &[(&str, &str)] = &[
    ("etcpwx", "/etc/pwx"),
    ("hostproc", "/proc"),
    ("optpwx", "/opt/pwx"),
    ("varlibosd", "/var/lib/osd"),
    ("dev", "/dev"),
];

/// Node wiper that manages its DaemonSet through the object store
pub struct StoreNodeWiper {
    store: ObjectStoreRef,
    namespace: Option<String>,
}

impl StoreNodeWiper {
    /// `namespace` overrides the cluster namespace for the DaemonSet
    pub fn new(store: ObjectStoreRef, namespace: Option<String>) -> Self {
        Self { store, namespace }
    }

    fn namespace_for(&self, cluster: &StorageCluster) -> String {
        self.namespace
            .clone()
            .unwrap_or_else(|| cluster.namespace_or_default())
    }

    /// Names of the driver metadata config maps for a cluster
    pub fn metadata_config_maps(cluster: &StorageCluster) -> [String; 2] {
        let name = cluster.name_any();
        [
            format!("px-bootstrap-{}", name),
            format!("px-cloud-drive-{}", name),
        ]
    }

    /// The DaemonSet launched on every node.
    ///
    /// Owned by the cluster only when both share a namespace. A DaemonSet in
    /// another namespace is removed by [`NodeWiper::delete_task`] alone.
    pub fn daemon_set(
        cluster: &StorageCluster,
        namespace: &str,
        image: &str,
        tag: &str,
        remove_data: bool,
    ) -> DaemonSet {
        let labels = BTreeMap::from([("name".to_string(), NODE_WIPER_NAME.to_string())]);
        let owner_references =
            (namespace == cluster.namespace_or_default()).then(|| vec![cluster.owner_reference()]);

        let volumes = HOST_PATHS
            .iter()
            .map(|(name, path)| Volume {
                name: name.to_string(),
                host_path: Some(HostPathVolumeSource {
                    path: path.to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .collect();
        let mounts = HOST_PATHS
            .iter()
            .map(|(name, path)| VolumeMount {
                name: name.to_string(),
                mount_path: path.to_string(),
                ..Default::default()
            })
            .collect();

        let container = Container {
            name: NODE_WIPER_NAME.to_string(),
            image: Some(format!("{}:{}", image, tag)),
            args: remove_data.then(|| vec!["-r".to_string()]),
            image_pull_policy: Some("Always".to_string()),
            security_context: Some(SecurityContext {
                privileged: Some(true),
                ..Default::default()
            }),
            readiness_probe: Some(Probe {
                exec: Some(ExecAction {
                    command: Some(vec!["cat".to_string(), WIPE_DONE_MARKER.to_string()]),
                }),
                initial_delay_seconds: Some(30),
                period_seconds: Some(10),
                ..Default::default()
            }),
            volume_mounts: Some(mounts),
            ..Default::default()
        };

        DaemonSet {
            metadata: ObjectMeta {
                name: Some(NODE_WIPER_NAME.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(labels.clone()),
                owner_references,
                ..Default::default()
            },
            spec: Some(DaemonSetSpec {
                selector: LabelSelector {
                    match_labels: Some(labels.clone()),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        host_pid: Some(true),
                        containers: vec![container],
                        volumes: Some(volumes),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

/// Progress counters from DaemonSet status
pub fn progress_of(daemon_set: &DaemonSet) -> NodeWiperProgress {
    let Some(status) = &daemon_set.status else {
        return NodeWiperProgress::default();
    };
    let total = u32::try_from(status.desired_number_scheduled).unwrap_or(0);
    let completed = status
        .number_ready
        .try_into()
        .map(|ready: u32| ready.min(total))
        .unwrap_or(0);
    NodeWiperProgress {
        completed,
        in_progress: total - completed,
        total,
    }
}

#[async_trait]
impl NodeWiper for StoreNodeWiper {
    async fn progress(&self, cluster: &StorageCluster) -> Result<NodeWiperProgress> {
        let namespace = self.namespace_for(cluster);
        let daemon_set: DaemonSet =
            store::get(self.store.as_ref(), NODE_WIPER_NAME, Some(&namespace)).await?;
        let progress = progress_of(&daemon_set);
        debug!(?progress, "Node wiper progress");
        Ok(progress)
    }

    async fn launch(
        &self,
        cluster: &StorageCluster,
        image: &str,
        tag: &str,
        remove_data: bool,
    ) -> Result<()> {
        if image.is_empty() || tag.is_empty() {
            return Err(Error::Configuration(
                "node wiper image and tag must be set".into(),
            ));
        }
        let namespace = self.namespace_for(cluster);
        let daemon_set = Self::daemon_set(cluster, &namespace, image, tag, remove_data);
        match store::create(self.store.as_ref(), &daemon_set).await {
            Ok(_) => {
                info!("Started node wiper in namespace {}", namespace);
                Ok(())
            }
            Err(e) if e.is_already_exists() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn delete_task(&self, cluster: &StorageCluster) -> Result<()> {
        let namespace = self.namespace_for(cluster);
        store::delete_if_exists::<DaemonSet>(self.store.as_ref(), NODE_WIPER_NAME, Some(&namespace))
            .await?;
        Ok(())
    }

    async fn wipe_metadata(&self, cluster: &StorageCluster) -> Result<()> {
        for name in Self::metadata_config_maps(cluster) {
            if store::delete_if_exists::<ConfigMap>(
                self.store.as_ref(),
                &name,
                Some(METADATA_NAMESPACE),
            )
            .await?
            {
                info!("Deleted cluster metadata {}/{}", METADATA_NAMESPACE, name);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{cluster, Harness, TEST_NAMESPACE};
    use k8s_openapi::api::apps::v1::DaemonSetStatus;

    fn wiper(harness: &Harness) -> StoreNodeWiper {
        StoreNodeWiper::new(harness.store.clone(), None)
    }

    fn with_status(mut daemon_set: DaemonSet, desired: i32, ready: i32) -> DaemonSet {
        daemon_set.status = Some(DaemonSetStatus {
            desired_number_scheduled: desired,
            number_ready: ready,
            ..Default::default()
        });
        daemon_set
    }

    #[tokio::test]
    async fn test_progress_not_found() {
        let harness = Harness::new();
        let err = wiper(&harness).progress(&cluster()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_launch_creates_daemon_set() {
        let harness = Harness::new();
        let wiper = wiper(&harness);
        wiper
            .launch(&cluster(), "portworx/px-node-wiper", "latest", true)
            .await
            .unwrap();

        let daemon_set: DaemonSet = harness
            .get(NODE_WIPER_NAME, Some(TEST_NAMESPACE))
            .await
            .unwrap();
        let pod = daemon_set.spec.unwrap().template.spec.unwrap();
        assert_eq!(
            pod.containers[0].image.as_deref(),
            Some("portworx/px-node-wiper:latest")
        );
        assert_eq!(pod.containers[0].args, Some(vec!["-r".to_string()]));

        // Launching again is harmless
        wiper
            .launch(&cluster(), "portworx/px-node-wiper", "latest", true)
            .await
            .unwrap();

        let progress = wiper.progress(&cluster()).await.unwrap();
        assert_eq!(progress, NodeWiperProgress::default());
    }

    #[tokio::test]
    async fn test_launch_without_image() {
        let harness = Harness::new();
        let err = wiper(&harness)
            .launch(&cluster(), "", "latest", false)
            .await
            .unwrap_err();
        assert_matches::assert_matches!(err, Error::Configuration(_));
    }

    #[tokio::test]
    async fn test_progress_from_status() {
        let harness = Harness::new();
        let daemon_set =
            StoreNodeWiper::daemon_set(&cluster(), TEST_NAMESPACE, "wiper", "latest", false);
        harness.seed(&with_status(daemon_set, 3, 1));

        let progress = wiper(&harness).progress(&cluster()).await.unwrap();
        assert_eq!(
            progress,
            NodeWiperProgress {
                completed: 1,
                in_progress: 2,
                total: 3
            }
        );
        assert!(!progress.is_complete());
    }

    #[test]
    fn test_progress_of_clamps() {
        let daemon_set = DaemonSet::default();
        let progress = progress_of(&with_status(daemon_set, 2, 5));
        assert_eq!(progress.completed, 2);
        assert_eq!(progress.in_progress, 0);
        assert!(progress.is_complete());
    }

    #[tokio::test]
    async fn test_namespace_override() {
        let harness = Harness::new();
        let wiper = StoreNodeWiper::new(harness.store.clone(), Some("portworx".into()));
        wiper.launch(&cluster(), "wiper", "1.0", false).await.unwrap();

        assert!(harness
            .get::<DaemonSet>(NODE_WIPER_NAME, Some("portworx"))
            .await
            .is_some());
        wiper.delete_task(&cluster()).await.unwrap();
        assert!(harness.store.is_empty());
    }

    #[test]
    fn test_owner_reference_only_in_cluster_namespace() {
        let cluster = cluster();
        let local = StoreNodeWiper::daemon_set(&cluster, TEST_NAMESPACE, "wiper", "1.0", false);
        let owners = local.metadata.owner_references.unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].name, "px-cluster");

        let foreign = StoreNodeWiper::daemon_set(&cluster, "portworx", "wiper", "1.0", false);
        assert_eq!(foreign.metadata.owner_references, None);
    }

    #[tokio::test]
    async fn test_wipe_metadata() {
        let harness = Harness::new();
        for name in StoreNodeWiper::metadata_config_maps(&cluster()) {
            harness.seed(&ConfigMap {
                metadata: ObjectMeta {
                    name: Some(name),
                    namespace: Some(METADATA_NAMESPACE.into()),
                    ..Default::default()
                },
                ..Default::default()
            });
        }
        assert_eq!(harness.store.len(), 2);

        let wiper = wiper(&harness);
        wiper.wipe_metadata(&cluster()).await.unwrap();
        assert!(harness.store.is_empty());

        // Absent metadata is fine
        wiper.wipe_metadata(&cluster()).await.unwrap();
    }
}
