//! Portworx storage driver
//!
//! Supplies the Portworx specific inputs of the reconciliation core: Stork
//! integration settings, spec defaults and the node-wipe teardown.

use crate::crd::{DeleteStatus, KvdbSpec, StorageCluster};
use crate::domain::ports::{NodeWiperRef, StorageDriver};
use crate::error::Result;
use crate::teardown::TeardownWorkflow;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::EnvVar;

pub const DRIVER_NAME: &str = "portworx";

/// Name Stork uses for the Portworx driver
pub const STORK_DRIVER_NAME: &str = "pxd";

pub const DEFAULT_SECRETS_PROVIDER: &str = "k8s";
pub const DEFAULT_START_PORT: u32 = 9001;

/// Portworx driver
pub struct PortworxDriver {
    teardown: TeardownWorkflow,
}

impl PortworxDriver {
    pub fn new(wiper: NodeWiperRef, wiper_image: &str, wiper_tag: &str) -> Self {
        Self {
            teardown: TeardownWorkflow::new(wiper, wiper_image, wiper_tag),
        }
    }
}

#[async_trait]
impl StorageDriver for PortworxDriver {
    fn name(&self) -> &str {
        DRIVER_NAME
    }

    fn set_defaults(&self, cluster: &mut StorageCluster) {
        let spec = &mut cluster.spec;
        let has_endpoints = spec.kvdb.as_ref().is_some_and(|k| !k.endpoints.is_empty());
        if !has_endpoints {
            spec.kvdb = Some(KvdbSpec {
                internal: true,
                endpoints: Vec::new(),
            });
        }
        spec.secrets_provider
            .get_or_insert_with(|| DEFAULT_SECRETS_PROVIDER.to_string());
        spec.start_port.get_or_insert(DEFAULT_START_PORT);
    }

    fn stork_driver_name(&self) -> Result<String> {
        Ok(STORK_DRIVER_NAME.to_string())
    }

    fn stork_env_list(&self, cluster: &StorageCluster) -> Vec<EnvVar> {
        vec![EnvVar {
            name: "PX_NAMESPACE".to_string(),
            value: Some(cluster.namespace_or_default()),
            ..Default::default()
        }]
    }

    async fn delete_storage(&self, cluster: &StorageCluster) -> Result<DeleteStatus> {
        self.teardown.step(cluster).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::DeleteStatusType;
    use crate::teardown::StoreNodeWiper;
    use crate::testing::{cluster, Harness};
    use std::sync::Arc;

    fn driver(harness: &Harness) -> PortworxDriver {
        let wiper = Arc::new(StoreNodeWiper::new(harness.store.clone(), None));
        PortworxDriver::new(wiper, "portworx/px-node-wiper", "latest")
    }

    #[test]
    fn test_defaults() {
        let harness = Harness::new();
        let mut cluster = cluster();
        driver(&harness).set_defaults(&mut cluster);

        assert_eq!(
            cluster.spec.kvdb,
            Some(KvdbSpec {
                internal: true,
                endpoints: vec![]
            })
        );
        assert_eq!(cluster.spec.secrets_provider.as_deref(), Some("k8s"));
        assert_eq!(cluster.spec.start_port, Some(9001));
    }

    #[test]
    fn test_defaults_keep_user_values() {
        let harness = Harness::new();
        let mut cluster = cluster();
        cluster.spec.kvdb = Some(KvdbSpec {
            internal: false,
            endpoints: vec!["etcd:http://etcd:2379".into()],
        });
        cluster.spec.secrets_provider = Some("vault".into());
        cluster.spec.start_port = Some(10001);
        driver(&harness).set_defaults(&mut cluster);

        assert!(!cluster.spec.kvdb.unwrap().internal);
        assert_eq!(cluster.spec.secrets_provider.as_deref(), Some("vault"));
        assert_eq!(cluster.spec.start_port, Some(10001));
    }

    #[test]
    fn test_stork_integration() {
        let harness = Harness::new();
        let driver = driver(&harness);
        assert_eq!(driver.name(), "portworx");
        assert_eq!(driver.stork_driver_name().unwrap(), "pxd");

        let env = driver.stork_env_list(&cluster());
        assert_eq!(env[0].name, "PX_NAMESPACE");
        assert_eq!(env[0].value.as_deref(), Some("kube-test"));
    }

    #[tokio::test]
    async fn test_delete_storage_starts_wiper() {
        let harness = Harness::new();
        let status = driver(&harness).delete_storage(&cluster()).await.unwrap();
        assert_eq!(status.status, DeleteStatusType::InProgress);
        assert_eq!(status.message.as_deref(), Some("Started node wiper daemonset"));
    }
}
