//! Shared test fixtures

use crate::component::ComponentContext;
use crate::crd::{DeleteStatus, StorageCluster, StorageClusterSpec, StorkSpec};
use crate::domain::ports::{ObjectKey, StorageDriver};
use crate::error::{Error, Result};
use crate::events::MemoryRecorder;
use crate::store::{self, MemoryObjectStore};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::EnvVar;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    CustomResourceDefinition, CustomResourceDefinitionCondition, CustomResourceDefinitionStatus,
};
use kube::Resource;
use parking_lot::Mutex;
use semver::Version;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

pub const TEST_NAMESPACE: &str = "kube-test";

/// A cluster with Stork enabled, as most tests want it
pub fn cluster() -> StorageCluster {
    let mut cluster = StorageCluster::new(
        "px-cluster",
        StorageClusterSpec {
            stork: Some(StorkSpec {
                enabled: true,
                image: Some("osd/stork:test".into()),
                args: BTreeMap::from([("test-key".to_string(), "test-value".to_string())]),
                env: Vec::new(),
            }),
            ..Default::default()
        },
    );
    cluster.metadata.namespace = Some(TEST_NAMESPACE.into());
    cluster.metadata.uid = Some("px-cluster-uid".into());
    cluster
}

pub fn env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.into(),
        value: Some(value.into()),
        ..Default::default()
    }
}

/// Mark a definition as accepted by the API server
pub fn established(mut crd: CustomResourceDefinition) -> CustomResourceDefinition {
    crd.status = Some(CustomResourceDefinitionStatus {
        conditions: Some(vec![CustomResourceDefinitionCondition {
            type_: "Established".to_string(),
            status: "True".to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    });
    crd
}

/// Scriptable storage driver
pub struct FakeDriver {
    stork_name: Option<String>,
    delete_status: Mutex<DeleteStatus>,
    delete_calls: AtomicU32,
}

impl FakeDriver {
    pub fn new(stork_name: &str) -> Self {
        Self {
            stork_name: Some(stork_name.to_string()),
            delete_status: Mutex::new(DeleteStatus::completed()),
            delete_calls: AtomicU32::new(0),
        }
    }

    /// A driver without Stork support
    pub fn without_stork() -> Self {
        Self {
            stork_name: None,
            ..Self::new("")
        }
    }

    pub fn set_delete_status(&self, status: DeleteStatus) {
        *self.delete_status.lock() = status;
    }

    pub fn delete_calls(&self) -> u32 {
        self.delete_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageDriver for FakeDriver {
    fn name(&self) -> &str {
        "mock"
    }

    fn set_defaults(&self, _cluster: &mut StorageCluster) {}

    fn stork_driver_name(&self) -> Result<String> {
        self.stork_name.clone().ok_or_else(|| Error::NotSupported {
            driver: "mock".into(),
            capability: "stork".into(),
        })
    }

    fn stork_env_list(&self, cluster: &StorageCluster) -> Vec<EnvVar> {
        vec![env("PX_NAMESPACE", &cluster.namespace_or_default())]
    }

    async fn delete_storage(&self, _cluster: &StorageCluster) -> Result<DeleteStatus> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.delete_status.lock().clone())
    }
}

/// In-memory adapters wired together
pub struct Harness {
    pub store: Arc<MemoryObjectStore>,
    pub recorder: Arc<MemoryRecorder>,
    pub driver: Arc<FakeDriver>,
    pub k8s_version: Version,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_driver(FakeDriver::new("pxd"))
    }

    pub fn with_driver(driver: FakeDriver) -> Self {
        Self {
            store: Arc::new(MemoryObjectStore::new()),
            recorder: Arc::new(MemoryRecorder::new()),
            driver: Arc::new(driver),
            k8s_version: Version::new(1, 11, 0),
        }
    }

    pub fn context(&self) -> ComponentContext {
        ComponentContext {
            store: self.store.clone(),
            k8s_version: self.k8s_version.clone(),
            recorder: self.recorder.clone(),
            driver: self.driver.clone(),
        }
    }

    /// Store an object without counting a write
    pub fn seed<K>(&self, object: &K)
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        let meta = object.meta();
        let key = ObjectKey::of::<K>(
            meta.name.clone().unwrap_or_default(),
            meta.namespace.as_deref(),
        );
        self.store.seed(key, object).unwrap();
    }

    /// Fetch an object from the cluster namespace (or cluster scope)
    pub async fn get<K>(&self, name: &str, namespace: Option<&str>) -> Option<K>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        store::get_opt::<K>(self.store.as_ref(), name, namespace)
            .await
            .unwrap()
    }
}
