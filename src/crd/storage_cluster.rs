//! StorageCluster CRD
//!
//! The single custom resource describing a storage cluster. Every object the
//! operator manages is derived from it and carries an owner reference to it.

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::EnvVar;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{CustomResource, Resource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Finalizer holding the StorageCluster until teardown has completed
pub const STORAGE_CLUSTER_FINALIZER: &str = "operator.libopenstorage.org/delete";

// =============================================================================
// StorageCluster CRD
// =============================================================================

/// StorageCluster describes the desired state of a storage cluster and the
/// auxiliary components installed alongside it.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "core.libopenstorage.org",
    version = "v1alpha1",
    kind = "StorageCluster",
    plural = "storageclusters",
    shortname = "stc",
    status = "StorageClusterStatus",
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct StorageClusterSpec {
    /// Storage driver image
    #[serde(default)]
    pub image: Option<String>,

    /// Pull policy applied to every managed container (Always, IfNotPresent, Never)
    #[serde(default)]
    pub image_pull_policy: Option<String>,

    /// Name of a secret attached to every managed pod template
    #[serde(default)]
    pub image_pull_secret: Option<String>,

    /// Registry, or registry/repository, that all images are pulled from
    #[serde(default)]
    pub custom_image_registry: Option<String>,

    /// Stork (storage-aware scheduler) installation
    #[serde(default)]
    pub stork: Option<StorkSpec>,

    /// What happens to the storage on the nodes when the cluster is deleted
    #[serde(default)]
    pub delete_strategy: Option<DeleteStrategy>,

    /// Key-value database used by the storage driver
    #[serde(default)]
    pub kvdb: Option<KvdbSpec>,

    /// Secrets provider used by the storage driver
    #[serde(default)]
    pub secrets_provider: Option<String>,

    /// First port of the range used by the storage driver
    #[serde(default)]
    pub start_port: Option<u32>,
}

// =============================================================================
// Sub-Types
// =============================================================================

/// Stork installation settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorkSpec {
    /// Whether Stork should be installed
    #[serde(default)]
    pub enabled: bool,

    /// Stork image
    #[serde(default)]
    pub image: Option<String>,

    /// Extra command line flags, merged on top of the defaults
    #[serde(default)]
    pub args: BTreeMap<String, String>,

    /// Extra environment variables, overriding driver supplied ones
    #[serde(default)]
    pub env: Vec<EnvVar>,
}

/// Delete strategy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DeleteStrategy {
    #[serde(rename = "type")]
    pub type_: DeleteStrategyType,
}

/// Delete strategy type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum DeleteStrategyType {
    /// Remove the storage driver, keep the data on the nodes
    #[default]
    Uninstall,
    /// Remove the storage driver and wipe the data on the nodes
    UninstallAndWipe,
}

/// Key-value database settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KvdbSpec {
    /// Use the driver's built-in kvdb
    #[serde(default)]
    pub internal: bool,

    /// External kvdb endpoints
    #[serde(default)]
    pub endpoints: Vec<String>,
}

// =============================================================================
// Status
// =============================================================================

/// Status of the StorageCluster
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageClusterStatus {
    /// Current phase
    #[serde(default)]
    pub phase: Option<ClusterPhase>,

    /// Progress of the teardown, present while the cluster is being deleted
    #[serde(default)]
    pub delete_status: Option<DeleteStatus>,

    /// Last reconcile time
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub last_reconcile_time: Option<DateTime<Utc>>,
}

/// StorageCluster lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ClusterPhase {
    Initializing,
    Online,
    Uninstalling,
    Failed,
}

impl std::fmt::Display for ClusterPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterPhase::Initializing => write!(f, "Initializing"),
            ClusterPhase::Online => write!(f, "Online"),
            ClusterPhase::Uninstalling => write!(f, "Uninstalling"),
            ClusterPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Outcome of one teardown step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DeleteStatus {
    pub status: DeleteStatusType,
    #[serde(default)]
    pub message: Option<String>,
}

/// Teardown state reported to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum DeleteStatusType {
    InProgress,
    Completed,
    Failed,
}

impl DeleteStatus {
    pub fn in_progress(message: impl Into<String>) -> Self {
        Self {
            status: DeleteStatusType::InProgress,
            message: Some(message.into()),
        }
    }

    pub fn completed() -> Self {
        Self {
            status: DeleteStatusType::Completed,
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: DeleteStatusType::Failed,
            message: Some(message.into()),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == DeleteStatusType::Completed
    }
}

// =============================================================================
// Implementations
// =============================================================================

impl StorageCluster {
    /// Namespace of the cluster, every namespaced child lives here
    pub fn namespace_or_default(&self) -> String {
        self.namespace().unwrap_or_else(|| "default".to_string())
    }

    /// Whether deletion has been requested
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Whether the teardown finalizer is present
    pub fn has_finalizer(&self) -> bool {
        self.finalizers()
            .iter()
            .any(|f| f == STORAGE_CLUSTER_FINALIZER)
    }

    /// Whether Stork is requested and enabled
    pub fn stork_enabled(&self) -> bool {
        self.spec.stork.as_ref().is_some_and(|s| s.enabled)
    }

    /// Delete strategy, defaulting to uninstall without wiping
    pub fn delete_strategy(&self) -> DeleteStrategyType {
        self.spec
            .delete_strategy
            .as_ref()
            .map(|s| s.type_)
            .unwrap_or_default()
    }

    /// Annotation value, if present
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations().get(key).map(String::as_str)
    }

    /// Owner reference attached to every child object
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: StorageCluster::api_version(&()).to_string(),
            kind: StorageCluster::kind(&()).to_string(),
            name: self.name_any(),
            uid: self.metadata.uid.clone().unwrap_or_default(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }
}
