//! Domain Ports - Core trait definitions for the operator
//!
//! These traits define the boundaries between the reconciliation core and
//! external systems: the object store, the event sink, the storage driver and
//! the node wipe task. Adapters implement these traits to provide concrete
//! functionality.

use crate::crd::{DeleteStatus, StorageCluster};
use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::EnvVar;
use kube::Resource;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

// =============================================================================
// Object Identity
// =============================================================================

/// Type identity of a stored object
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectKind {
    /// e.g. `apps/v1` or `v1`
    pub api_version: String,
    pub kind: String,
    pub plural: String,
}

impl ObjectKind {
    /// Type identity of a statically typed Kubernetes resource
    pub fn of<K: Resource<DynamicType = ()>>() -> Self {
        Self {
            api_version: K::api_version(&()).to_string(),
            kind: K::kind(&()).to_string(),
            plural: K::plural(&()).to_string(),
        }
    }

    /// API group, empty for the core group
    pub fn group(&self) -> &str {
        match self.api_version.split_once('/') {
            Some((group, _)) => group,
            None => "",
        }
    }

    /// API version without the group
    pub fn version(&self) -> &str {
        match self.api_version.split_once('/') {
            Some((_, version)) => version,
            None => &self.api_version,
        }
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)
    }
}

/// Identity of a single stored object
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub kind: ObjectKind,
    /// `None` for cluster scoped objects
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(kind: ObjectKind, name: impl Into<String>, namespace: Option<&str>) -> Self {
        Self {
            kind,
            namespace: namespace.map(str::to_string),
            name: name.into(),
        }
    }

    /// Key of a statically typed Kubernetes resource
    pub fn of<K: Resource<DynamicType = ()>>(
        name: impl Into<String>,
        namespace: Option<&str>,
    ) -> Self {
        Self::new(ObjectKind::of::<K>(), name, namespace)
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.kind, ns, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

// =============================================================================
// Object Store Port
// =============================================================================

/// Port for reading and writing API objects.
///
/// Objects travel as JSON so the trait stays object safe; the typed helpers in
/// [`crate::store`] wrap it for concrete resource types. Absence is reported
/// as an error for which [`crate::Error::is_not_found`] holds, and a create of
/// an existing object as one for which [`crate::Error::is_already_exists`] holds.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Get an object by key
    async fn get(&self, key: &ObjectKey) -> Result<Value>;

    /// List objects of a kind, optionally restricted to a namespace
    async fn list(&self, kind: &ObjectKind, namespace: Option<&str>) -> Result<Vec<Value>>;

    /// Create a new object
    async fn create(&self, key: &ObjectKey, object: Value) -> Result<Value>;

    /// Replace an existing object
    async fn update(&self, key: &ObjectKey, object: Value) -> Result<Value>;

    /// Replace the status of an existing object
    async fn update_status(&self, key: &ObjectKey, status: Value) -> Result<()>;

    /// Delete an object
    async fn delete(&self, key: &ObjectKey) -> Result<()>;
}

// =============================================================================
// Event Sink Port
// =============================================================================

/// Kubernetes event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    Normal,
    Warning,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::Normal => write!(f, "Normal"),
            EventType::Warning => write!(f, "Warning"),
        }
    }
}

/// Port for events attached to the StorageCluster.
///
/// Recording is fire-and-forget; failures are logged by the adapter.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn record(
        &self,
        cluster: &StorageCluster,
        event_type: EventType,
        reason: &str,
        message: &str,
    );
}

// =============================================================================
// Storage Driver Port
// =============================================================================

/// Port for the storage driver capabilities the core consumes
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Driver name
    fn name(&self) -> &str;

    /// Fill in driver defaults on a copy of the cluster
    fn set_defaults(&self, cluster: &mut StorageCluster);

    /// Name Stork uses for this driver.
    ///
    /// An error means the driver has no Stork support.
    fn stork_driver_name(&self) -> Result<String>;

    /// Environment the driver needs in the Stork container
    fn stork_env_list(&self, cluster: &StorageCluster) -> Vec<EnvVar>;

    /// Run one step of the storage teardown
    async fn delete_storage(&self, cluster: &StorageCluster) -> Result<DeleteStatus>;
}

// =============================================================================
// Node Wiper Port
// =============================================================================

/// Aggregate progress of the per-node wipe task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeWiperProgress {
    pub completed: u32,
    pub in_progress: u32,
    pub total: u32,
}

impl NodeWiperProgress {
    /// Every node has been wiped
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.completed == self.total
    }
}

/// Port for the external per-node cleanup task
#[async_trait]
pub trait NodeWiper: Send + Sync {
    /// Aggregate progress; a not-found error means the task was never launched
    async fn progress(&self, cluster: &StorageCluster) -> Result<NodeWiperProgress>;

    /// Launch the task on every node
    async fn launch(
        &self,
        cluster: &StorageCluster,
        image: &str,
        tag: &str,
        remove_data: bool,
    ) -> Result<()>;

    /// Remove the task's own resources
    async fn delete_task(&self, cluster: &StorageCluster) -> Result<()>;

    /// Remove residual cluster metadata left by the driver
    async fn wipe_metadata(&self, cluster: &StorageCluster) -> Result<()>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ObjectStoreRef = Arc<dyn ObjectStore>;
pub type EventSinkRef = Arc<dyn EventSink>;
pub type StorageDriverRef = Arc<dyn StorageDriver>;
pub type NodeWiperRef = Arc<dyn NodeWiper>;

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::api::rbac::v1::ClusterRole;

    #[test]
    fn test_object_kind_of() {
        let kind = ObjectKind::of::<Deployment>();
        assert_eq!(kind.api_version, "apps/v1");
        assert_eq!(kind.kind, "Deployment");
        assert_eq!(kind.plural, "deployments");
        assert_eq!(kind.group(), "apps");
        assert_eq!(kind.version(), "v1");

        let kind = ObjectKind::of::<ConfigMap>();
        assert_eq!(kind.group(), "");
        assert_eq!(kind.version(), "v1");
    }

    #[test]
    fn test_object_key_display() {
        let key = ObjectKey::of::<ConfigMap>("stork-config", Some("kube-test"));
        assert_eq!(key.to_string(), "ConfigMap/kube-test/stork-config");

        let key = ObjectKey::of::<ClusterRole>("stork", None);
        assert_eq!(key.to_string(), "ClusterRole/stork");
    }

    #[test]
    fn test_progress_completion_predicate() {
        let p = NodeWiperProgress { completed: 3, in_progress: 0, total: 3 };
        assert!(p.is_complete());

        let p = NodeWiperProgress { completed: 0, in_progress: 0, total: 0 };
        assert!(!p.is_complete());

        let p = NodeWiperProgress { completed: 2, in_progress: 1, total: 3 };
        assert!(!p.is_complete());
    }

    #[test]
    fn test_event_type_display() {
        assert_eq!(format!("{}", EventType::Warning), "Warning");
        assert_eq!(format!("{}", EventType::Normal), "Normal");
    }
}
