//! Component Lifecycle Framework
//!
//! A component owns one slice of the objects installed for a StorageCluster.
//! Components are registered once at startup, initialized with the shared
//! context and then driven by the control loop on every tick:
//!
//! - enabled components are reconciled in registration order
//! - disabled components are deleted and their one-time state reset
//!
//! Components never persist state of their own. Anything they remember
//! (such as "the schema is installed") is an in-memory flag that is safe to
//! lose on restart.

pub mod registry;
pub mod schema;
pub mod stork;

pub use registry::{ComponentRegistry, ComponentRegistryBuilder};
pub use schema::SchemaInstaller;
pub use stork::StorkComponent;

use crate::crd::StorageCluster;
use crate::domain::ports::{EventSinkRef, ObjectStoreRef, StorageDriverRef};
use crate::error::{Error, Result};
use async_trait::async_trait;
use semver::Version;

/// Shared references handed to every component on initialization
#[derive(Clone)]
pub struct ComponentContext {
    pub store: ObjectStoreRef,
    pub k8s_version: Version,
    pub recorder: EventSinkRef,
    pub driver: StorageDriverRef,
}

impl std::fmt::Debug for ComponentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentContext")
            .field("k8s_version", &self.k8s_version)
            .field("driver", &self.driver.name())
            .finish_non_exhaustive()
    }
}

/// Contract every pluggable component implements
#[async_trait]
pub trait Component: Send + Sync {
    /// Store the shared references. Called once before the first tick.
    fn initialize(&mut self, ctx: &ComponentContext);

    /// Whether the component should exist for this cluster
    fn is_enabled(&self, cluster: &StorageCluster) -> bool;

    /// Drive the component's objects toward their desired state.
    ///
    /// Critical errors abort the rest of the tick. Any other error is
    /// reported on the cluster and the next component runs.
    async fn reconcile(&self, cluster: &StorageCluster) -> Result<()>;

    /// Remove every object the component owns, tolerating absence
    async fn delete(&self, cluster: &StorageCluster) -> Result<()>;

    /// Reset one-time flags after the component was deleted
    fn mark_deleted(&self);
}

/// Borrow the context or fail with [`Error::ComponentNotInitialized`]
pub(crate) fn initialized<'a>(
    ctx: &'a Option<ComponentContext>,
    name: &str,
) -> Result<&'a ComponentContext> {
    ctx.as_ref().ok_or_else(|| Error::ComponentNotInitialized {
        name: name.to_string(),
    })
}

/// Parse a Kubernetes server version such as `v1.29.3`, `1.11` or
/// `v1.27.8-eks-8cb36c9`
pub fn parse_kubernetes_version(raw: &str) -> Result<Version> {
    let trimmed = raw.trim().trim_start_matches('v');
    let core_end = trimmed.find(['-', '+']).unwrap_or(trimmed.len());
    let (core, rest) = trimmed.split_at(core_end);

    let padded = match core.split('.').count() {
        1 => format!("{}.0.0{}", core, rest),
        2 => format!("{}.0{}", core, rest),
        _ => trimmed.to_string(),
    };
    Ok(Version::parse(&padded)?)
}
