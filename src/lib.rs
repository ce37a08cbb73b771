//! Storage Cluster Operator - Reconciliation Core
//!
//! Drives the objects installed for a `StorageCluster` custom resource toward
//! the state computed from its spec, and tears the storage down on the nodes
//! before the resource is allowed to go away.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Control Loop (Controller)                       │
//! │         finalizer · driver defaults · status · Warning events           │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                         Component Registry                              │
//! │  ┌───────────────────────────┐  ┌────────────────────────────────────┐  │
//! │  │     SchemaInstaller       │  │          StorkComponent            │  │
//! │  │  (VolumePlacementStrategy)│  │  (config map, RBAC, service,       │  │
//! │  │                           │  │   deployments, storage class)      │  │
//! │  └───────────────────────────┘  └─────────────────┬──────────────────┘  │
//! │                                                   │                     │
//! │                          ┌────────────────────────┴──────────┐          │
//! │                          │  Convergence (drift, env, args,   │          │
//! │                          │  image registry, CPU quantities)  │          │
//! │                          └────────────────────────┬──────────┘          │
//! ├───────────────────────────────────────────────────┼─────────────────────┤
//! │  Storage Driver (Portworx) ── Teardown Workflow ──┤── Node Wiper        │
//! ├───────────────────────────────────────────────────┴─────────────────────┤
//! │                   Ports: ObjectStore · EventSink                        │
//! │         Kubernetes adapters              In-memory adapters             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controller`]: Control loop and its kube-runtime wiring
//! - [`component`]: Component contract, registry and built-in components
//! - [`convergence`]: Desired/live diffing and desired state helpers
//! - [`teardown`]: Node wipe state machine
//! - [`driver`]: Storage driver implementations
//! - [`store`]: Object store adapters
//! - [`events`]: Event sink adapters
//! - [`crd`]: Custom Resource Definitions
//! - [`domain`]: Core port definitions
//! - [`error`]: Error types and handling

pub mod component;
pub mod config;
pub mod controller;
pub mod convergence;
pub mod crd;
pub mod domain;
pub mod driver;
pub mod error;
pub mod events;
pub mod store;
pub mod teardown;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use component::{
    Component, ComponentContext, ComponentRegistry, ComponentRegistryBuilder, SchemaInstaller,
    StorkComponent,
};

pub use config::OperatorConfig;

pub use controller::{default_components, Controller, Metrics, SyncOutcome};

pub use crd::{
    ClusterPhase, DeleteStatus, DeleteStatusType, DeleteStrategyType, StorageCluster,
    StorageClusterSpec, StorageClusterStatus, StorkSpec,
};

pub use domain::ports::{
    EventSink, EventType, NodeWiper, NodeWiperProgress, ObjectKey, ObjectKind, ObjectStore,
    StorageDriver,
};

pub use driver::{DriverFactory, PortworxDriver};

pub use error::{Error, ErrorAction, Result};

pub use events::{KubeEventRecorder, MemoryRecorder};

pub use store::{KubeObjectStore, MemoryObjectStore};

pub use teardown::{StoreNodeWiper, TeardownWorkflow};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
