//! Event Recording
//!
//! Adapters for the [`EventSink`] port. Events are attached to the
//! StorageCluster and are how every soft failure is surfaced to users
//! (`kubectl describe storagecluster`).

use crate::crd::StorageCluster;
use crate::domain::ports::{EventSink, EventType};
use async_trait::async_trait;
use kube::runtime::events::{Event, EventType as KubeEventType, Recorder, Reporter};
use kube::{Client, Resource, ResourceExt};
use parking_lot::Mutex;
use tracing::{info, warn};

/// Well-known event reason strings
pub mod reasons {
    /// A component failed to install or update
    pub const FAILED_COMPONENT: &str = "FailedComponent";
    /// Teardown of the storage on the nodes failed
    pub const FAILED_UNINSTALL: &str = "FailedUninstall";
    /// Teardown finished and the cluster may go away
    pub const UNINSTALL_COMPLETED: &str = "UninstallCompleted";
}

/// Action recorded on every event
const RECONCILE_ACTION: &str = "Reconcile";

// =============================================================================
// Kubernetes Recorder
// =============================================================================

/// Production sink publishing through `kube::runtime::events::Recorder`
pub struct KubeEventRecorder {
    client: Client,
    reporter: Reporter,
}

impl KubeEventRecorder {
    /// The controller name appears as the reporting component on events
    pub fn new(client: Client, controller_name: &str) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: controller_name.to_string(),
                instance: std::env::var("POD_NAME").ok(),
            },
        }
    }
}

#[async_trait]
impl EventSink for KubeEventRecorder {
    async fn record(
        &self,
        cluster: &StorageCluster,
        event_type: EventType,
        reason: &str,
        message: &str,
    ) {
        let recorder = Recorder::new(
            self.client.clone(),
            self.reporter.clone(),
            cluster.object_ref(&()),
        );
        let event = Event {
            type_: match event_type {
                EventType::Normal => KubeEventType::Normal,
                EventType::Warning => KubeEventType::Warning,
            },
            reason: reason.to_string(),
            note: Some(message.to_string()),
            action: RECONCILE_ACTION.to_string(),
            secondary: None,
        };
        if let Err(e) = recorder.publish(event).await {
            warn!(
                cluster = %cluster.name_any(),
                reason,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

// =============================================================================
// Memory Recorder
// =============================================================================

/// An event kept by [`MemoryRecorder`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub object: String,
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
}

impl std::fmt::Display for RecordedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.event_type, self.reason, self.message)
    }
}

/// Sink that keeps events in memory and logs them.
///
/// Used in standalone mode and by tests.
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    events: Mutex<Vec<RecordedEvent>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded events
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    /// Take all recorded events
    pub fn drain(&self) -> Vec<RecordedEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

#[async_trait]
impl EventSink for MemoryRecorder {
    async fn record(
        &self,
        cluster: &StorageCluster,
        event_type: EventType,
        reason: &str,
        message: &str,
    ) {
        let event = RecordedEvent {
            object: cluster.name_any(),
            event_type,
            reason: reason.to_string(),
            message: message.to_string(),
        };
        match event_type {
            EventType::Normal => info!(cluster = %event.object, "{}", event),
            EventType::Warning => warn!(cluster = %event.object, "{}", event),
        }
        self.events.lock().push(event);
    }
}
