//! Teardown Workflow
//!
//! Observes the per-node wipe task and reports how far the teardown of a
//! deleted StorageCluster has come. Re-entered every tick until it reports
//! `Completed`:
//!
//! ```text
//!   not started ──launch──▶ InProgress ("Started node wiper daemonset")
//!        │                        │
//!        └─launch fails─▶ Failed  ▼
//!                       InProgress (counters) ──all nodes done──▶ Completed
//! ```
//!
//! The decision is [`plan`], a pure function of the observation. The
//! workflow executes the side effects it returns.

pub mod node_wiper;

pub use node_wiper::StoreNodeWiper;

use crate::crd::{DeleteStatus, DeleteStrategyType, StorageCluster};
use crate::domain::ports::{NodeWiperProgress, NodeWiperRef};
use crate::error::Result;
use kube::ResourceExt;
use tracing::{error, info, instrument};

/// What was seen of the wipe task this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// The task has never been launched
    NotStarted,
    /// The task exists and reported these counters
    Running(NodeWiperProgress),
}

/// Best-effort cleanup after every node has been wiped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cleanup {
    DeleteTask,
    WipeMetadata,
}

/// Next step decided from an observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// Start the task; the status depends on whether the launch succeeds
    Launch { remove_data: bool },
    /// Teardown is done once the cleanups have been attempted
    Complete { cleanup: Vec<Cleanup> },
    /// Still running
    Wait(DeleteStatus),
}

/// Decide the next teardown step
pub fn plan(observation: Observation, strategy: DeleteStrategyType) -> Plan {
    match observation {
        Observation::NotStarted => Plan::Launch {
            remove_data: strategy == DeleteStrategyType::UninstallAndWipe,
        },
        Observation::Running(progress) if progress.is_complete() => Plan::Complete {
            cleanup: vec![Cleanup::DeleteTask, Cleanup::WipeMetadata],
        },
        Observation::Running(progress) => Plan::Wait(DeleteStatus::in_progress(format!(
            "Wipe operation still in progress: Completed [{}] In Progress [{}] Total [{}]",
            progress.completed, progress.in_progress, progress.total
        ))),
    }
}

/// Status after attempting a launch
pub fn launch_status(result: Result<()>) -> DeleteStatus {
    match result {
        Ok(()) => DeleteStatus::in_progress("Started node wiper daemonset"),
        Err(e) => DeleteStatus::failed(format!("Failed to run node wiper: {}", e)),
    }
}

/// Executes [`plan`] against a node wiper
#[derive(Clone)]
pub struct TeardownWorkflow {
    wiper: NodeWiperRef,
    image: String,
    tag: String,
}

impl TeardownWorkflow {
    pub fn new(wiper: NodeWiperRef, image: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            wiper,
            image: image.into(),
            tag: tag.into(),
        }
    }

    /// Observe the task and run one step.
    ///
    /// Only a failure to observe the task is returned as an error; launch
    /// failures become a `Failed` status and cleanup failures are logged.
    #[instrument(skip_all, fields(cluster = %cluster.name_any()))]
    pub async fn step(&self, cluster: &StorageCluster) -> Result<DeleteStatus> {
        let observation = match self.wiper.progress(cluster).await {
            Ok(progress) => Observation::Running(progress),
            Err(e) if e.is_not_found() => Observation::NotStarted,
            Err(e) => return Err(e),
        };

        match plan(observation, cluster.delete_strategy()) {
            Plan::Launch { remove_data } => {
                info!(remove_data, "Launching node wiper {}:{}", self.image, self.tag);
                let result = self
                    .wiper
                    .launch(cluster, &self.image, &self.tag, remove_data)
                    .await;
                if let Err(e) = &result {
                    error!("Failed to run node wiper: {}", e);
                }
                Ok(launch_status(result))
            }
            Plan::Complete { cleanup } => {
                for action in cleanup {
                    let result = match action {
                        Cleanup::DeleteTask => self.wiper.delete_task(cluster).await,
                        Cleanup::WipeMetadata => self.wiper.wipe_metadata(cluster).await,
                    };
                    if let Err(e) = result {
                        error!(?action, "Teardown cleanup failed: {}", e);
                    }
                }
                info!("All nodes wiped");
                Ok(DeleteStatus::completed())
            }
            Plan::Wait(status) => Ok(status),
        }
    }
}
