//! Operator configuration
//!
//! Runtime settings handed from the command line into the controller and
//! the components it builds.

use std::time::Duration;

/// Default node wiper image, without tag
pub const DEFAULT_NODE_WIPER_IMAGE: &str = "portworx/px-node-wiper";

/// Default node wiper image tag
pub const DEFAULT_NODE_WIPER_TAG: &str = "latest";

/// Settings shared by the controller and its components
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Name reported on events and used as the field manager
    pub controller_name: String,

    /// Storage driver the components integrate with
    pub driver: String,

    /// Interval between level-triggered re-syncs of a healthy cluster
    pub requeue_interval: Duration,

    /// How often the schema installer polls for `Established`
    pub schema_interval: Duration,

    /// How long the schema installer waits for `Established`
    pub schema_timeout: Duration,

    /// Node wiper image
    pub node_wiper_image: String,

    /// Node wiper image tag
    pub node_wiper_tag: String,

    /// Namespace for the node wiper; the cluster namespace when unset
    pub wiper_namespace: Option<String>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            controller_name: "storage-cluster-operator".to_string(),
            driver: "portworx".to_string(),
            requeue_interval: Duration::from_secs(300),
            schema_interval: Duration::from_secs(5),
            schema_timeout: Duration::from_secs(60),
            node_wiper_image: DEFAULT_NODE_WIPER_IMAGE.to_string(),
            node_wiper_tag: DEFAULT_NODE_WIPER_TAG.to_string(),
            wiper_namespace: None,
        }
    }
}
