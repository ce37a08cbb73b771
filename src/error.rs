//! Error types for the Storage Cluster Operator
//!
//! Provides one error type for the control loop, the components it drives,
//! the object store adapters and the teardown workflow.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("Resource already exists: {kind}/{name}")]
    ResourceExists { kind: String, name: String },

    #[error("Resource conflict on {kind}/{name}: {reason}")]
    ResourceConflict {
        kind: String,
        name: String,
        reason: String,
    },

    // =========================================================================
    // Component Errors
    // =========================================================================
    /// Failure that halts the remaining components for this tick
    #[error("Critical component failure: {0}")]
    Critical(#[source] Box<Error>),

    #[error("Component already registered: {name}")]
    ComponentAlreadyRegistered { name: String },

    #[error("Component not initialized: {name}")]
    ComponentNotInitialized { name: String },

    /// Invalid user input on the StorageCluster spec. Displayed verbatim.
    #[error("{0}")]
    InvalidSpec(String),

    #[error("Storage driver {driver} does not support {capability}")]
    NotSupported { driver: String, capability: String },

    #[error("Timed out after {timeout:?} waiting for {what}")]
    Timeout { what: String, timeout: Duration },

    // =========================================================================
    // Teardown Errors
    // =========================================================================
    #[error("Node wiper failed: {0}")]
    NodeWiper(String),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("Quantity parse error: {0}")]
    QuantityParse(String),

    #[error("Version parse error: {0}")]
    VersionParse(#[from] semver::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // =========================================================================
    // Metrics Errors
    // =========================================================================
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Wrap an error as critical, halting the rest of the tick
    pub fn critical(err: Error) -> Self {
        match err {
            Error::Critical(_) => err,
            other => Error::Critical(Box::new(other)),
        }
    }

    /// Whether this error must abort the remaining components
    pub fn is_critical(&self) -> bool {
        matches!(self, Error::Critical(_))
    }

    /// Whether the object store reported the object as absent
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::ResourceNotFound { .. } => true,
            Error::Kube(kube::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }

    /// Whether a create failed because the object already exists
    pub fn is_already_exists(&self) -> bool {
        match self {
            Error::ResourceExists { .. } => true,
            Error::Kube(kube::Error::Api(resp)) => {
                resp.code == 409 && resp.reason == "AlreadyExists"
            }
            _ => false,
        }
    }

    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transient errors - retry with backoff
            Error::Kube(_) | Error::ResourceConflict { .. } | Error::NodeWiper(_) => {
                ErrorAction::RequeueWithBackoff
            }

            // Schema not established yet - give the API server time
            Error::Timeout { .. } => ErrorAction::RequeueAfter(Duration::from_secs(30)),

            Error::Critical(inner) => match inner.action() {
                ErrorAction::NoRequeue => ErrorAction::NoRequeue,
                _ => ErrorAction::RequeueAfter(Duration::from_secs(30)),
            },

            // Configuration/validation errors - don't retry automatically
            Error::Configuration(_)
            | Error::ComponentAlreadyRegistered { .. }
            | Error::InvalidSpec(_)
            | Error::QuantityParse(_)
            | Error::VersionParse(_) => ErrorAction::NoRequeue,

            // All other errors - retry with backoff
            _ => ErrorAction::RequeueWithBackoff,
        }
    }
}

/// Result type alias for the operator
pub type Result<T> = std::result::Result<T, Error>;
