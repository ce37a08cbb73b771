//! Storage Drivers
//!
//! Provides the storage driver implementations:
//! - Portworx: Stork integration and node-wipe teardown

pub mod portworx;

pub use portworx::PortworxDriver;

use crate::config::OperatorConfig;
use crate::domain::ports::{NodeWiperRef, StorageDriverRef};
use crate::error::{Error, Result};
use std::sync::Arc;

/// Factory for creating storage drivers
pub struct DriverFactory;

impl DriverFactory {
    /// Create a driver by name
    pub fn create(
        name: &str,
        wiper: NodeWiperRef,
        config: &OperatorConfig,
    ) -> Result<StorageDriverRef> {
        match name.to_lowercase().as_str() {
            portworx::DRIVER_NAME | "pxd" => Ok(Arc::new(PortworxDriver::new(
                wiper,
                &config.node_wiper_image,
                &config.node_wiper_tag,
            ))),
            _ => Err(Error::Configuration(format!(
                "unknown storage driver: {}",
                name
            ))),
        }
    }
}
