//! Custom Resource Definitions
//!
//! This module contains the StorageCluster CRD and the types carried in its
//! spec and status.

pub mod storage_cluster;

pub use storage_cluster::*;
