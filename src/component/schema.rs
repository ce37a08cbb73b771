//! VolumePlacementStrategy schema installer
//!
//! Registers the `volumeplacementstrategies.portworx.io` custom resource
//! definition once per process and waits for the API server to report it
//! `Established`. Any failure here is critical: components that follow may
//! depend on the schema.

use super::{initialized, Component, ComponentContext};
use crate::crd::StorageCluster;
use crate::error::{Error, Result};
use crate::store;
use async_trait::async_trait;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    CustomResourceDefinition, CustomResourceDefinitionNames, CustomResourceDefinitionSpec,
    CustomResourceDefinitionVersion, CustomResourceValidation, JSONSchemaProps,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

/// Registered name of the schema installer
pub const COMPONENT_NAME: &str = "VolumePlacementStrategy";

pub const VPS_GROUP: &str = "portworx.io";
pub const VPS_PLURAL: &str = "volumeplacementstrategies";
pub const VPS_KIND: &str = "VolumePlacementStrategy";
pub const VPS_STORAGE_VERSION: &str = "v1beta2";
pub const VPS_LEGACY_VERSION: &str = "v1beta1";

/// Default poll interval while waiting for the schema
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Default deadline for the schema to become established
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Installs the VolumePlacementStrategy schema
pub struct SchemaInstaller {
    ctx: Option<ComponentContext>,
    installed: AtomicBool,
    interval: Duration,
    timeout: Duration,
}

impl Default for SchemaInstaller {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaInstaller {
    pub fn new() -> Self {
        Self::with_timing(DEFAULT_INTERVAL, DEFAULT_TIMEOUT)
    }

    /// Override the poll interval and deadline
    pub fn with_timing(interval: Duration, timeout: Duration) -> Self {
        Self {
            ctx: None,
            installed: AtomicBool::new(false),
            interval,
            timeout,
        }
    }

    /// Full name of the definition
    pub fn crd_name() -> String {
        format!("{}.{}", VPS_PLURAL, VPS_GROUP)
    }

    /// The definition to register
    pub fn definition() -> CustomResourceDefinition {
        let schema = CustomResourceValidation {
            open_api_v3_schema: Some(JSONSchemaProps {
                type_: Some("object".to_string()),
                x_kubernetes_preserve_unknown_fields: Some(true),
                ..Default::default()
            }),
        };
        let version = |name: &str, current: bool| CustomResourceDefinitionVersion {
            name: name.to_string(),
            served: current,
            storage: current,
            schema: Some(schema.clone()),
            ..Default::default()
        };

        CustomResourceDefinition {
            metadata: ObjectMeta {
                name: Some(Self::crd_name()),
                ..Default::default()
            },
            spec: CustomResourceDefinitionSpec {
                group: VPS_GROUP.to_string(),
                names: CustomResourceDefinitionNames {
                    kind: VPS_KIND.to_string(),
                    list_kind: Some(format!("{}List", VPS_KIND)),
                    plural: VPS_PLURAL.to_string(),
                    singular: Some("volumeplacementstrategy".to_string()),
                    short_names: Some(vec!["vps".to_string(), "vp".to_string()]),
                    ..Default::default()
                },
                scope: "Cluster".to_string(),
                versions: vec![
                    version(VPS_STORAGE_VERSION, true),
                    version(VPS_LEGACY_VERSION, false),
                ],
                ..Default::default()
            },
            status: None,
        }
    }

    pub fn is_installed(&self) -> bool {
        self.installed.load(Ordering::SeqCst)
    }

    async fn install(&self, ctx: &ComponentContext) -> Result<()> {
        let definition = Self::definition();
        match store::create(ctx.store.as_ref(), &definition).await {
            Ok(_) => info!("Created CRD {}", Self::crd_name()),
            Err(e) if e.is_already_exists() => debug!("CRD {} already exists", Self::crd_name()),
            Err(e) => return Err(e),
        }
        self.wait_established(ctx).await
    }

    async fn wait_established(&self, ctx: &ComponentContext) -> Result<()> {
        let name = Self::crd_name();
        let deadline = Instant::now() + self.timeout;
        loop {
            let crd: CustomResourceDefinition = store::get(ctx.store.as_ref(), &name, None).await?;
            if is_established(&crd) {
                info!("CRD {} is established", name);
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout {
                    what: format!("CRD {} to be established", name),
                    timeout: self.timeout,
                });
            }
            debug!("Waiting for CRD {} to be established", name);
            tokio::time::sleep(self.interval).await;
        }
    }
}

/// Whether the API server reports the definition as established
pub fn is_established(crd: &CustomResourceDefinition) -> bool {
    crd.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Established" && c.status == "True")
        })
}

#[async_trait]
impl Component for SchemaInstaller {
    fn initialize(&mut self, ctx: &ComponentContext) {
        self.ctx = Some(ctx.clone());
    }

    fn is_enabled(&self, _cluster: &StorageCluster) -> bool {
        true
    }

    #[instrument(skip_all, fields(component = COMPONENT_NAME))]
    async fn reconcile(&self, _cluster: &StorageCluster) -> Result<()> {
        if self.is_installed() {
            return Ok(());
        }
        let ctx = initialized(&self.ctx, COMPONENT_NAME).map_err(Error::critical)?;
        self.install(ctx).await.map_err(Error::critical)?;
        self.installed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, _cluster: &StorageCluster) -> Result<()> {
        // The schema is left installed
        Ok(())
    }

    fn mark_deleted(&self) {
        self.installed.store(false, Ordering::SeqCst);
    }
}
