//! Kubernetes Object Store
//!
//! Reads and writes objects through the API server using untyped
//! `DynamicObject`s, so one adapter serves every kind the core manages.

use crate::domain::ports::{ObjectKey, ObjectKind, ObjectStore};
use crate::error::{Error, Result};
use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::core::ApiResource;
use kube::Client;
use serde_json::{json, Value};
use tracing::debug;

/// Adapter for the Kubernetes API server
#[derive(Clone)]
pub struct KubeObjectStore {
    client: Client,
}

impl KubeObjectStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, kind: &ObjectKind, namespace: Option<&str>) -> Api<DynamicObject> {
        let resource = ApiResource {
            group: kind.group().to_string(),
            version: kind.version().to_string(),
            api_version: kind.api_version.clone(),
            kind: kind.kind.clone(),
            plural: kind.plural.clone(),
        };
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &resource),
            None => Api::all_with(self.client.clone(), &resource),
        }
    }
}

/// Classify API errors into the store's error vocabulary
fn map_error(err: kube::Error, key: &ObjectKey) -> Error {
    match &err {
        kube::Error::Api(resp) if resp.code == 404 => Error::ResourceNotFound {
            kind: key.kind.kind.clone(),
            name: key.name.clone(),
        },
        kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
            Error::ResourceExists {
                kind: key.kind.kind.clone(),
                name: key.name.clone(),
            }
        }
        kube::Error::Api(resp) if resp.code == 409 => Error::ResourceConflict {
            kind: key.kind.kind.clone(),
            name: key.name.clone(),
            reason: resp.message.clone(),
        },
        _ => Error::Kube(err),
    }
}

#[async_trait]
impl ObjectStore for KubeObjectStore {
    async fn get(&self, key: &ObjectKey) -> Result<Value> {
        let api = self.api(&key.kind, key.namespace.as_deref());
        let object = api.get(&key.name).await.map_err(|e| map_error(e, key))?;
        Ok(serde_json::to_value(object)?)
    }

    async fn list(&self, kind: &ObjectKind, namespace: Option<&str>) -> Result<Vec<Value>> {
        let api = self.api(kind, namespace);
        let list = api.list(&ListParams::default()).await?;
        list.items
            .into_iter()
            .map(|object| serde_json::to_value(object).map_err(Error::from))
            .collect()
    }

    async fn create(&self, key: &ObjectKey, object: Value) -> Result<Value> {
        let api = self.api(&key.kind, key.namespace.as_deref());
        let object: DynamicObject = serde_json::from_value(object)?;
        let created = api
            .create(&PostParams::default(), &object)
            .await
            .map_err(|e| map_error(e, key))?;
        debug!("Created {}", key);
        Ok(serde_json::to_value(created)?)
    }

    async fn update(&self, key: &ObjectKey, object: Value) -> Result<Value> {
        let api = self.api(&key.kind, key.namespace.as_deref());
        let object: DynamicObject = serde_json::from_value(object)?;
        let updated = api
            .replace(&key.name, &PostParams::default(), &object)
            .await
            .map_err(|e| map_error(e, key))?;
        debug!("Updated {}", key);
        Ok(serde_json::to_value(updated)?)
    }

    async fn update_status(&self, key: &ObjectKey, status: Value) -> Result<()> {
        let api = self.api(&key.kind, key.namespace.as_deref());
        api.patch_status(
            &key.name,
            &PatchParams::default(),
            &Patch::Merge(json!({ "status": status })),
        )
        .await
        .map_err(|e| map_error(e, key))?;
        Ok(())
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        let api = self.api(&key.kind, key.namespace.as_deref());
        api.delete(&key.name, &DeleteParams::background())
            .await
            .map_err(|e| map_error(e, key))?;
        debug!("Deleted {}", key);
        Ok(())
    }
}
