//! Object Store Adapters
//!
//! Provides adapters for the [`ObjectStore`] port:
//! - Kubernetes: `kube::Api<DynamicObject>` against a live API server
//! - Memory: in-process map used by standalone mode and tests
//!
//! The typed helpers below are how the rest of the crate talks to a store.

pub mod kubernetes;
pub mod memory;

pub use kubernetes::KubeObjectStore;
pub use memory::MemoryObjectStore;

use crate::domain::ports::{ObjectKey, ObjectKind, ObjectStore};
use crate::error::{Error, Result};
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;

fn key_of<K>(object: &K) -> Result<ObjectKey>
where
    K: Resource<DynamicType = ()>,
{
    let name = object
        .meta()
        .name
        .clone()
        .ok_or_else(|| Error::Internal(format!("{} has no name", K::kind(&()))))?;
    Ok(ObjectKey::of::<K>(name, object.meta().namespace.as_deref()))
}

/// Get a typed object
pub async fn get<K>(store: &dyn ObjectStore, name: &str, namespace: Option<&str>) -> Result<K>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    let value = store.get(&ObjectKey::of::<K>(name, namespace)).await?;
    Ok(serde_json::from_value(value)?)
}

/// Get a typed object, mapping absence to `None`
pub async fn get_opt<K>(
    store: &dyn ObjectStore,
    name: &str,
    namespace: Option<&str>,
) -> Result<Option<K>>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    match get(store, name, namespace).await {
        Ok(object) => Ok(Some(object)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// List typed objects
pub async fn list<K>(store: &dyn ObjectStore, namespace: Option<&str>) -> Result<Vec<K>>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    store
        .list(&ObjectKind::of::<K>(), namespace)
        .await?
        .into_iter()
        .map(|value| serde_json::from_value(value).map_err(Error::from))
        .collect()
}

/// Create a typed object
pub async fn create<K>(store: &dyn ObjectStore, object: &K) -> Result<K>
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
{
    let key = key_of(object)?;
    let created = store.create(&key, serde_json::to_value(object)?).await?;
    Ok(serde_json::from_value(created)?)
}

/// Replace a typed object
pub async fn update<K>(store: &dyn ObjectStore, object: &K) -> Result<K>
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
{
    let key = key_of(object)?;
    let updated = store.update(&key, serde_json::to_value(object)?).await?;
    Ok(serde_json::from_value(updated)?)
}

/// Replace the status of a typed object
pub async fn update_status<K, S>(store: &dyn ObjectStore, object: &K, status: &S) -> Result<()>
where
    K: Resource<DynamicType = ()>,
    S: Serialize,
{
    let key = key_of(object)?;
    store.update_status(&key, serde_json::to_value(status)?).await
}

/// Delete a typed object
pub async fn delete<K>(store: &dyn ObjectStore, name: &str, namespace: Option<&str>) -> Result<()>
where
    K: Resource<DynamicType = ()>,
{
    store.delete(&ObjectKey::of::<K>(name, namespace)).await
}

/// Delete a typed object, tolerating absence. Returns whether it existed.
pub async fn delete_if_exists<K>(
    store: &dyn ObjectStore,
    name: &str,
    namespace: Option<&str>,
) -> Result<bool>
where
    K: Resource<DynamicType = ()>,
{
    match delete::<K>(store, name, namespace).await {
        Ok(()) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn config_map(name: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some("kube-test".into()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("key".to_string(), "value".to_string())])),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_typed_create_get_delete() {
        let store = MemoryObjectStore::new();

        create(&store, &config_map("cm")).await.unwrap();
        let fetched: ConfigMap = get(&store, "cm", Some("kube-test")).await.unwrap();
        assert_eq!(fetched.data.unwrap()["key"], "value");
        assert!(fetched.metadata.resource_version.is_some());

        assert!(delete_if_exists::<ConfigMap>(&store, "cm", Some("kube-test")).await.unwrap());
        assert!(!delete_if_exists::<ConfigMap>(&store, "cm", Some("kube-test")).await.unwrap());

        let err = get::<ConfigMap>(&store, "cm", Some("kube-test")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_get_opt_maps_absence() {
        let store = MemoryObjectStore::new();
        let missing: Option<ConfigMap> = get_opt(&store, "cm", Some("kube-test")).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_create_without_name_fails() {
        let store = MemoryObjectStore::new();
        let err = create(&store, &ConfigMap::default()).await.unwrap_err();
        assert_matches::assert_matches!(err, Error::Internal(_));
    }

    #[tokio::test]
    async fn test_list_by_namespace() {
        let store = MemoryObjectStore::new();
        create(&store, &config_map("a")).await.unwrap();
        create(&store, &config_map("b")).await.unwrap();

        let mut other = config_map("c");
        other.metadata.namespace = Some("other".into());
        create(&store, &other).await.unwrap();

        let in_ns: Vec<ConfigMap> = list(&store, Some("kube-test")).await.unwrap();
        assert_eq!(in_ns.len(), 2);

        let all: Vec<ConfigMap> = list(&store, None).await.unwrap();
        assert_eq!(all.len(), 3);
    }
}
