//! In-memory Object Store
//!
//! Keeps objects as JSON in a sorted map. Emulates the API server behaviour
//! the reconciliation core depends on: not-found and already-exists errors,
//! resource versions with optimistic concurrency, and finalizer-gated
//! deletion. Every successful write is counted.

use crate::domain::ports::{ObjectKey, ObjectKind, ObjectStore};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// In-memory object store
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<ObjectKey, Value>>,
    /// Last issued resource version
    version: AtomicU64,
    /// Successful create/update/delete calls
    writes: AtomicU64,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful writes since creation or the last reset
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn reset_writes(&self) {
        self.writes.store(0, Ordering::Relaxed);
    }

    /// Whether an object with this key is stored
    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.objects.read().contains_key(key)
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// Store an object without counting a write
    pub fn seed<K>(&self, key: ObjectKey, object: &K) -> Result<()>
    where
        K: Serialize,
    {
        let mut value = serde_json::to_value(object)?;
        self.stamp(&mut value, None);
        self.objects.write().insert(key, value);
        Ok(())
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    /// Set server populated metadata, carrying identity over from `previous`
    fn stamp(&self, value: &mut Value, previous: Option<&Value>) {
        let version = self.next_version();
        let Some(object) = value.as_object_mut() else {
            return;
        };
        let metadata = object
            .entry("metadata")
            .or_insert_with(|| Value::Object(Default::default()));
        let Some(metadata) = metadata.as_object_mut() else {
            return;
        };

        let previous_meta = previous.and_then(|p| p.get("metadata"));
        for field in ["uid", "creationTimestamp", "deletionTimestamp"] {
            if let Some(v) = previous_meta.and_then(|m| m.get(field)) {
                metadata.insert(field.to_string(), v.clone());
            }
        }
        metadata
            .entry("uid")
            .or_insert_with(|| Value::String(format!("uid-{}", version)));
        metadata
            .entry("creationTimestamp")
            .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));
        metadata.insert("resourceVersion".to_string(), Value::String(version));
    }

    fn not_found(key: &ObjectKey) -> Error {
        Error::ResourceNotFound {
            kind: key.kind.kind.clone(),
            name: key.name.clone(),
        }
    }
}

fn has_finalizers(value: &Value) -> bool {
    value
        .pointer("/metadata/finalizers")
        .and_then(Value::as_array)
        .is_some_and(|f| !f.is_empty())
}

fn is_deleting(value: &Value) -> bool {
    value
        .pointer("/metadata/deletionTimestamp")
        .is_some_and(|t| !t.is_null())
}

fn resource_version(value: &Value) -> Option<&str> {
    value
        .pointer("/metadata/resourceVersion")
        .and_then(Value::as_str)
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, key: &ObjectKey) -> Result<Value> {
        self.objects
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| Self::not_found(key))
    }

    async fn list(&self, kind: &ObjectKind, namespace: Option<&str>) -> Result<Vec<Value>> {
        let objects = self.objects.read();
        Ok(objects
            .iter()
            .filter(|(key, _)| &key.kind == kind)
            .filter(|(key, _)| namespace.is_none() || key.namespace.as_deref() == namespace)
            .map(|(_, value)| value.clone())
            .collect())
    }

    async fn create(&self, key: &ObjectKey, mut object: Value) -> Result<Value> {
        let mut objects = self.objects.write();
        if objects.contains_key(key) {
            return Err(Error::ResourceExists {
                kind: key.kind.kind.clone(),
                name: key.name.clone(),
            });
        }

        self.stamp(&mut object, None);
        objects.insert(key.clone(), object.clone());
        self.writes.fetch_add(1, Ordering::Relaxed);
        debug!("Created {}", key);
        Ok(object)
    }

    async fn update(&self, key: &ObjectKey, mut object: Value) -> Result<Value> {
        let mut objects = self.objects.write();
        let existing = objects.get(key).ok_or_else(|| Self::not_found(key))?;

        if let Some(sent) = resource_version(&object) {
            if Some(sent) != resource_version(existing) {
                return Err(Error::ResourceConflict {
                    kind: key.kind.kind.clone(),
                    name: key.name.clone(),
                    reason: "the object has been modified".into(),
                });
            }
        }

        let previous = existing.clone();
        self.stamp(&mut object, Some(&previous));
        self.writes.fetch_add(1, Ordering::Relaxed);

        // Removing the last finalizer of a deleting object completes the delete
        if is_deleting(&object) && !has_finalizers(&object) {
            objects.remove(key);
            debug!("Finalized {}", key);
        } else {
            objects.insert(key.clone(), object.clone());
            debug!("Updated {}", key);
        }
        Ok(object)
    }

    async fn update_status(&self, key: &ObjectKey, status: Value) -> Result<()> {
        let version = self.next_version();
        let mut objects = self.objects.write();
        let existing = objects.get_mut(key).ok_or_else(|| Self::not_found(key))?;

        if let Some(object) = existing.as_object_mut() {
            object.insert("status".to_string(), status);
        }
        if let Some(metadata) = existing.get_mut("metadata").and_then(Value::as_object_mut) {
            metadata.insert("resourceVersion".to_string(), Value::String(version));
        }
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        let mut objects = self.objects.write();
        let existing = objects.get_mut(key).ok_or_else(|| Self::not_found(key))?;

        if has_finalizers(existing) {
            if !is_deleting(existing) {
                let metadata = existing.get_mut("metadata").and_then(Value::as_object_mut);
                if let Some(metadata) = metadata {
                    metadata.insert(
                        "deletionTimestamp".to_string(),
                        Value::String(Utc::now().to_rfc3339()),
                    );
                }
            }
        } else {
            objects.remove(key);
        }
        self.writes.fetch_add(1, Ordering::Relaxed);
        debug!("Deleted {}", key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use serde_json::json;

    fn key(name: &str) -> ObjectKey {
        ObjectKey::of::<ConfigMap>(name, Some("kube-test"))
    }

    fn object(name: &str) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": name, "namespace": "kube-test" }
        })
    }

    #[tokio::test]
    async fn test_create_conflict() {
        let store = MemoryObjectStore::new();
        store.create(&key("a"), object("a")).await.unwrap();

        let err = store.create(&key("a"), object("a")).await.unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn test_update_missing() {
        let store = MemoryObjectStore::new();
        let err = store.update(&key("a"), object("a")).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn test_stale_resource_version_conflicts() {
        let store = MemoryObjectStore::new();
        let created = store.create(&key("a"), object("a")).await.unwrap();

        // First update with the current version succeeds
        store.update(&key("a"), created.clone()).await.unwrap();

        // Second update with the stale version is rejected
        let err = store.update(&key("a"), created).await.unwrap_err();
        assert_matches::assert_matches!(err, Error::ResourceConflict { .. });
    }

    #[tokio::test]
    async fn test_update_keeps_identity() {
        let store = MemoryObjectStore::new();
        let created = store.create(&key("a"), object("a")).await.unwrap();
        let uid = created["metadata"]["uid"].clone();

        let updated = store.update(&key("a"), object("a")).await.unwrap();
        assert_eq!(updated["metadata"]["uid"], uid);
        assert_ne!(
            updated["metadata"]["resourceVersion"],
            created["metadata"]["resourceVersion"]
        );
    }

    #[tokio::test]
    async fn test_finalizer_gated_delete() {
        let store = MemoryObjectStore::new();
        let mut obj = object("a");
        obj["metadata"]["finalizers"] = json!(["example.com/hold"]);
        store.create(&key("a"), obj).await.unwrap();

        store.delete(&key("a")).await.unwrap();
        let held = store.get(&key("a")).await.unwrap();
        assert!(is_deleting(&held));

        let mut released = held.clone();
        released["metadata"]["finalizers"] = json!([]);
        store.update(&key("a"), released).await.unwrap();
        assert!(!store.contains(&key("a")));
    }

    #[tokio::test]
    async fn test_update_status() {
        let store = MemoryObjectStore::new();
        store.create(&key("a"), object("a")).await.unwrap();
        store
            .update_status(&key("a"), json!({ "phase": "Online" }))
            .await
            .unwrap();

        let stored = store.get(&key("a")).await.unwrap();
        assert_eq!(stored["status"]["phase"], "Online");
    }

    #[tokio::test]
    async fn test_seed_does_not_count() {
        let store = MemoryObjectStore::new();
        store.seed(key("a"), &object("a")).unwrap();
        assert_eq!(store.writes(), 0);
        assert_eq!(store.len(), 1);
    }
}
