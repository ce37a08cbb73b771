//! Resource Convergence Engine
//!
//! Drives each owned child object toward its desired state:
//!
//! 1. read the live object by its deterministic name
//! 2. create it with the full desired state when absent
//! 3. otherwise copy every field the operator owns from the desired object
//!    onto the live one and write it back only if something changed
//!
//! Fields the operator does not own are left as the API server or other
//! actors set them. Out-of-band edits to owned fields are reverted on the
//! next tick.

pub mod args;
pub mod drift;
pub mod env;
pub mod image;
pub mod quantity;

pub use args::*;
pub use drift::*;
pub use env::*;
pub use image::*;
pub use quantity::*;

use crate::domain::ports::ObjectStore;
use crate::error::{Error, Result};
use crate::store;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::Resource;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// What [`apply`] did to the live object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Converge one object toward `desired`
pub async fn apply<K>(store: &dyn ObjectStore, desired: &K) -> Result<ApplyOutcome>
where
    K: Drift,
{
    let name = desired
        .meta()
        .name
        .clone()
        .ok_or_else(|| Error::Internal(format!("desired {} has no name", K::kind(&()))))?;
    let namespace = desired.meta().namespace.clone();

    let Some(mut live) = store::get_opt::<K>(store, &name, namespace.as_deref()).await? else {
        store::create(store, desired).await?;
        info!("Created {} {}", K::kind(&()), name);
        return Ok(ApplyOutcome::Created);
    };

    let mut changed = merge_metadata(live.meta_mut(), desired.meta());
    changed |= live.reconcile_owned(desired);
    if !changed {
        debug!("{} {} is up to date", K::kind(&()), name);
        return Ok(ApplyOutcome::Unchanged);
    }

    store::update(store, &live).await?;
    info!("Updated {} {}", K::kind(&()), name);
    Ok(ApplyOutcome::Updated)
}

/// Remove one object, tolerating absence
pub async fn remove<K>(store: &dyn ObjectStore, name: &str, namespace: Option<&str>) -> Result<()>
where
    K: Resource<DynamicType = ()>,
{
    if store::delete_if_exists::<K>(store, name, namespace).await? {
        info!("Deleted {} {}", K::kind(&()), name);
    }
    Ok(())
}

/// Merge the operator's labels, annotations and owner reference into `live`
fn merge_metadata(live: &mut ObjectMeta, desired: &ObjectMeta) -> bool {
    let mut changed = merge_entries(&mut live.labels, desired.labels.as_ref());
    changed |= merge_entries(&mut live.annotations, desired.annotations.as_ref());
    for owner in desired.owner_references.iter().flatten() {
        changed |= merge_owner(&mut live.owner_references, owner);
    }
    changed
}

/// Insert every desired entry, leaving foreign keys alone
pub(crate) fn merge_entries(
    live: &mut Option<BTreeMap<String, String>>,
    desired: Option<&BTreeMap<String, String>>,
) -> bool {
    let Some(desired) = desired.filter(|d| !d.is_empty()) else {
        return false;
    };
    let live = live.get_or_insert_with(BTreeMap::new);
    let mut changed = false;
    for (key, value) in desired {
        if live.get(key) != Some(value) {
            live.insert(key.clone(), value.clone());
            changed = true;
        }
    }
    changed
}

/// Ensure `owner` is referenced; a stale reference to the same owner name is replaced
fn merge_owner(live: &mut Option<Vec<OwnerReference>>, owner: &OwnerReference) -> bool {
    let refs = live.get_or_insert_with(Vec::new);
    if refs.iter().any(|r| r == owner) {
        return false;
    }
    match refs
        .iter_mut()
        .find(|r| r.kind == owner.kind && r.name == owner.name)
    {
        Some(stale) => *stale = owner.clone(),
        None => refs.push(owner.clone()),
    }
    true
}

/// Overwrite `live` with `desired` when they differ
pub(crate) fn set_if_changed<T: PartialEq + Clone>(live: &mut T, desired: &T) -> bool {
    if live != desired {
        *live = desired.clone();
        true
    } else {
        false
    }
}
