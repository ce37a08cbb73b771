//! Owned-field drift handling per child kind
//!
//! Each impl copies the fields the operator owns from the desired object onto
//! the live one and reports whether anything changed. Everything else on the
//! live object (defaults filled in by the API server, fields set by other
//! controllers) is preserved.

use super::env::same_env;
use super::{merge_entries, set_if_changed};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Container, PodSpec, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use k8s_openapi::api::storage::v1::StorageClass;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A child kind the convergence engine knows how to correct
pub trait Drift:
    Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync
{
    /// Copy owned fields from `desired` onto `self`; returns true on any change
    fn reconcile_owned(&mut self, desired: &Self) -> bool;
}

impl Drift for ServiceAccount {
    fn reconcile_owned(&mut self, _desired: &Self) -> bool {
        // Only metadata is owned
        false
    }
}

impl Drift for ClusterRole {
    fn reconcile_owned(&mut self, desired: &Self) -> bool {
        set_if_changed(&mut self.rules, &desired.rules)
    }
}

impl Drift for ClusterRoleBinding {
    fn reconcile_owned(&mut self, desired: &Self) -> bool {
        let mut changed = set_if_changed(&mut self.subjects, &desired.subjects);
        changed |= set_if_changed(&mut self.role_ref, &desired.role_ref);
        changed
    }
}

impl Drift for ConfigMap {
    fn reconcile_owned(&mut self, desired: &Self) -> bool {
        set_if_changed(&mut self.data, &desired.data)
    }
}

impl Drift for StorageClass {
    fn reconcile_owned(&mut self, desired: &Self) -> bool {
        let mut changed = set_if_changed(&mut self.provisioner, &desired.provisioner);
        changed |= set_if_changed(&mut self.parameters, &desired.parameters);
        changed
    }
}

impl Drift for Service {
    fn reconcile_owned(&mut self, desired: &Self) -> bool {
        let Some(want) = &desired.spec else {
            return false;
        };
        let Some(live) = self.spec.as_mut() else {
            self.spec = Some(want.clone());
            return true;
        };

        let mut changed = set_if_changed(&mut live.ports, &want.ports);
        changed |= set_if_changed(&mut live.selector, &want.selector);
        if want.type_.is_some() {
            changed |= set_if_changed(&mut live.type_, &want.type_);
        }
        changed
    }
}

impl Drift for Deployment {
    fn reconcile_owned(&mut self, desired: &Self) -> bool {
        let Some(want) = &desired.spec else {
            return false;
        };
        let Some(live) = self.spec.as_mut() else {
            self.spec = Some(want.clone());
            return true;
        };

        let mut changed = false;
        if want.replicas.is_some() {
            changed |= set_if_changed(&mut live.replicas, &want.replicas);
        }
        changed |= set_if_changed(&mut live.selector, &want.selector);

        // Template labels and annotations are merged like object metadata
        let template = &mut live.template;
        if let Some(want_meta) = &want.template.metadata {
            let meta = template.metadata.get_or_insert_with(Default::default);
            changed |= merge_entries(&mut meta.labels, want_meta.labels.as_ref());
            changed |= merge_entries(&mut meta.annotations, want_meta.annotations.as_ref());
        }

        if let Some(want_pod) = &want.template.spec {
            if template.spec.is_none() {
                template.spec = Some(want_pod.clone());
                changed = true;
            } else if let Some(live_pod) = template.spec.as_mut() {
                changed |= reconcile_pod(live_pod, want_pod);
            }
        }
        changed
    }
}

fn reconcile_pod(live: &mut PodSpec, desired: &PodSpec) -> bool {
    let mut changed = set_if_changed(&mut live.service_account_name, &desired.service_account_name);
    changed |= set_if_changed(&mut live.image_pull_secrets, &desired.image_pull_secrets);

    let same_layout = live.containers.len() == desired.containers.len()
        && live
            .containers
            .iter()
            .zip(&desired.containers)
            .all(|(l, d)| l.name == d.name);
    if !same_layout {
        live.containers = desired.containers.clone();
        return true;
    }

    for (live_container, want_container) in live.containers.iter_mut().zip(&desired.containers) {
        changed |= reconcile_container(live_container, want_container);
    }
    changed
}

fn reconcile_container(live: &mut Container, desired: &Container) -> bool {
    let mut changed = set_if_changed(&mut live.image, &desired.image);
    changed |= set_if_changed(&mut live.command, &desired.command);
    changed |= set_if_changed(&mut live.args, &desired.args);

    // Left to the API server default when unset
    if desired.image_pull_policy.is_some() {
        changed |= set_if_changed(&mut live.image_pull_policy, &desired.image_pull_policy);
    }

    let live_env = live.env.as_deref().unwrap_or_default();
    let want_env = desired.env.as_deref().unwrap_or_default();
    if !same_env(live_env, want_env) {
        live.env = desired.env.clone();
        changed = true;
    }

    let live_requests = live.resources.as_ref().and_then(|r| r.requests.as_ref());
    let want_requests = desired.resources.as_ref().and_then(|r| r.requests.as_ref());
    if live_requests != want_requests {
        live.resources.get_or_insert_with(Default::default).requests = want_requests.cloned();
        changed = true;
    }
    changed
}
