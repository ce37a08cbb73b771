//! Desired state of every Stork object
//!
//! Pure builders: the same cluster, driver outputs and platform version
//! always yield the same objects.

use crate::convergence::{build_command, merge_env, pull_secrets, CpuQuantity, ImageRegistry};
use crate::crd::StorageCluster;
use crate::error::{Error, Result};
use k8s_openapi::api::apps::v1::{
    Deployment, DeploymentSpec, DeploymentStrategy, RollingUpdateDeployment,
};
use k8s_openapi::api::core::v1::{
    Affinity, ConfigMap, Container, EnvVar, HTTPGetAction, LocalObjectReference, PodAffinityTerm,
    PodAntiAffinity, PodSpec, PodTemplateSpec, Probe, ResourceRequirements, Service,
    ServiceAccount, ServicePort, ServiceSpec, WeightedPodAffinityTerm,
};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, RoleRef, Subject};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use semver::Version;
use serde::Serialize;
use std::collections::BTreeMap;

// =============================================================================
// Names and Defaults
// =============================================================================

pub const STORK_CONFIG_MAP: &str = "stork-config";
pub const STORK_POLICY_KEY: &str = "policy.cfg";
pub const STORK_SERVICE_ACCOUNT: &str = "stork";
pub const STORK_CLUSTER_ROLE: &str = "stork";
pub const STORK_CLUSTER_ROLE_BINDING: &str = "stork";
pub const STORK_SERVICE: &str = "stork-service";
pub const STORK_DEPLOYMENT: &str = "stork";
pub const STORK_CONTAINER: &str = "stork";
pub const STORK_SCHED_SERVICE_ACCOUNT: &str = "stork-scheduler";
pub const STORK_SCHED_CLUSTER_ROLE: &str = "stork-scheduler";
pub const STORK_SCHED_CLUSTER_ROLE_BINDING: &str = "stork-scheduler";
pub const STORK_SCHED_DEPLOYMENT: &str = "stork-scheduler";
pub const STORK_SCHED_CONTAINER: &str = "stork-scheduler";
pub const STORK_SNAPSHOT_STORAGE_CLASS: &str = "stork-snapshot-sc";
pub const STORK_SNAPSHOT_PROVISIONER: &str = "stork-snapshot";

pub const STORK_BINARY: &str = "/stork";
pub const STORK_SCHEDULER_NAME: &str = "stork";
pub const STORK_EXTENDER_PORT: i32 = 8099;
pub const STORK_WEBHOOK_PORT: i32 = 8443;
pub const STORK_REPLICAS: i32 = 3;
pub const DEFAULT_STORK_CPU: &str = "0.1";
pub const DEFAULT_PULL_POLICY: &str = "Always";

const SCHEDULER_IMAGE_REPO: &str = "gcr.io/google_containers/kube-scheduler-amd64";
const SCHEDULER_BINARY: &str = "/usr/local/bin/kube-scheduler";
const SCHEDULER_HEALTH_PORT: i32 = 10251;
const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

/// Default CPU request of both deployments
pub fn default_cpu() -> Quantity {
    CpuQuantity::from_millis(100).to_quantity()
}

// =============================================================================
// Plan
// =============================================================================

/// Inputs shared by every Stork object, resolved once per tick
#[derive(Debug, Clone)]
pub struct StorkPlan {
    pub namespace: String,
    pub owner: OwnerReference,
    pub image: String,
    pub scheduler_image: String,
    pub command: Vec<String>,
    pub scheduler_command: Vec<String>,
    pub env: Vec<EnvVar>,
    pub pull_policy: String,
    pub pull_secrets: Option<Vec<LocalObjectReference>>,
}

impl StorkPlan {
    pub fn new(
        cluster: &StorageCluster,
        driver_name: &str,
        driver_env: Vec<EnvVar>,
        k8s_version: &Version,
    ) -> Result<Self> {
        let stork = cluster.spec.stork.clone().unwrap_or_default();
        let image = stork
            .image
            .as_deref()
            .map(str::trim)
            .filter(|i| !i.is_empty())
            .ok_or_else(|| Error::InvalidSpec("stork image cannot be empty".into()))?;

        let namespace = cluster.namespace_or_default();
        let registry = ImageRegistry::parse(cluster.spec.custom_image_registry.as_deref());
        let scheduler_image = format!(
            "{}:v{}.{}.{}",
            SCHEDULER_IMAGE_REPO, k8s_version.major, k8s_version.minor, k8s_version.patch
        );

        let defaults = BTreeMap::from([
            ("driver".to_string(), driver_name.to_string()),
            ("verbose".to_string(), "true".to_string()),
            ("leader-elect".to_string(), "true".to_string()),
            ("health-monitor-interval".to_string(), "120".to_string()),
        ]);

        Ok(Self {
            owner: cluster.owner_reference(),
            image: registry.resolve(image),
            scheduler_image: registry.resolve(&scheduler_image),
            command: build_command(STORK_BINARY, &defaults, &stork.args),
            scheduler_command: scheduler_command(&namespace),
            env: merge_env(driver_env, &stork.env),
            pull_policy: cluster
                .spec
                .image_pull_policy
                .clone()
                .unwrap_or_else(|| DEFAULT_PULL_POLICY.to_string()),
            pull_secrets: pull_secrets(cluster.spec.image_pull_secret.as_deref()),
            namespace,
        })
    }

    fn meta(&self, name: &str, namespaced: bool, labels: BTreeMap<String, String>) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: namespaced.then(|| self.namespace.clone()),
            labels: (!labels.is_empty()).then_some(labels),
            owner_references: Some(vec![self.owner.clone()]),
            ..Default::default()
        }
    }
}

fn scheduler_command(namespace: &str) -> Vec<String> {
    vec![
        SCHEDULER_BINARY.to_string(),
        "--address=0.0.0.0".to_string(),
        "--leader-elect=true".to_string(),
        format!("--scheduler-name={}", STORK_SCHEDULER_NAME),
        format!("--policy-configmap={}", STORK_CONFIG_MAP),
        format!("--policy-configmap-namespace={}", namespace),
        "--lock-object-name=stork-scheduler".to_string(),
    ]
}

fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

// =============================================================================
// Scheduler Policy
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SchedulerPolicy {
    kind: &'static str,
    api_version: &'static str,
    extenders: Vec<SchedulerExtender>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SchedulerExtender {
    url_prefix: String,
    filter_verb: &'static str,
    prioritize_verb: &'static str,
    weight: u32,
}

pub fn config_map(plan: &StorkPlan) -> Result<ConfigMap> {
    let policy = SchedulerPolicy {
        kind: "Policy",
        api_version: "v1",
        extenders: vec![SchedulerExtender {
            url_prefix: format!(
                "http://{}.{}:{}",
                STORK_SERVICE, plan.namespace, STORK_EXTENDER_PORT
            ),
            filter_verb: "filter",
            prioritize_verb: "prioritize",
            weight: 5,
        }],
    };

    Ok(ConfigMap {
        metadata: plan.meta(STORK_CONFIG_MAP, true, BTreeMap::new()),
        data: Some(BTreeMap::from([(
            STORK_POLICY_KEY.to_string(),
            serde_json::to_string(&policy)?,
        )])),
        ..Default::default()
    })
}

// =============================================================================
// RBAC
// =============================================================================

pub fn service_accounts(plan: &StorkPlan) -> Vec<ServiceAccount> {
    [STORK_SERVICE_ACCOUNT, STORK_SCHED_SERVICE_ACCOUNT]
        .into_iter()
        .map(|name| ServiceAccount {
            metadata: plan.meta(name, true, BTreeMap::new()),
            ..Default::default()
        })
        .collect()
}

fn rule(groups: &[&str], resources: &[&str], verbs: &[&str]) -> PolicyRule {
    PolicyRule {
        api_groups: Some(strings(groups)),
        resources: Some(strings(resources)),
        verbs: strings(verbs),
        ..Default::default()
    }
}

pub fn cluster_roles(plan: &StorkPlan) -> Vec<ClusterRole> {
    let stork = ClusterRole {
        metadata: plan.meta(STORK_CLUSTER_ROLE, false, BTreeMap::new()),
        rules: Some(vec![rule(&["*"], &["*"], &["*"])]),
        ..Default::default()
    };

    let read = ["get", "list", "watch"];
    let scheduler = ClusterRole {
        metadata: plan.meta(STORK_SCHED_CLUSTER_ROLE, false, BTreeMap::new()),
        rules: Some(vec![
            rule(&[""], &["endpoints"], &["get", "create", "update"]),
            rule(&[""], &["configmaps"], &read),
            rule(&[""], &["events"], &["create", "patch", "update"]),
            rule(&[""], &["nodes"], &read),
            rule(&[""], &["pods"], &["delete", "get", "list", "watch"]),
            rule(&[""], &["bindings", "pods/binding"], &["create"]),
            rule(&[""], &["pods/status"], &["patch", "update"]),
            rule(&[""], &["replicationcontrollers", "services"], &read),
            rule(&["apps", "extensions"], &["replicasets"], &read),
            rule(&["apps"], &["statefulsets"], &read),
            rule(&["policy"], &["poddisruptionbudgets"], &read),
            rule(
                &[""],
                &["persistentvolumeclaims", "persistentvolumes"],
                &["get", "list", "watch", "update"],
            ),
            rule(&["storage.k8s.io"], &["storageclasses", "csinodes"], &read),
            rule(&["coordination.k8s.io"], &["leases"], &["create", "get", "update"]),
        ]),
        ..Default::default()
    };

    vec![stork, scheduler]
}

pub fn cluster_role_bindings(plan: &StorkPlan) -> Vec<ClusterRoleBinding> {
    [
        (STORK_CLUSTER_ROLE_BINDING, STORK_SERVICE_ACCOUNT, STORK_CLUSTER_ROLE),
        (
            STORK_SCHED_CLUSTER_ROLE_BINDING,
            STORK_SCHED_SERVICE_ACCOUNT,
            STORK_SCHED_CLUSTER_ROLE,
        ),
    ]
    .into_iter()
    .map(|(name, account, role)| ClusterRoleBinding {
        metadata: plan.meta(name, false, BTreeMap::new()),
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: account.to_string(),
            namespace: Some(plan.namespace.clone()),
            ..Default::default()
        }]),
        role_ref: RoleRef {
            api_group: RBAC_API_GROUP.to_string(),
            kind: "ClusterRole".to_string(),
            name: role.to_string(),
        },
    })
    .collect()
}

// =============================================================================
// Service
// =============================================================================

fn stork_labels() -> BTreeMap<String, String> {
    labels(&[("name", "stork")])
}

pub fn service(plan: &StorkPlan) -> Service {
    let port = |name: &str, port: i32| ServicePort {
        name: Some(name.to_string()),
        port,
        protocol: Some("TCP".to_string()),
        target_port: Some(IntOrString::Int(port)),
        ..Default::default()
    };

    Service {
        metadata: plan.meta(STORK_SERVICE, true, stork_labels()),
        spec: Some(ServiceSpec {
            selector: Some(stork_labels()),
            ports: Some(vec![
                port("extender", STORK_EXTENDER_PORT),
                port("webhook", STORK_WEBHOOK_PORT),
            ]),
            type_: Some("ClusterIP".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

// =============================================================================
// Deployments
// =============================================================================

fn cpu_requests(cpu: Quantity) -> ResourceRequirements {
    ResourceRequirements {
        requests: Some(BTreeMap::from([("cpu".to_string(), cpu)])),
        ..Default::default()
    }
}

/// Spread replicas across nodes when possible
fn spread_by_host(pod_labels: &BTreeMap<String, String>) -> Affinity {
    Affinity {
        pod_anti_affinity: Some(PodAntiAffinity {
            preferred_during_scheduling_ignored_during_execution: Some(vec![
                WeightedPodAffinityTerm {
                    weight: 100,
                    pod_affinity_term: PodAffinityTerm {
                        label_selector: Some(LabelSelector {
                            match_labels: Some(pod_labels.clone()),
                            ..Default::default()
                        }),
                        topology_key: "kubernetes.io/hostname".to_string(),
                        ..Default::default()
                    },
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn deployment(
    plan: &StorkPlan,
    name: &str,
    service_account: &str,
    pod_labels: BTreeMap<String, String>,
    container: Container,
) -> Deployment {
    Deployment {
        metadata: plan.meta(name, true, labels(&[("tier", "control-plane")])),
        spec: Some(DeploymentSpec {
            replicas: Some(STORK_REPLICAS),
            selector: LabelSelector {
                match_labels: Some(pod_labels.clone()),
                ..Default::default()
            },
            strategy: Some(DeploymentStrategy {
                type_: Some("RollingUpdate".to_string()),
                rolling_update: Some(RollingUpdateDeployment {
                    max_surge: Some(IntOrString::Int(1)),
                    max_unavailable: Some(IntOrString::Int(1)),
                }),
            }),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_labels.clone()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(service_account.to_string()),
                    image_pull_secrets: plan.pull_secrets.clone(),
                    affinity: Some(spread_by_host(&pod_labels)),
                    containers: vec![container],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn stork_deployment(plan: &StorkPlan, cpu: Quantity) -> Deployment {
    let container = Container {
        name: STORK_CONTAINER.to_string(),
        image: Some(plan.image.clone()),
        image_pull_policy: Some(plan.pull_policy.clone()),
        command: Some(plan.command.clone()),
        env: Some(plan.env.clone()),
        resources: Some(cpu_requests(cpu)),
        ..Default::default()
    };

    deployment(
        plan,
        STORK_DEPLOYMENT,
        STORK_SERVICE_ACCOUNT,
        labels(&[("name", "stork"), ("tier", "control-plane")]),
        container,
    )
}

pub fn scheduler_deployment(plan: &StorkPlan, cpu: Quantity) -> Deployment {
    let health = |initial_delay: i32| Probe {
        http_get: Some(HTTPGetAction {
            path: Some("/healthz".to_string()),
            port: IntOrString::Int(SCHEDULER_HEALTH_PORT),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay),
        ..Default::default()
    };
    let container = Container {
        name: STORK_SCHED_CONTAINER.to_string(),
        image: Some(plan.scheduler_image.clone()),
        image_pull_policy: Some(plan.pull_policy.clone()),
        command: Some(plan.scheduler_command.clone()),
        liveness_probe: Some(health(15)),
        readiness_probe: Some(health(0)),
        resources: Some(cpu_requests(cpu)),
        ..Default::default()
    };

    deployment(
        plan,
        STORK_SCHED_DEPLOYMENT,
        STORK_SCHED_SERVICE_ACCOUNT,
        labels(&[
            ("component", "scheduler"),
            ("tier", "control-plane"),
            ("name", "stork-scheduler"),
        ]),
        container,
    )
}

// =============================================================================
// Storage Class
// =============================================================================

pub fn snapshot_storage_class(plan: &StorkPlan) -> StorageClass {
    StorageClass {
        metadata: plan.meta(STORK_SNAPSHOT_STORAGE_CLASS, false, BTreeMap::new()),
        provisioner: STORK_SNAPSHOT_PROVISIONER.to_string(),
        ..Default::default()
    }
}

/// CPU request of the first container of a live deployment
pub fn live_cpu(deployment: &Deployment) -> Option<Quantity> {
    deployment
        .spec
        .as_ref()?
        .template
        .spec
        .as_ref()?
        .containers
        .first()?
        .resources
        .as_ref()?
        .requests
        .as_ref()?
        .get("cpu")
        .cloned()
}
