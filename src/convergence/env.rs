//! Container environment merging

use k8s_openapi::api::core::v1::EnvVar;
use std::collections::BTreeMap;

/// Merge driver supplied variables with user variables.
///
/// Driver variables keep their order and come first. A user variable with
/// the same name replaces the driver one in place; other user variables are
/// appended in the order given.
pub fn merge_env(driver: Vec<EnvVar>, user: &[EnvVar]) -> Vec<EnvVar> {
    let mut merged = driver;
    for var in user {
        match merged.iter_mut().find(|existing| existing.name == var.name) {
            Some(existing) => *existing = var.clone(),
            None => merged.push(var.clone()),
        }
    }
    merged
}

/// Order independent comparison by name and value
pub fn same_env(a: &[EnvVar], b: &[EnvVar]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let by_name = |vars: &[EnvVar]| -> BTreeMap<String, EnvVar> {
        vars.iter().map(|v| (v.name.clone(), v.clone())).collect()
    };
    by_name(a) == by_name(b)
}
