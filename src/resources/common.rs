//! Common utilities for Kubernetes resource generation
//!
//! Child objects are deliberately created without owner references: claims
//! must outlive their cluster so a re-created cluster of the same name can
//! reuse them, and workloads are removed explicitly by the strategy.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use rand::Rng;

use crate::crd::ContainerResources;

/// Label carrying the owning cluster's name on every child object
pub const LABEL_PG_CLUSTER: &str = "pg-cluster";

/// Label carrying the object's own name (deployments select pods by it)
pub const LABEL_NAME: &str = "name";

/// Label marking the database role of a workload (`primary` / `replica`)
pub const LABEL_ROLE: &str = "role";

pub const LABEL_VENDOR: &str = "vendor";

pub const VENDOR: &str = "crunchydata";

pub const ROLE_PRIMARY: &str = "primary";

pub const ROLE_REPLICA: &str = "replica";

/// Operator field manager name
pub const FIELD_MANAGER: &str = "pgcluster-operator";

/// Labels shared by every object belonging to a cluster
pub fn cluster_labels(cluster_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_VENDOR.to_string(), VENDOR.to_string()),
        (LABEL_PG_CLUSTER.to_string(), cluster_name.to_string()),
    ])
}

/// Labels for a named workload, with the user's labels merged in.
///
/// User labels cannot override the cluster, name or role identifiers.
pub fn workload_labels(
    cluster_name: &str,
    name: &str,
    role: &str,
    user_labels: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    for (key, value) in user_labels {
        labels.insert(key.clone(), value.clone());
    }
    labels.extend(cluster_labels(cluster_name));
    labels.insert(LABEL_NAME.to_string(), name.to_string());
    labels.insert(LABEL_ROLE.to_string(), role.to_string());
    labels
}

/// Random lowercase suffix used to name generated replicas
pub fn random_suffix(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| rng.random_range(b'a'..=b'z') as char)
        .collect()
}

/// Convert authored container resources into Kubernetes requirements.
///
/// Returns `None` when nothing was specified.
pub fn resource_requirements(resources: &ContainerResources) -> Option<ResourceRequirements> {
    if resources.is_empty() {
        return None;
    }

    fn quantities(cpu: &str, memory: &str) -> Option<BTreeMap<String, Quantity>> {
        let mut map = BTreeMap::new();
        if !cpu.is_empty() {
            map.insert("cpu".to_string(), Quantity(cpu.to_string()));
        }
        if !memory.is_empty() {
            map.insert("memory".to_string(), Quantity(memory.to_string()));
        }
        (!map.is_empty()).then_some(map)
    }

    Some(ResourceRequirements {
        requests: quantities(&resources.requests_cpu, &resources.requests_memory),
        limits: quantities(&resources.limits_cpu, &resources.limits_memory),
        ..Default::default()
    })
}
