use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::crd::{COMPLETED_STATUS, ContainerResources, StorageSpec};

/// Status recorded on replica objects the operator has not processed yet
pub const REPLICA_CREATED_STATUS: &str = "Created, not processed yet";

/// Pgreplica describes one read replica of a Pgcluster.
///
/// `clustername` is a lookup key only; the replica does not own the cluster
/// and the cluster is not an owner reference of the replica.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "pgcluster.crunchydata.com",
    version = "v1",
    kind = "Pgreplica",
    plural = "pgreplicas",
    shortname = "pgr",
    namespaced,
    printcolumn = r#"{"name":"Cluster", "type":"string", "jsonPath":".spec.clustername"}"#,
    printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".spec.status"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
pub struct PgreplicaSpec {
    #[serde(default)]
    pub name: String,

    #[serde(default, rename = "clustername")]
    pub cluster_name: String,

    #[serde(default, rename = "replicastorage")]
    pub replica_storage: StorageSpec,

    #[serde(default, rename = "containerresources")]
    pub container_resources: ContainerResources,

    /// Processing marker; [`REPLICA_CREATED_STATUS`] until the operator
    /// materializes the replica, then `completed`
    #[serde(default)]
    pub status: String,

    #[serde(default, rename = "userlabels")]
    pub user_labels: BTreeMap<String, String>,
}

impl PgreplicaSpec {
    pub fn is_completed(&self) -> bool {
        self.status == COMPLETED_STATUS
    }
}
