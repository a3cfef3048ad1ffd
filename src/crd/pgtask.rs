use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Task type recorded on automatic-failover tasks
pub const TASK_AUTOFAILOVER: &str = "autofailover";

/// Task type recorded on manual failover requests
pub const TASK_FAILOVER: &str = "failover";

/// Parameter naming the cluster a task belongs to
pub const PARAM_CLUSTER: &str = "pg-cluster";

/// Parameter naming the replica a failover should promote
pub const PARAM_TARGET: &str = "target";

/// Pgtask records an asynchronous intent against a cluster, such as a
/// pending automatic failover.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "pgcluster.crunchydata.com",
    version = "v1",
    kind = "Pgtask",
    plural = "pgtasks",
    namespaced,
    printcolumn = r#"{"name":"Type", "type":"string", "jsonPath":".spec.tasktype"}"#,
    printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".spec.status"}"#
)]
pub struct PgtaskSpec {
    #[serde(default)]
    pub name: String,

    #[serde(default, rename = "tasktype")]
    pub task_type: String,

    #[serde(default)]
    pub status: String,

    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl PgtaskSpec {
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}
