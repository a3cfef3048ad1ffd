use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::crd::COMPLETED_STATUS;

/// User label enabling WAL archiving (adds a `<name>-xlog` claim)
pub const LABEL_ARCHIVE: &str = "archive";

/// User label enabling the pgBackRest repository (adds a `<name>-backrestrepo` claim)
pub const LABEL_BACKREST: &str = "pgo-backrest";

/// User label enabling the pgpool connection pooler
pub const LABEL_PGPOOL: &str = "crunchy-pgpool";

/// User label enabling the pgbouncer connection pooler
pub const LABEL_PGBOUNCER: &str = "crunchy-pgbouncer";

/// Suffix of the administrative credential secret
pub const ROOT_SECRET_SUFFIX: &str = "-postgres-secret";

/// Suffix of the replication credential secret
pub const PRIMARY_SECRET_SUFFIX: &str = "-primaryuser-secret";

/// Suffix of the application user credential secret
pub const USER_SECRET_SUFFIX: &str = "-testuser-secret";

/// Pgcluster describes one database cluster: a primary, its replicas and add-ons.
///
/// Lifecycle bookkeeping lives in `.spec` rather than a status subresource,
/// so the operator records progress through single-field patches
/// (`/spec/status`, `/spec/rootsecretname`, ...).
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "pgcluster.crunchydata.com",
    version = "v1",
    kind = "Pgcluster",
    plural = "pgclusters",
    shortname = "pgc",
    namespaced,
    printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".spec.status"}"#,
    printcolumn = r#"{"name":"Replicas", "type":"string", "jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Image", "type":"string", "jsonPath":".spec.ccpimagetag"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
pub struct PgclusterSpec {
    #[serde(default)]
    pub name: String,

    #[serde(default, rename = "clustername")]
    pub cluster_name: String,

    /// Container image tag the cluster currently runs
    #[serde(default, rename = "ccpimagetag")]
    pub ccp_image_tag: String,

    #[serde(default = "default_port")]
    pub port: String,

    #[serde(default, rename = "PrimaryStorage")]
    pub primary_storage: StorageSpec,

    #[serde(default, rename = "ReplicaStorage")]
    pub replica_storage: StorageSpec,

    #[serde(default, rename = "ContainerResources")]
    pub container_resources: ContainerResources,

    /// Requested replica count, kept as text as authored by the front end
    #[serde(default)]
    pub replicas: String,

    /// Provisioning strategy identifier; empty selects the default
    #[serde(default)]
    pub strategy: String,

    /// Copy credentials from this other cluster's secrets
    #[serde(default, rename = "secretfrom")]
    pub secret_from: String,

    #[serde(default, rename = "rootpassword")]
    pub root_password: String,

    #[serde(default, rename = "primarypassword")]
    pub primary_password: String,

    /// Application user password; also the override applied to every role
    #[serde(default)]
    pub password: String,

    #[serde(default, rename = "rootsecretname")]
    pub root_secret_name: String,

    #[serde(default, rename = "primarysecretname")]
    pub primary_secret_name: String,

    #[serde(default, rename = "usersecretname")]
    pub user_secret_name: String,

    #[serde(default)]
    pub status: String,

    /// Feature flags and free-form labels copied onto child objects
    #[serde(default, rename = "userlabels")]
    pub user_labels: BTreeMap<String, String>,
}

fn default_port() -> String {
    "5432".to_string()
}

impl PgclusterSpec {
    /// True when the user label `key` is set to the literal `"true"`
    pub fn label_enabled(&self, key: &str) -> bool {
        self.user_labels.get(key).is_some_and(|v| v == "true")
    }

    pub fn archive_enabled(&self) -> bool {
        self.label_enabled(LABEL_ARCHIVE)
    }

    pub fn backrest_enabled(&self) -> bool {
        self.label_enabled(LABEL_BACKREST)
    }

    pub fn pgpool_enabled(&self) -> bool {
        self.label_enabled(LABEL_PGPOOL)
    }

    pub fn pgbouncer_enabled(&self) -> bool {
        self.label_enabled(LABEL_PGBOUNCER)
    }

    pub fn is_completed(&self) -> bool {
        self.status == COMPLETED_STATUS
    }
}

/// Persistent storage request for one claim
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct StorageSpec {
    /// Claim name, filled in once the claim exists
    #[serde(default)]
    pub name: String,

    #[serde(default, rename = "storageclass")]
    pub storage_class: String,

    /// Access mode, e.g. `ReadWriteOnce`
    #[serde(default, rename = "accessmode")]
    pub access_mode: String,

    /// Requested size, e.g. `1Gi`
    #[serde(default)]
    pub size: String,

    /// `create` provisions a claim, `emptydir` skips durable storage
    #[serde(default, rename = "storagetype")]
    pub storage_type: String,

    #[serde(default, rename = "supplementalgroups")]
    pub supplemental_groups: String,

    #[serde(default)]
    pub fsgroup: String,
}

/// Requests and limits for the database container, as authored
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct ContainerResources {
    #[serde(default, rename = "requestsmemory")]
    pub requests_memory: String,

    #[serde(default, rename = "requestscpu")]
    pub requests_cpu: String,

    #[serde(default, rename = "limitsmemory")]
    pub limits_memory: String,

    #[serde(default, rename = "limitscpu")]
    pub limits_cpu: String,
}

impl ContainerResources {
    pub fn is_empty(&self) -> bool {
        self.requests_memory.is_empty()
            && self.requests_cpu.is_empty()
            && self.limits_memory.is_empty()
            && self.limits_cpu.is_empty()
    }
}
