//! Database workload generation
//!
//! Primary and replica pods run the same container image; `PG_MODE` and the
//! `role` label distinguish them. Credentials are never inlined: every
//! password reaches the container through a secret key reference.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EmptyDirVolumeSource, EnvVar, EnvVarSource,
    PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, SecretKeySelector, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::ResourceExt;
use kube::core::ObjectMeta;
use serde_json::json;

use crate::config::OperatorConfig;
use crate::controller::error::Result;
use crate::crd::{
    ContainerResources, PRIMARY_SECRET_SUFFIX, Pgcluster, Pgreplica, ROOT_SECRET_SUFFIX,
    USER_SECRET_SUFFIX,
};
use crate::resources::common::{
    LABEL_NAME, LABEL_PG_CLUSTER, LABEL_ROLE, ROLE_PRIMARY, ROLE_REPLICA, resource_requirements,
    workload_labels,
};
use crate::resources::secret::{PASSWORD_KEY, USERNAME_KEY};
use crate::resources::service::parse_port;

/// Name of the database container in every workload
pub const DATABASE_CONTAINER: &str = "database";

const PGDATA_PATH: &str = "/pgdata";
const PGWAL_PATH: &str = "/pgwal";

/// Claim name for a workload's write-ahead-log archive
pub fn xlog_claim_name(name: &str) -> String {
    format!("{}-xlog", name)
}

/// Claim name for a workload's backup repository
pub fn backrest_claim_name(name: &str) -> String {
    format!("{}-backrestrepo", name)
}

/// Database image for `tag`, falling back to the configured default tag
pub fn postgres_image(config: &OperatorConfig, tag: &str) -> String {
    let tag = if tag.is_empty() {
        config.cluster.ccp_image_tag.as_str()
    } else {
        tag
    };
    format!("{}/crunchy-postgres:{}", config.cluster.ccp_image_prefix, tag)
}

/// Secret names used by a cluster, preferring those recorded on the resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretNames {
    pub root: String,
    pub primary: String,
    pub user: String,
}

impl SecretNames {
    pub fn of(cluster: &Pgcluster) -> Self {
        let name = cluster.name_any();
        let pick = |recorded: &str, suffix: &str| {
            if recorded.is_empty() {
                format!("{}{}", name, suffix)
            } else {
                recorded.to_string()
            }
        };
        Self {
            root: pick(&cluster.spec.root_secret_name, ROOT_SECRET_SUFFIX),
            primary: pick(&cluster.spec.primary_secret_name, PRIMARY_SECRET_SUFFIX),
            user: pick(&cluster.spec.user_secret_name, USER_SECRET_SUFFIX),
        }
    }
}

struct Workload<'a> {
    name: &'a str,
    cluster_name: &'a str,
    role: &'a str,
    image: String,
    port: i32,
    pvc_name: &'a str,
    archive: bool,
    resources: &'a ContainerResources,
    user_labels: &'a BTreeMap<String, String>,
    secrets: SecretNames,
}

fn secret_env(name: &str, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.to_string(),
                key: key.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn plain_env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn claim_or_empty_dir(volume: &str, claim: &str) -> Volume {
    if claim.is_empty() {
        Volume {
            name: volume.to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        }
    } else {
        Volume {
            name: volume.to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: claim.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

fn build(w: Workload<'_>) -> Deployment {
    let labels = workload_labels(w.cluster_name, w.name, w.role, w.user_labels);
    let selector = BTreeMap::from([
        (LABEL_PG_CLUSTER.to_string(), w.cluster_name.to_string()),
        (LABEL_NAME.to_string(), w.name.to_string()),
    ]);

    let mut env = vec![
        plain_env("PG_MODE", w.role),
        plain_env("PG_PRIMARY_HOST", w.cluster_name),
        plain_env("PG_PRIMARY_PORT", w.port.to_string()),
        plain_env("PG_DATABASE", "userdb"),
        plain_env("PGDATA_PATH_FULL", format!("{}/{}", PGDATA_PATH, w.name)),
        secret_env("PG_PRIMARY_USER", &w.secrets.primary, USERNAME_KEY),
        secret_env("PG_PRIMARY_PASSWORD", &w.secrets.primary, PASSWORD_KEY),
        secret_env("PG_ROOT_PASSWORD", &w.secrets.root, PASSWORD_KEY),
        secret_env("PG_USER", &w.secrets.user, USERNAME_KEY),
        secret_env("PG_PASSWORD", &w.secrets.user, PASSWORD_KEY),
    ];

    let mut volumes = vec![claim_or_empty_dir("pgdata", w.pvc_name)];
    let mut mounts = vec![VolumeMount {
        name: "pgdata".to_string(),
        mount_path: PGDATA_PATH.to_string(),
        ..Default::default()
    }];

    if w.archive {
        env.push(plain_env("ARCHIVE_MODE", "on"));
        env.push(plain_env("XLOGDIR", "true"));
        volumes.push(claim_or_empty_dir("pgwal", &xlog_claim_name(w.name)));
        mounts.push(VolumeMount {
            name: "pgwal".to_string(),
            mount_path: PGWAL_PATH.to_string(),
            ..Default::default()
        });
    }

    let container = Container {
        name: DATABASE_CONTAINER.to_string(),
        image: Some(w.image),
        ports: Some(vec![ContainerPort {
            name: Some("postgres".to_string()),
            container_port: w.port,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        env: Some(env),
        volume_mounts: Some(mounts),
        resources: resource_requirements(w.resources),
        ..Default::default()
    };

    Deployment {
        metadata: ObjectMeta {
            name: Some(w.name.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(selector),
                ..Default::default()
            },
            // A data volume can only be attached to one pod at a time
            strategy: Some(DeploymentStrategy {
                type_: Some("Recreate".to_string()),
                ..Default::default()
            }),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: Some(volumes),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Primary deployment, named after the cluster
pub fn primary_deployment(
    cluster: &Pgcluster,
    pvc_name: &str,
    config: &OperatorConfig,
) -> Result<Deployment> {
    primary_deployment_named(cluster, &cluster.name_any(), pvc_name, config)
}

/// Primary deployment under an explicit workload name.
///
/// A promoted replica keeps its own name, which also names its data directory.
pub fn primary_deployment_named(
    cluster: &Pgcluster,
    name: &str,
    pvc_name: &str,
    config: &OperatorConfig,
) -> Result<Deployment> {
    let cluster_name = cluster.name_any();
    Ok(build(Workload {
        name,
        cluster_name: &cluster_name,
        role: ROLE_PRIMARY,
        image: postgres_image(config, &cluster.spec.ccp_image_tag),
        port: parse_port(&cluster.spec.port)?,
        pvc_name,
        archive: cluster.spec.archive_enabled(),
        resources: &cluster.spec.container_resources,
        user_labels: &cluster.spec.user_labels,
        secrets: SecretNames::of(cluster),
    }))
}

/// Replica deployment, named after the replica resource
pub fn replica_deployment(
    replica: &Pgreplica,
    cluster: &Pgcluster,
    pvc_name: &str,
    config: &OperatorConfig,
) -> Result<Deployment> {
    let name = replica.name_any();
    let cluster_name = cluster.name_any();
    Ok(build(Workload {
        name: &name,
        cluster_name: &cluster_name,
        role: ROLE_REPLICA,
        image: postgres_image(config, &cluster.spec.ccp_image_tag),
        port: parse_port(&cluster.spec.port)?,
        pvc_name,
        archive: cluster.spec.archive_enabled(),
        resources: &replica.spec.container_resources,
        user_labels: &replica.spec.user_labels,
        secrets: SecretNames::of(cluster),
    }))
}

/// Claim mounted as the data volume of a workload, if any
pub fn data_claim(deployment: &Deployment) -> Option<String> {
    deployment
        .spec
        .as_ref()?
        .template
        .spec
        .as_ref()?
        .volumes
        .as_ref()?
        .iter()
        .find(|v| v.name == "pgdata")?
        .persistent_volume_claim
        .as_ref()
        .map(|c| c.claim_name.clone())
}

/// Merge patch replacing the database container image.
///
/// Merge patches replace lists wholesale, so the patch carries the complete
/// container list of `deployment` with only the image changed.
pub fn image_patch(deployment: &Deployment, image: &str) -> Option<serde_json::Value> {
    let mut containers = deployment
        .spec
        .as_ref()?
        .template
        .spec
        .as_ref()?
        .containers
        .clone();
    let db = containers.iter_mut().find(|c| c.name == DATABASE_CONTAINER)?;
    db.image = Some(image.to_string());
    Some(json!({
        "spec": { "template": { "spec": { "containers": containers } } }
    }))
}

/// Merge patch setting the `role` label on a deployment and its pods
pub fn role_patch(role: &str) -> serde_json::Value {
    json!({
        "metadata": { "labels": { LABEL_ROLE: role } },
        "spec": { "template": { "metadata": { "labels": { LABEL_ROLE: role } } } }
    })
}

/// Merge patch adding `labels` to a deployment
pub fn labels_patch(labels: &BTreeMap<String, String>) -> serde_json::Value {
    json!({ "metadata": { "labels": labels } })
}
