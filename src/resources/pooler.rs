//! Connection pooler add-ons
//!
//! Each pooler runs as its own Deployment in front of the cluster's primary
//! and replica services, with a Service of the same name. Enabled through the
//! `crunchy-pgbouncer` and `crunchy-pgpool` user labels.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, PodSpec, PodTemplateSpec, SecretKeySelector,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::ResourceExt;
use kube::core::ObjectMeta;
use tracing::{debug, info};

use crate::client::KubeClient;
use crate::config::OperatorConfig;
use crate::controller::error::Result;
use crate::crd::Pgcluster;
use crate::resources::common::{LABEL_NAME, LABEL_PG_CLUSTER, cluster_labels};
use crate::resources::deployment::SecretNames;
use crate::resources::secret::{PASSWORD_KEY, USERNAME_KEY};
use crate::resources::service::{build_service, ensure_service, replica_service_name};

/// Pooler variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolerKind {
    Pgbouncer,
    Pgpool,
}

impl PoolerKind {
    /// Poolers requested by the cluster's user labels
    pub fn requested(cluster: &Pgcluster) -> Vec<PoolerKind> {
        let mut kinds = Vec::new();
        if cluster.spec.pgbouncer_enabled() {
            kinds.push(PoolerKind::Pgbouncer);
        }
        if cluster.spec.pgpool_enabled() {
            kinds.push(PoolerKind::Pgpool);
        }
        kinds
    }

    pub fn object_name(&self, cluster_name: &str) -> String {
        format!("{}-{}", cluster_name, self)
    }

    pub fn port(&self) -> i32 {
        match self {
            PoolerKind::Pgbouncer => 6432,
            PoolerKind::Pgpool => 5432,
        }
    }

    fn image(&self, config: &OperatorConfig) -> String {
        let image = match self {
            PoolerKind::Pgbouncer => &config.pooler.pgbouncer_image,
            PoolerKind::Pgpool => &config.pooler.pgpool_image,
        };
        format!(
            "{}/{}:{}",
            config.cluster.ccp_image_prefix, image, config.cluster.ccp_image_tag
        )
    }
}

impl std::fmt::Display for PoolerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolerKind::Pgbouncer => write!(f, "pgbouncer"),
            PoolerKind::Pgpool => write!(f, "pgpool"),
        }
    }
}

fn pooler_labels(kind: PoolerKind, cluster_name: &str) -> BTreeMap<String, String> {
    let mut labels = cluster_labels(cluster_name);
    labels.insert(LABEL_NAME.to_string(), kind.object_name(cluster_name));
    labels.insert("crunchy-pooler".to_string(), kind.to_string());
    labels
}

/// Generate the pooler Deployment
pub fn pooler_deployment(kind: PoolerKind, cluster: &Pgcluster, config: &OperatorConfig) -> Deployment {
    let cluster_name = cluster.name_any();
    let name = kind.object_name(&cluster_name);
    let labels = pooler_labels(kind, &cluster_name);
    let secrets = SecretNames::of(cluster);

    let secret_env = |env: &str, key: &str| EnvVar {
        name: env.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secrets.primary.clone(),
                key: key.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    };

    let container = Container {
        name: kind.to_string(),
        image: Some(kind.image(config)),
        ports: Some(vec![ContainerPort {
            container_port: kind.port(),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        env: Some(vec![
            EnvVar {
                name: "PG_PRIMARY_SERVICE_NAME".to_string(),
                value: Some(cluster_name.clone()),
                ..Default::default()
            },
            EnvVar {
                name: "PG_REPLICA_SERVICE_NAME".to_string(),
                value: Some(replica_service_name(&cluster_name)),
                ..Default::default()
            },
            secret_env("PG_USERNAME", USERNAME_KEY),
            secret_env("PG_PASSWORD", PASSWORD_KEY),
        ]),
        ..Default::default()
    };

    Deployment {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(BTreeMap::from([
                    (LABEL_PG_CLUSTER.to_string(), cluster_name),
                    (LABEL_NAME.to_string(), name),
                ])),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Create the pooler's Deployment and Service, each only when absent
pub async fn ensure_pooler(
    kube: &dyn KubeClient,
    kind: PoolerKind,
    cluster: &Pgcluster,
    ns: &str,
    config: &OperatorConfig,
) -> Result<()> {
    let cluster_name = cluster.name_any();
    let name = kind.object_name(&cluster_name);

    if kube.get_deployment(&name, ns).await?.is_some() {
        debug!("{} deployment {} already exists", kind, name);
    } else {
        kube.create_deployment(ns, &pooler_deployment(kind, cluster, config))
            .await?;
        info!("created {} deployment {}", kind, name);
    }

    let selector = BTreeMap::from([
        (LABEL_PG_CLUSTER.to_string(), cluster_name.clone()),
        (LABEL_NAME.to_string(), name.clone()),
    ]);
    let service = build_service(
        &name,
        &cluster_name,
        kind.port(),
        &config.cluster.service_type,
        selector,
    );
    ensure_service(kube, ns, &service).await?;
    Ok(())
}
