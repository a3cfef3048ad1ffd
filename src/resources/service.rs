//! Service generation
//!
//! Services select pods by cluster and role, never by pod name: the primary
//! service follows whichever deployment carries `role=primary`, so promoting a
//! replica is a relabel rather than a selector rewrite.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::core::ObjectMeta;
use tracing::debug;

use crate::client::KubeClient;
use crate::controller::error::{Error, Result};
use crate::resources::common::{LABEL_PG_CLUSTER, LABEL_ROLE, ROLE_PRIMARY, ROLE_REPLICA, cluster_labels};

/// Name of the shared replica-facing service of a cluster
pub fn replica_service_name(cluster_name: &str) -> String {
    format!("{}-replica", cluster_name)
}

/// Parse a textual port, as stored on the cluster resource
pub fn parse_port(port: &str) -> Result<i32> {
    port.trim()
        .parse::<i32>()
        .ok()
        .filter(|p| (1..=65535).contains(p))
        .ok_or_else(|| Error::InvalidConfig(format!("invalid port '{}'", port)))
}

/// Build a service named `name` selecting `selector`
pub fn build_service(
    name: &str,
    cluster_name: &str,
    port: i32,
    service_type: &str,
    selector: BTreeMap<String, String>,
) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(cluster_labels(cluster_name)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(selector),
            ports: Some(vec![ServicePort {
                name: Some("postgres".to_string()),
                port,
                target_port: Some(IntOrString::Int(port)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            type_: Some(service_type.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn role_selector(cluster_name: &str, role: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_PG_CLUSTER.to_string(), cluster_name.to_string()),
        (LABEL_ROLE.to_string(), role.to_string()),
    ])
}

/// Primary (read-write) service, named after the cluster
pub fn primary_service(cluster_name: &str, port: i32, service_type: &str) -> Service {
    build_service(
        cluster_name,
        cluster_name,
        port,
        service_type,
        role_selector(cluster_name, ROLE_PRIMARY),
    )
}

/// Shared replica (read-only) service
pub fn replica_service(cluster_name: &str, port: i32, service_type: &str) -> Service {
    build_service(
        &replica_service_name(cluster_name),
        cluster_name,
        port,
        service_type,
        role_selector(cluster_name, ROLE_REPLICA),
    )
}

/// Create `service` unless an object of the same name already exists.
///
/// Returns whether a create was issued.
pub async fn ensure_service(kube: &dyn KubeClient, ns: &str, service: &Service) -> Result<bool> {
    let name = service.metadata.name.clone().unwrap_or_default();
    if kube.get_service(&name, ns).await?.is_some() {
        debug!("service {} already exists", name);
        return Ok(false);
    }
    kube.create_service(ns, service).await?;
    Ok(true)
}
