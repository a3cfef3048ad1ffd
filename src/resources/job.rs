//! Major upgrade job
//!
//! A major version upgrade runs `pg_upgrade` in a one-shot Job that mounts
//! the old data claim and writes into the new one. The primary deployment is
//! stopped before the Job starts and recreated when the upgrade is finalized.

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, Volume,
    VolumeMount,
};
use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::config::OperatorConfig;
use crate::crd::{Pgcluster, Pgupgrade};
use crate::resources::common::cluster_labels;

/// Name of the upgrade Job of a cluster
pub fn upgrade_job_name(cluster_name: &str) -> String {
    format!("{}-upgrade", cluster_name)
}

const OLD_DATABASE_ENV: &str = "OLD_DATABASE_NAME";
const NEW_DATABASE_ENV: &str = "NEW_DATABASE_NAME";

fn claim_volume(name: &str, claim: &str) -> Volume {
    Volume {
        name: name.to_string(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: claim.to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// The primary workload a major upgrade runs against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeTarget {
    /// Deployment name, which also names the data directory inside the claim
    pub workload: String,
    /// Claim holding the primary's data
    pub claim: String,
}

/// Generate the upgrade Job.
///
/// The old claim defaults to the target's claim; the new claim defaults to
/// the old one (in-place upgrade).
pub fn upgrade_job(
    upgrade: &Pgupgrade,
    cluster: &Pgcluster,
    target: &UpgradeTarget,
    config: &OperatorConfig,
) -> Job {
    let cluster_name = cluster.name_any();
    let old_pvc = if upgrade.spec.old_pvc_name.is_empty() {
        target.claim.clone()
    } else {
        upgrade.spec.old_pvc_name.clone()
    };
    let new_pvc = if upgrade.spec.new_pvc_name.is_empty() {
        old_pvc.clone()
    } else {
        upgrade.spec.new_pvc_name.clone()
    };

    let labels = upgrade_job_labels(&cluster_name);

    let env = |name: &str, value: &str| EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    };

    let mut volumes = vec![claim_volume("pgolddata", &old_pvc)];
    let mut mounts = vec![VolumeMount {
        name: "pgolddata".to_string(),
        mount_path: "/pgolddata".to_string(),
        ..Default::default()
    }];
    if new_pvc != old_pvc {
        volumes.push(claim_volume("pgnewdata", &new_pvc));
        mounts.push(VolumeMount {
            name: "pgnewdata".to_string(),
            mount_path: "/pgnewdata".to_string(),
            ..Default::default()
        });
    }

    let container = Container {
        name: "upgrade".to_string(),
        image: Some(format!(
            "{}/crunchy-upgrade:{}",
            config.cluster.ccp_image_prefix, upgrade.spec.ccp_image_tag
        )),
        env: Some(vec![
            env(OLD_DATABASE_ENV, &target.workload),
            env(NEW_DATABASE_ENV, &target.workload),
            env("OLD_VERSION", &cluster.spec.ccp_image_tag),
            env("NEW_VERSION", &upgrade.spec.ccp_image_tag),
        ]),
        volume_mounts: Some(mounts),
        ..Default::default()
    };

    Job {
        metadata: ObjectMeta {
            name: Some(upgrade_job_name(&cluster_name)),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: Some(volumes),
                    restart_policy: Some("Never".to_string()),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Workload and claim an upgrade Job wrote the new data for.
///
/// Returns `None` for Jobs not built by [`upgrade_job`].
pub fn upgraded_target(job: &Job) -> Option<UpgradeTarget> {
    let pod = job.spec.as_ref()?.template.spec.as_ref()?;
    let workload = pod
        .containers
        .iter()
        .flat_map(|c| c.env.iter().flatten())
        .find(|e| e.name == NEW_DATABASE_ENV)?
        .value
        .clone()?;
    let volumes = pod.volumes.as_ref()?;
    let claim_of = |name: &str| {
        volumes
            .iter()
            .find(|v| v.name == name)
            .and_then(|v| v.persistent_volume_claim.as_ref())
            .map(|c| c.claim_name.clone())
    };
    let claim = claim_of("pgnewdata").or_else(|| claim_of("pgolddata"))?;
    Some(UpgradeTarget { workload, claim })
}

fn upgrade_job_labels(cluster_name: &str) -> BTreeMap<String, String> {
    let mut labels = cluster_labels(cluster_name);
    labels.insert("pgupgrade".to_string(), "true".to_string());
    labels
}
