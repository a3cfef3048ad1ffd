//! Persistent volume claims
//!
//! `storagetype` on a [`StorageSpec`] selects how a claim is obtained:
//! `create` and `dynamic` provision a new claim, `existing` uses a claim the
//! user created beforehand, and `emptydir` (or no type at all) means the
//! workload runs on ephemeral storage and no claim is involved.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::core::ObjectMeta;
use tracing::{debug, info};

use crate::client::KubeClient;
use crate::controller::error::{Error, Result};
use crate::controller::validation::validate_storage_size;
use crate::crd::StorageSpec;
use crate::resources::common::cluster_labels;

/// How a [`StorageSpec`] is satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimMode {
    /// No claim; the workload uses an emptyDir volume
    EmptyDir,
    /// The claim already exists and is used as-is
    Existing,
    /// Provision a claim without a storage class
    Create,
    /// Provision a claim through the named storage class
    Dynamic,
}

impl ClaimMode {
    pub fn of(spec: &StorageSpec) -> Result<Self> {
        match spec.storage_type.as_str() {
            "" | "emptydir" => Ok(ClaimMode::EmptyDir),
            "existing" => Ok(ClaimMode::Existing),
            "create" => Ok(ClaimMode::Create),
            "dynamic" => Ok(ClaimMode::Dynamic),
            other => Err(Error::InvalidConfig(format!(
                "unknown storage type '{}'",
                other
            ))),
        }
    }
}

/// Build the claim object for `claim_name`
pub fn build_claim(
    spec: &StorageSpec,
    claim_name: &str,
    cluster_name: &str,
) -> Result<PersistentVolumeClaim> {
    validate_storage_size(&spec.size)?;

    let access_mode = if spec.access_mode.is_empty() {
        "ReadWriteOnce".to_string()
    } else {
        spec.access_mode.clone()
    };

    let storage_class = match ClaimMode::of(spec)? {
        ClaimMode::Dynamic if !spec.storage_class.is_empty() => Some(spec.storage_class.clone()),
        _ => None,
    };

    Ok(PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(claim_name.to_string()),
            labels: Some(cluster_labels(cluster_name)),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec![access_mode]),
            storage_class_name: storage_class,
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(spec.size.clone()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Obtain a claim for `claim_name` according to the storage template's type.
///
/// Always attempts creation for `create`/`dynamic`; callers that want to
/// reuse an existing claim check for it first. Returns the claim name the
/// workload should mount, or an empty string for emptyDir storage.
pub async fn provision_claim(
    kube: &dyn KubeClient,
    spec: &StorageSpec,
    claim_name: &str,
    cluster_name: &str,
    ns: &str,
) -> Result<String> {
    match ClaimMode::of(spec)? {
        ClaimMode::EmptyDir => {
            debug!("storage type is emptydir, no claim for {}", claim_name);
            Ok(String::new())
        }
        ClaimMode::Existing => {
            debug!("using existing claim {}", claim_name);
            Ok(claim_name.to_string())
        }
        ClaimMode::Create | ClaimMode::Dynamic => {
            let claim = build_claim(spec, claim_name, cluster_name)?;
            kube.create_pvc(ns, &claim).await?;
            info!("created claim {}", claim_name);
            Ok(claim_name.to_string())
        }
    }
}

/// Reuse `claim_name` if it is already present, otherwise provision it
pub async fn ensure_claim(
    kube: &dyn KubeClient,
    spec: &StorageSpec,
    claim_name: &str,
    cluster_name: &str,
    ns: &str,
) -> Result<String> {
    if kube.get_pvc(claim_name, ns).await?.is_some() {
        debug!(
            "pvc [{}] already present from previous cluster with this same name, will not recreate",
            claim_name
        );
        return Ok(claim_name.to_string());
    }
    provision_claim(kube, spec, claim_name, cluster_name, ns).await
}
