//! Reconcilers driving the lifecycle orchestrators from watch events
//!
//! Pgcluster and Pgreplica carry a finalizer so their teardown runs before
//! the object disappears. Pgupgrade and Pgtask are one-shot requests and are
//! removed together with their cluster.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::batch::v1::Job;
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use crate::client::ResourceKind;
use crate::controller::cluster::{ClusterOutcome, add_cluster, delete_cluster};
use crate::controller::context::Context;
use crate::controller::error::{BackoffConfig, Error, Result};
use crate::controller::failover::failover;
use crate::controller::replica::{scale, scale_down};
use crate::controller::upgrade::{add_upgrade, finalize_major_upgrade};
use crate::crd::{COMPLETED_STATUS, Pgcluster, Pgreplica, Pgtask, Pgupgrade, TASK_FAILOVER, UpgradeType};
use crate::resources::job::upgrade_job_name;

/// Finalizer name for cleanup
pub const FINALIZER: &str = "pgcluster.crunchydata.com/finalizer";

/// How often a running major upgrade job is checked
const UPGRADE_POLL_INTERVAL: Duration = Duration::from_secs(15);

fn namespace_of<K: Resource>(obj: &K) -> Result<String> {
    obj.namespace()
        .ok_or(Error::MissingObjectKey("metadata.namespace"))
}

/// Main reconciliation function for Pgcluster
#[instrument(skip(cluster, ctx), fields(name = %cluster.name_any(), namespace = cluster.namespace().unwrap_or_default()))]
pub async fn reconcile_cluster(cluster: Arc<Pgcluster>, ctx: Arc<Context>) -> Result<Action> {
    let ns = namespace_of(cluster.as_ref())?;
    let name = cluster.name_any();

    if cluster.metadata.deletion_timestamp.is_some() {
        if has_finalizer(cluster.as_ref()) {
            delete_cluster(&ctx, &cluster, &ns).await?;
            remove_finalizer(&ctx, ResourceKind::Pgcluster, cluster.as_ref(), &ns).await?;
        }
        return Ok(Action::await_change());
    }

    if !has_finalizer(cluster.as_ref()) {
        add_finalizer(&ctx, ResourceKind::Pgcluster, cluster.as_ref(), &ns).await?;
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    if cluster.spec.is_completed() {
        debug!("Pgcluster {} already processed", name);
        return Ok(Action::await_change());
    }

    match add_cluster(&ctx, &cluster, &ns).await? {
        ClusterOutcome::Provisioned { replicas_created } => {
            info!("Pgcluster {} provisioned with {} replicas", name, replicas_created);
        }
        ClusterOutcome::AlreadyComplete => {}
    }
    Ok(Action::await_change())
}

/// Main reconciliation function for Pgreplica
#[instrument(skip(replica, ctx), fields(name = %replica.name_any(), namespace = replica.namespace().unwrap_or_default()))]
pub async fn reconcile_replica(replica: Arc<Pgreplica>, ctx: Arc<Context>) -> Result<Action> {
    let ns = namespace_of(replica.as_ref())?;

    if replica.metadata.deletion_timestamp.is_some() {
        if has_finalizer(replica.as_ref()) {
            match scale_down(&ctx, &replica, &ns).await {
                Ok(()) => {}
                // Cluster teardown already removed the workloads
                Err(e) if e.is_not_found() => {
                    debug!("nothing left to scale down for {}: {}", replica.name_any(), e);
                }
                Err(e) => return Err(e),
            }
            remove_finalizer(&ctx, ResourceKind::Pgreplica, replica.as_ref(), &ns).await?;
        }
        return Ok(Action::await_change());
    }

    if !has_finalizer(replica.as_ref()) {
        add_finalizer(&ctx, ResourceKind::Pgreplica, replica.as_ref(), &ns).await?;
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    if replica.spec.is_completed() {
        return Ok(Action::await_change());
    }

    scale(&ctx, &replica, &ns).await?;
    Ok(Action::await_change())
}

/// Main reconciliation function for Pgupgrade
///
/// A major upgrade is started once and then polled until its job finishes,
/// at which point the cluster is brought back on the new image.
#[instrument(skip(upgrade, ctx), fields(name = %upgrade.name_any(), namespace = upgrade.namespace().unwrap_or_default()))]
pub async fn reconcile_upgrade(upgrade: Arc<Pgupgrade>, ctx: Arc<Context>) -> Result<Action> {
    let ns = namespace_of(upgrade.as_ref())?;
    if upgrade.metadata.deletion_timestamp.is_some() || upgrade.spec.upgrade_status == COMPLETED_STATUS {
        return Ok(Action::await_change());
    }

    let cluster_name = &upgrade.spec.name;
    let cluster = ctx
        .kube
        .get_cluster(cluster_name, &ns)
        .await?
        .ok_or_else(|| Error::NotFound(format!("pgcluster {}", cluster_name)))?;

    let is_major = matches!(
        upgrade.spec.upgrade_type.parse::<UpgradeType>(),
        Ok(UpgradeType::Major)
    );
    if is_major {
        if let Some(job) = ctx.kube.get_job(&upgrade_job_name(cluster_name), &ns).await? {
            return match job_outcome(&job) {
                JobOutcome::Succeeded => {
                    finalize_major_upgrade(&ctx, &upgrade, &cluster, &ns).await?;
                    Ok(Action::await_change())
                }
                JobOutcome::Failed => {
                    error!(
                        "upgrade job for {} failed, manual intervention required",
                        cluster_name
                    );
                    Ok(Action::await_change())
                }
                JobOutcome::Running => Ok(Action::requeue(UPGRADE_POLL_INTERVAL)),
            };
        }
    }

    match add_upgrade(&ctx, &upgrade, &cluster, &ns).await? {
        UpgradeType::Major => Ok(Action::requeue(UPGRADE_POLL_INTERVAL)),
        UpgradeType::Minor => Ok(Action::await_change()),
    }
}

/// Main reconciliation function for Pgtask
#[instrument(skip(task, ctx), fields(name = %task.name_any(), namespace = task.namespace().unwrap_or_default()))]
pub async fn reconcile_task(task: Arc<Pgtask>, ctx: Arc<Context>) -> Result<Action> {
    let ns = namespace_of(task.as_ref())?;
    if task.metadata.deletion_timestamp.is_some() {
        return Ok(Action::await_change());
    }

    if task.spec.task_type == TASK_FAILOVER {
        failover(&ctx, &task, &ns).await?;
    } else {
        debug!("Pgtask {} of type {} needs no action", task.name_any(), task.spec.task_type);
    }
    Ok(Action::await_change())
}

/// Error policy shared by every controller, with exponential backoff
pub fn error_policy<K: Resource>(obj: Arc<K>, error: &Error, _ctx: Arc<Context>) -> Action {
    let name = obj.name_any();
    let delay = BackoffConfig::default().delay_for_error(error, 0);

    if error.is_retryable() {
        warn!(
            "Retryable error for {}: {}, requeuing in {:?}",
            name, error, delay
        );
    } else {
        error!(
            "Non-retryable error for {}: {}, requeuing in {:?} for manual intervention",
            name, error, delay
        );
    }

    Action::requeue(delay)
}

#[derive(Debug, PartialEq, Eq)]
enum JobOutcome {
    Running,
    Succeeded,
    Failed,
}

fn job_outcome(job: &Job) -> JobOutcome {
    let status = job.status.as_ref();
    if status.and_then(|s| s.succeeded).unwrap_or(0) > 0 {
        JobOutcome::Succeeded
    } else if status.and_then(|s| s.failed).unwrap_or(0) > 0 {
        JobOutcome::Failed
    } else {
        JobOutcome::Running
    }
}

/// Check if the finalizer is present
fn has_finalizer<K: Resource>(obj: &K) -> bool {
    obj.finalizers().iter().any(|f| f == FINALIZER)
}

/// Add the finalizer to the resource
async fn add_finalizer<K: Resource>(ctx: &Context, kind: ResourceKind, obj: &K, ns: &str) -> Result<()> {
    let name = obj.name_any();
    let mut finalizers = obj.finalizers().to_vec();
    finalizers.push(FINALIZER.to_string());

    let patch = serde_json::json!({
        "metadata": {
            "finalizers": finalizers
        }
    });
    ctx.kube.patch_resource(kind, &name, ns, &patch).await?;

    info!("Added finalizer to {} {}", kind, name);
    Ok(())
}

/// Remove our finalizer, keeping any others
async fn remove_finalizer<K: Resource>(ctx: &Context, kind: ResourceKind, obj: &K, ns: &str) -> Result<()> {
    let name = obj.name_any();
    let remaining: Vec<String> = obj
        .finalizers()
        .iter()
        .filter(|f| *f != FINALIZER)
        .cloned()
        .collect();

    let patch = if remaining.is_empty() {
        serde_json::json!({ "metadata": { "finalizers": null } })
    } else {
        serde_json::json!({ "metadata": { "finalizers": remaining } })
    };
    ctx.kube
        .patch_resource(kind, &name, ns, &patch)
        .await
        .map_err(|e| Error::FinalizerError(format!("{} {}: {}", kind, name, e)))?;

    info!("Removed finalizer from {} {}", kind, name);
    Ok(())
}
