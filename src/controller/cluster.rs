//! Cluster creation and deletion
//!
//! Creation is a fixed sequence of steps run through a [`Pipeline`]: storage,
//! credentials, strategy, workloads, completion marker, then the optional
//! add-ons. Derived values are staged on a local draft of the cluster and
//! persisted only through explicit field patches.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use kube::ResourceExt;
use kube::core::ObjectMeta;
use tracing::{error, info, instrument, warn};

use crate::client::ResourceKind;
use crate::controller::context::Context;
use crate::controller::credentials::{CredentialRole, credentials_from, provision_secrets};
use crate::controller::error::{Error, Result};
use crate::controller::failover::FailoverTaskManager;
use crate::controller::patch::{PatchPlan, paths};
use crate::controller::pipeline::{Pipeline, Step};
use crate::controller::validation::{parse_replica_count, validate_cluster};
use crate::crd::{COMPLETED_STATUS, Pgcluster, Pgreplica, PgreplicaSpec, REPLICA_CREATED_STATUS};
use crate::resources::common::{LABEL_NAME, LABEL_PG_CLUSTER, random_suffix};
use crate::resources::deployment::{backrest_claim_name, xlog_claim_name};
use crate::resources::pooler::{PoolerKind, ensure_pooler};
use crate::resources::storage::ensure_claim;

/// Length of the random part of generated replica names
const REPLICA_SUFFIX_LEN: usize = 4;

/// What [`add_cluster`] did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterOutcome {
    /// The cluster was already marked complete; nothing was touched
    AlreadyComplete,
    Provisioned { replicas_created: u32 },
}

/// Provision a cluster's storage, credentials, workloads and add-ons
#[instrument(skip(ctx, cluster), fields(name = %cluster.name_any(), namespace = %ns))]
pub async fn add_cluster(ctx: &Context, cluster: &Pgcluster, ns: &str) -> Result<ClusterOutcome> {
    let started = Instant::now();
    let result = run_add_cluster(ctx, cluster, ns).await;
    ctx.observe("add_cluster", started, &result);
    result
}

async fn run_add_cluster(ctx: &Context, cluster: &Pgcluster, ns: &str) -> Result<ClusterOutcome> {
    let name = cluster.name_any();
    if cluster.spec.is_completed() {
        warn!("cluster {} already completed, not processing again", name);
        return Ok(ClusterOutcome::AlreadyComplete);
    }
    validate_cluster(&name, &cluster.spec)?;

    let kube = ctx.kube.as_ref();
    let mut pipeline = Pipeline::new("add_cluster", format!("{}/{}", ns, name));
    let mut draft = cluster.clone();

    let pvc_name = pipeline
        .run(
            Step::PrimaryClaim,
            ensure_claim(kube, &cluster.spec.primary_storage, &name, &name, ns),
        )
        .await?;
    draft.spec.primary_storage.name = pvc_name.clone();

    if draft.spec.archive_enabled() {
        pipeline
            .run(
                Step::ArchiveClaim,
                ensure_claim(
                    kube,
                    &cluster.spec.primary_storage,
                    &xlog_claim_name(&name),
                    &name,
                    ns,
                ),
            )
            .await?;
    }

    if draft.spec.backrest_enabled() {
        pipeline
            .run(Step::BackrestClaim, async {
                let spec = ctx.config.backup_storage_spec()?;
                ensure_claim(kube, &spec, &backrest_claim_name(&name), &name, ns).await
            })
            .await?;
    }

    if !draft.spec.password.is_empty() {
        draft.spec.root_password = draft.spec.password.clone();
        draft.spec.primary_password = draft.spec.password.clone();
    }

    if !draft.spec.secret_from.is_empty() {
        let source = draft.spec.secret_from.clone();
        let sourced = pipeline
            .run(Step::SecretSource, credentials_from(kube, &source, ns))
            .await?;
        info!("using credentials of cluster {}", source);
        draft.spec.root_password = sourced.root;
        draft.spec.primary_password = sourced.primary;
        draft.spec.password = sourced.user;
    }

    pipeline
        .run(Step::Credentials, async {
            provision_secrets(ctx, &draft, ns).await.into_result()
        })
        .await?;
    draft.spec.root_secret_name = CredentialRole::Root.secret_name(&name);
    draft.spec.primary_secret_name = CredentialRole::Primary.secret_name(&name);
    draft.spec.user_secret_name = CredentialRole::User.secret_name(&name);

    let strategy = pipeline
        .run(Step::ResolveStrategy, async {
            ctx.resolve_strategy(&draft.spec.strategy)
        })
        .await?;

    pipeline
        .run(
            Step::MaterializePrimary,
            strategy.add_cluster(ctx, &draft, ns, &pvc_name),
        )
        .await?;

    let report = PatchPlan::new(ResourceKind::Pgcluster, &name)
        .set(paths::STATUS, COMPLETED_STATUS)
        .set(paths::PRIMARY_STORAGE_NAME, pvc_name.clone())
        .apply(kube, ns)
        .await;
    if report.is_complete() {
        pipeline.mark(Step::RecordCompletion);
    }

    let poolers = PoolerKind::requested(&draft);
    for kind in &poolers {
        if let Err(e) = ensure_pooler(kube, *kind, &draft, ns, &ctx.config).await {
            error!("error adding {} to cluster {}: {}", kind, name, e);
        }
    }
    if !poolers.is_empty() {
        pipeline.mark(Step::Poolers);
    }

    let replicas_created = match parse_replica_count(&draft.spec.replicas) {
        Ok(0) => 0,
        Ok(count) => {
            let created = fan_out_replicas(ctx, &draft, count, ns).await;
            pipeline.mark(Step::ReplicaFanOut);
            created
        }
        Err(e) => {
            error!("replica count for cluster {} not usable: {}", name, e);
            0
        }
    };

    info!(
        completed = ?pipeline.completed(),
        "cluster {} provisioned with {} new replicas",
        name,
        replicas_created
    );
    Ok(ClusterOutcome::Provisioned { replicas_created })
}

/// Create `count` replica resources for the cluster, returning how many were
/// created. Individual failures are logged and skipped.
async fn fan_out_replicas(ctx: &Context, cluster: &Pgcluster, count: u32, ns: &str) -> u32 {
    let name = cluster.name_any();
    let storage = match ctx.config.replica_storage_spec() {
        Ok(spec) => spec,
        Err(e) => {
            error!("no replica storage for cluster {}: {}", name, e);
            return 0;
        }
    };

    let mut used = BTreeSet::new();
    let mut created = 0;
    for _ in 0..count {
        let replica_name = loop {
            let candidate = format!("{}-{}", name, random_suffix(REPLICA_SUFFIX_LEN));
            if used.insert(candidate.clone()) {
                break candidate;
            }
        };

        let replica = Pgreplica {
            metadata: ObjectMeta {
                name: Some(replica_name.clone()),
                labels: Some(BTreeMap::from([
                    (LABEL_PG_CLUSTER.to_string(), name.clone()),
                    (LABEL_NAME.to_string(), replica_name.clone()),
                ])),
                ..Default::default()
            },
            spec: PgreplicaSpec {
                name: replica_name.clone(),
                cluster_name: name.clone(),
                replica_storage: storage.clone(),
                container_resources: cluster.spec.container_resources.clone(),
                status: REPLICA_CREATED_STATUS.to_string(),
                user_labels: cluster.spec.user_labels.clone(),
            },
        };

        match ctx.kube.create_replica(ns, &replica).await {
            Ok(()) => {
                info!("created pgreplica {}", replica_name);
                created += 1;
            }
            Err(e) => error!("error creating pgreplica {}: {}", replica_name, e),
        }
    }
    created
}

/// Tear down a cluster's workloads and pending tasks. Claims are kept.
#[instrument(skip(ctx, cluster), fields(name = %cluster.name_any(), namespace = %ns))]
pub async fn delete_cluster(ctx: &Context, cluster: &Pgcluster, ns: &str) -> Result<()> {
    let started = Instant::now();
    let result = run_delete_cluster(ctx, cluster, ns).await;
    ctx.observe("delete_cluster", started, &result);
    result
}

async fn run_delete_cluster(ctx: &Context, cluster: &Pgcluster, ns: &str) -> Result<()> {
    let name = cluster.name_any();
    let kube = ctx.kube.as_ref();
    let mut pipeline = Pipeline::new("delete_cluster", format!("{}/{}", ns, name));

    match FailoverTaskManager::new(kube).clear(&name, ns).await {
        Ok(()) => pipeline.mark(Step::ClearFailoverTask),
        Err(e) => error!("error clearing failover task of {}: {}", name, e),
    }

    let strategy = pipeline
        .run(Step::ResolveStrategy, async {
            ctx.resolve_strategy(&cluster.spec.strategy)
        })
        .await?;
    pipeline
        .run(Step::DestroyWorkloads, strategy.delete_cluster(ctx, cluster, ns))
        .await?;

    match kube.delete_upgrade(&name, ns).await {
        Ok(()) => info!("deleted pgupgrade {}", name),
        Err(e) if e.is_not_found() => info!("pgupgrade {} not found, nothing to remove", name),
        Err(e) => error!("error deleting pgupgrade {}: {}", name, e),
    }
    pipeline.mark(Step::RemoveUpgrade);

    info!("deleted cluster {}", name);
    Ok(())
}

/// Apply policy labels to a cluster's primary through its strategy
#[instrument(skip(ctx, labels), fields(namespace = %ns))]
pub async fn apply_policy_labels(
    ctx: &Context,
    cluster_name: &str,
    ns: &str,
    labels: &BTreeMap<String, String>,
) -> Result<()> {
    let started = Instant::now();
    let result = async {
        let kube = ctx.kube.as_ref();
        let mut pipeline = Pipeline::new("apply_policy_labels", format!("{}/{}", ns, cluster_name));
        let cluster = pipeline
            .run(Step::LoadCluster, async {
                kube.get_cluster(cluster_name, ns)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("pgcluster {}", cluster_name)))
            })
            .await?;
        let strategy = pipeline
            .run(Step::ResolveStrategy, async {
                ctx.resolve_strategy(&cluster.spec.strategy)
            })
            .await?;
        pipeline
            .run(
                Step::PolicyLabels,
                strategy.update_policy_labels(ctx, cluster_name, ns, labels),
            )
            .await
    }
    .await;
    ctx.observe("apply_policy_labels", started, &result);
    result
}
