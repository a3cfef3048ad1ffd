//! Replica scale-up and scale-down

use std::time::Instant;

use kube::ResourceExt;
use tracing::{info, instrument, warn};

use crate::client::ResourceKind;
use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::patch::{PatchPlan, paths};
use crate::controller::pipeline::{Pipeline, Step};
use crate::crd::{COMPLETED_STATUS, Pgcluster, Pgreplica};
use crate::resources::deployment::{backrest_claim_name, xlog_claim_name};
use crate::resources::service::{ensure_service, parse_port, replica_service};
use crate::resources::storage::provision_claim;

async fn load_cluster(ctx: &Context, replica: &Pgreplica, ns: &str) -> Result<Pgcluster> {
    let cluster_name = &replica.spec.cluster_name;
    ctx.kube
        .get_cluster(cluster_name, ns)
        .await?
        .ok_or_else(|| Error::NotFound(format!("pgcluster {}", cluster_name)))
}

/// Materialize one replica: storage, shared replica service, workload.
///
/// Claim creation is always attempted; a replica that failed after its claim
/// was created fails again at the claim step when re-run.
#[instrument(skip(ctx, replica), fields(name = %replica.name_any(), namespace = %ns))]
pub async fn scale(ctx: &Context, replica: &Pgreplica, ns: &str) -> Result<()> {
    let started = Instant::now();
    let result = run_scale(ctx, replica, ns).await;
    ctx.observe("scale", started, &result);
    result
}

async fn run_scale(ctx: &Context, replica: &Pgreplica, ns: &str) -> Result<()> {
    let name = replica.name_any();
    if replica.spec.is_completed() {
        warn!("pgreplica {} already completed, not processing again", name);
        return Ok(());
    }

    let kube = ctx.kube.as_ref();
    let mut pipeline = Pipeline::new("scale", format!("{}/{}", ns, name));
    let mut draft = replica.clone();

    let cluster = pipeline
        .run(Step::LoadCluster, load_cluster(ctx, replica, ns))
        .await?;
    let cluster_name = cluster.name_any();

    let pvc_name = pipeline
        .run(
            Step::ReplicaClaim,
            provision_claim(kube, &replica.spec.replica_storage, &name, &cluster_name, ns),
        )
        .await?;
    draft.spec.replica_storage.name = pvc_name.clone();

    if cluster.spec.archive_enabled() {
        pipeline
            .run(
                Step::ArchiveClaim,
                provision_claim(
                    kube,
                    &cluster.spec.primary_storage,
                    &xlog_claim_name(&name),
                    &cluster_name,
                    ns,
                ),
            )
            .await?;
    }
    if cluster.spec.backrest_enabled() {
        pipeline
            .run(
                Step::BackrestClaim,
                provision_claim(
                    kube,
                    &cluster.spec.primary_storage,
                    &backrest_claim_name(&name),
                    &cluster_name,
                    ns,
                ),
            )
            .await?;
    }

    pipeline
        .run(Step::RecordReplicaClaim, async {
            PatchPlan::new(ResourceKind::Pgreplica, &name)
                .set(paths::REPLICA_STORAGE_NAME, pvc_name.clone())
                .apply(kube, ns)
                .await
                .into_result()
        })
        .await?;

    let strategy = pipeline
        .run(Step::ResolveStrategy, async {
            ctx.resolve_strategy(&cluster.spec.strategy)
        })
        .await?;

    pipeline
        .run(Step::ReplicaService, async {
            let port = parse_port(&cluster.spec.port)?;
            let service = replica_service(&cluster_name, port, &ctx.config.cluster.service_type);
            ensure_service(kube, ns, &service).await
        })
        .await?;

    pipeline
        .run(
            Step::MaterializeReplica,
            strategy.scale(ctx, &draft, ns, &pvc_name, &cluster),
        )
        .await?;

    pipeline
        .run(Step::RecordCompletion, async {
            PatchPlan::new(ResourceKind::Pgreplica, &name)
                .set(paths::STATUS, COMPLETED_STATUS)
                .apply(kube, ns)
                .await
                .into_result()
        })
        .await?;

    info!("pgreplica {} added to cluster {}", name, cluster_name);
    Ok(())
}

/// Remove one replica's workload. Its storage is left in place.
#[instrument(skip(ctx, replica), fields(name = %replica.name_any(), namespace = %ns))]
pub async fn scale_down(ctx: &Context, replica: &Pgreplica, ns: &str) -> Result<()> {
    let started = Instant::now();
    let result = run_scale_down(ctx, replica, ns).await;
    ctx.observe("scale_down", started, &result);
    result
}

async fn run_scale_down(ctx: &Context, replica: &Pgreplica, ns: &str) -> Result<()> {
    let name = replica.name_any();
    let mut pipeline = Pipeline::new("scale_down", format!("{}/{}", ns, name));

    let cluster = pipeline
        .run(Step::LoadCluster, load_cluster(ctx, replica, ns))
        .await?;
    let strategy = pipeline
        .run(Step::ResolveStrategy, async {
            ctx.resolve_strategy(&cluster.spec.strategy)
        })
        .await?;
    pipeline
        .run(Step::RemoveReplica, strategy.delete_replica(ctx, replica, ns))
        .await?;

    info!("pgreplica {} removed from cluster {}", name, cluster.name_any());
    Ok(())
}
