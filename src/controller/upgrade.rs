//! Cluster upgrades
//!
//! Minor upgrades swap images in place and complete immediately. Major
//! upgrades start a job and stay open until [`finalize_major_upgrade`] runs
//! once the job has finished. In both cases the cluster records the target
//! image tag as soon as the upgrade has been started successfully.

use std::time::Instant;

use kube::ResourceExt;
use tracing::{info, instrument};

use crate::client::ResourceKind;
use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::patch::{PatchPlan, paths};
use crate::controller::pipeline::{Pipeline, Step};
use crate::crd::{COMPLETED_STATUS, Pgcluster, Pgupgrade, UpgradeType};

/// Start the upgrade described by `upgrade` on `cluster`
#[instrument(skip(ctx, upgrade, cluster), fields(name = %upgrade.name_any(), namespace = %ns))]
pub async fn add_upgrade(
    ctx: &Context,
    upgrade: &Pgupgrade,
    cluster: &Pgcluster,
    ns: &str,
) -> Result<UpgradeType> {
    let started = Instant::now();
    let result = run_add_upgrade(ctx, upgrade, cluster, ns).await;
    ctx.observe("add_upgrade", started, &result);
    result
}

async fn run_add_upgrade(
    ctx: &Context,
    upgrade: &Pgupgrade,
    cluster: &Pgcluster,
    ns: &str,
) -> Result<UpgradeType> {
    let kube = ctx.kube.as_ref();
    let upgrade_name = upgrade.name_any();
    let cluster_name = cluster.name_any();
    let mut pipeline = Pipeline::new("add_upgrade", format!("{}/{}", ns, upgrade_name));

    let strategy = pipeline
        .run(Step::ResolveStrategy, async {
            ctx.resolve_strategy(&cluster.spec.strategy)
        })
        .await?;

    let upgrade_type = pipeline
        .run(Step::ParseUpgradeType, async {
            upgrade
                .spec
                .upgrade_type
                .parse::<UpgradeType>()
                .map_err(Error::InvalidConfig)
        })
        .await?;

    match upgrade_type {
        UpgradeType::Minor => {
            pipeline
                .run(
                    Step::RunUpgrade,
                    strategy.minor_upgrade(ctx, cluster, upgrade, ns),
                )
                .await?;
            pipeline
                .run(Step::RecordCompletion, async {
                    PatchPlan::new(ResourceKind::Pgupgrade, &upgrade_name)
                        .set(paths::UPGRADE_STATUS, COMPLETED_STATUS)
                        .apply(kube, ns)
                        .await
                        .into_result()
                })
                .await?;
        }
        UpgradeType::Major => {
            pipeline
                .run(
                    Step::RunUpgrade,
                    strategy.major_upgrade(ctx, cluster, upgrade, ns),
                )
                .await?;
        }
    }

    pipeline
        .run(Step::RecordImageTag, async {
            PatchPlan::new(ResourceKind::Pgcluster, &cluster_name)
                .set(paths::CCP_IMAGE_TAG, upgrade.spec.ccp_image_tag.clone())
                .apply(kube, ns)
                .await
                .into_result()
        })
        .await?;

    info!(
        "{} upgrade of cluster {} to {} started",
        upgrade_type, cluster_name, upgrade.spec.ccp_image_tag
    );
    Ok(upgrade_type)
}

/// Bring a cluster back after its major upgrade job finished and close the
/// upgrade
#[instrument(skip(ctx, upgrade, cluster), fields(name = %upgrade.name_any(), namespace = %ns))]
pub async fn finalize_major_upgrade(
    ctx: &Context,
    upgrade: &Pgupgrade,
    cluster: &Pgcluster,
    ns: &str,
) -> Result<()> {
    let started = Instant::now();
    let result = async {
        let upgrade_name = upgrade.name_any();
        let mut pipeline = Pipeline::new("finalize_major_upgrade", format!("{}/{}", ns, upgrade_name));
        let strategy = pipeline
            .run(Step::ResolveStrategy, async {
                ctx.resolve_strategy(&cluster.spec.strategy)
            })
            .await?;
        pipeline
            .run(
                Step::FinalizeUpgrade,
                strategy.major_upgrade_finalize(ctx, cluster, upgrade, ns),
            )
            .await?;
        pipeline
            .run(Step::RecordCompletion, async {
                PatchPlan::new(ResourceKind::Pgupgrade, &upgrade_name)
                    .set(paths::UPGRADE_STATUS, COMPLETED_STATUS)
                    .apply(ctx.kube.as_ref(), ns)
                    .await
                    .into_result()
            })
            .await?;
        info!("major upgrade {} finalized", upgrade_name);
        Ok(())
    }
    .await;
    ctx.observe("finalize_major_upgrade", started, &result);
    result
}
