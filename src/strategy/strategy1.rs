//! Strategy "1": one Deployment per database instance
//!
//! The primary Deployment and Service share the cluster's name; each replica
//! gets its own Deployment named after its replica resource. Workloads are
//! created only when absent, so re-running a lifecycle action repairs a
//! partially provisioned cluster instead of failing on existing objects.
//!
//! A failover promotes the target replica's Deployment in place, so the
//! primary is always located by its `role` label, never by name.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use crate::controller::Context;
use crate::controller::error::{Error, Result, ignore_not_found};
use crate::crd::{Pgcluster, Pgreplica, Pgtask, Pgupgrade};
use crate::resources::common::{LABEL_PG_CLUSTER, LABEL_ROLE, ROLE_PRIMARY};
use crate::resources::deployment::{
    data_claim, image_patch, labels_patch, postgres_image, primary_deployment_named,
    replica_deployment, role_patch,
};
use crate::resources::job::{UpgradeTarget, upgrade_job, upgrade_job_name, upgraded_target};
use crate::resources::pooler::PoolerKind;
use crate::resources::service::{ensure_service, parse_port, primary_service, replica_service_name};
use crate::strategy::Strategy;

#[derive(Debug, Default, Clone, Copy)]
pub struct Strategy1;

impl Strategy1 {
    /// The Deployment currently labelled as the cluster's primary
    async fn find_primary(
        &self,
        ctx: &Context,
        cluster_name: &str,
        ns: &str,
    ) -> Result<Option<Deployment>> {
        let selector = format!(
            "{}={},{}={}",
            LABEL_PG_CLUSTER, cluster_name, LABEL_ROLE, ROLE_PRIMARY
        );
        Ok(ctx.kube.list_deployments(ns, &selector).await?.into_iter().next())
    }

    async fn ensure_primary(
        &self,
        ctx: &Context,
        cluster: &Pgcluster,
        ns: &str,
        name: &str,
        pvc_name: &str,
    ) -> Result<()> {
        if let Some(existing) = self.find_primary(ctx, &cluster.name_any(), ns).await? {
            debug!("primary deployment {} already exists", existing.name_any());
            return Ok(());
        }
        let deployment = primary_deployment_named(cluster, name, pvc_name, &ctx.config)?;
        ctx.kube.create_deployment(ns, &deployment).await?;
        info!("created primary deployment {}", name);
        Ok(())
    }
}

fn is_primary(deployment: &Deployment) -> bool {
    deployment.labels().get(LABEL_ROLE).map(String::as_str) == Some(ROLE_PRIMARY)
}

/// Claim backing the cluster's primary, as recorded on the resource
fn primary_claim(cluster: &Pgcluster) -> String {
    if cluster.spec.primary_storage.name.is_empty() {
        cluster.name_any()
    } else {
        cluster.spec.primary_storage.name.clone()
    }
}

#[async_trait]
impl Strategy for Strategy1 {
    async fn add_cluster(
        &self,
        ctx: &Context,
        cluster: &Pgcluster,
        ns: &str,
        pvc_name: &str,
    ) -> Result<()> {
        let name = cluster.name_any();
        let port = parse_port(&cluster.spec.port)?;
        let service = primary_service(&name, port, &ctx.config.cluster.service_type);
        if ensure_service(ctx.kube.as_ref(), ns, &service).await? {
            info!("created primary service {}", name);
        }
        self.ensure_primary(ctx, cluster, ns, &name, pvc_name).await
    }

    async fn delete_cluster(&self, ctx: &Context, cluster: &Pgcluster, ns: &str) -> Result<()> {
        let name = cluster.name_any();
        let mut first_error = None;
        let mut keep = |result: Result<()>| {
            if let Err(e) = result {
                warn!("error deleting objects of cluster {}: {}", name, e);
                first_error.get_or_insert(e);
            }
        };

        let selector = format!("{}={}", LABEL_PG_CLUSTER, name);
        match ctx.kube.list_deployments(ns, &selector).await {
            Ok(deployments) => {
                for d in deployments {
                    let d_name = d.name_any();
                    keep(ignore_not_found(
                        ctx.kube.delete_deployment(&d_name, ns).await,
                        &format!("deployment {}", d_name),
                    ));
                }
            }
            Err(e) => keep(Err(e)),
        }

        let mut services = vec![name.clone(), replica_service_name(&name)];
        services.extend(
            [PoolerKind::Pgbouncer, PoolerKind::Pgpool]
                .iter()
                .map(|k| k.object_name(&name)),
        );
        for svc in services {
            keep(ignore_not_found(
                ctx.kube.delete_service(&svc, ns).await,
                &format!("service {}", svc),
            ));
        }

        match ctx.kube.list_replicas(ns, &name).await {
            Ok(replicas) => {
                for r in replicas {
                    let r_name = r.name_any();
                    keep(ignore_not_found(
                        ctx.kube.delete_replica(&r_name, ns).await,
                        &format!("pgreplica {}", r_name),
                    ));
                }
            }
            Err(e) => keep(Err(e)),
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!("deleted workloads of cluster {}", name);
                Ok(())
            }
        }
    }

    async fn scale(
        &self,
        ctx: &Context,
        replica: &Pgreplica,
        ns: &str,
        pvc_name: &str,
        cluster: &Pgcluster,
    ) -> Result<()> {
        let name = replica.name_any();
        if ctx.kube.get_deployment(&name, ns).await?.is_some() {
            debug!("replica deployment {} already exists", name);
            return Ok(());
        }
        let deployment = replica_deployment(replica, cluster, pvc_name, &ctx.config)?;
        ctx.kube.create_deployment(ns, &deployment).await?;
        info!("created replica deployment {}", name);
        Ok(())
    }

    async fn delete_replica(&self, ctx: &Context, replica: &Pgreplica, ns: &str) -> Result<()> {
        let name = replica.name_any();
        if let Some(d) = ctx.kube.get_deployment(&name, ns).await? {
            if is_primary(&d) {
                info!("deployment {} was promoted to primary, keeping it", name);
                return Ok(());
            }
        }
        ignore_not_found(
            ctx.kube.delete_deployment(&name, ns).await,
            &format!("replica deployment {}", name),
        )
    }

    async fn failover(
        &self,
        ctx: &Context,
        cluster: &Pgcluster,
        task: &Pgtask,
        target: &str,
        ns: &str,
    ) -> Result<()> {
        let name = cluster.name_any();
        if ctx.kube.get_deployment(target, ns).await?.is_none() {
            return Err(Error::NotFound(format!(
                "failover target deployment {} for cluster {}",
                target, name
            )));
        }
        info!("failover task {} promoting {} in cluster {}", task.name_any(), target, name);

        if let Some(primary) = self.find_primary(ctx, &name, ns).await? {
            let primary_name = primary.name_any();
            if primary_name != target {
                ignore_not_found(
                    ctx.kube.delete_deployment(&primary_name, ns).await,
                    &format!("primary deployment {}", primary_name),
                )?;
            }
        }
        ctx.kube
            .patch_deployment(target, ns, &role_patch(ROLE_PRIMARY))
            .await?;
        ignore_not_found(
            ctx.kube.delete_replica(target, ns).await,
            &format!("pgreplica {}", target),
        )
    }

    async fn minor_upgrade(
        &self,
        ctx: &Context,
        cluster: &Pgcluster,
        upgrade: &Pgupgrade,
        ns: &str,
    ) -> Result<()> {
        let name = cluster.name_any();
        let image = postgres_image(&ctx.config, &upgrade.spec.ccp_image_tag);
        let selector = format!("{}={}", LABEL_PG_CLUSTER, name);

        for d in ctx.kube.list_deployments(ns, &selector).await? {
            // Pooler deployments carry no database container
            let Some(patch) = image_patch(&d, &image) else {
                continue;
            };
            let d_name = d.name_any();
            ctx.kube.patch_deployment(&d_name, ns, &patch).await?;
            info!("deployment {} now runs {}", d_name, image);
        }
        Ok(())
    }

    async fn major_upgrade(
        &self,
        ctx: &Context,
        cluster: &Pgcluster,
        upgrade: &Pgupgrade,
        ns: &str,
    ) -> Result<()> {
        let name = cluster.name_any();
        let target = match self.find_primary(ctx, &name, ns).await? {
            Some(primary) => {
                let target = UpgradeTarget {
                    workload: primary.name_any(),
                    claim: data_claim(&primary).unwrap_or_else(|| primary_claim(cluster)),
                };
                ignore_not_found(
                    ctx.kube.delete_deployment(&target.workload, ns).await,
                    &format!("primary deployment {}", target.workload),
                )?;
                target
            }
            None => UpgradeTarget {
                workload: name.clone(),
                claim: primary_claim(cluster),
            },
        };

        let job = upgrade_job(upgrade, cluster, &target, &ctx.config);
        match ctx.kube.create_job(ns, &job).await {
            Ok(()) => {
                info!("created upgrade job {}", upgrade_job_name(&name));
                Ok(())
            }
            Err(e) if e.is_already_exists() => {
                debug!("upgrade job {} already running", upgrade_job_name(&name));
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn major_upgrade_finalize(
        &self,
        ctx: &Context,
        cluster: &Pgcluster,
        upgrade: &Pgupgrade,
        ns: &str,
    ) -> Result<()> {
        let name = cluster.name_any();
        let job_name = upgrade_job_name(&name);
        // The job records which workload and claim it upgraded
        let target = ctx
            .kube
            .get_job(&job_name, ns)
            .await?
            .as_ref()
            .and_then(upgraded_target)
            .unwrap_or_else(|| UpgradeTarget {
                workload: name.clone(),
                claim: if upgrade.spec.new_pvc_name.is_empty() {
                    primary_claim(cluster)
                } else {
                    upgrade.spec.new_pvc_name.clone()
                },
            });
        ignore_not_found(
            ctx.kube.delete_job(&job_name, ns).await,
            &format!("upgrade job of {}", name),
        )?;

        let mut upgraded = cluster.clone();
        upgraded.spec.ccp_image_tag = upgrade.spec.ccp_image_tag.clone();
        self.ensure_primary(ctx, &upgraded, ns, &target.workload, &target.claim)
            .await
    }

    async fn update_policy_labels(
        &self,
        ctx: &Context,
        cluster_name: &str,
        ns: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<()> {
        let primary = match self.find_primary(ctx, cluster_name, ns).await? {
            Some(d) => d.name_any(),
            None => cluster_name.to_string(),
        };
        ctx.kube
            .patch_deployment(&primary, ns, &labels_patch(labels))
            .await
    }
}
