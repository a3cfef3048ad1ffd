//! Failover tasks
//!
//! Pending automatic failovers are tracked in one Pgtask per cluster named
//! `<cluster>-autofail`, whose parameters accumulate observed events keyed by
//! time. Manual failovers arrive as Pgtasks of type `failover` naming the
//! cluster and the replica to promote.

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use kube::ResourceExt;
use kube::core::ObjectMeta;
use tracing::{debug, info, instrument, warn};

use crate::client::{KubeClient, ResourceKind};
use crate::controller::context::Context;
use crate::controller::error::{Error, Result, ignore_not_found};
use crate::controller::patch::{PatchPlan, paths};
use crate::controller::pipeline::{Pipeline, Step};
use crate::crd::{COMPLETED_STATUS, PARAM_CLUSTER, PARAM_TARGET, Pgtask, PgtaskSpec, TASK_AUTOFAILOVER};
use crate::resources::common::LABEL_PG_CLUSTER;

/// Name of a cluster's automatic-failover task
pub fn autofail_task_name(cluster_name: &str) -> String {
    format!("{}-autofail", cluster_name)
}

/// Bookkeeping for a cluster's pending automatic failover
pub struct FailoverTaskManager<'a> {
    kube: &'a dyn KubeClient,
}

impl<'a> FailoverTaskManager<'a> {
    pub fn new(kube: &'a dyn KubeClient) -> Self {
        Self { kube }
    }

    /// Remove the cluster's failover task; absence is not an error
    pub async fn clear(&self, cluster_name: &str, ns: &str) -> Result<()> {
        let task = autofail_task_name(cluster_name);
        ignore_not_found(
            self.kube.delete_task(&task, ns).await,
            &format!("autofail task {}", task),
        )?;
        debug!("cleared autofail task {}", task);
        Ok(())
    }

    pub async fn exists(&self, cluster_name: &str, ns: &str) -> Result<bool> {
        Ok(self
            .kube
            .get_task(&autofail_task_name(cluster_name), ns)
            .await?
            .is_some())
    }

    /// Record `event` against the cluster, creating the task on first use
    pub async fn add_event(&self, cluster_name: &str, event: &str, ns: &str) -> Result<()> {
        let task_name = autofail_task_name(cluster_name);
        let key = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);

        if self.exists(cluster_name, ns).await? {
            return PatchPlan::new(ResourceKind::Pgtask, &task_name)
                .set(&format!("/spec/parameters/{}", key), event)
                .apply(self.kube, ns)
                .await
                .into_result();
        }

        let task = Pgtask {
            metadata: ObjectMeta {
                name: Some(task_name.clone()),
                labels: Some(BTreeMap::from([(
                    LABEL_PG_CLUSTER.to_string(),
                    cluster_name.to_string(),
                )])),
                ..Default::default()
            },
            spec: PgtaskSpec {
                name: task_name.clone(),
                task_type: TASK_AUTOFAILOVER.to_string(),
                parameters: BTreeMap::from([
                    (PARAM_CLUSTER.to_string(), cluster_name.to_string()),
                    (key, event.to_string()),
                ]),
                ..Default::default()
            },
        };
        self.kube.create_task(ns, &task).await?;
        info!("created autofail task {}", task_name);
        Ok(())
    }
}

/// Promote the replica named by a failover task
#[instrument(skip(ctx, task), fields(name = %task.name_any(), namespace = %ns))]
pub async fn failover(ctx: &Context, task: &Pgtask, ns: &str) -> Result<()> {
    let started = Instant::now();
    let result = run_failover(ctx, task, ns).await;
    ctx.observe("failover", started, &result);
    result
}

async fn run_failover(ctx: &Context, task: &Pgtask, ns: &str) -> Result<()> {
    let task_name = task.name_any();
    if task.spec.status == COMPLETED_STATUS {
        debug!("failover task {} already completed", task_name);
        return Ok(());
    }

    let cluster_name = task.spec.parameter(PARAM_CLUSTER).ok_or_else(|| {
        Error::InvalidConfig(format!("task {} has no {} parameter", task_name, PARAM_CLUSTER))
    })?;
    let target = task.spec.parameter(PARAM_TARGET).ok_or_else(|| {
        Error::InvalidConfig(format!("task {} has no {} parameter", task_name, PARAM_TARGET))
    })?;

    let kube = ctx.kube.as_ref();
    let mut pipeline = Pipeline::new("failover", format!("{}/{}", ns, task_name));

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
            Step::Failover,
            strategy.failover(ctx, &cluster, task, target, ns),
        )
        .await?;

    if let Err(e) = FailoverTaskManager::new(kube).clear(cluster_name, ns).await {
        warn!("could not clear autofail task of {}: {}", cluster_name, e);
    }

    pipeline
        .run(Step::RecordCompletion, async {
            PatchPlan::new(ResourceKind::Pgtask, &task_name)
                .set(paths::STATUS, COMPLETED_STATUS)
                .apply(kube, ns)
                .await
                .into_result()
        })
        .await?;

    info!("failover of cluster {} to {} completed", cluster_name, target);
    Ok(())
}
