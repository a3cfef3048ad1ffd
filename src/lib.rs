pub mod client;
pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod resources;
pub mod strategy;

pub use client::{KubeApi, KubeClient, ResourceKind};
pub use config::OperatorConfig;
pub use controller::{
    BackoffConfig, Context, Error, FINALIZER, Result, error_policy, reconcile_cluster,
    reconcile_replica, reconcile_task, reconcile_upgrade,
};
pub use crd::{Pgcluster, Pgreplica, Pgtask, Pgupgrade};
pub use health::{HealthState, Metrics};
pub use strategy::{Strategy, StrategyRegistry};

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

use futures::StreamExt;
use kube::runtime::Controller;
use kube::runtime::controller::{Action, Error as ControllerError};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::{Config as WatcherConfig, Error as WatcherError};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;

/// Helper to create a namespaced or cluster-wide API based on scope.
fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Build the shared context for all controllers
pub fn build_context(
    client: Client,
    config: OperatorConfig,
    health_state: Option<Arc<HealthState>>,
) -> Arc<Context> {
    let ctx = Context::new(
        Arc::new(KubeApi::new(client)),
        Arc::new(config),
        Arc::new(StrategyRegistry::with_defaults()),
    );
    Arc::new(match health_state {
        Some(state) => ctx.with_health_state(state),
        None => ctx,
    })
}

type ReconcileResult<K> =
    std::result::Result<(ObjectRef<K>, Action), ControllerError<Error, WatcherError>>;

/// Log and count one reconciliation result
fn report<K>(kind: &str, ctx: &Context, result: ReconcileResult<K>)
where
    K: Resource,
    <K as Resource>::DynamicType: Clone + Eq + std::hash::Hash,
{
    match result {
        Ok((obj, _action)) => {
            tracing::debug!("Reconciled {}: {}", kind, obj.name);
            if let Some(ref state) = ctx.health_state {
                let ns = obj.namespace.as_deref().unwrap_or_default();
                state.metrics.record_reconcile(kind, ns);
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or_default();
                state.last_reconcile.store(now, Ordering::Relaxed);
            }
        }
        Err(ControllerError::ReconcilerFailed(err, obj)) => {
            if let Some(ref state) = ctx.health_state {
                state
                    .metrics
                    .record_error(kind, obj.namespace.as_deref().unwrap_or_default());
            }
            // Watch events for objects deleted mid-flight land here
            if err.is_not_found() {
                tracing::debug!("{} {} no longer exists: {}", kind, obj.name, err);
            } else {
                tracing::error!("{} {} reconciliation error: {}", kind, obj.name, err);
            }
        }
        Err(e) => {
            tracing::error!("{} controller error: {:?}", kind, e);
        }
    }
}

/// Run the Pgcluster controller.
///
/// When `namespace` is `Some(ns)`, only watches resources in that namespace.
pub async fn run_cluster_controller(client: Client, ctx: Arc<Context>, namespace: Option<&str>) {
    tracing::info!(
        "Starting controller for Pgcluster resources (scope: {})",
        namespace.unwrap_or("cluster-wide")
    );
    let clusters: Api<Pgcluster> = scoped_api(client, namespace);

    Controller::new(clusters, WatcherConfig::default().any_semantic())
        .run(reconcile_cluster, error_policy, ctx.clone())
        .for_each(|result| {
            report("Pgcluster", &ctx, result);
            futures::future::ready(())
        })
        .await;

    tracing::error!("Pgcluster controller stream ended unexpectedly");
}

/// Run the Pgreplica controller.
pub async fn run_replica_controller(client: Client, ctx: Arc<Context>, namespace: Option<&str>) {
    tracing::info!(
        "Starting controller for Pgreplica resources (scope: {})",
        namespace.unwrap_or("cluster-wide")
    );
    let replicas: Api<Pgreplica> = scoped_api(client, namespace);

    Controller::new(replicas, WatcherConfig::default().any_semantic())
        .run(reconcile_replica, error_policy, ctx.clone())
        .for_each(|result| {
            report("Pgreplica", &ctx, result);
            futures::future::ready(())
        })
        .await;

    tracing::error!("Pgreplica controller stream ended unexpectedly");
}

/// Run the Pgupgrade controller.
pub async fn run_upgrade_controller(client: Client, ctx: Arc<Context>, namespace: Option<&str>) {
    tracing::info!(
        "Starting controller for Pgupgrade resources (scope: {})",
        namespace.unwrap_or("cluster-wide")
    );
    let upgrades: Api<Pgupgrade> = scoped_api(client, namespace);

    Controller::new(upgrades, WatcherConfig::default().any_semantic())
        .run(reconcile_upgrade, error_policy, ctx.clone())
        .for_each(|result| {
            report("Pgupgrade", &ctx, result);
            futures::future::ready(())
        })
        .await;

    tracing::error!("Pgupgrade controller stream ended unexpectedly");
}

/// Run the Pgtask controller, which carries out manual failovers.
pub async fn run_task_controller(client: Client, ctx: Arc<Context>, namespace: Option<&str>) {
    tracing::info!(
        "Starting controller for Pgtask resources (scope: {})",
        namespace.unwrap_or("cluster-wide")
    );
    let tasks: Api<Pgtask> = scoped_api(client, namespace);

    Controller::new(tasks, WatcherConfig::default().any_semantic())
        .run(reconcile_task, error_policy, ctx.clone())
        .for_each(|result| {
            report("Pgtask", &ctx, result);
            futures::future::ready(())
        })
        .await;

    tracing::error!("Pgtask controller stream ended unexpectedly");
}

/// Run all four controllers until one of them stops.
pub async fn run_controllers(client: Client, ctx: Arc<Context>, namespace: Option<&str>) {
    if let Some(ref state) = ctx.health_state {
        state.set_ready(true);
    }

    tokio::select! {
        _ = run_cluster_controller(client.clone(), ctx.clone(), namespace) => {}
        _ = run_replica_controller(client.clone(), ctx.clone(), namespace) => {}
        _ = run_upgrade_controller(client.clone(), ctx.clone(), namespace) => {}
        _ = run_task_controller(client, ctx, namespace) => {}
    }
}
