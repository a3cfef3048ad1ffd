//! Provisioning strategies
//!
//! A strategy owns the concrete shape of a cluster's workloads: which
//! deployments and services make up a primary or a replica and how they are
//! replaced during failover or upgrade. Orchestrators decide when to call a
//! strategy and with which storage and credentials; they never build
//! workload objects themselves.
//!
//! Strategies are looked up by the identifier stored on the cluster resource
//! in a [`StrategyRegistry`] built once at startup.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use crate::controller::Context;
use crate::controller::error::Result;
use crate::crd::{Pgcluster, Pgreplica, Pgtask, Pgupgrade};

mod strategy1;

pub use strategy1::Strategy1;

/// Strategy used when a cluster does not name one
pub const DEFAULT_STRATEGY: &str = "1";

/// Lifecycle actions a provisioning algorithm implements
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Materialize the primary workload and its service.
    ///
    /// `pvc_name` is empty when the primary runs on ephemeral storage.
    async fn add_cluster(
        &self,
        ctx: &Context,
        cluster: &Pgcluster,
        ns: &str,
        pvc_name: &str,
    ) -> Result<()>;

    /// Remove every workload and service belonging to the cluster.
    ///
    /// Claims are left in place.
    async fn delete_cluster(&self, ctx: &Context, cluster: &Pgcluster, ns: &str) -> Result<()>;

    /// Materialize one replica workload
    async fn scale(
        &self,
        ctx: &Context,
        replica: &Pgreplica,
        ns: &str,
        pvc_name: &str,
        cluster: &Pgcluster,
    ) -> Result<()>;

    /// Remove one replica workload
    async fn delete_replica(&self, ctx: &Context, replica: &Pgreplica, ns: &str) -> Result<()>;

    /// Promote the replica named `target` to primary
    async fn failover(
        &self,
        ctx: &Context,
        cluster: &Pgcluster,
        task: &Pgtask,
        target: &str,
        ns: &str,
    ) -> Result<()>;

    async fn minor_upgrade(
        &self,
        ctx: &Context,
        cluster: &Pgcluster,
        upgrade: &Pgupgrade,
        ns: &str,
    ) -> Result<()>;

    async fn major_upgrade(
        &self,
        ctx: &Context,
        cluster: &Pgcluster,
        upgrade: &Pgupgrade,
        ns: &str,
    ) -> Result<()>;

    /// Bring the cluster back up after a major upgrade job has finished
    async fn major_upgrade_finalize(
        &self,
        ctx: &Context,
        cluster: &Pgcluster,
        upgrade: &Pgupgrade,
        ns: &str,
    ) -> Result<()>;

    /// Attach policy labels to the cluster's primary workload
    async fn update_policy_labels(
        &self,
        ctx: &Context,
        cluster_name: &str,
        ns: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<()>;
}

/// Immutable mapping from strategy identifier to implementation
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    strategies: HashMap<String, Arc<dyn Strategy>>,
}

impl StrategyRegistry {
    pub fn new<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, Arc<dyn Strategy>)>,
    {
        Self {
            strategies: entries.into_iter().collect(),
        }
    }

    /// Registry holding every built-in strategy
    pub fn with_defaults() -> Self {
        Self::new([(
            DEFAULT_STRATEGY.to_string(),
            Arc::new(Strategy1) as Arc<dyn Strategy>,
        )])
    }

    pub fn resolve(&self, id: &str) -> Option<Arc<dyn Strategy>> {
        self.strategies.get(id).cloned()
    }

    /// Registered identifiers, sorted
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.strategies.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("strategies", &self.ids())
            .finish()
    }
}

/// The identifier to resolve for a cluster's stored strategy field
pub fn effective_strategy_id(stored: &str) -> &str {
    if stored.is_empty() {
        DEFAULT_STRATEGY
    } else {
        stored
    }
}
