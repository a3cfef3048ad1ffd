//! Platform API seam
//!
//! Orchestrators and strategies only talk to the cluster through
//! [`KubeClient`], which keeps every call a plain blocking round trip from
//! their point of view and lets tests substitute an in-memory store.
//! Lookups return `Option` so an absent object is never confused with a
//! failed call; deletes of absent objects return [`Error::NotFound`].

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Secret, Service};
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::controller::error::{Error, Result};
use crate::crd::{Pgcluster, Pgreplica, Pgtask, Pgupgrade};
use crate::resources::common::{FIELD_MANAGER, LABEL_PG_CLUSTER};

#[cfg(test)]
pub mod fake;

/// Custom resource kinds that receive field patches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Pgcluster,
    Pgreplica,
    Pgupgrade,
    Pgtask,
}

impl ResourceKind {
    pub fn plural(&self) -> &'static str {
        match self {
            ResourceKind::Pgcluster => "pgclusters",
            ResourceKind::Pgreplica => "pgreplicas",
            ResourceKind::Pgupgrade => "pgupgrades",
            ResourceKind::Pgtask => "pgtasks",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Pgcluster => write!(f, "Pgcluster"),
            ResourceKind::Pgreplica => write!(f, "Pgreplica"),
            ResourceKind::Pgupgrade => write!(f, "Pgupgrade"),
            ResourceKind::Pgtask => write!(f, "Pgtask"),
        }
    }
}

/// Trait abstracting the Kubernetes operations the lifecycle engine needs
#[async_trait]
pub trait KubeClient: Send + Sync {
    async fn get_pvc(&self, name: &str, ns: &str) -> Result<Option<PersistentVolumeClaim>>;
    async fn create_pvc(&self, ns: &str, pvc: &PersistentVolumeClaim) -> Result<()>;

    async fn get_secret(&self, name: &str, ns: &str) -> Result<Option<Secret>>;
    async fn create_secret(&self, ns: &str, secret: &Secret) -> Result<()>;

    async fn get_service(&self, name: &str, ns: &str) -> Result<Option<Service>>;
    async fn create_service(&self, ns: &str, service: &Service) -> Result<()>;
    async fn delete_service(&self, name: &str, ns: &str) -> Result<()>;

    async fn get_deployment(&self, name: &str, ns: &str) -> Result<Option<Deployment>>;
    /// List deployments matching a label selector such as `pg-cluster=hippo`
    async fn list_deployments(&self, ns: &str, label_selector: &str) -> Result<Vec<Deployment>>;
    async fn create_deployment(&self, ns: &str, deployment: &Deployment) -> Result<()>;
    async fn patch_deployment(
        &self,
        name: &str,
        ns: &str,
        patch: &serde_json::Value,
    ) -> Result<()>;
    async fn delete_deployment(&self, name: &str, ns: &str) -> Result<()>;

    async fn get_job(&self, name: &str, ns: &str) -> Result<Option<Job>>;
    async fn create_job(&self, ns: &str, job: &Job) -> Result<()>;
    async fn delete_job(&self, name: &str, ns: &str) -> Result<()>;

    async fn get_cluster(&self, name: &str, ns: &str) -> Result<Option<Pgcluster>>;

    async fn create_replica(&self, ns: &str, replica: &Pgreplica) -> Result<()>;
    async fn list_replicas(&self, ns: &str, cluster_name: &str) -> Result<Vec<Pgreplica>>;
    async fn delete_replica(&self, name: &str, ns: &str) -> Result<()>;

    async fn delete_upgrade(&self, name: &str, ns: &str) -> Result<()>;

    async fn get_task(&self, name: &str, ns: &str) -> Result<Option<Pgtask>>;
    async fn create_task(&self, ns: &str, task: &Pgtask) -> Result<()>;
    async fn delete_task(&self, name: &str, ns: &str) -> Result<()>;

    /// Apply a JSON merge patch to one of the operator's custom resources
    async fn patch_resource(
        &self,
        kind: ResourceKind,
        name: &str,
        ns: &str,
        patch: &serde_json::Value,
    ) -> Result<()>;
}

/// Real Kubernetes client implementation
#[derive(Clone)]
pub struct KubeApi {
    client: Client,
}

impl KubeApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, ns: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), ns)
    }

    async fn get<K>(&self, name: &str, ns: &str) -> Result<Option<K>>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + DeserializeOwned
            + Clone
            + Debug,
        <K as Resource>::DynamicType: Default,
    {
        Ok(self.api::<K>(ns).get_opt(name).await?)
    }

    async fn create<K>(&self, ns: &str, obj: &K) -> Result<()>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Serialize
            + DeserializeOwned
            + Clone
            + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let name = obj.meta().name.clone().unwrap_or_default();
        let pp = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        match self.api::<K>(ns).create(&pp, obj).await {
            Ok(_) => {
                debug!("Created {} {}/{}", K::kind(&Default::default()), ns, name);
                Ok(())
            }
            Err(kube::Error::Api(resp)) if resp.code == 409 => Err(Error::AlreadyExists(format!(
                "{} {}/{}",
                K::kind(&Default::default()),
                ns,
                name
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn patch<K>(&self, name: &str, ns: &str, patch: &serde_json::Value) -> Result<()>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + DeserializeOwned
            + Clone
            + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let pp = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        self.api::<K>(ns)
            .patch(name, &pp, &Patch::Merge(patch))
            .await?;
        Ok(())
    }

    async fn delete<K>(&self, name: &str, ns: &str) -> Result<()>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + DeserializeOwned
            + Clone
            + Debug,
        <K as Resource>::DynamicType: Default,
    {
        match self.api::<K>(ns).delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Err(Error::NotFound(format!(
                "{} {}/{}",
                K::kind(&Default::default()),
                ns,
                name
            ))),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl KubeClient for KubeApi {
    async fn get_pvc(&self, name: &str, ns: &str) -> Result<Option<PersistentVolumeClaim>> {
        self.get(name, ns).await
    }

    async fn create_pvc(&self, ns: &str, pvc: &PersistentVolumeClaim) -> Result<()> {
        self.create(ns, pvc).await
    }

    async fn get_secret(&self, name: &str, ns: &str) -> Result<Option<Secret>> {
        self.get(name, ns).await
    }

    async fn create_secret(&self, ns: &str, secret: &Secret) -> Result<()> {
        self.create(ns, secret).await
    }

    async fn get_service(&self, name: &str, ns: &str) -> Result<Option<Service>> {
        self.get(name, ns).await
    }

    async fn create_service(&self, ns: &str, service: &Service) -> Result<()> {
        self.create(ns, service).await
    }

    async fn delete_service(&self, name: &str, ns: &str) -> Result<()> {
        self.delete::<Service>(name, ns).await
    }

    async fn get_deployment(&self, name: &str, ns: &str) -> Result<Option<Deployment>> {
        self.get(name, ns).await
    }

    async fn list_deployments(&self, ns: &str, label_selector: &str) -> Result<Vec<Deployment>> {
        let list = self
            .api::<Deployment>(ns)
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(list.items)
    }

    async fn create_deployment(&self, ns: &str, deployment: &Deployment) -> Result<()> {
        self.create(ns, deployment).await
    }

    async fn patch_deployment(
        &self,
        name: &str,
        ns: &str,
        patch: &serde_json::Value,
    ) -> Result<()> {
        self.patch::<Deployment>(name, ns, patch).await
    }

    async fn delete_deployment(&self, name: &str, ns: &str) -> Result<()> {
        self.delete::<Deployment>(name, ns).await
    }

    async fn get_job(&self, name: &str, ns: &str) -> Result<Option<Job>> {
        self.get(name, ns).await
    }

    async fn create_job(&self, ns: &str, job: &Job) -> Result<()> {
        self.create(ns, job).await
    }

    async fn delete_job(&self, name: &str, ns: &str) -> Result<()> {
        self.delete::<Job>(name, ns).await
    }

    async fn get_cluster(&self, name: &str, ns: &str) -> Result<Option<Pgcluster>> {
        self.get(name, ns).await
    }

    async fn create_replica(&self, ns: &str, replica: &Pgreplica) -> Result<()> {
        self.create(ns, replica).await
    }

    async fn list_replicas(&self, ns: &str, cluster_name: &str) -> Result<Vec<Pgreplica>> {
        let selector = format!("{}={}", LABEL_PG_CLUSTER, cluster_name);
        let list = self
            .api::<Pgreplica>(ns)
            .list(&ListParams::default().labels(&selector))
            .await?;
        Ok(list.items)
    }

    async fn delete_replica(&self, name: &str, ns: &str) -> Result<()> {
        self.delete::<Pgreplica>(name, ns).await
    }

    async fn delete_upgrade(&self, name: &str, ns: &str) -> Result<()> {
        self.delete::<Pgupgrade>(name, ns).await
    }

    async fn get_task(&self, name: &str, ns: &str) -> Result<Option<Pgtask>> {
        self.get(name, ns).await
    }

    async fn create_task(&self, ns: &str, task: &Pgtask) -> Result<()> {
        self.create(ns, task).await
    }

    async fn delete_task(&self, name: &str, ns: &str) -> Result<()> {
        self.delete::<Pgtask>(name, ns).await
    }

    async fn patch_resource(
        &self,
        kind: ResourceKind,
        name: &str,
        ns: &str,
        patch: &serde_json::Value,
    ) -> Result<()> {
        match kind {
            ResourceKind::Pgcluster => self.patch::<Pgcluster>(name, ns, patch).await,
            ResourceKind::Pgreplica => self.patch::<Pgreplica>(name, ns, patch).await,
            ResourceKind::Pgupgrade => self.patch::<Pgupgrade>(name, ns, patch).await,
            ResourceKind::Pgtask => self.patch::<Pgtask>(name, ns, patch).await,
        }
    }
}
