//! In-memory [`KubeClient`] for orchestrator tests
//!
//! Objects are keyed by name only; tests run against a single namespace.
//! Every call is recorded as `"<operation>:<name>"`, and any operation can be
//! made to fail either globally (`"create_secret"`) or for one object
//! (`"get_secret:other-postgres-secret"`).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Secret, Service};
use kube::ResourceExt;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::client::{KubeClient, ResourceKind};
use crate::controller::error::{Error, Result};
use crate::crd::{Pgcluster, Pgreplica, Pgtask, Pgupgrade};
use crate::resources::common::LABEL_PG_CLUSTER;

#[derive(Default)]
struct State {
    pvcs: BTreeMap<String, PersistentVolumeClaim>,
    secrets: BTreeMap<String, Secret>,
    services: BTreeMap<String, Service>,
    deployments: BTreeMap<String, Deployment>,
    jobs: BTreeMap<String, Job>,
    clusters: BTreeMap<String, Pgcluster>,
    replicas: BTreeMap<String, Pgreplica>,
    upgrades: BTreeMap<String, Pgupgrade>,
    tasks: BTreeMap<String, Pgtask>,
    patches: Vec<(ResourceKind, String, serde_json::Value)>,
    calls: Vec<String>,
    failures: BTreeSet<String>,
}

#[derive(Default)]
pub struct FakeKube {
    state: Mutex<State>,
}

impl FakeKube {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `op` (or `op:name`) fail with a transient error
    pub fn fail_on(&self, op: &str) {
        self.lock().failures.insert(op.to_string());
    }

    pub fn insert_pvc(&self, pvc: PersistentVolumeClaim) {
        self.lock().pvcs.insert(pvc.name_any(), pvc);
    }

    pub fn insert_secret(&self, secret: Secret) {
        self.lock().secrets.insert(secret.name_any(), secret);
    }

    pub fn insert_service(&self, service: Service) {
        self.lock().services.insert(service.name_any(), service);
    }

    pub fn insert_deployment(&self, deployment: Deployment) {
        self.lock().deployments.insert(deployment.name_any(), deployment);
    }

    pub fn insert_job(&self, job: Job) {
        self.lock().jobs.insert(job.name_any(), job);
    }

    pub fn insert_cluster(&self, cluster: Pgcluster) {
        self.lock().clusters.insert(cluster.name_any(), cluster);
    }

    pub fn insert_replica(&self, replica: Pgreplica) {
        self.lock().replicas.insert(replica.name_any(), replica);
    }

    pub fn insert_upgrade(&self, upgrade: Pgupgrade) {
        self.lock().upgrades.insert(upgrade.name_any(), upgrade);
    }

    pub fn insert_task(&self, task: Pgtask) {
        self.lock().tasks.insert(task.name_any(), task);
    }

    /// All recorded calls in order
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Number of calls to `op`, across all object names
    pub fn count(&self, op: &str) -> usize {
        let prefix = format!("{}:", op);
        self.lock()
            .calls
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .count()
    }

    /// Number of calls that mutate state
    pub fn mutation_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| {
                c.starts_with("create_")
                    || c.starts_with("patch_")
                    || c.starts_with("delete_")
            })
            .count()
    }

    /// Merge patches sent to one custom resource, in order
    pub fn patches_for(&self, kind: ResourceKind, name: &str) -> Vec<serde_json::Value> {
        self.lock()
            .patches
            .iter()
            .filter(|(k, n, _)| *k == kind && n == name)
            .map(|(_, _, p)| p.clone())
            .collect()
    }

    /// Last value written to `pointer` on one custom resource, if any
    pub fn patched_value(
        &self,
        kind: ResourceKind,
        name: &str,
        pointer: &str,
    ) -> Option<serde_json::Value> {
        self.patches_for(kind, name)
            .iter()
            .rev()
            .find_map(|p| p.pointer(pointer).cloned())
    }

    pub fn pvc_names(&self) -> Vec<String> {
        self.lock().pvcs.keys().cloned().collect()
    }

    pub fn secret(&self, name: &str) -> Option<Secret> {
        self.lock().secrets.get(name).cloned()
    }

    pub fn secret_names(&self) -> Vec<String> {
        self.lock().secrets.keys().cloned().collect()
    }

    pub fn service_names(&self) -> Vec<String> {
        self.lock().services.keys().cloned().collect()
    }

    pub fn service(&self, name: &str) -> Option<Service> {
        self.lock().services.get(name).cloned()
    }

    pub fn deployment(&self, name: &str) -> Option<Deployment> {
        self.lock().deployments.get(name).cloned()
    }

    pub fn deployment_names(&self) -> Vec<String> {
        self.lock().deployments.keys().cloned().collect()
    }

    pub fn job_names(&self) -> Vec<String> {
        self.lock().jobs.keys().cloned().collect()
    }

    pub fn replicas(&self) -> Vec<Pgreplica> {
        self.lock().replicas.values().cloned().collect()
    }

    pub fn task(&self, name: &str) -> Option<Pgtask> {
        self.lock().tasks.get(name).cloned()
    }

    pub fn has_upgrade(&self, name: &str) -> bool {
        self.lock().upgrades.contains_key(name)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record the call and return an error if it was set up to fail
    fn enter(&self, op: &str, name: &str) -> Result<()> {
        let mut state = self.lock();
        let call = format!("{}:{}", op, name);
        state.calls.push(call.clone());
        if state.failures.contains(op) || state.failures.contains(&call) {
            return Err(Error::TransientError(format!("injected failure for {}", call)));
        }
        Ok(())
    }
}

fn create_in<K: Clone>(
    map: &mut BTreeMap<String, K>,
    kind: &str,
    name: String,
    obj: &K,
) -> Result<()> {
    if map.contains_key(&name) {
        return Err(Error::AlreadyExists(format!("{} {}", kind, name)));
    }
    map.insert(name, obj.clone());
    Ok(())
}

fn delete_in<K>(map: &mut BTreeMap<String, K>, kind: &str, name: &str) -> Result<()> {
    map.remove(name)
        .map(|_| ())
        .ok_or_else(|| Error::NotFound(format!("{} {}", kind, name)))
}

fn patch_in<K>(
    map: &mut BTreeMap<String, K>,
    kind: &str,
    name: &str,
    patch: &serde_json::Value,
) -> Result<()>
where
    K: Serialize + DeserializeOwned,
{
    let obj = map
        .get_mut(name)
        .ok_or_else(|| Error::NotFound(format!("{} {}", kind, name)))?;
    let mut value = serde_json::to_value(&*obj)?;
    merge(&mut value, patch);
    *obj = serde_json::from_value(value)?;
    Ok(())
}

/// JSON merge patch (RFC 7386)
fn merge(target: &mut serde_json::Value, patch: &serde_json::Value) {
    match patch {
        serde_json::Value::Object(entries) => {
            if !target.is_object() {
                *target = serde_json::Value::Object(serde_json::Map::new());
            }
            if let serde_json::Value::Object(map) = target {
                for (key, value) in entries {
                    if value.is_null() {
                        map.remove(key);
                    } else {
                        merge(
                            map.entry(key.clone()).or_insert(serde_json::Value::Null),
                            value,
                        );
                    }
                }
            }
        }
        other => *target = other.clone(),
    }
}

fn has_labels(labels: &BTreeMap<String, String>, selector: &str) -> bool {
    selector.split(',').filter(|s| !s.is_empty()).all(|term| {
        match term.split_once('=') {
            Some((k, v)) => labels.get(k).is_some_and(|actual| actual == v),
            None => labels.contains_key(term),
        }
    })
}

#[async_trait]
impl KubeClient for FakeKube {
    async fn get_pvc(&self, name: &str, _ns: &str) -> Result<Option<PersistentVolumeClaim>> {
        self.enter("get_pvc", name)?;
        Ok(self.lock().pvcs.get(name).cloned())
    }

    async fn create_pvc(&self, _ns: &str, pvc: &PersistentVolumeClaim) -> Result<()> {
        let name = pvc.name_any();
        self.enter("create_pvc", &name)?;
        create_in(&mut self.lock().pvcs, "PersistentVolumeClaim", name, pvc)
    }

    async fn get_secret(&self, name: &str, _ns: &str) -> Result<Option<Secret>> {
        self.enter("get_secret", name)?;
        Ok(self.lock().secrets.get(name).cloned())
    }

    async fn create_secret(&self, _ns: &str, secret: &Secret) -> Result<()> {
        let name = secret.name_any();
        self.enter("create_secret", &name)?;
        create_in(&mut self.lock().secrets, "Secret", name, secret)
    }

    async fn get_service(&self, name: &str, _ns: &str) -> Result<Option<Service>> {
        self.enter("get_service", name)?;
        Ok(self.lock().services.get(name).cloned())
    }

    async fn create_service(&self, _ns: &str, service: &Service) -> Result<()> {
        let name = service.name_any();
        self.enter("create_service", &name)?;
        create_in(&mut self.lock().services, "Service", name, service)
    }

    async fn delete_service(&self, name: &str, _ns: &str) -> Result<()> {
        self.enter("delete_service", name)?;
        delete_in(&mut self.lock().services, "Service", name)
    }

    async fn get_deployment(&self, name: &str, _ns: &str) -> Result<Option<Deployment>> {
        self.enter("get_deployment", name)?;
        Ok(self.lock().deployments.get(name).cloned())
    }

    async fn list_deployments(&self, _ns: &str, label_selector: &str) -> Result<Vec<Deployment>> {
        self.enter("list_deployments", label_selector)?;
        Ok(self
            .lock()
            .deployments
            .values()
            .filter(|d| has_labels(d.labels(), label_selector))
            .cloned()
            .collect())
    }

    async fn create_deployment(&self, _ns: &str, deployment: &Deployment) -> Result<()> {
        let name = deployment.name_any();
        self.enter("create_deployment", &name)?;
        create_in(&mut self.lock().deployments, "Deployment", name, deployment)
    }

    async fn patch_deployment(
        &self,
        name: &str,
        _ns: &str,
        patch: &serde_json::Value,
    ) -> Result<()> {
        self.enter("patch_deployment", name)?;
        patch_in(&mut self.lock().deployments, "Deployment", name, patch)
    }

    async fn delete_deployment(&self, name: &str, _ns: &str) -> Result<()> {
        self.enter("delete_deployment", name)?;
        delete_in(&mut self.lock().deployments, "Deployment", name)
    }

    async fn get_job(&self, name: &str, _ns: &str) -> Result<Option<Job>> {
        self.enter("get_job", name)?;
        Ok(self.lock().jobs.get(name).cloned())
    }

    async fn create_job(&self, _ns: &str, job: &Job) -> Result<()> {
        let name = job.name_any();
        self.enter("create_job", &name)?;
        create_in(&mut self.lock().jobs, "Job", name, job)
    }

    async fn delete_job(&self, name: &str, _ns: &str) -> Result<()> {
        self.enter("delete_job", name)?;
        delete_in(&mut self.lock().jobs, "Job", name)
    }

    async fn get_cluster(&self, name: &str, _ns: &str) -> Result<Option<Pgcluster>> {
        self.enter("get_cluster", name)?;
        Ok(self.lock().clusters.get(name).cloned())
    }

    async fn create_replica(&self, _ns: &str, replica: &Pgreplica) -> Result<()> {
        let name = replica.name_any();
        self.enter("create_replica", &name)?;
        create_in(&mut self.lock().replicas, "Pgreplica", name, replica)
    }

    async fn list_replicas(&self, _ns: &str, cluster_name: &str) -> Result<Vec<Pgreplica>> {
        self.enter("list_replicas", cluster_name)?;
        Ok(self
            .lock()
            .replicas
            .values()
            .filter(|r| {
                r.labels().get(LABEL_PG_CLUSTER).map(String::as_str) == Some(cluster_name)
                    || r.spec.cluster_name == cluster_name
            })
            .cloned()
            .collect())
    }

    async fn delete_replica(&self, name: &str, _ns: &str) -> Result<()> {
        self.enter("delete_replica", name)?;
        delete_in(&mut self.lock().replicas, "Pgreplica", name)
    }

    async fn delete_upgrade(&self, name: &str, _ns: &str) -> Result<()> {
        self.enter("delete_upgrade", name)?;
        delete_in(&mut self.lock().upgrades, "Pgupgrade", name)
    }

    async fn get_task(&self, name: &str, _ns: &str) -> Result<Option<Pgtask>> {
        self.enter("get_task", name)?;
        Ok(self.lock().tasks.get(name).cloned())
    }

    async fn create_task(&self, _ns: &str, task: &Pgtask) -> Result<()> {
        let name = task.name_any();
        self.enter("create_task", &name)?;
        create_in(&mut self.lock().tasks, "Pgtask", name, task)
    }

    async fn delete_task(&self, name: &str, _ns: &str) -> Result<()> {
        self.enter("delete_task", name)?;
        delete_in(&mut self.lock().tasks, "Pgtask", name)
    }

    async fn patch_resource(
        &self,
        kind: ResourceKind,
        name: &str,
        _ns: &str,
        patch: &serde_json::Value,
    ) -> Result<()> {
        self.enter("patch_resource", name)?;
        let mut state = self.lock();
        state.patches.push((kind, name.to_string(), patch.clone()));
        // Patches against objects the test never stored are recorded only
        match kind {
            ResourceKind::Pgcluster if state.clusters.contains_key(name) => {
                patch_in(&mut state.clusters, "Pgcluster", name, patch)
            }
            ResourceKind::Pgreplica if state.replicas.contains_key(name) => {
                patch_in(&mut state.replicas, "Pgreplica", name, patch)
            }
            ResourceKind::Pgupgrade if state.upgrades.contains_key(name) => {
                patch_in(&mut state.upgrades, "Pgupgrade", name, patch)
            }
            ResourceKind::Pgtask if state.tasks.contains_key(name) => {
                patch_in(&mut state.tasks, "Pgtask", name, patch)
            }
            _ => Ok(()),
        }
    }
}
