//! Field-scoped patches against the operator's custom resources
//!
//! Orchestrators stage derived values on a local copy of a resource and then
//! persist them as an ordered [`PatchPlan`]: one JSON-pointer path per
//! patch, each sent as an independent merge patch. The returned
//! [`PatchReport`] is the boundary between what was computed and what was
//! actually persisted.

use serde_json::{Map, Value};
use tracing::{debug, error};

use crate::client::{KubeClient, ResourceKind};
use crate::controller::error::{Error, Result};

/// Persisted field paths written by the orchestrators
pub mod paths {
    pub const STATUS: &str = "/spec/status";
    pub const PRIMARY_STORAGE_NAME: &str = "/spec/PrimaryStorage/name";
    pub const ROOT_SECRET_NAME: &str = "/spec/rootsecretname";
    pub const PRIMARY_SECRET_NAME: &str = "/spec/primarysecretname";
    pub const USER_SECRET_NAME: &str = "/spec/usersecretname";
    pub const CCP_IMAGE_TAG: &str = "/spec/ccpimagetag";
    pub const REPLICA_STORAGE_NAME: &str = "/spec/replicastorage/name";
    pub const UPGRADE_STATUS: &str = "/spec/upgradestatus";
}

/// Build the merge patch that sets the field at `pointer` to `value`.
///
/// `/spec/PrimaryStorage/name` becomes `{"spec":{"PrimaryStorage":{"name":value}}}`.
/// Pointer escapes (`~1` for `/`, `~0` for `~`) are decoded.
pub fn merge_patch_for(pointer: &str, value: Value) -> Result<Value> {
    let segments: Vec<String> = pointer
        .strip_prefix('/')
        .ok_or_else(|| Error::InvalidConfig(format!("patch path '{}' must start with '/'", pointer)))?
        .split('/')
        .map(|s| s.replace("~1", "/").replace("~0", "~"))
        .collect();

    if segments.iter().any(String::is_empty) {
        return Err(Error::InvalidConfig(format!(
            "patch path '{}' has an empty segment",
            pointer
        )));
    }

    Ok(segments.into_iter().rev().fold(value, |acc, segment| {
        let mut map = Map::new();
        map.insert(segment, acc);
        Value::Object(map)
    }))
}

/// Ordered single-field patches against one resource
#[derive(Debug, Clone)]
pub struct PatchPlan {
    kind: ResourceKind,
    name: String,
    ops: Vec<(String, Value)>,
}

impl PatchPlan {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            ops: Vec::new(),
        }
    }

    pub fn set(mut self, path: &str, value: impl Into<Value>) -> Self {
        self.ops.push((path.to_string(), value.into()));
        self
    }

    pub fn paths(&self) -> Vec<&str> {
        self.ops.iter().map(|(p, _)| p.as_str()).collect()
    }

    /// Send every patch in order. A failed patch is logged and recorded; the
    /// remaining patches are still attempted.
    pub async fn apply(self, kube: &dyn KubeClient, ns: &str) -> PatchReport {
        let mut report = PatchReport::default();
        for (path, value) in self.ops {
            let outcome = match merge_patch_for(&path, value) {
                Ok(patch) => {
                    kube.patch_resource(self.kind, &self.name, ns, &patch)
                        .await
                }
                Err(e) => Err(e),
            };
            match outcome {
                Ok(()) => {
                    debug!("Patched {} {} {}", self.kind, self.name, path);
                    report.applied.push(path);
                }
                Err(e) => {
                    error!("error patching {} {} {}: {}", self.kind, self.name, path, e);
                    report.failed.push((path, e));
                }
            }
        }
        report
    }
}

/// Outcome of [`PatchPlan::apply`]
#[derive(Debug, Default)]
pub struct PatchReport {
    pub applied: Vec<String>,
    pub failed: Vec<(String, Error)>,
}

impl PatchReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Collapse into the first failure, if any
    pub fn into_result(self) -> Result<()> {
        match self.failed.into_iter().next() {
            Some((_, e)) => Err(e),
            None => Ok(()),
        }
    }
}
