//! Ordered, fail-fast step execution for lifecycle entry points
//!
//! Every entry point is a fixed sequence of fallible steps against the
//! platform API. There are no transactions: a failed step aborts the rest of
//! the sequence and nothing that already ran is rolled back. [`Pipeline`]
//! makes that policy explicit and records which steps were persisted so a
//! partial run can be inspected.

use std::fmt;
use std::future::Future;

use tracing::{debug, error};

use crate::controller::error::{Error, Result};

/// What happens to the remaining steps when one fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Abort on the first failed step; completed steps stay in place
    StopOnFirstFailure,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::StopOnFirstFailure => write!(f, "stop-on-first-failure, no rollback"),
        }
    }
}

/// Named steps of the lifecycle entry points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    PrimaryClaim,
    ArchiveClaim,
    BackrestClaim,
    SecretSource,
    Credentials,
    ResolveStrategy,
    MaterializePrimary,
    RecordCompletion,
    Poolers,
    ReplicaFanOut,
    ClearFailoverTask,
    DestroyWorkloads,
    RemoveUpgrade,
    LoadCluster,
    ReplicaClaim,
    RecordReplicaClaim,
    ReplicaService,
    MaterializeReplica,
    RemoveReplica,
    ParseUpgradeType,
    RunUpgrade,
    RecordImageTag,
    FinalizeUpgrade,
    Failover,
    PolicyLabels,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::PrimaryClaim => "primary-claim",
            Step::ArchiveClaim => "archive-claim",
            Step::BackrestClaim => "backrest-claim",
            Step::SecretSource => "secret-source",
            Step::Credentials => "credentials",
            Step::ResolveStrategy => "resolve-strategy",
            Step::MaterializePrimary => "materialize-primary",
            Step::RecordCompletion => "record-completion",
            Step::Poolers => "poolers",
            Step::ReplicaFanOut => "replica-fan-out",
            Step::ClearFailoverTask => "clear-failover-task",
            Step::DestroyWorkloads => "destroy-workloads",
            Step::RemoveUpgrade => "remove-upgrade",
            Step::LoadCluster => "load-cluster",
            Step::ReplicaClaim => "replica-claim",
            Step::RecordReplicaClaim => "record-replica-claim",
            Step::ReplicaService => "replica-service",
            Step::MaterializeReplica => "materialize-replica",
            Step::RemoveReplica => "remove-replica",
            Step::ParseUpgradeType => "parse-upgrade-type",
            Step::RunUpgrade => "run-upgrade",
            Step::RecordImageTag => "record-image-tag",
            Step::FinalizeUpgrade => "finalize-upgrade",
            Step::Failover => "failover",
            Step::PolicyLabels => "policy-labels",
        };
        write!(f, "{}", name)
    }
}

/// Tracks one run of an entry point
#[derive(Debug)]
pub struct Pipeline {
    operation: &'static str,
    resource: String,
    completed: Vec<Step>,
}

impl Pipeline {
    pub const POLICY: FailurePolicy = FailurePolicy::StopOnFirstFailure;

    pub fn new(operation: &'static str, resource: impl Into<String>) -> Self {
        Self {
            operation,
            resource: resource.into(),
            completed: Vec::new(),
        }
    }

    /// Run one step. On failure the error is logged and wrapped in
    /// [`Error::StepFailed`]; callers propagate it with `?`.
    pub async fn run<T, F>(&mut self, step: Step, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match fut.await {
            Ok(value) => {
                debug!(operation = self.operation, resource = %self.resource, step = %step, "step completed");
                self.completed.push(step);
                Ok(value)
            }
            Err(e) => {
                error!(
                    operation = self.operation,
                    resource = %self.resource,
                    step = %step,
                    completed = ?self.completed,
                    policy = %Self::POLICY,
                    "step failed: {}",
                    e
                );
                Err(Error::StepFailed {
                    step,
                    source: Box::new(e),
                })
            }
        }
    }

    /// Record a step whose failures were already handled inside it
    pub fn mark(&mut self, step: Step) {
        self.completed.push(step);
    }

    /// Steps whose effects have been persisted, in order
    pub fn completed(&self) -> &[Step] {
        &self.completed
    }
}
