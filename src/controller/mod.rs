pub mod cluster;
pub mod context;
pub mod credentials;
pub mod error;
pub mod failover;
pub mod patch;
pub mod pipeline;
pub mod reconciler;
pub mod replica;
pub mod upgrade;
pub mod validation;

pub use cluster::{ClusterOutcome, add_cluster, apply_policy_labels, delete_cluster};
pub use context::Context;
pub use error::{BackoffConfig, Error, Result};
pub use failover::{FailoverTaskManager, failover};
pub use reconciler::{
    FINALIZER, error_policy, reconcile_cluster, reconcile_replica, reconcile_task,
    reconcile_upgrade,
};
pub use replica::{scale, scale_down};
pub use upgrade::{add_upgrade, finalize_major_upgrade};
