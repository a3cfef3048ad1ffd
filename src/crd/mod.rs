mod pgcluster;
mod pgreplica;
mod pgtask;
mod pgupgrade;

pub use pgcluster::*;
pub use pgreplica::*;
pub use pgtask::*;
pub use pgupgrade::*;

/// API group shared by every custom resource this operator owns
pub const GROUP: &str = "pgcluster.crunchydata.com";

/// Marker written into a resource's status field once it is fully processed
pub const COMPLETED_STATUS: &str = "completed";
