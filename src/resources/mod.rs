pub mod common;
pub mod deployment;
pub mod job;
pub mod pooler;
pub mod secret;
pub mod service;
pub mod storage;

pub use common::{cluster_labels, workload_labels};
