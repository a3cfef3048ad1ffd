//! Unit tests for custom resource serialization

use pgcluster_operator::crd::{Pgtask, PgtaskSpec, UpgradeType, PARAM_CLUSTER};
use serde_json::json;

use crate::common::*;

#[test]
fn test_cluster_uses_stored_field_names() {
    let cluster = PgclusterBuilder::new("hippo", "default")
        .with_storage("5Gi", "create")
        .with_replicas("2")
        .build();
    let value = serde_json::to_value(&cluster).unwrap();

    assert_eq!(value["apiVersion"], json!("pgcluster.crunchydata.com/v1"));
    assert_eq!(value["kind"], json!("Pgcluster"));
    assert_eq!(value["spec"]["clustername"], json!("hippo"));
    assert_eq!(value["spec"]["ccpimagetag"], json!("centos7-10.4-1.8.3"));
    assert_eq!(value["spec"]["PrimaryStorage"]["size"], json!("5Gi"));
    assert_eq!(value["spec"]["PrimaryStorage"]["storagetype"], json!("create"));
    assert_eq!(value["spec"]["replicas"], json!("2"));
}

#[test]
fn test_cluster_deserializes_with_defaults() {
    let cluster: pgcluster_operator::crd::Pgcluster = serde_json::from_value(json!({
        "apiVersion": "pgcluster.crunchydata.com/v1",
        "kind": "Pgcluster",
        "metadata": { "name": "hippo", "namespace": "default" },
        "spec": { "name": "hippo", "userlabels": { "archive": "true" } }
    }))
    .unwrap();

    assert_eq!(cluster.spec.port, "5432");
    assert!(cluster.spec.archive_enabled());
    assert!(!cluster.spec.backrest_enabled());
    assert!(!cluster.spec.is_completed());
}

#[test]
fn test_label_must_be_literal_true() {
    let cluster = PgclusterBuilder::new("hippo", "default")
        .with_label("archive", "yes")
        .with_label("crunchy-pgbouncer", "true")
        .build();

    assert!(!cluster.spec.archive_enabled());
    assert!(cluster.spec.pgbouncer_enabled());
}

#[test]
fn test_replica_field_names() {
    let replica = create_test_replica("hippo-abcd", "hippo", "default");
    let value = serde_json::to_value(&replica).unwrap();

    assert_eq!(value["kind"], json!("Pgreplica"));
    assert_eq!(value["spec"]["clustername"], json!("hippo"));
    assert_eq!(value["spec"]["replicastorage"]["size"], json!("1Gi"));
}

#[test]
fn test_upgrade_type_parsing() {
    assert_eq!("minor".parse::<UpgradeType>(), Ok(UpgradeType::Minor));
    assert_eq!("major".parse::<UpgradeType>(), Ok(UpgradeType::Major));
    assert!("Major".parse::<UpgradeType>().is_err());
    assert!("".parse::<UpgradeType>().is_err());
    assert_eq!(UpgradeType::Major.to_string(), "major");
}

#[test]
fn test_upgrade_field_names() {
    let upgrade = create_test_upgrade("hippo", "minor", "centos7-10.5-2.0.0");
    let value = serde_json::to_value(&upgrade).unwrap();

    assert_eq!(value["spec"]["upgradetype"], json!("minor"));
    assert_eq!(value["spec"]["ccpimagetag"], json!("centos7-10.5-2.0.0"));
}

#[test]
fn test_task_parameter_lookup() {
    let task = Pgtask::new(
        "hippo-failover",
        PgtaskSpec {
            parameters: [(PARAM_CLUSTER.to_string(), "hippo".to_string())].into(),
            ..Default::default()
        },
    );

    assert_eq!(task.spec.parameter(PARAM_CLUSTER), Some("hippo"));
    assert_eq!(task.spec.parameter("target"), None);
}
