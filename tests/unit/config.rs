//! Unit tests for operator configuration

use pgcluster_operator::OperatorConfig;
use pgcluster_operator::controller::Error;

#[test]
fn test_defaults() {
    let config = OperatorConfig::default();
    assert_eq!(config.cluster.service_type, "ClusterIP");
    assert_eq!(config.cluster.port, "5432");
    assert_eq!(config.cluster.password_length, 10);
    assert_eq!(config.backup_storage_spec().unwrap().size, "1Gi");
}

#[test]
fn test_partial_document_keeps_defaults() {
    let config = OperatorConfig::from_yaml("cluster:\n  ccpImageTag: centos7-10.5-2.0.0\n").unwrap();
    assert_eq!(config.cluster.ccp_image_tag, "centos7-10.5-2.0.0");
    assert_eq!(config.cluster.ccp_image_prefix, "crunchydata");
    assert_eq!(config.replica_storage, "standard");
}

#[test]
fn test_named_templates() {
    let config = OperatorConfig::from_yaml(
        "storage:\n  \
           small:\n    size: 1Gi\n    storagetype: create\n  \
           big:\n    size: 50Gi\n    storagetype: dynamic\n    storageclass: fast\n\
         primaryStorage: small\n\
         replicaStorage: small\n\
         backupStorage: big\n",
    )
    .unwrap();

    assert_eq!(config.replica_storage_spec().unwrap().size, "1Gi");
    let backup = config.backup_storage_spec().unwrap();
    assert_eq!(backup.size, "50Gi");
    assert_eq!(backup.storage_class, "fast");
    assert!(matches!(config.get_storage_spec("missing"), Err(Error::InvalidConfig(_))));
}

#[test]
fn test_malformed_document() {
    assert!(matches!(
        OperatorConfig::from_yaml("cluster: [not, a, map]"),
        Err(Error::ConfigFileError(_))
    ));
    assert!(matches!(
        OperatorConfig::from_yaml("cluster:\n  passwordLength: 0\n"),
        Err(Error::InvalidConfig(_))
    ));
}
