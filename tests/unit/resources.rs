//! Unit tests for resource builders

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use pgcluster_operator::OperatorConfig;
use pgcluster_operator::resources::common::{LABEL_PG_CLUSTER, LABEL_ROLE, random_suffix};
use pgcluster_operator::resources::deployment::{
    DATABASE_CONTAINER, SecretNames, image_patch, labels_patch, postgres_image,
    primary_deployment, replica_deployment, role_patch,
};
use pgcluster_operator::resources::job::{UpgradeTarget, upgrade_job, upgrade_job_name};
use pgcluster_operator::resources::pooler::{PoolerKind, pooler_deployment};
use pgcluster_operator::resources::secret::{
    PASSWORD_KEY, USERNAME_KEY, build_credential_secret, generate_password, secret_value,
};
use pgcluster_operator::resources::service::{
    parse_port, primary_service, replica_service, replica_service_name,
};
use pgcluster_operator::resources::storage::{ClaimMode, build_claim};
use serde_json::json;

use crate::common::*;

fn env_names(deployment: &Deployment) -> Vec<String> {
    deployment.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0]
        .env
        .as_ref()
        .unwrap()
        .iter()
        .map(|e| e.name.clone())
        .collect()
}

fn pod_labels(deployment: &Deployment) -> BTreeMap<String, String> {
    deployment
        .spec
        .as_ref()
        .unwrap()
        .template
        .metadata
        .as_ref()
        .unwrap()
        .labels
        .clone()
        .unwrap()
}

mod service_tests {
    use super::*;

    #[test]
    fn test_services_select_by_role() {
        let primary = primary_service("hippo", 5432, "ClusterIP");
        let replica = replica_service("hippo", 5432, "ClusterIP");

        assert_eq!(primary.metadata.name.as_deref(), Some("hippo"));
        assert_eq!(replica.metadata.name, Some(replica_service_name("hippo")));

        let selector = primary.spec.unwrap().selector.unwrap();
        assert_eq!(selector.get(LABEL_ROLE), Some(&"primary".to_string()));
        assert_eq!(selector.get(LABEL_PG_CLUSTER), Some(&"hippo".to_string()));
        let selector = replica.spec.unwrap().selector.unwrap();
        assert_eq!(selector.get(LABEL_ROLE), Some(&"replica".to_string()));
    }

    #[test]
    fn test_parse_port() {
        assert_eq!(parse_port("5432").unwrap(), 5432);
        assert!(parse_port("").is_err());
        assert!(parse_port("0").is_err());
        assert!(parse_port("70000").is_err());
    }
}

mod secret_tests {
    use super::*;

    #[test]
    fn test_credential_secret() {
        let secret = build_credential_secret("hippo", "hippo-postgres-secret", "postgres", "pw");
        assert_eq!(secret.metadata.name.as_deref(), Some("hippo-postgres-secret"));
        assert_eq!(secret_value(&secret, USERNAME_KEY).as_deref(), Some("postgres"));
        assert_eq!(secret_value(&secret, PASSWORD_KEY).as_deref(), Some("pw"));
        assert_eq!(secret_value(&secret, "missing"), None);
    }

    #[test]
    fn test_generated_password_length() {
        assert_eq!(generate_password(10).len(), 10);
        assert_eq!(generate_password(0), "");
    }

    #[test]
    fn test_secret_names_prefer_recorded() {
        let mut cluster = create_test_cluster("hippo", "default");
        cluster.spec.user_secret_name = "custom".to_string();
        let names = SecretNames::of(&cluster);

        assert_eq!(names.root, "hippo-postgres-secret");
        assert_eq!(names.primary, "hippo-primaryuser-secret");
        assert_eq!(names.user, "custom");
    }
}

mod deployment_tests {
    use super::*;

    #[test]
    fn test_primary_deployment() {
        let cluster = create_test_cluster("hippo", "default");
        let config = OperatorConfig::default();
        let deployment = primary_deployment(&cluster, "hippo", &config).unwrap();

        assert_eq!(deployment.metadata.name.as_deref(), Some("hippo"));
        assert_eq!(pod_labels(&deployment).get(LABEL_ROLE), Some(&"primary".to_string()));
        let container = &deployment.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0];
        assert_eq!(container.name, DATABASE_CONTAINER);
        assert_eq!(
            container.image.as_deref(),
            Some("crunchydata/crunchy-postgres:centos7-10.4-1.8.3")
        );
        assert!(env_names(&deployment).contains(&"PG_ROOT_PASSWORD".to_string()));
        assert!(!env_names(&deployment).contains(&"ARCHIVE_MODE".to_string()));
    }

    #[test]
    fn test_archive_adds_wal_volume() {
        let cluster = PgclusterBuilder::new("hippo", "default")
            .with_label("archive", "true")
            .build();
        let deployment = primary_deployment(&cluster, "hippo", &OperatorConfig::default()).unwrap();

        assert!(env_names(&deployment).contains(&"ARCHIVE_MODE".to_string()));
        let volumes = deployment.spec.unwrap().template.spec.unwrap().volumes.unwrap();
        let wal = volumes.iter().find(|v| v.name == "pgwal").unwrap();
        assert_eq!(
            wal.persistent_volume_claim.as_ref().unwrap().claim_name,
            "hippo-xlog"
        );
    }

    #[test]
    fn test_empty_claim_uses_empty_dir() {
        let cluster = create_test_cluster("hippo", "default");
        let deployment = primary_deployment(&cluster, "", &OperatorConfig::default()).unwrap();
        let volumes = deployment.spec.unwrap().template.spec.unwrap().volumes.unwrap();
        assert!(volumes[0].empty_dir.is_some());
    }

    #[test]
    fn test_replica_deployment_points_at_primary() {
        let cluster = create_test_cluster("hippo", "default");
        let replica = create_test_replica("hippo-abcd", "hippo", "default");
        let deployment =
            replica_deployment(&replica, &cluster, "hippo-abcd", &OperatorConfig::default()).unwrap();

        assert_eq!(deployment.metadata.name.as_deref(), Some("hippo-abcd"));
        let labels = pod_labels(&deployment);
        assert_eq!(labels.get(LABEL_ROLE), Some(&"replica".to_string()));
        assert_eq!(labels.get(LABEL_PG_CLUSTER), Some(&"hippo".to_string()));
        let env = deployment.spec.unwrap().template.spec.unwrap().containers[0]
            .env
            .clone()
            .unwrap();
        let host = env.iter().find(|e| e.name == "PG_PRIMARY_HOST").unwrap();
        assert_eq!(host.value.as_deref(), Some("hippo"));
    }

    #[test]
    fn test_invalid_port_is_rejected() {
        let cluster = PgclusterBuilder::new("hippo", "default").with_port("abc").build();
        assert!(primary_deployment(&cluster, "hippo", &OperatorConfig::default()).is_err());
    }

    #[test]
    fn test_image_falls_back_to_default_tag() {
        let config = OperatorConfig::default();
        assert_eq!(
            postgres_image(&config, ""),
            format!("crunchydata/crunchy-postgres:{}", config.cluster.ccp_image_tag)
        );
    }

    #[test]
    fn test_image_patch_replaces_only_database_image() {
        let cluster = create_test_cluster("hippo", "default");
        let deployment = primary_deployment(&cluster, "hippo", &OperatorConfig::default()).unwrap();
        let patch = image_patch(&deployment, "crunchydata/crunchy-postgres:new").unwrap();

        assert_eq!(
            patch["spec"]["template"]["spec"]["containers"][0]["image"],
            json!("crunchydata/crunchy-postgres:new")
        );
        assert!(image_patch(&Deployment::default(), "x").is_none());
    }

    #[test]
    fn test_label_patches() {
        let patch = role_patch("primary");
        assert_eq!(patch["metadata"]["labels"]["role"], json!("primary"));
        assert_eq!(
            patch["spec"]["template"]["metadata"]["labels"]["role"],
            json!("primary")
        );

        let labels = BTreeMap::from([("policy".to_string(), "pgaudit".to_string())]);
        assert_eq!(
            labels_patch(&labels),
            json!({ "metadata": { "labels": { "policy": "pgaudit" } } })
        );
    }
}

mod pooler_tests {
    use super::*;

    #[test]
    fn test_requested_poolers() {
        let cluster = PgclusterBuilder::new("hippo", "default")
            .with_label("crunchy-pgbouncer", "true")
            .with_label("crunchy-pgpool", "true")
            .build();
        assert_eq!(
            PoolerKind::requested(&cluster),
            vec![PoolerKind::Pgbouncer, PoolerKind::Pgpool]
        );
        assert!(PoolerKind::requested(&create_test_cluster("hippo", "default")).is_empty());
    }

    #[test]
    fn test_pooler_deployment_name() {
        let cluster = create_test_cluster("hippo", "default");
        let deployment =
            pooler_deployment(PoolerKind::Pgbouncer, &cluster, &OperatorConfig::default());
        assert_eq!(deployment.metadata.name.as_deref(), Some("hippo-pgbouncer"));
        assert_eq!(PoolerKind::Pgpool.object_name("hippo"), "hippo-pgpool");
    }
}

mod storage_tests {
    use super::*;

    #[test]
    fn test_claim_modes() {
        assert_eq!(ClaimMode::of(&storage("1Gi", "")).unwrap(), ClaimMode::EmptyDir);
        assert_eq!(ClaimMode::of(&storage("1Gi", "existing")).unwrap(), ClaimMode::Existing);
        assert_eq!(ClaimMode::of(&storage("1Gi", "create")).unwrap(), ClaimMode::Create);
        assert_eq!(ClaimMode::of(&storage("1Gi", "dynamic")).unwrap(), ClaimMode::Dynamic);
        assert!(ClaimMode::of(&storage("1Gi", "nfs")).is_err());
    }

    #[test]
    fn test_dynamic_claim_uses_storage_class() {
        let mut spec = storage("5Gi", "dynamic");
        spec.storage_class = "fast".to_string();
        let claim = build_claim(&spec, "hippo", "hippo").unwrap();

        let claim_spec = claim.spec.unwrap();
        assert_eq!(claim_spec.storage_class_name.as_deref(), Some("fast"));
        assert_eq!(claim_spec.access_modes, Some(vec!["ReadWriteOnce".to_string()]));
    }

    #[test]
    fn test_create_claim_has_no_storage_class() {
        let mut spec = storage("5Gi", "create");
        spec.storage_class = "fast".to_string();
        let claim = build_claim(&spec, "hippo", "hippo").unwrap();
        assert_eq!(claim.spec.unwrap().storage_class_name, None);
    }
}

mod job_tests {
    use super::*;

    #[test]
    fn test_upgrade_job() {
        let cluster = create_test_cluster("hippo", "default");
        let upgrade = create_test_upgrade("hippo", "major", "centos7-10.5-2.0.0");
        let target = UpgradeTarget {
            workload: "hippo".to_string(),
            claim: "hippo".to_string(),
        };
        let job = upgrade_job(&upgrade, &cluster, &target, &OperatorConfig::default());

        assert_eq!(job.metadata.name, Some(upgrade_job_name("hippo")));
        let spec = job.spec.unwrap();
        assert_eq!(spec.backoff_limit, Some(0));
        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
        assert_eq!(
            pod.containers[0].image.as_deref(),
            Some("crunchydata/crunchy-upgrade:centos7-10.5-2.0.0")
        );
    }
}

#[test]
fn test_random_suffix_is_lowercase() {
    let suffix = random_suffix(4);
    assert_eq!(suffix.len(), 4);
    assert!(suffix.chars().all(|c| c.is_ascii_lowercase()));
}
