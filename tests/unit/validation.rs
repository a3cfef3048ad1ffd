//! Unit tests for validation logic

use pgcluster_operator::controller::Error;
use pgcluster_operator::controller::validation::{
    parse_replica_count, validate_cluster, validate_storage, validate_storage_size,
};
use pgcluster_operator::crd::PgclusterSpec;

use crate::common::*;

mod replica_count_tests {
    use super::*;

    #[test]
    fn test_empty_means_no_replicas() {
        assert_eq!(parse_replica_count("").unwrap(), 0);
        assert_eq!(parse_replica_count("   ").unwrap(), 0);
    }

    #[test]
    fn test_numeric_counts() {
        assert_eq!(parse_replica_count("1").unwrap(), 1);
        assert_eq!(parse_replica_count("250").unwrap(), 250);
    }

    #[test]
    fn test_non_numeric_is_invalid_config() {
        assert!(matches!(parse_replica_count("two"), Err(Error::InvalidConfig(_))));
        assert!(matches!(parse_replica_count("1.5"), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_out_of_range_is_invalid_config() {
        assert!(matches!(parse_replica_count("-2"), Err(Error::InvalidConfig(_))));
        let too_many = (u64::from(u32::MAX) + 1).to_string();
        assert!(matches!(parse_replica_count(&too_many), Err(Error::InvalidConfig(_))));
    }
}

mod storage_tests {
    use super::*;

    #[test]
    fn test_valid_sizes() {
        for size in ["1Gi", "512Mi", "2Ti", "1G", "100M", "10", "0.5Gi", "5e3"] {
            assert!(validate_storage_size(size).is_ok(), "{} should be valid", size);
        }
    }

    #[test]
    fn test_invalid_sizes() {
        for size in ["", "10GB", "0Gi", "xGi", "1g", "-5Gi"] {
            assert!(
                matches!(validate_storage_size(size), Err(Error::ValidationError(_))),
                "{} should be rejected",
                size
            );
        }
    }

    #[test]
    fn test_only_new_claims_are_size_checked() {
        assert!(validate_storage(&storage("bogus", "create")).is_err());
        assert!(validate_storage(&storage("bogus", "dynamic")).is_err());
        assert!(validate_storage(&storage("bogus", "existing")).is_ok());
        assert!(validate_storage(&storage("", "emptydir")).is_ok());
    }
}

mod cluster_tests {
    use super::*;

    #[test]
    fn test_valid_cluster() {
        let cluster = create_test_cluster("hippo", "default");
        assert!(validate_cluster("hippo", &cluster.spec).is_ok());
    }

    #[test]
    fn test_empty_name_rejected() {
        assert!(matches!(
            validate_cluster("", &PgclusterSpec::default()),
            Err(Error::ValidationError(_))
        ));
    }

    #[test]
    fn test_bad_primary_storage_rejected() {
        let cluster = PgclusterBuilder::new("hippo", "default")
            .with_storage("lots", "create")
            .build();
        assert!(validate_cluster("hippo", &cluster.spec).is_err());
    }
}
