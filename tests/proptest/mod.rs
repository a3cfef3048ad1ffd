// Test code is allowed to panic on failure
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

//! Property-based tests for generated names, passwords and patch paths
//!
//! These tests use proptest to verify that:
//! 1. Generated passwords and replica suffixes always have the requested shape
//! 2. Any well-formed pointer becomes a merge patch that resolves back to the value
//! 3. Replica count parsing never panics and accepts every non-negative count
//! 4. Positive quantities with any SI or binary suffix are valid claim sizes

use proptest::prelude::*;

use pgcluster_operator::controller::patch::merge_patch_for;
use pgcluster_operator::controller::validation::{parse_replica_count, validate_storage_size};
use pgcluster_operator::resources::common::random_suffix;
use pgcluster_operator::resources::secret::generate_password;

proptest! {
    #[test]
    fn password_has_requested_length_and_charset(len in 0usize..64) {
        let password = generate_password(len);
        prop_assert_eq!(password.len(), len);
        prop_assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn suffix_is_lowercase_ascii(len in 0usize..16) {
        let suffix = random_suffix(len);
        prop_assert_eq!(suffix.len(), len);
        prop_assert!(suffix.chars().all(|c| c.is_ascii_lowercase()));
    }

    #[test]
    fn merge_patch_resolves_at_pointer(
        segments in prop::collection::vec("[A-Za-z][A-Za-z0-9]{0,8}", 1..5),
        value in "[a-z0-9-]{0,12}",
    ) {
        let pointer = format!("/{}", segments.join("/"));
        let expected = serde_json::json!(value);
        let patch = merge_patch_for(&pointer, expected.clone()).unwrap();
        prop_assert_eq!(patch.pointer(&pointer), Some(&expected));
    }

    #[test]
    fn merge_patch_has_single_path(
        segments in prop::collection::vec("[a-z]{1,6}", 1..5),
    ) {
        let pointer = format!("/{}", segments.join("/"));
        let mut patch = merge_patch_for(&pointer, serde_json::json!(1)).unwrap();
        for segment in &segments {
            let object = patch.as_object().unwrap();
            prop_assert_eq!(object.len(), 1);
            patch = object[segment.as_str()].clone();
        }
        prop_assert_eq!(patch, serde_json::json!(1));
    }

    #[test]
    fn replica_count_accepts_exactly_valid_range(n in -1000i64..1000) {
        let parsed = parse_replica_count(&n.to_string());
        if n >= 0 {
            prop_assert_eq!(parsed.unwrap(), n as u32);
        } else {
            prop_assert!(parsed.is_err());
        }
    }

    #[test]
    fn positive_quantities_are_valid_sizes(
        n in 1u32..100_000,
        suffix in prop::sample::select(vec!["", "Ki", "Mi", "Gi", "Ti", "k", "M", "G", "T"]),
    ) {
        let size = format!("{}{}", n, suffix);
        prop_assert!(validate_storage_size(&size).is_ok(), "{}", size);
    }

    #[test]
    fn replica_count_never_panics(raw in ".{0,12}") {
        let _ = parse_replica_count(&raw);
    }
}
