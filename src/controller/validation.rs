//! Validation of authored cluster fields
//!
//! The front end stores several numeric fields as text, so parsing happens
//! here and failures surface as configuration errors that abort only the
//! step that needed the value.

use crate::controller::error::{Error, Result};
use crate::crd::{PgclusterSpec, StorageSpec};

/// Parse the authored replica count.
///
/// An empty value means no replicas were requested.
pub fn parse_replica_count(raw: &str) -> Result<u32> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(0);
    }

    let count: i64 = raw
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("replica count '{}' is not a number", raw)))?;

    if count < 0 {
        return Err(Error::InvalidConfig(format!(
            "replica count {} is negative",
            count
        )));
    }

    u32::try_from(count)
        .map_err(|_| Error::InvalidConfig(format!("replica count {} is out of range", count)))
}

/// Binary and decimal SI suffixes of a Kubernetes quantity
const QUANTITY_SUFFIXES: &[&str] = &[
    "", "Ki", "Mi", "Gi", "Ti", "Pi", "Ei", "n", "u", "m", "k", "M", "G", "T", "P", "E",
];

fn is_decimal_exponent(suffix: &str) -> bool {
    let Some(exponent) = suffix.strip_prefix(['e', 'E']) else {
        return false;
    };
    let digits = exponent.strip_prefix(['+', '-']).unwrap_or(exponent);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

/// Validate a claim size such as `10Gi` or `1G`.
///
/// Any positive Kubernetes quantity is accepted.
pub fn validate_storage_size(size: &str) -> Result<()> {
    let invalid = || Error::ValidationError(format!("invalid storage size: {}", size));

    let unsigned = size.strip_prefix('+').unwrap_or(size);
    let split = unsigned
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(unsigned.len());
    let (number, suffix) = unsigned.split_at(split);

    if !QUANTITY_SUFFIXES.contains(&suffix) && !is_decimal_exponent(suffix) {
        return Err(invalid());
    }
    let value: f64 = number.parse().map_err(|_| invalid())?;

    if value <= 0.0 {
        return Err(Error::ValidationError(format!(
            "storage size must be positive: {}",
            size
        )));
    }

    Ok(())
}

/// Validate a storage spec that will back a new claim
pub fn validate_storage(spec: &StorageSpec) -> Result<()> {
    match spec.storage_type.as_str() {
        "create" | "dynamic" => validate_storage_size(&spec.size),
        _ => Ok(()),
    }
}

/// Validate the fields cluster creation depends on
pub fn validate_cluster(name: &str, spec: &PgclusterSpec) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::ValidationError(
            "cluster name cannot be empty".to_string(),
        ));
    }
    validate_storage(&spec.primary_storage)?;
    Ok(())
}
