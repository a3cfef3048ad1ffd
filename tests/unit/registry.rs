//! Unit tests for the strategy registry

use pgcluster_operator::strategy::{DEFAULT_STRATEGY, StrategyRegistry, effective_strategy_id};

#[test]
fn test_defaults_register_strategy_one() {
    let registry = StrategyRegistry::with_defaults();
    assert_eq!(registry.ids(), vec!["1"]);
    assert!(registry.resolve("1").is_some());
}

#[test]
fn test_unknown_identifier_is_absent() {
    let registry = StrategyRegistry::with_defaults();
    assert!(registry.resolve("zz").is_none());
    assert!(registry.resolve("").is_none());
}

#[test]
fn test_empty_identifier_defaults() {
    assert_eq!(effective_strategy_id(""), DEFAULT_STRATEGY);
    assert_eq!(effective_strategy_id("2"), "2");
}

#[test]
fn test_empty_registry() {
    let registry = StrategyRegistry::default();
    assert!(registry.ids().is_empty());
    assert_eq!(format!("{:?}", registry), "StrategyRegistry { strategies: [] }");
}
