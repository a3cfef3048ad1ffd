use std::sync::Arc;
use std::time::Instant;

use tracing::error;

use crate::client::KubeClient;
use crate::config::OperatorConfig;
use crate::controller::error::{Error, Result};
use crate::health::HealthState;
use crate::strategy::{Strategy, StrategyRegistry, effective_strategy_id};

/// Shared context for the orchestrators and strategies
#[derive(Clone)]
pub struct Context {
    /// Platform API client
    pub kube: Arc<dyn KubeClient>,
    /// Operator-wide configuration
    pub config: Arc<OperatorConfig>,
    /// Strategies, fixed at startup
    pub strategies: Arc<StrategyRegistry>,
    /// Health state for metrics (optional)
    pub health_state: Option<Arc<HealthState>>,
}

impl Context {
    pub fn new(
        kube: Arc<dyn KubeClient>,
        config: Arc<OperatorConfig>,
        strategies: Arc<StrategyRegistry>,
    ) -> Self {
        Self {
            kube,
            config,
            strategies,
            health_state: None,
        }
    }

    pub fn with_health_state(mut self, health_state: Arc<HealthState>) -> Self {
        self.health_state = Some(health_state);
        self
    }

    /// Resolve a cluster's stored strategy identifier, defaulting an empty one
    pub fn resolve_strategy(&self, stored: &str) -> Result<Arc<dyn Strategy>> {
        let id = effective_strategy_id(stored);
        self.strategies.resolve(id).ok_or_else(|| {
            error!(strategy = %id, "invalid cluster strategy requested");
            Error::InvalidConfig(format!("strategy '{}' is not registered", id))
        })
    }

    /// Record the outcome of one orchestrator invocation
    pub fn observe<T>(&self, operation: &str, started: Instant, result: &Result<T>) {
        if let Some(ref health_state) = self.health_state {
            let metrics = &health_state.metrics;
            metrics.record_operation(operation, started.elapsed().as_secs_f64());
            if result.is_err() {
                metrics.record_failure(operation);
            }
        }
    }
}
