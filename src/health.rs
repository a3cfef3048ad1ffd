//! Liveness, readiness and metrics endpoints
//!
//! `/healthz` answers as long as the process runs, `/readyz` once the
//! controllers are watching, and `/metrics` serves the Prometheus registry.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use tokio::net::TcpListener;

const HEALTH_ADDR: &str = "0.0.0.0:8080";

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReconcileLabels {
    pub kind: String,
    pub namespace: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OperationLabels {
    pub operation: String,
}

type OperationHistogram = Family<OperationLabels, Histogram, fn() -> Histogram>;

fn operation_histogram() -> Histogram {
    Histogram::new(exponential_buckets(0.001, 2.0, 15))
}

/// Reconcile counters per resource kind and lifecycle operation counters
pub struct Metrics {
    pub reconciliations_total: Family<ReconcileLabels, Counter>,
    pub reconciliation_errors_total: Family<ReconcileLabels, Counter>,
    pub operations_total: Family<OperationLabels, Counter>,
    pub operation_failures_total: Family<OperationLabels, Counter>,
    pub operation_duration_seconds: OperationHistogram,
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("pgcluster_operator");

        let reconciliations_total = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            "reconciliations",
            "Reconciliations per resource kind",
            reconciliations_total.clone(),
        );
        let reconciliation_errors_total = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            "reconciliation_errors",
            "Failed reconciliations per resource kind",
            reconciliation_errors_total.clone(),
        );
        let operations_total = Family::<OperationLabels, Counter>::default();
        registry.register(
            "operations",
            "Lifecycle operations run",
            operations_total.clone(),
        );
        let operation_failures_total = Family::<OperationLabels, Counter>::default();
        registry.register(
            "operation_failures",
            "Lifecycle operations that returned an error",
            operation_failures_total.clone(),
        );
        let operation_duration_seconds: OperationHistogram =
            Family::new_with_constructor(operation_histogram);
        registry.register(
            "operation_duration_seconds",
            "Duration of lifecycle operations",
            operation_duration_seconds.clone(),
        );

        Self {
            reconciliations_total,
            reconciliation_errors_total,
            operations_total,
            operation_failures_total,
            operation_duration_seconds,
            registry,
        }
    }

    pub fn record_reconcile(&self, kind: &str, namespace: &str) {
        self.reconciliations_total
            .get_or_create(&reconcile_labels(kind, namespace))
            .inc();
    }

    pub fn record_error(&self, kind: &str, namespace: &str) {
        self.reconciliation_errors_total
            .get_or_create(&reconcile_labels(kind, namespace))
            .inc();
    }

    /// Count a finished operation and observe its duration
    pub fn record_operation(&self, operation: &str, duration_secs: f64) {
        let labels = operation_labels(operation);
        self.operations_total.get_or_create(&labels).inc();
        self.operation_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    pub fn record_failure(&self, operation: &str) {
        self.operation_failures_total
            .get_or_create(&operation_labels(operation))
            .inc();
    }

    fn encode(&self) -> String {
        let mut buffer = String::new();
        if let Err(e) = encode(&mut buffer, &self.registry) {
            tracing::error!("Failed to encode metrics: {}", e);
            buffer.clear();
        }
        buffer
    }
}

fn reconcile_labels(kind: &str, namespace: &str) -> ReconcileLabels {
    ReconcileLabels {
        kind: kind.to_string(),
        namespace: namespace.to_string(),
    }
}

fn operation_labels(operation: &str) -> OperationLabels {
    OperationLabels {
        operation: operation.to_string(),
    }
}

/// State shared between the controllers and the health server
#[derive(Default)]
pub struct HealthState {
    ready: AtomicBool,
    pub metrics: Metrics,
    /// Unix time of the last successful reconcile
    pub last_reconcile: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn readyz(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    if state.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

async fn metrics(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.encode(),
    )
}

pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve the health and metrics endpoints until the listener fails
pub async fn run_health_server(state: Arc<HealthState>) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(HEALTH_ADDR).await?;
    tracing::info!("Health server listening on {}", HEALTH_ADDR);
    axum::serve(listener, create_router(state)).await
}
