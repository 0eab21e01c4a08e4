//! Prometheus metrics handler

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use metrics::describe_counter;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the global Prometheus recorder and describe the billing metrics
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();
    Ok(handle)
}

/// Describe metrics
pub fn describe_metrics() {
    describe_counter!(
        "billing_operations_total",
        "Billing operations by operation and outcome"
    );
    describe_counter!(
        "billing_transaction_retries_total",
        "Billing units replayed after a transaction conflict"
    );
    describe_counter!(
        "billing_bulk_charged_total",
        "Connections charged through bulk charge"
    );
}

/// HTTP metrics handler
pub async fn metrics_handler(State(prometheus_handle): State<PrometheusHandle>) -> Response {
    let metrics = prometheus_handle.render();
    (StatusCode::OK, metrics).into_response()
}
