//! API Router configuration

use super::billing_handler::{bulk_charge, charge_now, delete_payment, health_check, migrate_plan};
use super::catalog_handler::{
    create_connection, create_pack, delete_pack, get_connection, get_connection_by_box, get_pack,
    list_connections, list_packs, update_connection, update_pack,
};
use super::metrics_handler::metrics_handler;
use super::report_handler::{dashboard, monthly_statement, payment_history, recent_payments, revenue};
use super::state::AppState;
use axum::{
    routing::{delete, get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the API router
pub fn build_router(state: AppState, prometheus_handle: PrometheusHandle) -> Router {
    // Health check route (no tenant required)
    let health_routes = Router::new().route("/health", get(health_check));

    // Catalog routes
    let pack_routes = Router::new()
        .route("/packs", get(list_packs).post(create_pack))
        .route("/packs/:id", get(get_pack).put(update_pack).delete(delete_pack));

    // Directory routes
    let connection_routes = Router::new()
        .route("/connections", get(list_connections).post(create_connection))
        .route("/connections/:id", get(get_connection).put(update_connection))
        .route("/connections/box/:box_number", get(get_connection_by_box));

    // Billing routes
    let billing_routes = Router::new()
        .route("/connections/:id/payments", post(charge_now).get(payment_history))
        .route("/connections/:id/migrations", post(migrate_plan))
        .route("/payments/bulk", post(bulk_charge))
        .route("/payments/:id", delete(delete_payment));

    // Report routes
    let report_routes = Router::new()
        .route("/reports/monthly", get(monthly_statement))
        .route("/reports/revenue", get(revenue))
        .route("/reports/dashboard", get(dashboard))
        .route("/reports/recent-payments", get(recent_payments));

    // Metrics route (separate state)
    let metrics_routes = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(prometheus_handle);

    // Combine routes with state
    Router::new()
        .merge(health_routes)
        .merge(pack_routes)
        .merge(connection_routes)
        .merge(billing_routes)
        .merge(report_routes)
        .with_state(state)
        .merge(metrics_routes)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
