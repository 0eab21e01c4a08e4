//! Billing API Integration Tests
//!
//! Drives the router with `oneshot` over the in-memory store.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use cablebill::domain::clock::{BillingCalendar, FixedClock};
use cablebill::domain::shared::NanoIdGenerator;
use cablebill::infrastructure::persistence::MemoryBillingStore;
use cablebill::interface::api::{build_router, AppState, TENANT_HEADER};
use chrono::{TimeZone, Utc};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt; // For `oneshot`

fn setup_app() -> Router {
    setup_app_with(BillingCalendar::default())
}

fn setup_app_with(calendar: BillingCalendar) -> Router {
    let clock = Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2026, 10, 16, 10, 0, 0).unwrap(),
    ));
    let state = AppState::new(
        Arc::new(MemoryBillingStore::new()),
        clock,
        calendar,
        Arc::new(NanoIdGenerator),
        3,
    );
    let prometheus_handle = PrometheusBuilder::new().build_recorder().handle();
    build_router(state, prometheus_handle)
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    tenant: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(tenant) = tenant {
        builder = builder.header(TENANT_HEADER, tenant);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

/// Create a pack and one connection on it, returning their ids
async fn seed(app: &Router, tenant: &str, box_number: &str) -> (String, String) {
    let (status, pack) = send(
        app,
        "POST",
        "/packs",
        Some(tenant),
        Some(json!({"name": "basic", "operator_price": 80, "customer_price": 100})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let pack_id = pack["data"]["id"].as_str().unwrap().to_string();

    let (status, connection) = send(
        app,
        "POST",
        "/connections",
        Some(tenant),
        Some(json!({
            "name": "ravi kumar",
            "boxNumber": box_number,
            "area": "north",
            "basePack": pack_id,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let connection_id = connection["data"]["id"].as_str().unwrap().to_string();

    (pack_id, connection_id)
}

#[tokio::test]
async fn test_health_needs_no_tenant() {
    let app = setup_app();
    let (status, json) = send(&app, "GET", "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"], "OK");
}

#[tokio::test]
async fn test_missing_tenant_is_unauthorized() {
    let app = setup_app();
    let (status, json) = send(&app, "GET", "/packs", None, None).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["success"], false);
}

#[tokio::test]
async fn test_charge_and_double_charge() {
    let app = setup_app();
    let (_, connection_id) = seed(&app, "t1", "smc0000000001").await;
    let uri = format!("/connections/{}/payments", connection_id);

    let (status, json) = send(&app, "POST", &uri, Some("t1"), None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["data"]["box_number"], "SMC0000000001");
    assert_eq!(json["data"]["payment"]["price_charged"], 100);
    assert_eq!(json["data"]["payment"]["plan_at_charge"], json["data"]["payment"]["pack_id"]);
    assert_eq!(json["data"]["payment"]["tenant_id"], Value::Null);

    let (status, json) = send(&app, "POST", &uri, Some("t1"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "This connection has already been marked as paid");

    let (status, json) = send(&app, "GET", &uri, Some("t1"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"].as_array().unwrap().len(), 1);
    assert_eq!(json["data"][0]["price_charged"], 100);
}

#[tokio::test]
async fn test_other_tenant_sees_not_found() {
    let app = setup_app();
    let (_, connection_id) = seed(&app, "t1", "SMC0000000001").await;

    let (status, json) = send(
        &app,
        "GET",
        &format!("/connections/{}", connection_id),
        Some("t2"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "Resource not found");

    let (status, _) = send(
        &app,
        "POST",
        &format!("/connections/{}/payments", connection_id),
        Some("t2"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_duplicate_box_number_conflicts() {
    let app = setup_app();
    let (pack_id, _) = seed(&app, "t1", "SMC0000000001").await;

    let (status, json) = send(
        &app,
        "POST",
        "/connections",
        Some("t1"),
        Some(json!({
            "name": "anita rao",
            "box_number": "SMC0000000001",
            "area_id": "south",
            "plan_id": pack_id,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["success"], false);

    // Same box number is free in another tenant
    seed(&app, "t2", "SMC0000000001").await;
}

#[tokio::test]
async fn test_migrate_to_same_pack_is_rejected() {
    let app = setup_app();
    let (pack_id, connection_id) = seed(&app, "t1", "SMC0000000001").await;

    let (status, json) = send(
        &app,
        "POST",
        &format!("/connections/{}/migrations", connection_id),
        Some("t1"),
        Some(json!({"pack": pack_id})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Choose a different pack");
}

#[tokio::test]
async fn test_migrate_then_delete_restores_connection() {
    let app = setup_app();
    let (pack_id, connection_id) = seed(&app, "t1", "SMC0000000001").await;
    let (_, premium) = send(
        &app,
        "POST",
        "/packs",
        Some("t1"),
        Some(json!({"name": "premium", "operator_price": 250, "customer_price": 300})),
    )
    .await;
    let premium_id = premium["data"]["id"].as_str().unwrap();

    let (status, json) = send(
        &app,
        "POST",
        &format!("/connections/{}/migrations", connection_id),
        Some("t1"),
        Some(json!({"to": premium_id})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["overwritten"], false);
    assert_eq!(json["data"]["payment"]["is_migration"], true);
    assert_eq!(json["data"]["payment"]["pack_name"], "PREMIUM");
    assert_eq!(json["data"]["plan"]["id"], premium_id);
    let payment_id = json["data"]["payment"]["id"].as_str().unwrap().to_string();

    let (status, json) = send(
        &app,
        "DELETE",
        &format!("/payments/{}", payment_id),
        Some("t1"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["current_plan_id"], pack_id.as_str());
    assert_eq!(json["data"]["last_payment_at"], Value::Null);

    let (_, json) = send(
        &app,
        "GET",
        &format!("/connections/{}", connection_id),
        Some("t1"),
        None,
    )
    .await;
    assert_eq!(json["data"]["current_plan_id"], pack_id.as_str());
}

#[tokio::test]
async fn test_bulk_charge() {
    let app = setup_app();
    seed(&app, "t1", "SMC0000000001").await;

    let (status, json) = send(&app, "POST", "/payments/bulk", Some("t1"), Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Please provide SMCs list to pay.");

    let (status, json) = send(
        &app,
        "POST",
        "/payments/bulk",
        Some("t1"),
        Some(json!({"smcs": ["smc0000000001", "SMC9999999999"]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["charged"][0]["box_number"], "SMC0000000001");
    assert_eq!(json["data"]["unmatched"][0], "SMC9999999999");

    let (_, json) = send(
        &app,
        "POST",
        "/payments/bulk",
        Some("t1"),
        Some(json!({"box_numbers": ["SMC0000000001"]})),
    )
    .await;
    assert!(json["data"]["charged"].as_array().unwrap().is_empty());
    assert_eq!(json["data"]["skipped"][0]["box_number"], "SMC0000000001");
}

#[tokio::test]
async fn test_reports() {
    let app = setup_app();
    let (_, connection_id) = seed(&app, "t1", "SMC0000000001").await;
    send(
        &app,
        "POST",
        &format!("/connections/{}/payments", connection_id),
        Some("t1"),
        None,
    )
    .await;

    let (status, json) = send(&app, "GET", "/reports/monthly", Some("t1"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["month"], "2026-10");
    assert_eq!(json["data"]["total_collected"], 100);
    assert_eq!(json["data"]["paid"].as_array().unwrap().len(), 1);

    let (status, json) = send(&app, "GET", "/reports/monthly?month=2026-13", Some("t1"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);

    let (status, json) = send(
        &app,
        "GET",
        "/reports/revenue?from=2026-10-01&to=2026-10-31",
        Some("t1"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["customer_total"], 100);
    assert_eq!(json["data"]["margin"], 20);

    let (status, json) = send(&app, "GET", "/reports/dashboard", Some("t1"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["total_connections"], 1);
    assert_eq!(json["data"]["active_connections"], 1);

    let (status, json) = send(&app, "GET", "/reports/recent-payments?limit=5", Some("t1"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"][0]["box_number"], "SMC0000000001");
}

#[tokio::test]
async fn test_reports_outside_calendar_are_bad_requests() {
    let app = setup_app_with(BillingCalendar::from_offset_str("+05:30").unwrap());

    for uri in [
        "/reports/monthly?month=262142-12",
        "/reports/revenue?from=-262143-01-01&to=2026-10-01",
    ] {
        let (status, _) = send(&app, "GET", uri, Some("t1"), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
    }

    // Service keeps answering after the rejected requests
    let (status, _) = send(&app, "GET", "/reports/monthly?month=2026-10", Some("t1"), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_pack_in_use_cannot_be_deleted() {
    let app = setup_app();
    let (pack_id, _) = seed(&app, "t1", "SMC0000000001").await;

    let (status, _) = send(&app, "DELETE", &format!("/packs/{}", pack_id), Some("t1"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, json) = send(&app, "GET", "/packs", Some("t1"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"][0]["connections"], 1);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup_app();
    let (status, _) = send(&app, "GET", "/metrics", None, None).await;
    assert_eq!(status, StatusCode::OK);
}
