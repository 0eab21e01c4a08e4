//! Billing API handlers

use super::dto::{ApiResponse, BulkChargeRequest, ChargeResponse, MigratePlanRequest, MigrationResponse};
use super::error::ApiError;
use super::state::AppState;
use super::tenant::CurrentTenant;
use crate::application::{BulkChargeReport, DeletionReceipt};
use crate::domain::shared::{ConnectionId, PaymentId};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::info;

/// Health check endpoint
pub async fn health_check() -> Json<ApiResponse<&'static str>> {
    Json(ApiResponse::success("OK"))
}

/// Mark a connection as paid for this month
pub async fn charge_now(
    State(state): State<AppState>,
    CurrentTenant(tenant): CurrentTenant,
    Path(id): Path<ConnectionId>,
) -> Result<(StatusCode, Json<ApiResponse<ChargeResponse>>), ApiError> {
    info!("API: Charging connection ID: {}", id);

    let receipt = state.engine.charge_now(&tenant, &id).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(receipt.into()))))
}

/// Move a connection to another pack
pub async fn migrate_plan(
    State(state): State<AppState>,
    CurrentTenant(tenant): CurrentTenant,
    Path(id): Path<ConnectionId>,
    Json(req): Json<MigratePlanRequest>,
) -> Result<Json<ApiResponse<MigrationResponse>>, ApiError> {
    info!("API: Migrating connection {} to pack {}", id, req.to);

    let receipt = state.engine.migrate_plan(&tenant, &id, &req.to).await?;
    Ok(Json(ApiResponse::success(receipt.into())))
}

/// Delete a payment of the current month
pub async fn delete_payment(
    State(state): State<AppState>,
    CurrentTenant(tenant): CurrentTenant,
    Path(id): Path<PaymentId>,
) -> Result<Json<ApiResponse<DeletionReceipt>>, ApiError> {
    info!("API: Deleting payment ID: {}", id);

    let receipt = state.engine.delete_payment(&tenant, &id).await?;
    Ok(Json(ApiResponse::success(receipt)))
}

/// Charge a list of box numbers in one go
pub async fn bulk_charge(
    State(state): State<AppState>,
    CurrentTenant(tenant): CurrentTenant,
    Json(req): Json<BulkChargeRequest>,
) -> Result<Json<ApiResponse<BulkChargeReport>>, ApiError> {
    info!("API: Bulk charging {} box numbers", req.box_numbers.len());

    let report = state.engine.bulk_charge(&tenant, &req.box_numbers).await?;
    Ok(Json(ApiResponse::success(report)))
}
