//! Report API handlers

use super::dto::{
    ApiResponse, MonthlyQuery, PaymentResponse, RecentPaymentResponse, RecentPaymentsQuery, RevenueQuery,
    MAX_RECENT_LIMIT,
};
use super::error::ApiError;
use super::state::AppState;
use super::tenant::CurrentTenant;
use crate::application::{DashboardSummary, MonthlyStatement, RevenueSummary};
use crate::domain::clock::BillingMonth;
use crate::domain::shared::ConnectionId;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use tracing::info;

/// Paid, migrated, unpaid and lapsed connections of one month
pub async fn monthly_statement(
    State(state): State<AppState>,
    CurrentTenant(tenant): CurrentTenant,
    Query(query): Query<MonthlyQuery>,
) -> Result<Json<ApiResponse<MonthlyStatement>>, ApiError> {
    let month = match query.month.as_deref() {
        Some(raw) => raw.parse::<BillingMonth>()?,
        None => state.reports.current_month(),
    };
    info!("API: Monthly statement for {}", month);

    let statement = state.reports.monthly_statement(&tenant, month).await?;
    Ok(Json(ApiResponse::success(statement)))
}

/// Revenue totals for a range of days
pub async fn revenue(
    State(state): State<AppState>,
    CurrentTenant(tenant): CurrentTenant,
    Query(query): Query<RevenueQuery>,
) -> Result<Json<ApiResponse<RevenueSummary>>, ApiError> {
    info!("API: Revenue from {} to {}", query.from, query.to);

    let summary = state.reports.revenue(&tenant, query.from, query.to).await?;
    Ok(Json(ApiResponse::success(summary)))
}

pub async fn dashboard(
    State(state): State<AppState>,
    CurrentTenant(tenant): CurrentTenant,
) -> Result<Json<ApiResponse<DashboardSummary>>, ApiError> {
    info!("API: Dashboard for tenant {}", tenant);

    let summary = state.reports.dashboard(&tenant).await?;
    Ok(Json(ApiResponse::success(summary)))
}

pub async fn recent_payments(
    State(state): State<AppState>,
    CurrentTenant(tenant): CurrentTenant,
    Query(query): Query<RecentPaymentsQuery>,
) -> Result<Json<ApiResponse<Vec<RecentPaymentResponse>>>, ApiError> {
    let limit = query.limit.min(MAX_RECENT_LIMIT);
    info!("API: Recent payments (limit: {})", limit);

    let payments = state.reports.recent_payments(&tenant, limit).await?;
    Ok(Json(ApiResponse::success(
        payments.into_iter().map(Into::into).collect(),
    )))
}

/// Payment history of a connection, newest first
pub async fn payment_history(
    State(state): State<AppState>,
    CurrentTenant(tenant): CurrentTenant,
    Path(id): Path<ConnectionId>,
) -> Result<Json<ApiResponse<Vec<PaymentResponse>>>, ApiError> {
    info!("API: Payment history for connection ID: {}", id);

    let payments = state.reports.payment_history(&tenant, &id).await?;
    Ok(Json(ApiResponse::success(
        payments.into_iter().map(Into::into).collect(),
    )))
}
