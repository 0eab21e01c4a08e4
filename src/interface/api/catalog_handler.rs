//! Pack and connection API handlers

use super::dto::{ApiResponse, ConnectionResponse, CreateConnectionRequest, PackResponse};
use super::error::ApiError;
use super::state::AppState;
use super::tenant::CurrentTenant;
use crate::domain::connection::{ConnectionDirectory, ConnectionProfile, NewConnection};
use crate::domain::plan::{PackDraft, PlanCatalog};
use crate::domain::shared::{normalize_box_number, ConnectionId, DomainError, PackId};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::info;

/// List packs with connection counts
pub async fn list_packs(
    State(state): State<AppState>,
    CurrentTenant(tenant): CurrentTenant,
) -> Result<Json<ApiResponse<Vec<PackResponse>>>, ApiError> {
    info!("API: Listing packs for tenant {}", tenant);

    let packs = state.store.list_packs(&tenant).await?;
    Ok(Json(ApiResponse::success(packs.into_iter().map(Into::into).collect())))
}

/// Create a pack
pub async fn create_pack(
    State(state): State<AppState>,
    CurrentTenant(tenant): CurrentTenant,
    Json(draft): Json<PackDraft>,
) -> Result<(StatusCode, Json<ApiResponse<PackResponse>>), ApiError> {
    info!("API: Creating pack {} for tenant {}", draft.name, tenant);

    let id = PackId::new(state.ids.next_id());
    let pack = state.store.create_pack(&tenant, id, draft).await?;

    info!("API: Created pack {} (ID: {})", pack.name, pack.id);
    Ok((StatusCode::CREATED, Json(ApiResponse::success(pack.into()))))
}

/// Get pack by ID
pub async fn get_pack(
    State(state): State<AppState>,
    CurrentTenant(tenant): CurrentTenant,
    Path(id): Path<PackId>,
) -> Result<Json<ApiResponse<PackResponse>>, ApiError> {
    info!("API: Getting pack ID: {}", id);

    let pack = state
        .store
        .get_pack(&tenant, &id)
        .await?
        .ok_or_else(|| DomainError::NotFound(format!("pack {}", id)))?;
    Ok(Json(ApiResponse::success(pack.into())))
}

/// Rename or reprice a pack
pub async fn update_pack(
    State(state): State<AppState>,
    CurrentTenant(tenant): CurrentTenant,
    Path(id): Path<PackId>,
    Json(draft): Json<PackDraft>,
) -> Result<Json<ApiResponse<PackResponse>>, ApiError> {
    info!("API: Updating pack ID: {}", id);

    let pack = state.store.update_pack(&tenant, &id, draft).await?;
    Ok(Json(ApiResponse::success(pack.into())))
}

/// Delete an unreferenced pack
pub async fn delete_pack(
    State(state): State<AppState>,
    CurrentTenant(tenant): CurrentTenant,
    Path(id): Path<PackId>,
) -> Result<Json<ApiResponse<PackId>>, ApiError> {
    info!("API: Deleting pack ID: {}", id);

    state.store.delete_pack(&tenant, &id).await?;
    Ok(Json(ApiResponse::success(id)))
}

/// List connections ordered by name
pub async fn list_connections(
    State(state): State<AppState>,
    CurrentTenant(tenant): CurrentTenant,
) -> Result<Json<ApiResponse<Vec<ConnectionResponse>>>, ApiError> {
    info!("API: Listing connections for tenant {}", tenant);

    let connections = state.store.list_connections(&tenant).await?;
    Ok(Json(ApiResponse::success(
        connections.into_iter().map(Into::into).collect(),
    )))
}

/// Create a connection on an existing pack
pub async fn create_connection(
    State(state): State<AppState>,
    CurrentTenant(tenant): CurrentTenant,
    Json(req): Json<CreateConnectionRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ConnectionResponse>>), ApiError> {
    info!("API: Creating connection {} for tenant {}", req.profile.box_number, tenant);

    let new = NewConnection {
        id: ConnectionId::new(state.ids.next_id()),
        profile: req.profile,
        plan_id: req.plan_id,
    };
    let connection = state.store.create_connection(&tenant, new).await?;

    info!("API: Created connection {} (ID: {})", connection.box_number, connection.id);
    Ok((StatusCode::CREATED, Json(ApiResponse::success(connection.into()))))
}

/// Get connection by ID
pub async fn get_connection(
    State(state): State<AppState>,
    CurrentTenant(tenant): CurrentTenant,
    Path(id): Path<ConnectionId>,
) -> Result<Json<ApiResponse<ConnectionResponse>>, ApiError> {
    info!("API: Getting connection ID: {}", id);

    let connection = state
        .store
        .get_connection(&tenant, &id)
        .await?
        .ok_or_else(|| DomainError::NotFound(format!("connection {}", id)))?;
    Ok(Json(ApiResponse::success(connection.into())))
}

/// Get connection by box number
pub async fn get_connection_by_box(
    State(state): State<AppState>,
    CurrentTenant(tenant): CurrentTenant,
    Path(box_number): Path<String>,
) -> Result<Json<ApiResponse<ConnectionResponse>>, ApiError> {
    let box_number = normalize_box_number(&box_number);
    info!("API: Getting connection by box number: {}", box_number);

    let connection = state
        .store
        .find_by_box_number(&tenant, &box_number)
        .await?
        .ok_or_else(|| DomainError::NotFound(format!("box number {}", box_number)))?;
    Ok(Json(ApiResponse::success(connection.into())))
}

/// Edit name, phone, area or box number
pub async fn update_connection(
    State(state): State<AppState>,
    CurrentTenant(tenant): CurrentTenant,
    Path(id): Path<ConnectionId>,
    Json(profile): Json<ConnectionProfile>,
) -> Result<Json<ApiResponse<ConnectionResponse>>, ApiError> {
    info!("API: Updating connection ID: {}", id);

    let connection = state.store.update_profile(&tenant, &id, profile).await?;
    Ok(Json(ApiResponse::success(connection.into())))
}
