//! Tenant resolution for incoming requests

use super::error::ApiError;
use super::state::AppState;
use crate::domain::shared::TenantId;
use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;

pub const TENANT_HEADER: &str = "x-tenant-id";

/// Maps an authenticated request onto the tenant it acts for
#[cfg_attr(test, mockall::automock)]
pub trait TenantResolver: Send + Sync {
    fn resolve(&self, headers: &HeaderMap) -> Option<TenantId>;
}

/// Reads the tenant id from the `x-tenant-id` header
///
/// Meant to sit behind an authenticating proxy that sets the header.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeaderTenantResolver;

impl TenantResolver for HeaderTenantResolver {
    fn resolve(&self, headers: &HeaderMap) -> Option<TenantId> {
        headers
            .get(TENANT_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(TenantId::new)
    }
}

/// Extractor for the tenant of the current request
#[derive(Debug, Clone)]
pub struct CurrentTenant(pub TenantId);

#[async_trait]
impl FromRequestParts<AppState> for CurrentTenant {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        state
            .tenants
            .resolve(&parts.headers)
            .map(CurrentTenant)
            .ok_or(ApiError::Unauthorized)
    }
}
