//! Mapping of domain failures onto HTTP responses

use super::dto::ApiResponse;
use crate::domain::shared::DomainError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{error, warn};

const NOT_FOUND_MESSAGE: &str = "Resource not found";
const RETRY_MESSAGE: &str = "Something went wrong, please try again";
const INTERNAL_MESSAGE: &str = "Internal server error";

/// Error returned by every billing handler
#[derive(Debug)]
pub enum ApiError {
    Domain(DomainError),
    /// No tenant could be resolved for the request
    Unauthorized,
}

impl From<DomainError> for ApiError {
    fn from(e: DomainError) -> Self {
        ApiError::Domain(e)
    }
}

impl ApiError {
    /// Status code and the message shown to the caller
    ///
    /// Validation-class errors keep their text; `NotFound` stays generic so a
    /// caller cannot discover other tenants' records.
    pub fn status_and_message(&self) -> (StatusCode, String) {
        let e = match self {
            ApiError::Unauthorized => {
                return (StatusCode::UNAUTHORIZED, "Missing tenant".to_string());
            }
            ApiError::Domain(e) => e,
        };

        match e {
            DomainError::NotFound(_) => (StatusCode::NOT_FOUND, NOT_FOUND_MESSAGE.to_string()),
            DomainError::AlreadyExists(_) | DomainError::InUse(_) => (StatusCode::CONFLICT, e.to_string()),
            DomainError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            _ if e.is_user_facing() => (StatusCode::BAD_REQUEST, e.to_string()),
            DomainError::Unavailable(_) | DomainError::TransactionConflict(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, RETRY_MESSAGE.to_string())
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_MESSAGE.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();
        match &self {
            ApiError::Domain(e) if status.is_server_error() => error!("API: request failed: {}", e),
            ApiError::Domain(e) => warn!("API: request rejected ({}): {}", e.kind(), e),
            ApiError::Unauthorized => warn!("API: request without tenant"),
        }

        (status, Json(ApiResponse::<()>::error(message))).into_response()
    }
}
