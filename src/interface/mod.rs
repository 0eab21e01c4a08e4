//! Interface layer - External interfaces
//!
//! This layer handles:
//! - REST API endpoints
//! - Tenant resolution per request
//! - Request/response formatting and error mapping

pub mod api;
