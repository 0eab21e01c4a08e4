//! HTTP API over the billing core

pub mod billing_handler;
pub mod catalog_handler;
pub mod dto;
pub mod error;
pub mod metrics_handler;
pub mod report_handler;
pub mod router;
pub mod state;
pub mod tenant;

pub use error::ApiError;
pub use metrics_handler::{describe_metrics, init_metrics};
pub use router::build_router;
pub use state::AppState;
pub use tenant::{CurrentTenant, HeaderTenantResolver, TenantResolver, TENANT_HEADER};
