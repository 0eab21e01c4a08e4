//! Application layer - Use cases and application services
//!
//! This layer orchestrates domain objects to fulfill use cases.
//! It's responsible for:
//! - Unit-of-work boundaries and conflict retries
//! - The billing state machine per connection and month
//! - Read-only report projections

pub mod billing;
pub mod reports;

pub use billing::{
    BillingEngine, BulkChargeReport, BulkEntry, ChargeReceipt, DeletionReceipt, MigrationReceipt,
};
pub use reports::{
    DashboardSummary, MigrationGroup, MonthlyStatement, RecentPayment, ReportProjection,
    RevenueSummary, StatementLine,
};
