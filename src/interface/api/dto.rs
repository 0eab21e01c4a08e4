//! Billing API DTOs

use crate::application::{ChargeReceipt, MigrationReceipt, RecentPayment};
use crate::domain::clock::BillingMonth;
use crate::domain::connection::{Connection, ConnectionProfile};
use crate::domain::payment::Payment;
use crate::domain::plan::{BasePack, PackUsage};
use crate::domain::shared::{AreaId, ConnectionId, PackId, PaymentId};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Generic API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

/// Pack response
#[derive(Debug, Serialize, Deserialize)]
pub struct PackResponse {
    pub id: PackId,
    pub name: String,
    pub operator_price: i64,
    pub customer_price: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connections: Option<i64>,
}

impl From<BasePack> for PackResponse {
    fn from(pack: BasePack) -> Self {
        PackResponse {
            id: pack.id,
            name: pack.name,
            operator_price: pack.operator_price,
            customer_price: pack.customer_price,
            connections: None,
        }
    }
}

impl From<PackUsage> for PackResponse {
    fn from(usage: PackUsage) -> Self {
        PackResponse {
            connections: Some(usage.connections),
            ..usage.pack.into()
        }
    }
}

/// Connection response
#[derive(Debug, Serialize, Deserialize)]
pub struct ConnectionResponse {
    pub id: ConnectionId,
    pub box_number: String,
    pub name: String,
    pub phone: Option<String>,
    pub area_id: AreaId,
    pub current_plan_id: PackId,
    pub last_payment_at: Option<DateTime<Utc>>,
}

impl From<Connection> for ConnectionResponse {
    fn from(c: Connection) -> Self {
        ConnectionResponse {
            id: c.id,
            box_number: c.box_number,
            name: c.name,
            phone: c.phone,
            area_id: c.area_id,
            current_plan_id: c.current_plan_id,
            last_payment_at: c.last_payment_at,
        }
    }
}

/// Payment response
#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentResponse {
    pub id: PaymentId,
    pub connection_id: ConnectionId,
    pub billing_month: BillingMonth,
    pub date: DateTime<Utc>,
    pub plan_at_charge: PackId,
    pub migrated_to: Option<PackId>,
    pub is_migration: bool,
    pub pack_id: PackId,
    pub pack_name: String,
    pub operator_price: i64,
    pub price_charged: i64,
}

impl From<Payment> for PaymentResponse {
    fn from(p: Payment) -> Self {
        PaymentResponse {
            id: p.id,
            connection_id: p.connection_id,
            billing_month: p.billing_month,
            date: p.date,
            plan_at_charge: p.plan_at_charge,
            migrated_to: p.migrated_to,
            is_migration: p.is_migration,
            pack_id: p.charged.pack_id,
            pack_name: p.charged.name,
            operator_price: p.charged.operator_price,
            price_charged: p.charged.customer_price,
        }
    }
}

/// Receipt of a regular charge
#[derive(Debug, Serialize, Deserialize)]
pub struct ChargeResponse {
    pub payment: PaymentResponse,
    pub connection_name: String,
    pub box_number: String,
}

impl From<ChargeReceipt> for ChargeResponse {
    fn from(r: ChargeReceipt) -> Self {
        ChargeResponse {
            payment: r.payment.into(),
            connection_name: r.connection_name,
            box_number: r.box_number,
        }
    }
}

/// Receipt of a plan migration
#[derive(Debug, Serialize, Deserialize)]
pub struct MigrationResponse {
    pub payment: PaymentResponse,
    pub plan: PackResponse,
    pub connection_name: String,
    pub overwritten: bool,
}

impl From<MigrationReceipt> for MigrationResponse {
    fn from(r: MigrationReceipt) -> Self {
        MigrationResponse {
            payment: r.payment.into(),
            plan: r.plan.into(),
            connection_name: r.connection_name,
            overwritten: r.overwritten,
        }
    }
}

/// Recent payment with the connection it belongs to
#[derive(Debug, Serialize, Deserialize)]
pub struct RecentPaymentResponse {
    #[serde(flatten)]
    pub payment: PaymentResponse,
    pub connection_name: String,
    pub box_number: String,
}

impl From<RecentPayment> for RecentPaymentResponse {
    fn from(r: RecentPayment) -> Self {
        RecentPaymentResponse {
            payment: r.payment.into(),
            connection_name: r.connection_name,
            box_number: r.box_number,
        }
    }
}

/// Create connection request
#[derive(Debug, Deserialize)]
pub struct CreateConnectionRequest {
    #[serde(flatten)]
    pub profile: ConnectionProfile,
    #[serde(alias = "basePack", alias = "plan")]
    pub plan_id: PackId,
}

/// Plan migration request
#[derive(Debug, Deserialize)]
pub struct MigratePlanRequest {
    #[serde(alias = "pack", alias = "to_plan_id")]
    pub to: PackId,
}

/// Bulk charge request
#[derive(Debug, Deserialize)]
pub struct BulkChargeRequest {
    #[serde(default, alias = "smcs")]
    pub box_numbers: Vec<String>,
}

/// Query parameters for the monthly statement; defaults to the current month
#[derive(Debug, Deserialize)]
pub struct MonthlyQuery {
    pub month: Option<String>,
}

/// Query parameters for the revenue summary (inclusive calendar days)
#[derive(Debug, Deserialize)]
pub struct RevenueQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

/// Query parameters for recent payments
#[derive(Debug, Deserialize)]
pub struct RecentPaymentsQuery {
    #[serde(default = "default_recent_limit")]
    pub limit: usize,
}

pub const MAX_RECENT_LIMIT: usize = 100;

fn default_recent_limit() -> usize {
    10
}
