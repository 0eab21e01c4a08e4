//! Payment ledger entries

use super::clock::BillingMonth;
use super::plan::PlanSnapshot;
use super::shared::{ConnectionId, PackId, PaymentId, TenantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One billing event for a connection in one calendar month
///
/// A migration folds into the month's event instead of adding a second row,
/// so `(connection_id, billing_month)` is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub tenant_id: TenantId,
    pub connection_id: ConnectionId,
    pub billing_month: BillingMonth,
    pub date: DateTime<Utc>,
    /// Plan the connection was on when the event was first recorded
    pub plan_at_charge: PackId,
    /// Target plan; set iff `is_migration`
    pub migrated_to: Option<PackId>,
    pub is_migration: bool,
    /// Plan actually paid for, frozen at the time of the operation
    pub charged: PlanSnapshot,
}

impl Payment {
    pub fn price_charged(&self) -> i64 {
        self.charged.customer_price
    }

    /// Plan the connection is on after this event
    pub fn resulting_plan(&self) -> &PackId {
        self.migrated_to.as_ref().unwrap_or(&self.plan_at_charge)
    }
}

/// What a new ledger row is for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Charge {
    /// Pay for the plan the connection is already on
    Regular { plan: PlanSnapshot },
    /// Move to `to` and settle the month for it
    Migration { from: PackId, to: PlanSnapshot },
}

impl Charge {
    pub(crate) fn into_parts(self) -> (PackId, Option<PackId>, PlanSnapshot) {
        match self {
            Charge::Regular { plan } => (plan.pack_id.clone(), None, plan),
            Charge::Migration { from, to } => (from, Some(to.pack_id.clone()), to),
        }
    }
}
