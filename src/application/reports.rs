//! Read-only projections over the ledger and the connection directory

use crate::domain::clock::{BillingCalendar, BillingMonth, Clock};
use crate::domain::connection::{Connection, ConnectionDirectory};
use crate::domain::ledger::{BillingStore, LedgerReader};
use crate::domain::payment::Payment;
use crate::domain::plan::PlanCatalog;
use crate::domain::shared::{AreaId, ConnectionId, DomainError, PackId, Result, TenantId};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// A connection counts as active if it paid within this many days
pub const ACTIVE_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatementLine {
    pub connection_id: ConnectionId,
    pub name: String,
    pub box_number: String,
    pub area_id: AreaId,
    pub pack_name: String,
    pub amount: i64,
    pub paid_at: Option<DateTime<Utc>>,
}

impl StatementLine {
    fn paid(connection: &Connection, payment: &Payment) -> Self {
        Self {
            connection_id: connection.id.clone(),
            name: connection.name.clone(),
            box_number: connection.box_number.clone(),
            area_id: connection.area_id.clone(),
            pack_name: payment.charged.name.clone(),
            amount: payment.price_charged(),
            paid_at: Some(payment.date),
        }
    }

    fn unpaid(connection: &Connection, pack_name: String, amount: i64) -> Self {
        Self {
            connection_id: connection.id.clone(),
            name: connection.name.clone(),
            box_number: connection.box_number.clone(),
            area_id: connection.area_id.clone(),
            pack_name,
            amount,
            paid_at: connection.last_payment_at,
        }
    }
}

/// Migrations of one month that landed on the same pack
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationGroup {
    pub pack_name: String,
    pub connections: Vec<StatementLine>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonthlyStatement {
    pub month: BillingMonth,
    pub label: String,
    pub paid: Vec<StatementLine>,
    pub migrated: Vec<MigrationGroup>,
    pub unpaid: Vec<StatementLine>,
    /// Unpaid connections whose last payment was in the previous month
    pub lapsed: Vec<StatementLine>,
    pub total_collected: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevenueSummary {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub payments: usize,
    pub migrations: usize,
    pub customer_total: i64,
    pub operator_total: i64,
    pub margin: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardSummary {
    pub month: BillingMonth,
    pub total_connections: usize,
    pub active_connections: usize,
    pub overdue_connections: usize,
    pub payments_this_month: usize,
    pub revenue_this_month: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecentPayment {
    #[serde(flatten)]
    pub payment: Payment,
    pub connection_name: String,
    pub box_number: String,
}

pub struct ReportProjection {
    store: Arc<dyn BillingStore>,
    clock: Arc<dyn Clock>,
    calendar: BillingCalendar,
}

impl ReportProjection {
    pub fn new(store: Arc<dyn BillingStore>, clock: Arc<dyn Clock>, calendar: BillingCalendar) -> Self {
        Self { store, clock, calendar }
    }

    pub fn current_month(&self) -> BillingMonth {
        self.calendar.month_of(self.clock.now())
    }

    /// Paid, migrated, unpaid and lapsed connections for one month
    pub async fn monthly_statement(&self, tenant: &TenantId, month: BillingMonth) -> Result<MonthlyStatement> {
        debug!("Building statement for tenant {} month {}", tenant, month);

        let previous_month = month.previous().ok_or_else(|| {
            DomainError::ValidationError(format!("Month {} is outside the supported calendar", month))
        })?;
        let this_window = self.calendar.window(month)?;
        let previous_window = self.calendar.window(previous_month)?;

        let (connections, payments, previous, usage) = futures::try_join!(
            self.store.list_connections(tenant),
            self.store.payments_between(tenant, this_window),
            self.store.payments_between(tenant, previous_window),
            self.store.list_packs(tenant),
        )?;
        let previous_payers: HashSet<ConnectionId> = previous.into_iter().map(|p| p.connection_id).collect();
        let packs: HashMap<PackId, (String, i64)> = usage
            .into_iter()
            .map(|u| (u.pack.id, (u.pack.name, u.pack.customer_price)))
            .collect();

        let by_connection: HashMap<&ConnectionId, &Payment> =
            payments.iter().map(|p| (&p.connection_id, p)).collect();

        let mut paid = Vec::new();
        let mut migrated: BTreeMap<String, Vec<StatementLine>> = BTreeMap::new();
        let mut unpaid = Vec::new();
        let mut lapsed = Vec::new();

        for connection in &connections {
            match by_connection.get(&connection.id) {
                Some(payment) if payment.is_migration => migrated
                    .entry(payment.charged.name.clone())
                    .or_default()
                    .push(StatementLine::paid(connection, payment)),
                Some(payment) => paid.push(StatementLine::paid(connection, payment)),
                None => {
                    let (pack_name, amount) = packs
                        .get(&connection.current_plan_id)
                        .cloned()
                        .unwrap_or_else(|| (connection.current_plan_id.to_string(), 0));
                    let line = StatementLine::unpaid(connection, pack_name, amount);
                    if previous_payers.contains(&connection.id) {
                        lapsed.push(line.clone());
                    }
                    unpaid.push(line);
                }
            }
        }

        Ok(MonthlyStatement {
            month,
            label: month.label(),
            total_collected: payments.iter().map(Payment::price_charged).sum(),
            paid,
            migrated: migrated
                .into_iter()
                .map(|(pack_name, connections)| MigrationGroup { pack_name, connections })
                .collect(),
            unpaid,
            lapsed,
        })
    }

    /// Totals for payments dated within the calendar days `from..=to`
    pub async fn revenue(&self, tenant: &TenantId, from: NaiveDate, to: NaiveDate) -> Result<RevenueSummary> {
        if from > to {
            return Err(DomainError::ValidationError(
                "Start date must not be after end date".to_string(),
            ));
        }

        let payments = self.store.payments_between(tenant, self.calendar.days(from, to)?).await?;
        let customer_total: i64 = payments.iter().map(|p| p.charged.customer_price).sum();
        let operator_total: i64 = payments.iter().map(|p| p.charged.operator_price).sum();

        Ok(RevenueSummary {
            from,
            to,
            payments: payments.len(),
            migrations: payments.iter().filter(|p| p.is_migration).count(),
            customer_total,
            operator_total,
            margin: customer_total - operator_total,
        })
    }

    /// A connection's payments, newest first
    pub async fn payment_history(&self, tenant: &TenantId, connection_id: &ConnectionId) -> Result<Vec<Payment>> {
        if self.store.get_connection(tenant, connection_id).await?.is_none() {
            return Err(DomainError::NotFound(format!("connection {}", connection_id)));
        }
        self.store.payments_for_connection(tenant, connection_id).await
    }

    pub async fn dashboard(&self, tenant: &TenantId) -> Result<DashboardSummary> {
        let now = self.clock.now();
        let elapsed = self.calendar.elapsed_this_month(now)?;
        let (connections, this_month) = futures::try_join!(
            self.store.list_connections(tenant),
            self.store.payments_between(tenant, elapsed),
        )?;

        let active_since = now - Duration::days(ACTIVE_WINDOW_DAYS);
        let active = connections
            .iter()
            .filter(|c| c.last_payment_at.map_or(false, |at| at >= active_since))
            .count();

        Ok(DashboardSummary {
            month: self.calendar.month_of(now),
            total_connections: connections.len(),
            active_connections: active,
            overdue_connections: connections.len() - active,
            payments_this_month: this_month.len(),
            revenue_this_month: this_month.iter().map(Payment::price_charged).sum(),
        })
    }

    pub async fn recent_payments(&self, tenant: &TenantId, limit: usize) -> Result<Vec<RecentPayment>> {
        let payments = self.store.recent_payments(tenant, limit).await?;
        let connections: HashMap<ConnectionId, Connection> = self
            .store
            .list_connections(tenant)
            .await?
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();

        Ok(payments
            .into_iter()
            .map(|payment| {
                let (connection_name, box_number) = connections
                    .get(&payment.connection_id)
                    .map(|c| (c.name.clone(), c.box_number.clone()))
                    .unwrap_or_default();
                RecentPayment {
                    payment,
                    connection_name,
                    box_number,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::billing::BillingEngine;
    use crate::domain::clock::FixedClock;
    use crate::domain::shared::NanoIdGenerator;
    use crate::infrastructure::persistence::MemoryBillingStore;
    use chrono::{Datelike, TimeZone};

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    struct Fixture {
        clock: Arc<FixedClock>,
        engine: BillingEngine,
        reports: ReportProjection,
        tenant: TenantId,
    }

    /// Four connections on BASIC; PREMIUM available for migrations
    async fn fixture(now: DateTime<Utc>) -> Fixture {
        let store = MemoryBillingStore::new();
        let tenant = TenantId::new("t1");
        let basic = store.seed_pack(&tenant, "basic", 80, 100).await.unwrap();
        store.seed_pack(&tenant, "premium", 250, 300).await.unwrap();
        for n in 1..=4 {
            store
                .seed_connection(&tenant, &format!("c{}", n), &format!("SMC000000000{}", n), &basic.id)
                .await
                .unwrap();
        }

        let clock = Arc::new(FixedClock::new(now));
        let store: Arc<dyn BillingStore> = Arc::new(store);
        let calendar = BillingCalendar::default();
        Fixture {
            engine: BillingEngine::new(store.clone(), clock.clone(), calendar, Arc::new(NanoIdGenerator)),
            reports: ReportProjection::new(store, clock.clone(), calendar),
            clock,
            tenant,
        }
    }

    #[tokio::test]
    async fn test_monthly_statement_partitions() {
        let f = fixture(at(2026, 9, 10)).await;
        let c = |n: u32| ConnectionId::new(format!("c{}", n));

        // September: c1 and c2 pay
        f.engine.charge_now(&f.tenant, &c(1)).await.unwrap();
        f.engine.charge_now(&f.tenant, &c(2)).await.unwrap();

        // October: c1 pays, c3 migrates, c2 and c4 do not pay
        f.clock.set(at(2026, 10, 5));
        f.engine.charge_now(&f.tenant, &c(1)).await.unwrap();
        f.engine
            .migrate_plan(&f.tenant, &c(3), &PackId::new("premium"))
            .await
            .unwrap();

        let statement = f
            .reports
            .monthly_statement(&f.tenant, BillingMonth::new(2026, 10).unwrap())
            .await
            .unwrap();

        assert_eq!(statement.label, "Oct-2026");
        assert_eq!(statement.paid.len(), 1);
        assert_eq!(statement.paid[0].connection_id, c(1));
        assert_eq!(statement.migrated.len(), 1);
        assert_eq!(statement.migrated[0].pack_name, "PREMIUM");
        assert_eq!(statement.migrated[0].connections[0].amount, 300);
        let unpaid: Vec<_> = statement.unpaid.iter().map(|l| l.connection_id.clone()).collect();
        assert_eq!(unpaid, vec![c(2), c(4)]);
        assert_eq!(statement.lapsed.len(), 1);
        assert_eq!(statement.lapsed[0].connection_id, c(2));
        assert_eq!(statement.total_collected, 400);
    }

    #[tokio::test]
    async fn test_revenue_and_dashboard() {
        let f = fixture(at(2026, 10, 2)).await;
        f.engine.charge_now(&f.tenant, &ConnectionId::new("c1")).await.unwrap();
        f.engine
            .migrate_plan(&f.tenant, &ConnectionId::new("c2"), &PackId::new("premium"))
            .await
            .unwrap();

        let from = NaiveDate::from_ymd_opt(2026, 10, 1).unwrap();
        let to = NaiveDate::from_ymd_opt(2026, 10, 31).unwrap();
        let revenue = f.reports.revenue(&f.tenant, from, to).await.unwrap();
        assert_eq!(revenue.payments, 2);
        assert_eq!(revenue.migrations, 1);
        assert_eq!(revenue.customer_total, 400);
        assert_eq!(revenue.operator_total, 330);
        assert_eq!(revenue.margin, 70);
        assert!(f.reports.revenue(&f.tenant, to, from).await.is_err());

        f.clock.set(at(2026, 10, 20));
        let dashboard = f.reports.dashboard(&f.tenant).await.unwrap();
        assert_eq!(dashboard.total_connections, 4);
        assert_eq!(dashboard.active_connections, 2);
        assert_eq!(dashboard.overdue_connections, 2);
        assert_eq!(dashboard.revenue_this_month, 400);
    }

    #[tokio::test]
    async fn test_reports_at_calendar_edges_are_rejected() {
        let f = fixture(at(2026, 10, 2)).await;

        let last = BillingMonth::new(NaiveDate::MAX.year(), 12).unwrap();
        let err = f.reports.monthly_statement(&f.tenant, last).await.unwrap_err();
        assert!(matches!(err, DomainError::ValidationError(_)));

        let first = BillingMonth::new(NaiveDate::MIN.year(), 1).unwrap();
        let err = f.reports.monthly_statement(&f.tenant, first).await.unwrap_err();
        assert!(matches!(err, DomainError::ValidationError(_)));

        let from = NaiveDate::from_ymd_opt(2026, 10, 1).unwrap();
        let err = f.reports.revenue(&f.tenant, from, NaiveDate::MAX).await.unwrap_err();
        assert!(matches!(err, DomainError::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_history_of_unknown_connection() {
        let f = fixture(at(2026, 10, 2)).await;
        let err = f
            .reports
            .payment_history(&f.tenant, &ConnectionId::new("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_recent_payments_newest_first() {
        let f = fixture(at(2026, 10, 2)).await;
        f.engine.charge_now(&f.tenant, &ConnectionId::new("c1")).await.unwrap();
        f.clock.set(at(2026, 10, 3));
        f.engine.charge_now(&f.tenant, &ConnectionId::new("c2")).await.unwrap();

        let recent = f.reports.recent_payments(&f.tenant, 1).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].connection_name, "CUSTOMER C2");
        assert_eq!(recent[0].box_number, "SMC0000000002");
    }
}
