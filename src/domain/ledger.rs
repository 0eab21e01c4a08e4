//! Payment ledger: storage ports and the monthly-singleton rules
//!
//! Writes happen through a [`LedgerTx`] unit of work obtained from
//! [`BillingStore::begin`]. Nothing a unit writes is visible until
//! [`LedgerTx::commit`]; dropping it rolls everything back.
//!
//! [`PaymentLedger`] wraps a unit of work with the four ledger operations
//! (`has_payment_this_month`, `record`, `overwrite`, `delete_current_month`)
//! so the month rules live in one place.

use super::clock::{BillingCalendar, TimeWindow};
use super::connection::{Connection, ConnectionDirectory};
use super::payment::{Charge, Payment};
use super::plan::{BasePack, PlanCatalog, PlanSnapshot};
use super::shared::{ConnectionId, DomainError, IdGenerator, PackId, PaymentId, Result, TenantId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// New values for a connection's cached billing pointer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingPointer {
    /// `None` leaves the plan unchanged
    pub plan_id: Option<PackId>,
    pub last_payment_at: Option<DateTime<Utc>>,
}

/// One atomic unit of billing work
///
/// Implementations serialize units that touch the same connection: rows
/// returned by the `lock_*` methods stay locked until commit or drop.
#[async_trait]
pub trait LedgerTx: Send {
    async fn lock_connection(&mut self, tenant: &TenantId, id: &ConnectionId) -> Result<Option<Connection>>;

    /// Lock several connections; missing ids are skipped
    async fn lock_connections(&mut self, tenant: &TenantId, ids: &[ConnectionId]) -> Result<Vec<Connection>>;

    async fn get_pack(&mut self, tenant: &TenantId, id: &PackId) -> Result<Option<BasePack>>;

    async fn get_payment(&mut self, tenant: &TenantId, id: &PaymentId) -> Result<Option<Payment>>;

    /// Any payment of the connection whose date falls inside `window`
    async fn payment_in_window(
        &mut self,
        tenant: &TenantId,
        connection: &ConnectionId,
        window: TimeWindow,
    ) -> Result<Option<Payment>>;

    /// Most recent payment of the connection by date
    async fn latest_payment(&mut self, tenant: &TenantId, connection: &ConnectionId) -> Result<Option<Payment>>;

    /// A second row for the same connection and month fails with `TransactionConflict`
    async fn insert_payments(&mut self, payments: &[Payment]) -> Result<()>;

    async fn update_payment(&mut self, payment: &Payment) -> Result<()>;

    async fn delete_payment(&mut self, tenant: &TenantId, id: &PaymentId) -> Result<()>;

    async fn set_billing_pointer(
        &mut self,
        tenant: &TenantId,
        connections: &[ConnectionId],
        pointer: BillingPointer,
    ) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;
}

/// Read-only ledger queries used by reports and the bulk pre-check
#[async_trait]
pub trait LedgerReader: Send + Sync {
    /// Payments whose date falls inside `window`, oldest first
    async fn payments_between(&self, tenant: &TenantId, window: TimeWindow) -> Result<Vec<Payment>>;

    /// Payments of the given connections inside `window`
    async fn payments_for_connections_between(
        &self,
        tenant: &TenantId,
        connections: &[ConnectionId],
        window: TimeWindow,
    ) -> Result<Vec<Payment>>;

    /// Full history of one connection, newest first
    async fn payments_for_connection(&self, tenant: &TenantId, connection: &ConnectionId) -> Result<Vec<Payment>>;

    /// Latest payments across the tenant, newest first
    async fn recent_payments(&self, tenant: &TenantId, limit: usize) -> Result<Vec<Payment>>;
}

/// Everything the billing core needs from storage
#[async_trait]
pub trait BillingStore: PlanCatalog + ConnectionDirectory + LedgerReader {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>>;
}

/// Ledger operations over one unit of work
pub struct PaymentLedger<'a> {
    tx: &'a mut dyn LedgerTx,
    tenant: &'a TenantId,
    calendar: BillingCalendar,
    ids: &'a dyn IdGenerator,
}

impl<'a> PaymentLedger<'a> {
    pub fn new(
        tx: &'a mut dyn LedgerTx,
        tenant: &'a TenantId,
        calendar: BillingCalendar,
        ids: &'a dyn IdGenerator,
    ) -> Self {
        Self {
            tx,
            tenant,
            calendar,
            ids,
        }
    }

    /// The payment, if any, dated in `[startOfMonth(now), now]`
    pub async fn has_payment_this_month(
        &mut self,
        connection: &ConnectionId,
        now: DateTime<Utc>,
    ) -> Result<Option<Payment>> {
        let window = self.calendar.elapsed_this_month(now)?;
        self.tx.payment_in_window(self.tenant, connection, window).await
    }

    /// Append a new row dated `now`
    ///
    /// Callers check `has_payment_this_month` first; the store still rejects a
    /// second row for the month.
    pub async fn record(&mut self, connection: &ConnectionId, charge: Charge, now: DateTime<Utc>) -> Result<Payment> {
        let mut payments = self.record_batch(vec![(connection.clone(), charge)], now).await?;
        payments
            .pop()
            .ok_or_else(|| DomainError::Internal("ledger insert returned no row".to_string()))
    }

    /// Append one row per connection in a single write
    pub async fn record_batch(
        &mut self,
        entries: Vec<(ConnectionId, Charge)>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Payment>> {
        let billing_month = self.calendar.month_of(now);
        let payments: Vec<Payment> = entries
            .into_iter()
            .map(|(connection_id, charge)| {
                let (plan_at_charge, migrated_to, charged) = charge.into_parts();
                Payment {
                    id: PaymentId::new(self.ids.next_id()),
                    tenant_id: self.tenant.clone(),
                    connection_id,
                    billing_month,
                    date: now,
                    plan_at_charge,
                    is_migration: migrated_to.is_some(),
                    migrated_to,
                    charged,
                }
            })
            .collect();

        if !payments.is_empty() {
            self.tx.insert_payments(&payments).await?;
        }
        Ok(payments)
    }

    /// Fold a migration into this month's existing row
    pub async fn overwrite(&mut self, mut payment: Payment, migrated_to: PlanSnapshot, now: DateTime<Utc>) -> Result<Payment> {
        if !self.calendar.is_same_month(payment.date, now) {
            return Err(DomainError::Internal(format!(
                "payment {} is not from the current month",
                payment.id
            )));
        }

        payment.is_migration = true;
        payment.migrated_to = Some(migrated_to.pack_id.clone());
        payment.charged = migrated_to;
        payment.date = now;
        self.tx.update_payment(&payment).await?;
        Ok(payment)
    }

    /// Delete a row of the current month and return the connection's previous payment
    pub async fn delete_current_month(&mut self, payment: &Payment, now: DateTime<Utc>) -> Result<Option<Payment>> {
        if !self.calendar.is_same_month(payment.date, now) {
            return Err(DomainError::NotCurrentMonth);
        }

        self.tx.delete_payment(self.tenant, &payment.id).await?;
        self.tx.latest_payment(self.tenant, &payment.connection_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::BillingMonth;
    use crate::domain::shared::ids::MockIdGenerator;
    use crate::infrastructure::persistence::memory::MemoryBillingStore;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    fn sequential_ids() -> MockIdGenerator {
        let mut ids = MockIdGenerator::new();
        let mut n = 0;
        ids.expect_next_id().returning(move || {
            n += 1;
            format!("pay-{}", n)
        });
        ids
    }

    async fn store_with_connection() -> (MemoryBillingStore, TenantId, BasePack, Connection) {
        let store = MemoryBillingStore::new();
        let tenant = TenantId::new("t1");
        let pack = store.seed_pack(&tenant, "basic", 80, 100).await.unwrap();
        let conn = store
            .seed_connection(&tenant, "c1", "SMC0000000001", &pack.id)
            .await
            .unwrap();
        (store, tenant, pack, conn)
    }

    #[tokio::test]
    async fn test_record_then_found_this_month() {
        let (store, tenant, pack, conn) = store_with_connection().await;
        let ids = sequential_ids();
        let now = at(2026, 10, 16);

        let mut tx = store.begin().await.unwrap();
        let mut ledger = PaymentLedger::new(tx.as_mut(), &tenant, BillingCalendar::default(), &ids);
        assert!(ledger.has_payment_this_month(&conn.id, now).await.unwrap().is_none());

        let payment = ledger
            .record(&conn.id, Charge::Regular { plan: pack.snapshot() }, now)
            .await
            .unwrap();
        assert_eq!(payment.id, PaymentId::new("pay-1"));
        assert_eq!(payment.billing_month, BillingMonth::new(2026, 10).unwrap());
        assert!(!payment.is_migration);

        let found = ledger.has_payment_this_month(&conn.id, now).await.unwrap();
        assert_eq!(found.map(|p| p.id), Some(payment.id));
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_second_row_same_month_conflicts() {
        let (store, tenant, pack, conn) = store_with_connection().await;
        let ids = sequential_ids();
        let now = at(2026, 10, 16);

        let mut tx = store.begin().await.unwrap();
        let mut ledger = PaymentLedger::new(tx.as_mut(), &tenant, BillingCalendar::default(), &ids);
        ledger
            .record(&conn.id, Charge::Regular { plan: pack.snapshot() }, now)
            .await
            .unwrap();
        let err = ledger
            .record(&conn.id, Charge::Regular { plan: pack.snapshot() }, at(2026, 10, 20))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_overwrite_keeps_plan_at_charge() {
        let (store, tenant, pack, conn) = store_with_connection().await;
        let premium = store.seed_pack(&tenant, "premium", 250, 300).await.unwrap();
        let ids = sequential_ids();

        let mut tx = store.begin().await.unwrap();
        let mut ledger = PaymentLedger::new(tx.as_mut(), &tenant, BillingCalendar::default(), &ids);
        let paid = ledger
            .record(&conn.id, Charge::Regular { plan: pack.snapshot() }, at(2026, 10, 2))
            .await
            .unwrap();
        let migrated = ledger
            .overwrite(paid.clone(), premium.snapshot(), at(2026, 10, 16))
            .await
            .unwrap();

        assert_eq!(migrated.id, paid.id);
        assert_eq!(migrated.plan_at_charge, pack.id);
        assert_eq!(migrated.migrated_to, Some(premium.id.clone()));
        assert!(migrated.is_migration);
        assert_eq!(migrated.price_charged(), 300);
        assert_eq!(migrated.date, at(2026, 10, 16));
    }

    #[tokio::test]
    async fn test_delete_rejects_past_month() {
        let (store, tenant, pack, conn) = store_with_connection().await;
        let ids = sequential_ids();

        let mut tx = store.begin().await.unwrap();
        let mut ledger = PaymentLedger::new(tx.as_mut(), &tenant, BillingCalendar::default(), &ids);
        let september = ledger
            .record(&conn.id, Charge::Regular { plan: pack.snapshot() }, at(2026, 9, 10))
            .await
            .unwrap();
        let err = ledger
            .delete_current_month(&september, at(2026, 10, 1))
            .await
            .unwrap_err();
        assert_eq!(err, DomainError::NotCurrentMonth);
    }

    #[tokio::test]
    async fn test_delete_returns_previous_payment() {
        let (store, tenant, pack, conn) = store_with_connection().await;
        let ids = sequential_ids();

        let mut tx = store.begin().await.unwrap();
        let mut ledger = PaymentLedger::new(tx.as_mut(), &tenant, BillingCalendar::default(), &ids);
        let september = ledger
            .record(&conn.id, Charge::Regular { plan: pack.snapshot() }, at(2026, 9, 10))
            .await
            .unwrap();
        let october = ledger
            .record(&conn.id, Charge::Regular { plan: pack.snapshot() }, at(2026, 10, 5))
            .await
            .unwrap();

        let previous = ledger
            .delete_current_month(&october, at(2026, 10, 16))
            .await
            .unwrap();
        assert_eq!(previous.map(|p| p.id), Some(september.id.clone()));

        let previous = ledger
            .delete_current_month(&september, at(2026, 9, 30))
            .await
            .unwrap();
        assert!(previous.is_none());
    }
}
