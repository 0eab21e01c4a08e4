//! Billing engine: charge, migrate, delete and bulk-charge use cases
//!
//! Every operation runs as one unit of work from [`BillingStore::begin`]:
//! lock the connection row(s), read the ledger, decide, write the ledger and
//! the connection's cached pointer, commit. A `TransactionConflict` replays
//! the whole unit with fresh state, up to `max_attempts` times.

use crate::domain::clock::{BillingCalendar, Clock};
use crate::domain::connection::{Connection, ConnectionDirectory};
use crate::domain::ledger::{BillingPointer, BillingStore, LedgerReader, LedgerTx, PaymentLedger};
use crate::domain::payment::{Charge, Payment};
use crate::domain::plan::{BasePack, PlanSnapshot};
use crate::domain::shared::{
    normalize_box_number, ConnectionId, DomainError, IdGenerator, PackId, PaymentId, Result, TenantId,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Result of `charge_now`
#[derive(Debug, Clone, Serialize)]
pub struct ChargeReceipt {
    pub payment: Payment,
    pub connection_name: String,
    pub box_number: String,
}

/// Result of `migrate_plan`
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReceipt {
    pub payment: Payment,
    /// The target plan as it was when the migration was applied
    pub plan: BasePack,
    pub connection_name: String,
    /// True when an existing same-month payment was overwritten
    pub overwritten: bool,
}

/// Where the connection's pointer ended up after `delete_payment`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletionReceipt {
    pub payment_id: PaymentId,
    pub connection_id: ConnectionId,
    pub current_plan_id: PackId,
    pub last_payment_at: Option<DateTime<Utc>>,
}

/// One line of a bulk charge report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkEntry {
    pub connection_id: ConnectionId,
    pub name: String,
    pub box_number: String,
}

impl From<&Connection> for BulkEntry {
    fn from(c: &Connection) -> Self {
        Self {
            connection_id: c.id.clone(),
            name: c.name.clone(),
            box_number: c.box_number.clone(),
        }
    }
}

/// Outcome of `bulk_charge`; every list follows input order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkChargeReport {
    pub charged: Vec<BulkEntry>,
    pub skipped: Vec<BulkEntry>,
    /// Box numbers that match no connection of the tenant
    pub unmatched: Vec<String>,
}

/// Trim, upper-case and de-duplicate box numbers, keeping first occurrence
pub fn normalize_batch(box_numbers: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    box_numbers
        .iter()
        .map(|raw| normalize_box_number(raw))
        .filter(|b| !b.is_empty())
        .filter(|b| seen.insert(b.clone()))
        .collect()
}

/// The only writer of payments and of the connections' billing pointer
pub struct BillingEngine {
    store: Arc<dyn BillingStore>,
    clock: Arc<dyn Clock>,
    calendar: BillingCalendar,
    ids: Arc<dyn IdGenerator>,
    max_attempts: u32,
}

impl BillingEngine {
    pub fn new(
        store: Arc<dyn BillingStore>,
        clock: Arc<dyn Clock>,
        calendar: BillingCalendar,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            store,
            clock,
            calendar,
            ids,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn calendar(&self) -> BillingCalendar {
        self.calendar
    }

    /// Pay this month's bill for the connection's current plan
    pub async fn charge_now(&self, tenant: &TenantId, connection_id: &ConnectionId) -> Result<ChargeReceipt> {
        self.with_retry("charge_now", || self.charge_once(tenant, connection_id))
            .await
    }

    /// Move the connection to another plan and settle this month for it
    pub async fn migrate_plan(
        &self,
        tenant: &TenantId,
        connection_id: &ConnectionId,
        to: &PackId,
    ) -> Result<MigrationReceipt> {
        self.with_retry("migrate_plan", || self.migrate_once(tenant, connection_id, to))
            .await
    }

    /// Delete a payment of the current month and roll the pointer back
    pub async fn delete_payment(&self, tenant: &TenantId, payment_id: &PaymentId) -> Result<DeletionReceipt> {
        self.with_retry("delete_payment", || self.delete_once(tenant, payment_id))
            .await
    }

    /// Charge every listed box that has not paid this month
    pub async fn bulk_charge(&self, tenant: &TenantId, box_numbers: &[String]) -> Result<BulkChargeReport> {
        let requested = normalize_batch(box_numbers);
        self.with_retry("bulk_charge", || self.bulk_once(tenant, &requested))
            .await
    }

    async fn with_retry<T, F, Fut>(&self, operation: &'static str, mut unit: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        let outcome = loop {
            match unit().await {
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    warn!(
                        "{} hit a transaction conflict (attempt {}/{}): {}",
                        operation, attempt, self.max_attempts, e
                    );
                    counter!("billing_transaction_retries_total", "operation" => operation).increment(1);
                    attempt += 1;
                }
                Err(e) if e.is_retryable() => {
                    warn!("{} gave up after {} attempts: {}", operation, attempt, e);
                    break Err(DomainError::Unavailable(format!(
                        "{} could not be completed, please try again",
                        operation
                    )));
                }
                other => break other,
            }
        };

        let label = match &outcome {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        counter!("billing_operations_total", "operation" => operation, "outcome" => label).increment(1);
        outcome
    }

    async fn charge_once(&self, tenant: &TenantId, connection_id: &ConnectionId) -> Result<ChargeReceipt> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        let connection = tx
            .lock_connection(tenant, connection_id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("connection {}", connection_id)))?;
        let plan = tx
            .get_pack(tenant, &connection.current_plan_id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("pack {}", connection.current_plan_id)))?;

        let mut ledger = PaymentLedger::new(tx.as_mut(), tenant, self.calendar, self.ids.as_ref());
        if ledger.has_payment_this_month(&connection.id, now).await?.is_some() {
            return Err(DomainError::AlreadyPaid);
        }
        let payment = ledger
            .record(&connection.id, Charge::Regular { plan: plan.snapshot() }, now)
            .await?;

        tx.set_billing_pointer(
            tenant,
            std::slice::from_ref(&connection.id),
            BillingPointer {
                plan_id: None,
                last_payment_at: Some(now),
            },
        )
        .await?;
        tx.commit().await?;

        info!(
            "Charged connection {} ({}) {} for {}",
            connection.id, connection.box_number, payment.charged.customer_price, payment.billing_month
        );
        Ok(ChargeReceipt {
            payment,
            connection_name: connection.name,
            box_number: connection.box_number,
        })
    }

    async fn migrate_once(
        &self,
        tenant: &TenantId,
        connection_id: &ConnectionId,
        to: &PackId,
    ) -> Result<MigrationReceipt> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        let connection = tx
            .lock_connection(tenant, connection_id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("connection {}", connection_id)))?;
        let target = tx
            .get_pack(tenant, to)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("pack {}", to)))?;
        if &connection.current_plan_id == to {
            return Err(DomainError::SamePlan);
        }

        let mut ledger = PaymentLedger::new(tx.as_mut(), tenant, self.calendar, self.ids.as_ref());
        let (payment, overwritten) = match ledger.has_payment_this_month(&connection.id, now).await? {
            Some(existing) if existing.migrated_to.as_ref() == Some(to) => {
                return Err(DomainError::SamePlan);
            }
            Some(existing) => {
                debug!("Folding migration into payment {}", existing.id);
                (ledger.overwrite(existing, target.snapshot(), now).await?, true)
            }
            None => {
                let charge = Charge::Migration {
                    from: connection.current_plan_id.clone(),
                    to: target.snapshot(),
                };
                (ledger.record(&connection.id, charge, now).await?, false)
            }
        };

        tx.set_billing_pointer(
            tenant,
            std::slice::from_ref(&connection.id),
            BillingPointer {
                plan_id: Some(target.id.clone()),
                last_payment_at: Some(now),
            },
        )
        .await?;
        tx.commit().await?;

        info!(
            "Migrated connection {} from {} to {}",
            connection.id, connection.current_plan_id, target.id
        );
        Ok(MigrationReceipt {
            payment,
            plan: target,
            connection_name: connection.name,
            overwritten,
        })
    }

    async fn delete_once(&self, tenant: &TenantId, payment_id: &PaymentId) -> Result<DeletionReceipt> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let not_found = || DomainError::NotFound(format!("payment {}", payment_id));

        let connection_id = tx
            .get_payment(tenant, payment_id)
            .await?
            .ok_or_else(not_found)?
            .connection_id;
        tx.lock_connection(tenant, &connection_id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("connection {}", connection_id)))?;
        // Re-read under the row lock; a concurrent unit may have changed it
        let payment = tx.get_payment(tenant, payment_id).await?.ok_or_else(not_found)?;

        let mut ledger = PaymentLedger::new(tx.as_mut(), tenant, self.calendar, self.ids.as_ref());
        let previous = ledger.delete_current_month(&payment, now).await?;

        let pointer = match &previous {
            Some(p) => BillingPointer {
                plan_id: Some(p.resulting_plan().clone()),
                last_payment_at: Some(p.date),
            },
            None => BillingPointer {
                plan_id: Some(payment.plan_at_charge.clone()),
                last_payment_at: None,
            },
        };
        tx.set_billing_pointer(tenant, std::slice::from_ref(&connection_id), pointer.clone())
            .await?;
        tx.commit().await?;

        info!(
            "Deleted payment {} of connection {}; pointer now {:?}",
            payment.id, connection_id, pointer
        );
        Ok(DeletionReceipt {
            payment_id: payment.id,
            connection_id,
            current_plan_id: pointer.plan_id.unwrap_or(payment.plan_at_charge),
            last_payment_at: pointer.last_payment_at,
        })
    }

    async fn bulk_once(&self, tenant: &TenantId, requested: &[String]) -> Result<BulkChargeReport> {
        if requested.is_empty() {
            return Err(DomainError::EmptyBatch);
        }
        let now = self.clock.now();

        // Resolve and partition without opening a write unit
        let found = self.store.find_by_box_numbers(tenant, requested).await?;
        let by_box: HashMap<&str, &Connection> = found.iter().map(|c| (c.box_number.as_str(), c)).collect();

        let mut report = BulkChargeReport::default();
        let mut matched: Vec<&Connection> = Vec::with_capacity(requested.len());
        for box_number in requested {
            match by_box.get(box_number.as_str()) {
                Some(c) => matched.push(*c),
                None => report.unmatched.push(box_number.clone()),
            }
        }

        let matched_ids: Vec<ConnectionId> = matched.iter().map(|c| c.id.clone()).collect();
        let window = self.calendar.elapsed_this_month(now)?;
        let paid: HashSet<ConnectionId> = self
            .store
            .payments_for_connections_between(tenant, &matched_ids, window)
            .await?
            .into_iter()
            .map(|p| p.connection_id)
            .collect();

        let mut eligible: Vec<ConnectionId> = Vec::new();
        let mut outcome: Vec<(ConnectionId, bool)> = Vec::with_capacity(matched.len());
        for connection in &matched {
            let is_paid = paid.contains(&connection.id);
            if !is_paid {
                eligible.push(connection.id.clone());
            }
            outcome.push((connection.id.clone(), is_paid));
        }

        if eligible.is_empty() {
            report.skipped = matched.iter().map(|c| BulkEntry::from(*c)).collect();
            debug!("Bulk charge for tenant {}: nothing to charge", tenant);
            return Ok(report);
        }

        let mut tx = self.store.begin().await?;
        let locked: HashMap<ConnectionId, Connection> = tx
            .lock_connections(tenant, &eligible)
            .await?
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();

        let mut plans: HashMap<PackId, PlanSnapshot> = HashMap::new();
        for connection in locked.values() {
            if plans.contains_key(&connection.current_plan_id) {
                continue;
            }
            let pack = tx
                .get_pack(tenant, &connection.current_plan_id)
                .await?
                .ok_or_else(|| DomainError::NotFound(format!("pack {}", connection.current_plan_id)))?;
            plans.insert(pack.id.clone(), pack.snapshot());
        }

        let mut ledger = PaymentLedger::new(tx.as_mut(), tenant, self.calendar, self.ids.as_ref());
        let mut charges: Vec<(ConnectionId, Charge)> = Vec::new();
        for (connection_id, was_paid) in &outcome {
            let resolved = matched
                .iter()
                .find(|c| &c.id == connection_id)
                .map(|c| BulkEntry::from(*c));
            if *was_paid {
                report.skipped.extend(resolved);
                continue;
            }

            let Some(connection) = locked.get(connection_id) else {
                report.unmatched.extend(resolved.map(|e| e.box_number));
                continue;
            };
            // Paid by a concurrent unit since the read-only partition
            if ledger.has_payment_this_month(connection_id, now).await?.is_some() {
                report.skipped.push(BulkEntry::from(connection));
                continue;
            }

            let plan = plans
                .get(&connection.current_plan_id)
                .cloned()
                .ok_or_else(|| DomainError::NotFound(format!("pack {}", connection.current_plan_id)))?;
            charges.push((connection_id.clone(), Charge::Regular { plan }));
            report.charged.push(BulkEntry::from(connection));
        }

        if charges.is_empty() {
            return Ok(report);
        }

        ledger.record_batch(charges, now).await?;
        let charged_ids: Vec<ConnectionId> = report.charged.iter().map(|e| e.connection_id.clone()).collect();
        tx.set_billing_pointer(
            tenant,
            &charged_ids,
            BillingPointer {
                plan_id: None,
                last_payment_at: Some(now),
            },
        )
        .await?;
        tx.commit().await?;

        counter!("billing_bulk_charged_total").increment(report.charged.len() as u64);
        info!(
            "Bulk charge for tenant {}: {} charged, {} skipped, {} unmatched",
            tenant,
            report.charged.len(),
            report.skipped.len(),
            report.unmatched.len()
        );
        Ok(report)
    }
}
