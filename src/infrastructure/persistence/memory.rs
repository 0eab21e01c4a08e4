//! In-memory billing store
//!
//! One async mutex guards the whole state. A unit of work holds the owned
//! guard plus a working copy; commit swaps the copy in, drop discards it.
//! That makes every unit serializable, which is what the PostgreSQL store
//! gets from row locks and the monthly unique index.

use crate::domain::clock::TimeWindow;
use crate::domain::connection::{box_number_taken, Connection, ConnectionDirectory, ConnectionProfile, NewConnection};
use crate::domain::ledger::{BillingPointer, BillingStore, LedgerReader, LedgerTx};
use crate::domain::payment::Payment;
use crate::domain::plan::{BasePack, PackDraft, PackUsage, PlanCatalog};
use crate::domain::shared::{AreaId, ConnectionId, DomainError, PackId, PaymentId, Result, TenantId};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

#[derive(Debug, Default, Clone)]
struct MemoryState {
    packs: HashMap<PackId, BasePack>,
    connections: HashMap<ConnectionId, Connection>,
    payments: HashMap<PaymentId, Payment>,
}

impl MemoryState {
    fn pack(&self, tenant: &TenantId, id: &PackId) -> Option<&BasePack> {
        self.packs.get(id).filter(|p| &p.tenant_id == tenant)
    }

    fn connection(&self, tenant: &TenantId, id: &ConnectionId) -> Option<&Connection> {
        self.connections.get(id).filter(|c| &c.tenant_id == tenant)
    }

    fn payment(&self, tenant: &TenantId, id: &PaymentId) -> Option<&Payment> {
        self.payments.get(id).filter(|p| &p.tenant_id == tenant)
    }

    fn box_owner(&self, tenant: &TenantId, box_number: &str) -> Option<&Connection> {
        self.connections
            .values()
            .find(|c| &c.tenant_id == tenant && c.box_number == box_number)
    }

    fn tenant_payments<'a>(&'a self, tenant: &'a TenantId) -> impl Iterator<Item = &'a Payment> + 'a {
        self.payments.values().filter(move |p| &p.tenant_id == tenant)
    }

    fn latest_payment(&self, tenant: &TenantId, connection: &ConnectionId) -> Option<Payment> {
        self.tenant_payments(tenant)
            .filter(|p| &p.connection_id == connection)
            .max_by_key(|p| p.date)
            .cloned()
    }
}

/// Failure injection used to exercise retry and rollback paths
#[derive(Debug, Default)]
struct Faults {
    conflicts_on_begin: AtomicUsize,
    fail_after_writes: StdMutex<Option<usize>>,
}

impl Faults {
    fn take_conflict(&self) -> bool {
        self.conflicts_on_begin
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn before_write(&self) -> Result<()> {
        let mut guard = self
            .fail_after_writes
            .lock()
            .map_err(|_| DomainError::Internal("fault state poisoned".to_string()))?;
        match *guard {
            Some(0) => {
                *guard = None;
                Err(DomainError::Internal("injected write failure".to_string()))
            }
            Some(n) => {
                *guard = Some(n - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

/// Billing store kept entirely in process memory
#[derive(Debug, Clone, Default)]
pub struct MemoryBillingStore {
    state: Arc<Mutex<MemoryState>>,
    faults: Arc<Faults>,
    units_started: Arc<AtomicUsize>,
}

impl MemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of write units opened so far
    pub fn units_started(&self) -> usize {
        self.units_started.load(Ordering::SeqCst)
    }

    /// Make the next `n` calls to `begin` fail with a transaction conflict
    pub fn inject_conflicts(&self, n: usize) {
        self.faults.conflicts_on_begin.store(n, Ordering::SeqCst);
    }

    /// Let `n` more ledger writes succeed, then fail the next one
    pub fn fail_after_writes(&self, n: usize) {
        if let Ok(mut guard) = self.faults.fail_after_writes.lock() {
            *guard = Some(n);
        }
    }

    /// Insert a pack whose id is its lower-cased name
    pub async fn seed_pack(
        &self,
        tenant: &TenantId,
        name: &str,
        operator_price: i64,
        customer_price: i64,
    ) -> Result<BasePack> {
        let draft = PackDraft {
            name: name.to_string(),
            operator_price,
            customer_price,
        };
        self.create_pack(tenant, PackId::new(name.to_lowercase()), draft).await
    }

    /// Insert a connection named after its id, in area `area-1`
    pub async fn seed_connection(
        &self,
        tenant: &TenantId,
        id: &str,
        box_number: &str,
        plan_id: &PackId,
    ) -> Result<Connection> {
        let new = NewConnection {
            id: ConnectionId::new(id),
            profile: ConnectionProfile {
                name: format!("customer {}", id),
                phone: None,
                box_number: box_number.to_string(),
                area_id: AreaId::new("area-1"),
            },
            plan_id: plan_id.clone(),
        };
        self.create_connection(tenant, new).await
    }

    /// Every payment of the tenant, for assertions
    pub async fn all_payments(&self, tenant: &TenantId) -> Vec<Payment> {
        let state = self.state.lock().await;
        let mut payments: Vec<Payment> = state.tenant_payments(tenant).cloned().collect();
        payments.sort_by_key(|p| p.date);
        payments
    }
}

#[async_trait]
impl PlanCatalog for MemoryBillingStore {
    async fn create_pack(&self, tenant: &TenantId, id: PackId, draft: PackDraft) -> Result<BasePack> {
        let draft = draft.normalized()?;
        let mut state = self.state.lock().await;
        if state.packs.contains_key(&id) {
            return Err(DomainError::AlreadyExists(format!("Pack {} already exists", id)));
        }

        let pack = BasePack {
            id: id.clone(),
            tenant_id: tenant.clone(),
            name: draft.name,
            operator_price: draft.operator_price,
            customer_price: draft.customer_price,
        };
        state.packs.insert(id, pack.clone());
        Ok(pack)
    }

    async fn get_pack(&self, tenant: &TenantId, id: &PackId) -> Result<Option<BasePack>> {
        Ok(self.state.lock().await.pack(tenant, id).cloned())
    }

    async fn list_packs(&self, tenant: &TenantId) -> Result<Vec<PackUsage>> {
        let state = self.state.lock().await;
        let mut packs: Vec<PackUsage> = state
            .packs
            .values()
            .filter(|p| &p.tenant_id == tenant)
            .map(|pack| PackUsage {
                connections: state
                    .connections
                    .values()
                    .filter(|c| c.current_plan_id == pack.id)
                    .count() as i64,
                pack: pack.clone(),
            })
            .collect();
        packs.sort_by(|a, b| a.pack.name.cmp(&b.pack.name));
        Ok(packs)
    }

    async fn update_pack(&self, tenant: &TenantId, id: &PackId, draft: PackDraft) -> Result<BasePack> {
        let draft = draft.normalized()?;
        let mut state = self.state.lock().await;
        let pack = state
            .packs
            .get_mut(id)
            .filter(|p| &p.tenant_id == tenant)
            .ok_or_else(|| DomainError::NotFound(format!("pack {}", id)))?;
        pack.name = draft.name;
        pack.operator_price = draft.operator_price;
        pack.customer_price = draft.customer_price;
        Ok(pack.clone())
    }

    async fn delete_pack(&self, tenant: &TenantId, id: &PackId) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.pack(tenant, id).is_none() {
            return Err(DomainError::NotFound(format!("pack {}", id)));
        }

        let assigned = state
            .connections
            .values()
            .filter(|c| &c.current_plan_id == id)
            .count();
        if assigned > 0 {
            return Err(DomainError::InUse(format!(
                "Pack is assigned to {} connection(s)",
                assigned
            )));
        }
        let referenced = state.payments.values().any(|p| {
            &p.plan_at_charge == id || p.migrated_to.as_ref() == Some(id) || &p.charged.pack_id == id
        });
        if referenced {
            return Err(DomainError::InUse("Pack is referenced by payments".to_string()));
        }

        state.packs.remove(id);
        Ok(())
    }
}

#[async_trait]
impl ConnectionDirectory for MemoryBillingStore {
    async fn create_connection(&self, tenant: &TenantId, new: NewConnection) -> Result<Connection> {
        let profile = new.profile.normalized()?;
        let mut state = self.state.lock().await;

        if state.pack(tenant, &new.plan_id).is_none() {
            return Err(DomainError::NotFound(format!("pack {}", new.plan_id)));
        }
        if let Some(owner) = state.box_owner(tenant, &profile.box_number) {
            return Err(box_number_taken(&profile.box_number, &owner.name));
        }
        if state.connections.contains_key(&new.id) {
            return Err(DomainError::AlreadyExists(format!("Connection {} already exists", new.id)));
        }

        let connection = Connection {
            id: new.id.clone(),
            tenant_id: tenant.clone(),
            box_number: profile.box_number,
            name: profile.name,
            phone: profile.phone,
            area_id: profile.area_id,
            current_plan_id: new.plan_id,
            last_payment_at: None,
        };
        state.connections.insert(new.id, connection.clone());
        debug!("Created connection {} for tenant {}", connection.id, tenant);
        Ok(connection)
    }

    async fn get_connection(&self, tenant: &TenantId, id: &ConnectionId) -> Result<Option<Connection>> {
        Ok(self.state.lock().await.connection(tenant, id).cloned())
    }

    async fn find_by_box_number(&self, tenant: &TenantId, box_number: &str) -> Result<Option<Connection>> {
        Ok(self.state.lock().await.box_owner(tenant, box_number).cloned())
    }

    async fn find_by_box_numbers(&self, tenant: &TenantId, box_numbers: &[String]) -> Result<Vec<Connection>> {
        let wanted: HashSet<&str> = box_numbers.iter().map(String::as_str).collect();
        let state = self.state.lock().await;
        Ok(state
            .connections
            .values()
            .filter(|c| &c.tenant_id == tenant && wanted.contains(c.box_number.as_str()))
            .cloned()
            .collect())
    }

    async fn list_connections(&self, tenant: &TenantId) -> Result<Vec<Connection>> {
        let state = self.state.lock().await;
        let mut connections: Vec<Connection> = state
            .connections
            .values()
            .filter(|c| &c.tenant_id == tenant)
            .cloned()
            .collect();
        connections.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(connections)
    }

    async fn update_profile(
        &self,
        tenant: &TenantId,
        id: &ConnectionId,
        profile: ConnectionProfile,
    ) -> Result<Connection> {
        let profile = profile.normalized()?;
        let mut state = self.state.lock().await;

        let current = state
            .connection(tenant, id)
            .ok_or_else(|| DomainError::NotFound(format!("connection {}", id)))?;
        if current.box_number != profile.box_number {
            if let Some(owner) = state.box_owner(tenant, &profile.box_number) {
                return Err(box_number_taken(&profile.box_number, &owner.name));
            }
        }

        let connection = state
            .connections
            .get_mut(id)
            .ok_or_else(|| DomainError::NotFound(format!("connection {}", id)))?;
        connection.name = profile.name;
        connection.phone = profile.phone;
        connection.box_number = profile.box_number;
        connection.area_id = profile.area_id;
        Ok(connection.clone())
    }
}

#[async_trait]
impl LedgerReader for MemoryBillingStore {
    async fn payments_between(&self, tenant: &TenantId, window: TimeWindow) -> Result<Vec<Payment>> {
        let state = self.state.lock().await;
        let mut payments: Vec<Payment> = state
            .tenant_payments(tenant)
            .filter(|p| window.contains(p.date))
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.date);
        Ok(payments)
    }

    async fn payments_for_connections_between(
        &self,
        tenant: &TenantId,
        connections: &[ConnectionId],
        window: TimeWindow,
    ) -> Result<Vec<Payment>> {
        let wanted: HashSet<&ConnectionId> = connections.iter().collect();
        let state = self.state.lock().await;
        let mut payments: Vec<Payment> = state
            .tenant_payments(tenant)
            .filter(|p| wanted.contains(&p.connection_id) && window.contains(p.date))
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.date);
        Ok(payments)
    }

    async fn payments_for_connection(&self, tenant: &TenantId, connection: &ConnectionId) -> Result<Vec<Payment>> {
        let state = self.state.lock().await;
        let mut payments: Vec<Payment> = state
            .tenant_payments(tenant)
            .filter(|p| &p.connection_id == connection)
            .cloned()
            .collect();
        payments.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(payments)
    }

    async fn recent_payments(&self, tenant: &TenantId, limit: usize) -> Result<Vec<Payment>> {
        let state = self.state.lock().await;
        let mut payments: Vec<Payment> = state.tenant_payments(tenant).cloned().collect();
        payments.sort_by(|a, b| b.date.cmp(&a.date));
        payments.truncate(limit);
        Ok(payments)
    }
}

#[async_trait]
impl BillingStore for MemoryBillingStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>> {
        if self.faults.take_conflict() {
            return Err(DomainError::TransactionConflict("injected conflict".to_string()));
        }

        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        self.units_started.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryTx {
            guard,
            working,
            faults: self.faults.clone(),
        }))
    }
}

/// Unit of work over [`MemoryBillingStore`]
pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    faults: Arc<Faults>,
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn lock_connection(&mut self, tenant: &TenantId, id: &ConnectionId) -> Result<Option<Connection>> {
        Ok(self.working.connection(tenant, id).cloned())
    }

    async fn lock_connections(&mut self, tenant: &TenantId, ids: &[ConnectionId]) -> Result<Vec<Connection>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.working.connection(tenant, id).cloned())
            .collect())
    }

    async fn get_pack(&mut self, tenant: &TenantId, id: &PackId) -> Result<Option<BasePack>> {
        Ok(self.working.pack(tenant, id).cloned())
    }

    async fn get_payment(&mut self, tenant: &TenantId, id: &PaymentId) -> Result<Option<Payment>> {
        Ok(self.working.payment(tenant, id).cloned())
    }

    async fn payment_in_window(
        &mut self,
        tenant: &TenantId,
        connection: &ConnectionId,
        window: TimeWindow,
    ) -> Result<Option<Payment>> {
        Ok(self
            .working
            .tenant_payments(tenant)
            .find(|p| &p.connection_id == connection && window.contains(p.date))
            .cloned())
    }

    async fn latest_payment(&mut self, tenant: &TenantId, connection: &ConnectionId) -> Result<Option<Payment>> {
        Ok(self.working.latest_payment(tenant, connection))
    }

    async fn insert_payments(&mut self, payments: &[Payment]) -> Result<()> {
        for payment in payments {
            self.faults.before_write()?;
            let taken = self.working.payments.values().any(|p| {
                p.connection_id == payment.connection_id && p.billing_month == payment.billing_month
            });
            if taken || self.working.payments.contains_key(&payment.id) {
                return Err(DomainError::TransactionConflict(format!(
                    "connection {} already has a payment for {}",
                    payment.connection_id, payment.billing_month
                )));
            }
            self.working.payments.insert(payment.id.clone(), payment.clone());
        }
        Ok(())
    }

    async fn update_payment(&mut self, payment: &Payment) -> Result<()> {
        self.faults.before_write()?;
        let existing = self
            .working
            .payments
            .get_mut(&payment.id)
            .filter(|p| p.tenant_id == payment.tenant_id)
            .ok_or_else(|| DomainError::NotFound(format!("payment {}", payment.id)))?;
        if existing.billing_month != payment.billing_month {
            return Err(DomainError::Internal(format!(
                "payment {} cannot move between months",
                payment.id
            )));
        }
        *existing = payment.clone();
        Ok(())
    }

    async fn delete_payment(&mut self, tenant: &TenantId, id: &PaymentId) -> Result<()> {
        self.faults.before_write()?;
        if self.working.payment(tenant, id).is_none() {
            return Err(DomainError::NotFound(format!("payment {}", id)));
        }
        self.working.payments.remove(id);
        Ok(())
    }

    async fn set_billing_pointer(
        &mut self,
        tenant: &TenantId,
        connections: &[ConnectionId],
        pointer: BillingPointer,
    ) -> Result<()> {
        self.faults.before_write()?;
        for id in connections {
            let connection = self
                .working
                .connections
                .get_mut(id)
                .filter(|c| &c.tenant_id == tenant)
                .ok_or_else(|| DomainError::NotFound(format!("connection {}", id)))?;
            if let Some(plan_id) = &pointer.plan_id {
                connection.current_plan_id = plan_id.clone();
            }
            connection.last_payment_at = pointer.last_payment_at;
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTx {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }
}
