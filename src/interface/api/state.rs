//! Shared handler state

use super::tenant::{HeaderTenantResolver, TenantResolver};
use crate::application::{BillingEngine, ReportProjection};
use crate::domain::clock::{BillingCalendar, Clock};
use crate::domain::ledger::BillingStore;
use crate::domain::shared::IdGenerator;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<BillingEngine>,
    pub reports: Arc<ReportProjection>,
    pub store: Arc<dyn BillingStore>,
    pub ids: Arc<dyn IdGenerator>,
    pub tenants: Arc<dyn TenantResolver>,
}

impl AppState {
    /// Wire the engine and projections over one store
    pub fn new(
        store: Arc<dyn BillingStore>,
        clock: Arc<dyn Clock>,
        calendar: BillingCalendar,
        ids: Arc<dyn IdGenerator>,
        max_attempts: u32,
    ) -> Self {
        let engine = BillingEngine::new(store.clone(), clock.clone(), calendar, ids.clone())
            .with_max_attempts(max_attempts);
        let reports = ReportProjection::new(store.clone(), clock, calendar);

        Self {
            engine: Arc::new(engine),
            reports: Arc::new(reports),
            store,
            ids,
            tenants: Arc::new(HeaderTenantResolver),
        }
    }

    pub fn with_tenant_resolver(mut self, tenants: Arc<dyn TenantResolver>) -> Self {
        self.tenants = tenants;
        self
    }
}
