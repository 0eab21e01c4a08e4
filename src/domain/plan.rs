//! Base packs (pricing plans) and the catalog port

use super::shared::{DomainError, PackId, Result, TenantId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A pricing plan a connection can be assigned to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasePack {
    pub id: PackId,
    pub tenant_id: TenantId,
    pub name: String,
    /// What the operator charges the reseller
    pub operator_price: i64,
    /// What the customer is charged
    pub customer_price: i64,
}

impl BasePack {
    /// Frozen copy of the fields a payment must not lose if the pack is edited later
    pub fn snapshot(&self) -> PlanSnapshot {
        PlanSnapshot {
            pack_id: self.id.clone(),
            name: self.name.clone(),
            operator_price: self.operator_price,
            customer_price: self.customer_price,
        }
    }
}

/// Plan details frozen onto a payment at charge time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSnapshot {
    pub pack_id: PackId,
    pub name: String,
    pub operator_price: i64,
    pub customer_price: i64,
}

impl PlanSnapshot {
    pub fn margin(&self) -> i64 {
        self.customer_price - self.operator_price
    }
}

/// Input for creating or editing a pack
#[derive(Debug, Clone, Deserialize)]
pub struct PackDraft {
    pub name: String,
    pub operator_price: i64,
    pub customer_price: i64,
}

impl PackDraft {
    /// Trim and upper-case the name, reject negative prices
    pub fn normalized(self) -> Result<Self> {
        let name = self.name.trim().to_uppercase();
        if name.is_empty() {
            return Err(DomainError::ValidationError("Pack name is required".to_string()));
        }
        if self.operator_price < 0 || self.customer_price < 0 {
            return Err(DomainError::ValidationError(
                "Prices cannot be negative".to_string(),
            ));
        }
        Ok(Self { name, ..self })
    }
}

/// Pack with the number of connections currently on it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackUsage {
    #[serde(flatten)]
    pub pack: BasePack,
    pub connections: i64,
}

/// Catalog of base packs, scoped per tenant
#[async_trait]
pub trait PlanCatalog: Send + Sync {
    async fn create_pack(&self, tenant: &TenantId, id: PackId, draft: PackDraft) -> Result<BasePack>;

    async fn get_pack(&self, tenant: &TenantId, id: &PackId) -> Result<Option<BasePack>>;

    /// Packs ordered by name, with connection counts
    async fn list_packs(&self, tenant: &TenantId) -> Result<Vec<PackUsage>>;

    /// Rename or reprice; existing payments keep their snapshot
    async fn update_pack(&self, tenant: &TenantId, id: &PackId, draft: PackDraft) -> Result<BasePack>;

    /// Fails with `InUse` while any connection or payment references the pack
    async fn delete_pack(&self, tenant: &TenantId, id: &PackId) -> Result<()>;
}
