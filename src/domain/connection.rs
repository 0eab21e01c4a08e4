//! Connections (subscriber boxes) and the directory port

use super::shared::{
    normalize_box_number, AreaId, ConnectionId, DomainError, PackId, Result, TenantId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const MIN_NAME_LEN: usize = 4;
const MIN_PHONE_LEN: usize = 10;
const MIN_BOX_NUMBER_LEN: usize = 10;

/// A subscriber connection
///
/// `current_plan_id` and `last_payment_at` mirror the ledger and are written
/// only by the billing engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub tenant_id: TenantId,
    pub box_number: String,
    pub name: String,
    pub phone: Option<String>,
    pub area_id: AreaId,
    pub current_plan_id: PackId,
    pub last_payment_at: Option<DateTime<Utc>>,
}

/// Profile fields accepted when creating or editing a connection
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionProfile {
    pub name: String,
    #[serde(default, alias = "phoneNumber")]
    pub phone: Option<String>,
    #[serde(alias = "boxNumber")]
    pub box_number: String,
    #[serde(alias = "area")]
    pub area_id: AreaId,
}

impl ConnectionProfile {
    pub fn normalized(self) -> Result<Self> {
        let name = self.name.trim().to_uppercase();
        if name.chars().count() < MIN_NAME_LEN {
            return Err(DomainError::ValidationError(format!(
                "Name should contain at least {} characters",
                MIN_NAME_LEN
            )));
        }

        let phone = match self.phone.map(|p| p.trim().to_string()) {
            Some(p) if p.is_empty() => None,
            Some(p) if p.chars().count() < MIN_PHONE_LEN => {
                return Err(DomainError::ValidationError(
                    "Not a valid phone number".to_string(),
                ))
            }
            other => other,
        };

        let box_number = normalize_box_number(&self.box_number);
        if box_number.chars().count() < MIN_BOX_NUMBER_LEN {
            return Err(DomainError::ValidationError(format!(
                "Smartcard should be at least {} characters long",
                MIN_BOX_NUMBER_LEN
            )));
        }

        if self.area_id.as_str().trim().is_empty() {
            return Err(DomainError::ValidationError("Area is required".to_string()));
        }

        Ok(Self {
            name,
            phone,
            box_number,
            area_id: self.area_id,
        })
    }
}

/// Everything needed to insert a new connection
#[derive(Debug, Clone)]
pub struct NewConnection {
    pub id: ConnectionId,
    pub profile: ConnectionProfile,
    pub plan_id: PackId,
}

/// Message used when a box number is taken inside a tenant
pub fn box_number_taken(box_number: &str, owner: &str) -> DomainError {
    DomainError::AlreadyExists(format!(
        "Box number {} is already assigned to {}",
        box_number, owner
    ))
}

/// Directory of connections, scoped per tenant
#[async_trait]
pub trait ConnectionDirectory: Send + Sync {
    /// Insert a connection; the plan must exist in the tenant and the box number must be free
    async fn create_connection(&self, tenant: &TenantId, new: NewConnection) -> Result<Connection>;

    async fn get_connection(&self, tenant: &TenantId, id: &ConnectionId) -> Result<Option<Connection>>;

    async fn find_by_box_number(&self, tenant: &TenantId, box_number: &str) -> Result<Option<Connection>>;

    /// Resolve many box numbers at once; unknown numbers are simply absent
    async fn find_by_box_numbers(&self, tenant: &TenantId, box_numbers: &[String]) -> Result<Vec<Connection>>;

    /// All connections ordered by name
    async fn list_connections(&self, tenant: &TenantId) -> Result<Vec<Connection>>;

    /// Edit name/phone/area/box number; plan and payment pointer are untouched
    async fn update_profile(
        &self,
        tenant: &TenantId,
        id: &ConnectionId,
        profile: ConnectionProfile,
    ) -> Result<Connection>;
}
