//! PostgreSQL billing store
//!
//! Each write unit is one transaction. Connection rows are locked with
//! `SELECT ... FOR UPDATE` before the ledger is read, and the
//! `(connection_id, billing_month)` unique index backs the monthly singleton.

use crate::domain::clock::{BillingMonth, TimeWindow};
use crate::domain::connection::{box_number_taken, Connection, ConnectionDirectory, ConnectionProfile, NewConnection};
use crate::domain::ledger::{BillingPointer, BillingStore, LedgerReader, LedgerTx};
use crate::domain::payment::Payment;
use crate::domain::plan::{BasePack, PackDraft, PackUsage, PlanCatalog, PlanSnapshot};
use crate::domain::shared::{AreaId, ConnectionId, DomainError, PackId, PaymentId, Result, TenantId};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::{debug, error, warn};

const PACK_COLUMNS: &str = "id, tenant_id, name, operator_price, customer_price";

const CONNECTION_COLUMNS: &str =
    "id, tenant_id, box_number, name, phone, area_id, current_plan_id, last_payment_at";

const PAYMENT_COLUMNS: &str = "id, tenant_id, connection_id, billing_month, paid_at, plan_at_charge, \
     migrated_to, is_migration, pack_id, pack_name, operator_price, customer_price";

/// SQLSTATEs that mean "replay the unit"
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const UNIQUE_VIOLATION: &str = "23505";

const BOX_NUMBER_CONSTRAINT: &str = "connections_tenant_box_key";

#[derive(FromRow)]
struct PackRow {
    id: String,
    tenant_id: String,
    name: String,
    operator_price: i64,
    customer_price: i64,
}

impl From<PackRow> for BasePack {
    fn from(r: PackRow) -> Self {
        BasePack {
            id: PackId::new(r.id),
            tenant_id: TenantId::new(r.tenant_id),
            name: r.name,
            operator_price: r.operator_price,
            customer_price: r.customer_price,
        }
    }
}

#[derive(FromRow)]
struct PackUsageRow {
    #[sqlx(flatten)]
    pack: PackRow,
    connections: i64,
}

#[derive(FromRow)]
struct ConnectionRow {
    id: String,
    tenant_id: String,
    box_number: String,
    name: String,
    phone: Option<String>,
    area_id: String,
    current_plan_id: String,
    last_payment_at: Option<DateTime<Utc>>,
}

impl From<ConnectionRow> for Connection {
    fn from(r: ConnectionRow) -> Self {
        Connection {
            id: ConnectionId::new(r.id),
            tenant_id: TenantId::new(r.tenant_id),
            box_number: r.box_number,
            name: r.name,
            phone: r.phone,
            area_id: AreaId::new(r.area_id),
            current_plan_id: PackId::new(r.current_plan_id),
            last_payment_at: r.last_payment_at,
        }
    }
}

#[derive(FromRow)]
struct PaymentRow {
    id: String,
    tenant_id: String,
    connection_id: String,
    billing_month: NaiveDate,
    paid_at: DateTime<Utc>,
    plan_at_charge: String,
    migrated_to: Option<String>,
    is_migration: bool,
    pack_id: String,
    pack_name: String,
    operator_price: i64,
    customer_price: i64,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = DomainError;

    fn try_from(r: PaymentRow) -> Result<Self> {
        let billing_month = BillingMonth::new(r.billing_month.year(), r.billing_month.month())
            .ok_or_else(|| DomainError::Internal(format!("payment {} has invalid month", r.id)))?;

        Ok(Payment {
            id: PaymentId::new(r.id),
            tenant_id: TenantId::new(r.tenant_id),
            connection_id: ConnectionId::new(r.connection_id),
            billing_month,
            date: r.paid_at,
            plan_at_charge: PackId::new(r.plan_at_charge),
            migrated_to: r.migrated_to.map(PackId::new),
            is_migration: r.is_migration,
            charged: PlanSnapshot {
                pack_id: PackId::new(r.pack_id),
                name: r.pack_name,
                operator_price: r.operator_price,
                customer_price: r.customer_price,
            },
        })
    }
}

fn into_payments(rows: Vec<PaymentRow>) -> Result<Vec<Payment>> {
    rows.into_iter().map(Payment::try_from).collect()
}

fn ids_as_strings(ids: &[ConnectionId]) -> Vec<String> {
    ids.iter().map(|id| id.as_str().to_string()).collect()
}

/// Name of the unique constraint a failed statement violated
fn violated_constraint(e: &sqlx::Error) -> Option<String> {
    match e {
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            Some(db.constraint().unwrap_or_default().to_string())
        }
        _ => None,
    }
}

/// Map a driver error onto the domain taxonomy
fn db_error(op: &'static str) -> impl FnOnce(sqlx::Error) -> DomainError {
    move |e| match &e {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED) | Some(UNIQUE_VIOLATION) => {
                warn!("Transaction conflict during {}: {}", op, db.message());
                DomainError::TransactionConflict(format!("{}: {}", op, db.message()))
            }
            _ => {
                error!("Database error during {}: {}", op, e);
                DomainError::Internal(format!("Database error: {}", e))
            }
        },
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            error!("Database unavailable during {}: {}", op, e);
            DomainError::Unavailable(format!("Database unavailable: {}", e))
        }
        _ => {
            error!("Database error during {}: {}", op, e);
            DomainError::Internal(format!("Database error: {}", e))
        }
    }
}

/// Billing store backed by a PostgreSQL pool
#[derive(Clone)]
pub struct PgBillingStore {
    pool: PgPool,
}

impl PgBillingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PlanCatalog for PgBillingStore {
    async fn create_pack(&self, tenant: &TenantId, id: PackId, draft: PackDraft) -> Result<BasePack> {
        let draft = draft.normalized()?;
        debug!("Creating pack {} for tenant {}", id, tenant);

        let sql = format!(
            "INSERT INTO base_packs ({cols}) VALUES ($1, $2, $3, $4, $5) RETURNING {cols}",
            cols = PACK_COLUMNS
        );
        let row = sqlx::query_as::<_, PackRow>(&sql)
            .bind(id.as_str())
            .bind(tenant.as_str())
            .bind(&draft.name)
            .bind(draft.operator_price)
            .bind(draft.customer_price)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if violated_constraint(&e).is_some() {
                    DomainError::AlreadyExists(format!("Pack {} already exists", id))
                } else {
                    db_error("create pack")(e)
                }
            })?;

        Ok(row.into())
    }

    async fn get_pack(&self, tenant: &TenantId, id: &PackId) -> Result<Option<BasePack>> {
        let sql = format!(
            "SELECT {} FROM base_packs WHERE tenant_id = $1 AND id = $2",
            PACK_COLUMNS
        );
        let row = sqlx::query_as::<_, PackRow>(&sql)
            .bind(tenant.as_str())
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("get pack"))?;

        Ok(row.map(Into::into))
    }

    async fn list_packs(&self, tenant: &TenantId) -> Result<Vec<PackUsage>> {
        let rows = sqlx::query_as::<_, PackUsageRow>(
            r#"
            SELECT p.id, p.tenant_id, p.name, p.operator_price, p.customer_price,
                   COUNT(c.id) AS connections
            FROM base_packs p
            LEFT JOIN connections c
                   ON c.current_plan_id = p.id AND c.tenant_id = p.tenant_id
            WHERE p.tenant_id = $1
            GROUP BY p.id
            ORDER BY p.name
            "#,
        )
        .bind(tenant.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("list packs"))?;

        Ok(rows
            .into_iter()
            .map(|r| PackUsage {
                pack: r.pack.into(),
                connections: r.connections,
            })
            .collect())
    }

    async fn update_pack(&self, tenant: &TenantId, id: &PackId, draft: PackDraft) -> Result<BasePack> {
        let draft = draft.normalized()?;
        let sql = format!(
            r#"
            UPDATE base_packs
            SET name = $3, operator_price = $4, customer_price = $5, updated_at = NOW()
            WHERE tenant_id = $1 AND id = $2
            RETURNING {}
            "#,
            PACK_COLUMNS
        );
        let row = sqlx::query_as::<_, PackRow>(&sql)
            .bind(tenant.as_str())
            .bind(id.as_str())
            .bind(&draft.name)
            .bind(draft.operator_price)
            .bind(draft.customer_price)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("update pack"))?;

        row.map(Into::into)
            .ok_or_else(|| DomainError::NotFound(format!("pack {}", id)))
    }

    async fn delete_pack(&self, tenant: &TenantId, id: &PackId) -> Result<()> {
        let (assigned, referenced): (i64, bool) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM connections WHERE tenant_id = $1 AND current_plan_id = $2),
                EXISTS (
                    SELECT 1 FROM payments
                    WHERE tenant_id = $1
                      AND (plan_at_charge = $2 OR migrated_to = $2 OR pack_id = $2)
                )
            "#,
        )
        .bind(tenant.as_str())
        .bind(id.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("check pack usage"))?;

        if assigned > 0 {
            return Err(DomainError::InUse(format!(
                "Pack is assigned to {} connection(s)",
                assigned
            )));
        }
        if referenced {
            return Err(DomainError::InUse("Pack is referenced by payments".to_string()));
        }

        let result = sqlx::query("DELETE FROM base_packs WHERE tenant_id = $1 AND id = $2")
            .bind(tenant.as_str())
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_error("delete pack"))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::NotFound(format!("pack {}", id)));
        }
        debug!("Deleted pack {} for tenant {}", id, tenant);
        Ok(())
    }
}

#[async_trait]
impl ConnectionDirectory for PgBillingStore {
    async fn create_connection(&self, tenant: &TenantId, new: NewConnection) -> Result<Connection> {
        let profile = new.profile.normalized()?;

        if self.get_pack(tenant, &new.plan_id).await?.is_none() {
            return Err(DomainError::NotFound(format!("pack {}", new.plan_id)));
        }
        if let Some(owner) = self.find_by_box_number(tenant, &profile.box_number).await? {
            return Err(box_number_taken(&profile.box_number, &owner.name));
        }

        let sql = format!(
            r#"
            INSERT INTO connections (id, tenant_id, box_number, name, phone, area_id, current_plan_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            CONNECTION_COLUMNS
        );
        let row = sqlx::query_as::<_, ConnectionRow>(&sql)
            .bind(new.id.as_str())
            .bind(tenant.as_str())
            .bind(&profile.box_number)
            .bind(&profile.name)
            .bind(profile.phone.as_ref())
            .bind(profile.area_id.as_str())
            .bind(new.plan_id.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match violated_constraint(&e).as_deref() {
                Some(BOX_NUMBER_CONSTRAINT) => box_number_taken(&profile.box_number, "another connection"),
                Some(_) => DomainError::AlreadyExists(format!("Connection {} already exists", new.id)),
                None => db_error("create connection")(e),
            })?;

        debug!("Created connection {} for tenant {}", row.id, tenant);
        Ok(row.into())
    }

    async fn get_connection(&self, tenant: &TenantId, id: &ConnectionId) -> Result<Option<Connection>> {
        let sql = format!(
            "SELECT {} FROM connections WHERE tenant_id = $1 AND id = $2",
            CONNECTION_COLUMNS
        );
        let row = sqlx::query_as::<_, ConnectionRow>(&sql)
            .bind(tenant.as_str())
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("get connection"))?;

        Ok(row.map(Into::into))
    }

    async fn find_by_box_number(&self, tenant: &TenantId, box_number: &str) -> Result<Option<Connection>> {
        let sql = format!(
            "SELECT {} FROM connections WHERE tenant_id = $1 AND box_number = $2",
            CONNECTION_COLUMNS
        );
        let row = sqlx::query_as::<_, ConnectionRow>(&sql)
            .bind(tenant.as_str())
            .bind(box_number)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("find connection by box number"))?;

        Ok(row.map(Into::into))
    }

    async fn find_by_box_numbers(&self, tenant: &TenantId, box_numbers: &[String]) -> Result<Vec<Connection>> {
        let sql = format!(
            "SELECT {} FROM connections WHERE tenant_id = $1 AND box_number = ANY($2)",
            CONNECTION_COLUMNS
        );
        let rows = sqlx::query_as::<_, ConnectionRow>(&sql)
            .bind(tenant.as_str())
            .bind(box_numbers)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("find connections by box numbers"))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_connections(&self, tenant: &TenantId) -> Result<Vec<Connection>> {
        let sql = format!(
            "SELECT {} FROM connections WHERE tenant_id = $1 ORDER BY name, id",
            CONNECTION_COLUMNS
        );
        let rows = sqlx::query_as::<_, ConnectionRow>(&sql)
            .bind(tenant.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("list connections"))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn update_profile(
        &self,
        tenant: &TenantId,
        id: &ConnectionId,
        profile: ConnectionProfile,
    ) -> Result<Connection> {
        let profile = profile.normalized()?;

        if let Some(owner) = self.find_by_box_number(tenant, &profile.box_number).await? {
            if &owner.id != id {
                return Err(box_number_taken(&profile.box_number, &owner.name));
            }
        }

        let sql = format!(
            r#"
            UPDATE connections
            SET name = $3, phone = $4, box_number = $5, area_id = $6, updated_at = NOW()
            WHERE tenant_id = $1 AND id = $2
            RETURNING {}
            "#,
            CONNECTION_COLUMNS
        );
        let row = sqlx::query_as::<_, ConnectionRow>(&sql)
            .bind(tenant.as_str())
            .bind(id.as_str())
            .bind(&profile.name)
            .bind(profile.phone.as_ref())
            .bind(&profile.box_number)
            .bind(profile.area_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| match violated_constraint(&e).as_deref() {
                Some(BOX_NUMBER_CONSTRAINT) => box_number_taken(&profile.box_number, "another connection"),
                _ => db_error("update connection")(e),
            })?;

        row.map(Into::into)
            .ok_or_else(|| DomainError::NotFound(format!("connection {}", id)))
    }
}

#[async_trait]
impl LedgerReader for PgBillingStore {
    async fn payments_between(&self, tenant: &TenantId, window: TimeWindow) -> Result<Vec<Payment>> {
        let sql = format!(
            r#"
            SELECT {} FROM payments
            WHERE tenant_id = $1 AND paid_at >= $2 AND paid_at < $3
            ORDER BY paid_at
            "#,
            PAYMENT_COLUMNS
        );
        let rows = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(tenant.as_str())
            .bind(window.start)
            .bind(window.end)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("list payments between"))?;

        into_payments(rows)
    }

    async fn payments_for_connections_between(
        &self,
        tenant: &TenantId,
        connections: &[ConnectionId],
        window: TimeWindow,
    ) -> Result<Vec<Payment>> {
        let sql = format!(
            r#"
            SELECT {} FROM payments
            WHERE tenant_id = $1 AND connection_id = ANY($2) AND paid_at >= $3 AND paid_at < $4
            ORDER BY paid_at
            "#,
            PAYMENT_COLUMNS
        );
        let rows = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(tenant.as_str())
            .bind(ids_as_strings(connections))
            .bind(window.start)
            .bind(window.end)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("list payments for connections"))?;

        into_payments(rows)
    }

    async fn payments_for_connection(&self, tenant: &TenantId, connection: &ConnectionId) -> Result<Vec<Payment>> {
        let sql = format!(
            "SELECT {} FROM payments WHERE tenant_id = $1 AND connection_id = $2 ORDER BY paid_at DESC",
            PAYMENT_COLUMNS
        );
        let rows = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(tenant.as_str())
            .bind(connection.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("list payment history"))?;

        into_payments(rows)
    }

    async fn recent_payments(&self, tenant: &TenantId, limit: usize) -> Result<Vec<Payment>> {
        let sql = format!(
            "SELECT {} FROM payments WHERE tenant_id = $1 ORDER BY paid_at DESC LIMIT $2",
            PAYMENT_COLUMNS
        );
        let rows = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(tenant.as_str())
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("list recent payments"))?;

        into_payments(rows)
    }
}

#[async_trait]
impl BillingStore for PgBillingStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>> {
        let tx = self.pool.begin().await.map_err(db_error("begin transaction"))?;
        Ok(Box::new(PgLedgerTx { tx }))
    }
}

/// One PostgreSQL transaction; dropping it without commit rolls back
pub struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn lock_connection(&mut self, tenant: &TenantId, id: &ConnectionId) -> Result<Option<Connection>> {
        let sql = format!(
            "SELECT {} FROM connections WHERE tenant_id = $1 AND id = $2 FOR UPDATE",
            CONNECTION_COLUMNS
        );
        let row = sqlx::query_as::<_, ConnectionRow>(&sql)
            .bind(tenant.as_str())
            .bind(id.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error("lock connection"))?;

        Ok(row.map(Into::into))
    }

    async fn lock_connections(&mut self, tenant: &TenantId, ids: &[ConnectionId]) -> Result<Vec<Connection>> {
        // Id order keeps concurrent batches from deadlocking each other
        let sql = format!(
            "SELECT {} FROM connections WHERE tenant_id = $1 AND id = ANY($2) ORDER BY id FOR UPDATE",
            CONNECTION_COLUMNS
        );
        let rows = sqlx::query_as::<_, ConnectionRow>(&sql)
            .bind(tenant.as_str())
            .bind(ids_as_strings(ids))
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error("lock connections"))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn get_pack(&mut self, tenant: &TenantId, id: &PackId) -> Result<Option<BasePack>> {
        let sql = format!(
            "SELECT {} FROM base_packs WHERE tenant_id = $1 AND id = $2",
            PACK_COLUMNS
        );
        let row = sqlx::query_as::<_, PackRow>(&sql)
            .bind(tenant.as_str())
            .bind(id.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error("get pack"))?;

        Ok(row.map(Into::into))
    }

    async fn get_payment(&mut self, tenant: &TenantId, id: &PaymentId) -> Result<Option<Payment>> {
        let sql = format!(
            "SELECT {} FROM payments WHERE tenant_id = $1 AND id = $2",
            PAYMENT_COLUMNS
        );
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(tenant.as_str())
            .bind(id.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error("get payment"))?;

        row.map(Payment::try_from).transpose()
    }

    async fn payment_in_window(
        &mut self,
        tenant: &TenantId,
        connection: &ConnectionId,
        window: TimeWindow,
    ) -> Result<Option<Payment>> {
        let sql = format!(
            r#"
            SELECT {} FROM payments
            WHERE tenant_id = $1 AND connection_id = $2 AND paid_at >= $3 AND paid_at < $4
            ORDER BY paid_at DESC
            LIMIT 1
            "#,
            PAYMENT_COLUMNS
        );
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(tenant.as_str())
            .bind(connection.as_str())
            .bind(window.start)
            .bind(window.end)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error("find payment this month"))?;

        row.map(Payment::try_from).transpose()
    }

    async fn latest_payment(&mut self, tenant: &TenantId, connection: &ConnectionId) -> Result<Option<Payment>> {
        let sql = format!(
            r#"
            SELECT {} FROM payments
            WHERE tenant_id = $1 AND connection_id = $2
            ORDER BY paid_at DESC
            LIMIT 1
            "#,
            PAYMENT_COLUMNS
        );
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(tenant.as_str())
            .bind(connection.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error("find latest payment"))?;

        row.map(Payment::try_from).transpose()
    }

    async fn insert_payments(&mut self, payments: &[Payment]) -> Result<()> {
        for payment in payments {
            debug!(
                "Recording payment {} for connection {} ({})",
                payment.id, payment.connection_id, payment.billing_month
            );
            sqlx::query(
                r#"
                INSERT INTO payments (
                    id, tenant_id, connection_id, billing_month, paid_at,
                    plan_at_charge, migrated_to, is_migration,
                    pack_id, pack_name, operator_price, customer_price
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
            )
            .bind(payment.id.as_str())
            .bind(payment.tenant_id.as_str())
            .bind(payment.connection_id.as_str())
            .bind(payment.billing_month.first_day())
            .bind(payment.date)
            .bind(payment.plan_at_charge.as_str())
            .bind(payment.migrated_to.as_ref().map(PackId::as_str))
            .bind(payment.is_migration)
            .bind(payment.charged.pack_id.as_str())
            .bind(&payment.charged.name)
            .bind(payment.charged.operator_price)
            .bind(payment.charged.customer_price)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error("insert payment"))?;
        }
        Ok(())
    }

    async fn update_payment(&mut self, payment: &Payment) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET paid_at = $3, migrated_to = $4, is_migration = $5,
                pack_id = $6, pack_name = $7, operator_price = $8, customer_price = $9
            WHERE tenant_id = $1 AND id = $2 AND billing_month = $10
            "#,
        )
        .bind(payment.tenant_id.as_str())
        .bind(payment.id.as_str())
        .bind(payment.date)
        .bind(payment.migrated_to.as_ref().map(PackId::as_str))
        .bind(payment.is_migration)
        .bind(payment.charged.pack_id.as_str())
        .bind(&payment.charged.name)
        .bind(payment.charged.operator_price)
        .bind(payment.charged.customer_price)
        .bind(payment.billing_month.first_day())
        .execute(&mut *self.tx)
        .await
        .map_err(db_error("update payment"))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::NotFound(format!("payment {}", payment.id)));
        }
        Ok(())
    }

    async fn delete_payment(&mut self, tenant: &TenantId, id: &PaymentId) -> Result<()> {
        let result = sqlx::query("DELETE FROM payments WHERE tenant_id = $1 AND id = $2")
            .bind(tenant.as_str())
            .bind(id.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(db_error("delete payment"))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::NotFound(format!("payment {}", id)));
        }
        Ok(())
    }

    async fn set_billing_pointer(
        &mut self,
        tenant: &TenantId,
        connections: &[ConnectionId],
        pointer: BillingPointer,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE connections
            SET current_plan_id = COALESCE($3, current_plan_id),
                last_payment_at = $4,
                updated_at = NOW()
            WHERE tenant_id = $1 AND id = ANY($2)
            "#,
        )
        .bind(tenant.as_str())
        .bind(ids_as_strings(connections))
        .bind(pointer.plan_id.as_ref().map(PackId::as_str))
        .bind(pointer.last_payment_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error("update billing pointer"))?;

        if result.rows_affected() != connections.len() as u64 {
            return Err(DomainError::NotFound(format!(
                "{} of {} connections",
                connections.len() as u64 - result.rows_affected(),
                connections.len()
            )));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(db_error("commit"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_row_conversion() {
        let row = PaymentRow {
            id: "pay1".to_string(),
            tenant_id: "t1".to_string(),
            connection_id: "c1".to_string(),
            billing_month: NaiveDate::from_ymd_opt(2026, 10, 1).unwrap(),
            paid_at: Utc::now(),
            plan_at_charge: "basic".to_string(),
            migrated_to: Some("premium".to_string()),
            is_migration: true,
            pack_id: "premium".to_string(),
            pack_name: "PREMIUM".to_string(),
            operator_price: 250,
            customer_price: 300,
        };

        let payment = Payment::try_from(row).unwrap();
        assert_eq!(payment.billing_month.to_string(), "2026-10");
        assert_eq!(payment.resulting_plan(), &PackId::new("premium"));
        assert_eq!(payment.price_charged(), 300);
    }

    #[test]
    fn test_pool_errors_are_unavailable() {
        let err = db_error("test")(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, DomainError::Unavailable(_)));
        assert!(!err.is_retryable());

        let err = db_error("test")(sqlx::Error::RowNotFound);
        assert!(matches!(err, DomainError::Internal(_)));
    }
}
