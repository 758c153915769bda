//! Postgres-backed ledger store.
//!
//! Every statement is scoped by `tenant_id`. Balance and transfer reads inside a
//! transaction use `SELECT ... FOR UPDATE`, and every write of a versioned row is
//! `UPDATE ... WHERE version = $expected`; zero affected rows means another writer got
//! there first.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | LedgerError | Scenario |
//! |------------|----------------------|-------------|----------|
//! | Database (unique violation) | `23505` | `Conflict` | Concurrent insert of the same live balance or transfer number |
//! | Database (serialization failure) | `40001` | `Conflict` | Serializable isolation abort |
//! | Database (deadlock detected) | `40P01` | `Conflict` | Two transactions locking balances in opposite order |
//! | Database (lock not available) | `55P03` | `Conflict` | `lock_timeout` expired waiting for a row lock |
//! | Database (other) | Any other | `Storage` | Check constraints, missing tables... |
//! | Other | N/A | `Storage` | Pool closed, network errors, decode failures |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use stockledger_core::{
    AdjustmentId, BalanceId, Entity, LedgerError, LedgerResult, MovementId, ProductId, StoreId,
    TenantId, TransferId, UomId, UserId,
};
use stockledger_inventory::{
    Adjustment, AdjustmentType, BalanceRow, DocumentCode, MovementEntry, MovementFilter,
    MovementRecord, StockBalance, Transfer, TransferLine, TransferRow, UomAudit,
};

use super::r#trait::{BalanceFilter, LedgerStore, LedgerTx, TransferFilter};

const SCHEMA: &str = include_str!("../../migrations/0001_stock_ledger.sql");

#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
    lock_timeout: Duration,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self {
            pool: Arc::new(pool),
            lock_timeout,
        }
    }

    /// Create tables and indexes if they do not exist.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> LedgerResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    async fn acquire(&self) -> LedgerResult<sqlx::pool::PoolConnection<Postgres>> {
        self.pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire_connection", e))
    }
}

pub struct PostgresLedgerTx {
    tx: Transaction<'static, Postgres>,
}

impl core::fmt::Debug for PostgresLedgerTx {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PostgresLedgerTx").finish_non_exhaustive()
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    type Tx = PostgresLedgerTx;

    #[instrument(skip(self), err)]
    async fn begin(&self) -> LedgerResult<Self::Tx> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout.as_millis()))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_lock_timeout", e))?;

        Ok(PostgresLedgerTx { tx })
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, balance_id = %balance_id), err)]
    async fn find_balance(
        &self,
        tenant_id: TenantId,
        balance_id: BalanceId,
    ) -> LedgerResult<Option<StockBalance>> {
        let mut conn = self.acquire().await?;
        let balance = select_balance(&mut conn, tenant_id, balance_id, false).await?;
        Ok(balance.filter(|b| !b.is_deleted()))
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn find_balance_for(
        &self,
        tenant_id: TenantId,
        store_id: StoreId,
        product_id: ProductId,
    ) -> LedgerResult<Option<StockBalance>> {
        let mut conn = self.acquire().await?;
        select_live_balance(&mut conn, tenant_id, store_id, product_id, false).await
    }

    #[instrument(skip(self, filter), fields(tenant_id = %tenant_id), err)]
    async fn list_balances(
        &self,
        tenant_id: TenantId,
        filter: &BalanceFilter,
    ) -> LedgerResult<Vec<StockBalance>> {
        let rows = sqlx::query(
            r#"
            SELECT id, tenant_id, store_id, product_id, current_stock, minimum_stock,
                   version, created_at, updated_at, deleted_at
            FROM stock_balances
            WHERE tenant_id = $1
                AND ($2::uuid IS NULL OR store_id = $2)
                AND ($3::uuid IS NULL OR product_id = $3)
                AND ($4 OR deleted_at IS NULL)
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(filter.store_id.map(|s| *s.as_uuid()))
        .bind(filter.product_id.map(|p| *p.as_uuid()))
        .bind(filter.include_deleted)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_balances", e))?;

        rows.iter().map(balance_from_row).collect()
    }

    #[instrument(skip(self, filter), fields(tenant_id = %tenant_id), err)]
    async fn query_movements(
        &self,
        tenant_id: TenantId,
        filter: &MovementFilter,
        limit: usize,
    ) -> LedgerResult<Vec<MovementEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT m.id, m.tenant_id, m.balance_id, m.quantity, m.movement_type, m.reason,
                   m.user_id, m.occurred_at, m.reference, m.uom_id, m.uom_code,
                   m.entered_quantity, m.conversion_factor, b.store_id, b.product_id
            FROM stock_movements m
            JOIN stock_balances b ON b.id = m.balance_id
            WHERE m.tenant_id = $1
                AND ($2::uuid IS NULL OR b.store_id = $2)
                AND ($3::uuid IS NULL OR b.product_id = $3)
                AND ($4::timestamptz IS NULL OR m.occurred_at >= $4)
                AND ($5::timestamptz IS NULL OR m.occurred_at < $5)
                AND ($6::text IS NULL OR m.reference = $6)
            ORDER BY m.occurred_at DESC, m.seq DESC
            LIMIT $7
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(filter.store_id.map(|s| *s.as_uuid()))
        .bind(filter.product_id.map(|p| *p.as_uuid()))
        .bind(filter.from)
        .bind(filter.until)
        .bind(filter.reference.as_deref())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("query_movements", e))?;

        rows.iter()
            .map(|row| {
                Ok(MovementEntry {
                    movement: movement_from_row(row)?,
                    store_id: StoreId::from_uuid(get(row, "store_id")?),
                    product_id: ProductId::from_uuid(get(row, "product_id")?),
                })
            })
            .collect()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, balance_id = %balance_id), err)]
    async fn movements_for_balance(
        &self,
        tenant_id: TenantId,
        balance_id: BalanceId,
    ) -> LedgerResult<Vec<MovementRecord>> {
        let mut conn = self.acquire().await?;
        select_balance_movements(&mut conn, tenant_id, balance_id).await
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, transfer_id = %transfer_id), err)]
    async fn find_transfer(
        &self,
        tenant_id: TenantId,
        transfer_id: TransferId,
    ) -> LedgerResult<Option<Transfer>> {
        let mut conn = self.acquire().await?;
        select_transfer(&mut conn, tenant_id, transfer_id, false).await
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn find_transfer_by_number(
        &self,
        tenant_id: TenantId,
        number: &str,
    ) -> LedgerResult<Option<Transfer>> {
        let mut conn = self.acquire().await?;
        let id: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM transfers WHERE tenant_id = $1 AND transfer_number = $2",
        )
        .bind(tenant_id.as_uuid())
        .bind(number)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("find_transfer_by_number", e))?;

        match id {
            Some(id) => select_transfer(&mut conn, tenant_id, TransferId::from_uuid(id), false).await,
            None => Ok(None),
        }
    }

    #[instrument(skip(self, filter), fields(tenant_id = %tenant_id), err)]
    async fn list_transfers(
        &self,
        tenant_id: TenantId,
        filter: &TransferFilter,
    ) -> LedgerResult<Vec<Transfer>> {
        let mut conn = self.acquire().await?;
        let headers = sqlx::query(
            r#"
            SELECT id, tenant_id, transfer_number, origin_store_id, destination_store_id,
                   status, requested_by, received_by, notes, created_at, completed_at,
                   cancelled_at, version
            FROM transfers
            WHERE tenant_id = $1
                AND ($2::uuid IS NULL OR origin_store_id = $2)
                AND ($3::uuid IS NULL OR destination_store_id = $3)
                AND ($4::text IS NULL OR status = $4)
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(filter.origin_store_id.map(|s| *s.as_uuid()))
        .bind(filter.destination_store_id.map(|s| *s.as_uuid()))
        .bind(filter.status.map(|s| s.as_str()))
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("list_transfers", e))?;

        let ids: Vec<Uuid> = headers
            .iter()
            .map(|row| get::<Uuid>(row, "id"))
            .collect::<LedgerResult<_>>()?;
        let mut lines = select_transfer_lines(&mut conn, &ids).await?;

        headers
            .iter()
            .map(|row| {
                let id: Uuid = get(row, "id")?;
                let own = lines.remove(&id).unwrap_or_default();
                transfer_from_row(row, own)
            })
            .collect()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn list_adjustments(
        &self,
        tenant_id: TenantId,
        balance_id: Option<BalanceId>,
    ) -> LedgerResult<Vec<Adjustment>> {
        let rows = sqlx::query(
            r#"
            SELECT id, tenant_id, balance_id, adjustment_type, quantity, is_positive,
                   previous_stock, new_stock, reason, user_id, adjusted_at, reference
            FROM stock_adjustments
            WHERE tenant_id = $1 AND ($2::uuid IS NULL OR balance_id = $2)
            ORDER BY adjusted_at DESC, seq DESC
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(balance_id.map(|b| *b.as_uuid()))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_adjustments", e))?;

        rows.iter().map(adjustment_from_row).collect()
    }
}

#[async_trait]
impl LedgerTx for PostgresLedgerTx {
    async fn lock_balance(
        &mut self,
        tenant_id: TenantId,
        balance_id: BalanceId,
    ) -> LedgerResult<Option<StockBalance>> {
        select_balance(&mut self.tx, tenant_id, balance_id, true).await
    }

    async fn lock_balance_for(
        &mut self,
        tenant_id: TenantId,
        store_id: StoreId,
        product_id: ProductId,
    ) -> LedgerResult<Option<StockBalance>> {
        select_live_balance(&mut self.tx, tenant_id, store_id, product_id, true).await
    }

    async fn lock_balance_rows(
        &mut self,
        store_id: StoreId,
        product_id: ProductId,
    ) -> LedgerResult<Vec<StockBalance>> {
        let rows = sqlx::query(
            r#"
            SELECT id, tenant_id, store_id, product_id, current_stock, minimum_stock,
                   version, created_at, updated_at, deleted_at
            FROM stock_balances
            WHERE store_id = $1 AND product_id = $2
            ORDER BY created_at ASC
            FOR UPDATE
            "#,
        )
        .bind(store_id.as_uuid())
        .bind(product_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("lock_balance_rows", e))?;

        rows.iter().map(balance_from_row).collect()
    }

    async fn movements_for_balance(
        &mut self,
        tenant_id: TenantId,
        balance_id: BalanceId,
    ) -> LedgerResult<Vec<MovementRecord>> {
        select_balance_movements(&mut self.tx, tenant_id, balance_id).await
    }

    async fn insert_balance(&mut self, balance: &mut StockBalance) -> LedgerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO stock_balances (
                id, tenant_id, store_id, product_id, current_stock, minimum_stock,
                version, created_at, updated_at, deleted_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(balance.id_typed().as_uuid())
        .bind(balance.tenant_id().as_uuid())
        .bind(balance.store_id().as_uuid())
        .bind(balance.product_id().as_uuid())
        .bind(balance.current_stock())
        .bind(balance.minimum_stock())
        .bind(to_db_version(balance.version() + 1))
        .bind(balance.created_at())
        .bind(balance.updated_at())
        .bind(balance.deleted_at())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_balance", e))?;

        balance.mark_persisted();
        Ok(())
    }

    async fn save_balance(&mut self, balance: &mut StockBalance) -> LedgerResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE stock_balances
            SET current_stock = $3,
                minimum_stock = $4,
                updated_at = $5,
                deleted_at = $6,
                version = version + 1
            WHERE tenant_id = $1 AND id = $2 AND version = $7
            "#,
        )
        .bind(balance.tenant_id().as_uuid())
        .bind(balance.id_typed().as_uuid())
        .bind(balance.current_stock())
        .bind(balance.minimum_stock())
        .bind(balance.updated_at())
        .bind(balance.deleted_at())
        .bind(to_db_version(balance.version()))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("save_balance", e))?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::conflict(format!(
                "stock balance {} changed since version {}",
                balance.id_typed(),
                balance.version()
            )));
        }
        balance.mark_persisted();
        Ok(())
    }

    async fn append_movement(&mut self, movement: &MovementRecord) -> LedgerResult<()> {
        let uom = movement.uom.as_ref();
        sqlx::query(
            r#"
            INSERT INTO stock_movements (
                id, tenant_id, balance_id, quantity, movement_type, reason, user_id,
                occurred_at, reference, uom_id, uom_code, entered_quantity, conversion_factor
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(movement.id.as_uuid())
        .bind(movement.tenant_id.as_uuid())
        .bind(movement.balance_id.as_uuid())
        .bind(movement.quantity)
        .bind(movement.movement_type.as_str())
        .bind(&movement.reason)
        .bind(movement.user_id.as_uuid())
        .bind(movement.occurred_at)
        .bind(movement.reference.as_deref())
        .bind(uom.and_then(|u| u.uom_id).map(|id| *id.as_uuid()))
        .bind(uom.and_then(|u| u.uom_code.as_deref()))
        .bind(uom.map(|u| u.entered_quantity))
        .bind(uom.map(|u| u.conversion_factor))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("append_movement", e))?;
        Ok(())
    }

    async fn insert_adjustment(&mut self, adjustment: &Adjustment) -> LedgerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO stock_adjustments (
                id, tenant_id, balance_id, adjustment_type, quantity, is_positive,
                previous_stock, new_stock, reason, user_id, adjusted_at, reference
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(adjustment.id.as_uuid())
        .bind(adjustment.tenant_id.as_uuid())
        .bind(adjustment.balance_id.as_uuid())
        .bind(adjustment.adjustment_type.code())
        .bind(adjustment.quantity)
        .bind(adjustment.is_positive)
        .bind(adjustment.previous_stock)
        .bind(adjustment.new_stock)
        .bind(&adjustment.reason)
        .bind(adjustment.user_id.as_uuid())
        .bind(adjustment.adjusted_at)
        .bind(adjustment.reference.as_deref())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_adjustment", e))?;
        Ok(())
    }

    async fn insert_transfer(&mut self, transfer: &mut Transfer) -> LedgerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO transfers (
                id, tenant_id, transfer_number, origin_store_id, destination_store_id,
                status, requested_by, received_by, notes, created_at, completed_at,
                cancelled_at, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(transfer.id_typed().as_uuid())
        .bind(transfer.tenant_id().as_uuid())
        .bind(transfer.number().as_str())
        .bind(transfer.origin_store_id().as_uuid())
        .bind(transfer.destination_store_id().as_uuid())
        .bind(transfer.status().as_str())
        .bind(transfer.requested_by().as_uuid())
        .bind(transfer.received_by().map(|u| *u.as_uuid()))
        .bind(transfer.notes())
        .bind(transfer.created_at())
        .bind(transfer.completed_at())
        .bind(transfer.cancelled_at())
        .bind(to_db_version(transfer.version() + 1))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_transfer", e))?;

        for line in transfer.lines() {
            let uom = line.uom.as_ref();
            sqlx::query(
                r#"
                INSERT INTO transfer_lines (
                    transfer_id, line_no, product_id, quantity, uom_id, uom_code,
                    entered_quantity, conversion_factor
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(transfer.id_typed().as_uuid())
            .bind(
                i32::try_from(line.line_no)
                    .map_err(|_| LedgerError::storage(format!("invalid transfer line_no {}", line.line_no)))?,
            )
            .bind(line.product_id.as_uuid())
            .bind(line.quantity)
            .bind(uom.and_then(|u| u.uom_id).map(|id| *id.as_uuid()))
            .bind(uom.and_then(|u| u.uom_code.as_deref()))
            .bind(uom.map(|u| u.entered_quantity))
            .bind(uom.map(|u| u.conversion_factor))
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert_transfer_line", e))?;
        }

        transfer.mark_persisted();
        Ok(())
    }

    async fn lock_transfer(
        &mut self,
        tenant_id: TenantId,
        transfer_id: TransferId,
    ) -> LedgerResult<Option<Transfer>> {
        select_transfer(&mut self.tx, tenant_id, transfer_id, true).await
    }

    async fn save_transfer(&mut self, transfer: &mut Transfer) -> LedgerResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE transfers
            SET status = $3,
                received_by = $4,
                completed_at = $5,
                cancelled_at = $6,
                version = version + 1
            WHERE tenant_id = $1 AND id = $2 AND version = $7
            "#,
        )
        .bind(transfer.tenant_id().as_uuid())
        .bind(transfer.id_typed().as_uuid())
        .bind(transfer.status().as_str())
        .bind(transfer.received_by().map(|u| *u.as_uuid()))
        .bind(transfer.completed_at())
        .bind(transfer.cancelled_at())
        .bind(to_db_version(transfer.version()))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("save_transfer", e))?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::conflict(format!(
                "transfer {} changed since version {}",
                transfer.number(),
                transfer.version()
            )));
        }
        transfer.mark_persisted();
        Ok(())
    }

    async fn commit(self) -> LedgerResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }
}

async fn select_balance(
    conn: &mut PgConnection,
    tenant_id: TenantId,
    balance_id: BalanceId,
    for_update: bool,
) -> LedgerResult<Option<StockBalance>> {
    let sql = if for_update {
        r#"
        SELECT id, tenant_id, store_id, product_id, current_stock, minimum_stock,
               version, created_at, updated_at, deleted_at
        FROM stock_balances
        WHERE tenant_id = $1 AND id = $2
        FOR UPDATE
        "#
    } else {
        r#"
        SELECT id, tenant_id, store_id, product_id, current_stock, minimum_stock,
               version, created_at, updated_at, deleted_at
        FROM stock_balances
        WHERE tenant_id = $1 AND id = $2
        "#
    };

    let row = sqlx::query(sql)
        .bind(tenant_id.as_uuid())
        .bind(balance_id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("select_balance", e))?;

    row.as_ref().map(balance_from_row).transpose()
}

async fn select_balance_movements(
    conn: &mut PgConnection,
    tenant_id: TenantId,
    balance_id: BalanceId,
) -> LedgerResult<Vec<MovementRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT id, tenant_id, balance_id, quantity, movement_type, reason, user_id,
               occurred_at, reference, uom_id, uom_code, entered_quantity, conversion_factor
        FROM stock_movements
        WHERE tenant_id = $1 AND balance_id = $2
        ORDER BY seq ASC
        "#,
    )
    .bind(tenant_id.as_uuid())
    .bind(balance_id.as_uuid())
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("movements_for_balance", e))?;

    rows.iter().map(movement_from_row).collect()
}

async fn select_live_balance(
    conn: &mut PgConnection,
    tenant_id: TenantId,
    store_id: StoreId,
    product_id: ProductId,
    for_update: bool,
) -> LedgerResult<Option<StockBalance>> {
    let sql = if for_update {
        r#"
        SELECT id, tenant_id, store_id, product_id, current_stock, minimum_stock,
               version, created_at, updated_at, deleted_at
        FROM stock_balances
        WHERE tenant_id = $1 AND store_id = $2 AND product_id = $3 AND deleted_at IS NULL
        FOR UPDATE
        "#
    } else {
        r#"
        SELECT id, tenant_id, store_id, product_id, current_stock, minimum_stock,
               version, created_at, updated_at, deleted_at
        FROM stock_balances
        WHERE tenant_id = $1 AND store_id = $2 AND product_id = $3 AND deleted_at IS NULL
        "#
    };

    let row = sqlx::query(sql)
        .bind(tenant_id.as_uuid())
        .bind(store_id.as_uuid())
        .bind(product_id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("select_live_balance", e))?;

    row.as_ref().map(balance_from_row).transpose()
}

async fn select_transfer(
    conn: &mut PgConnection,
    tenant_id: TenantId,
    transfer_id: TransferId,
    for_update: bool,
) -> LedgerResult<Option<Transfer>> {
    let sql = if for_update {
        r#"
        SELECT id, tenant_id, transfer_number, origin_store_id, destination_store_id,
               status, requested_by, received_by, notes, created_at, completed_at,
               cancelled_at, version
        FROM transfers
        WHERE tenant_id = $1 AND id = $2
        FOR UPDATE
        "#
    } else {
        r#"
        SELECT id, tenant_id, transfer_number, origin_store_id, destination_store_id,
               status, requested_by, received_by, notes, created_at, completed_at,
               cancelled_at, version
        FROM transfers
        WHERE tenant_id = $1 AND id = $2
        "#
    };

    let Some(row) = sqlx::query(sql)
        .bind(tenant_id.as_uuid())
        .bind(transfer_id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("select_transfer", e))?
    else {
        return Ok(None);
    };

    let id = *transfer_id.as_uuid();
    let mut lines = select_transfer_lines(conn, &[id]).await?;
    transfer_from_row(&row, lines.remove(&id).unwrap_or_default()).map(Some)
}

async fn select_transfer_lines(
    conn: &mut PgConnection,
    transfer_ids: &[Uuid],
) -> LedgerResult<std::collections::HashMap<Uuid, Vec<TransferLine>>> {
    let mut out: std::collections::HashMap<Uuid, Vec<TransferLine>> = Default::default();
    if transfer_ids.is_empty() {
        return Ok(out);
    }

    let rows = sqlx::query(
        r#"
        SELECT transfer_id, line_no, product_id, quantity, uom_id, uom_code,
               entered_quantity, conversion_factor
        FROM transfer_lines
        WHERE transfer_id = ANY($1)
        ORDER BY transfer_id, line_no ASC
        "#,
    )
    .bind(transfer_ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("select_transfer_lines", e))?;

    for row in &rows {
        let transfer_id: Uuid = get(row, "transfer_id")?;
        let line_no: i32 = get(row, "line_no")?;
        let line = TransferLine {
            line_no: u32::try_from(line_no)
                .map_err(|_| LedgerError::storage(format!("invalid transfer line_no {line_no}")))?,
            product_id: ProductId::from_uuid(get(row, "product_id")?),
            quantity: get(row, "quantity")?,
            uom: uom_from_row(row)?,
        };
        out.entry(transfer_id).or_default().push(line);
    }
    Ok(out)
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> LedgerResult<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| LedgerError::storage(format!("failed to read column {column}: {e}")))
}

fn from_db_version(version: i64) -> LedgerResult<u64> {
    u64::try_from(version).map_err(|_| LedgerError::storage(format!("invalid row version {version}")))
}

fn to_db_version(version: u64) -> i64 {
    i64::try_from(version).unwrap_or(i64::MAX)
}

fn balance_from_row(row: &PgRow) -> LedgerResult<StockBalance> {
    Ok(StockBalance::from_row(BalanceRow {
        id: BalanceId::from_uuid(get(row, "id")?),
        tenant_id: TenantId::from_uuid(get(row, "tenant_id")?),
        store_id: StoreId::from_uuid(get(row, "store_id")?),
        product_id: ProductId::from_uuid(get(row, "product_id")?),
        current_stock: get(row, "current_stock")?,
        minimum_stock: get(row, "minimum_stock")?,
        version: from_db_version(get(row, "version")?)?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
        deleted_at: get(row, "deleted_at")?,
    }))
}

fn uom_from_row(row: &PgRow) -> LedgerResult<Option<UomAudit>> {
    let entered: Option<Decimal> = get(row, "entered_quantity")?;
    let Some(entered_quantity) = entered else {
        return Ok(None);
    };
    let uom_id: Option<Uuid> = get(row, "uom_id")?;
    let factor: Option<Decimal> = get(row, "conversion_factor")?;
    Ok(Some(UomAudit {
        uom_id: uom_id.map(UomId::from_uuid),
        uom_code: get(row, "uom_code")?,
        entered_quantity,
        conversion_factor: factor.unwrap_or(Decimal::ONE),
    }))
}

fn movement_from_row(row: &PgRow) -> LedgerResult<MovementRecord> {
    let movement_type: String = get(row, "movement_type")?;
    Ok(MovementRecord {
        id: MovementId::from_uuid(get(row, "id")?),
        tenant_id: TenantId::from_uuid(get(row, "tenant_id")?),
        balance_id: BalanceId::from_uuid(get(row, "balance_id")?),
        quantity: get(row, "quantity")?,
        movement_type: movement_type
            .parse()
            .map_err(|e| LedgerError::storage(format!("stored movement type: {e}")))?,
        reason: get(row, "reason")?,
        user_id: UserId::from_uuid(get(row, "user_id")?),
        occurred_at: get(row, "occurred_at")?,
        reference: get(row, "reference")?,
        uom: uom_from_row(row)?,
    })
}

fn adjustment_from_row(row: &PgRow) -> LedgerResult<Adjustment> {
    let adjustment_type: String = get(row, "adjustment_type")?;
    Ok(Adjustment {
        id: AdjustmentId::from_uuid(get(row, "id")?),
        tenant_id: TenantId::from_uuid(get(row, "tenant_id")?),
        balance_id: BalanceId::from_uuid(get(row, "balance_id")?),
        adjustment_type: adjustment_type
            .parse::<AdjustmentType>()
            .map_err(|e| LedgerError::storage(format!("stored adjustment type: {e}")))?,
        quantity: get(row, "quantity")?,
        is_positive: get(row, "is_positive")?,
        previous_stock: get(row, "previous_stock")?,
        new_stock: get(row, "new_stock")?,
        reason: get(row, "reason")?,
        user_id: UserId::from_uuid(get(row, "user_id")?),
        adjusted_at: get(row, "adjusted_at")?,
        reference: get(row, "reference")?,
    })
}

fn transfer_from_row(row: &PgRow, lines: Vec<TransferLine>) -> LedgerResult<Transfer> {
    let number: String = get(row, "transfer_number")?;
    let status: String = get(row, "status")?;
    let received_by: Option<Uuid> = get(row, "received_by")?;
    let completed_at: Option<DateTime<Utc>> = get(row, "completed_at")?;
    let cancelled_at: Option<DateTime<Utc>> = get(row, "cancelled_at")?;

    Ok(Transfer::from_row(TransferRow {
        id: TransferId::from_uuid(get(row, "id")?),
        tenant_id: TenantId::from_uuid(get(row, "tenant_id")?),
        number: DocumentCode::parse(&number)
            .map_err(|e| LedgerError::storage(format!("stored transfer number: {e}")))?,
        origin_store_id: StoreId::from_uuid(get(row, "origin_store_id")?),
        destination_store_id: StoreId::from_uuid(get(row, "destination_store_id")?),
        status: status
            .parse()
            .map_err(|e| LedgerError::storage(format!("stored transfer status: {e}")))?,
        requested_by: UserId::from_uuid(get(row, "requested_by")?),
        received_by: received_by.map(UserId::from_uuid),
        notes: get(row, "notes")?,
        created_at: get(row, "created_at")?,
        completed_at,
        cancelled_at,
        version: from_db_version(get(row, "version")?)?,
        lines,
    }))
}

/// Map SQLx errors to LedgerError.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // unique violation, serialization failure, deadlock, lock timeout
                Some("23505") | Some("40001") | Some("40P01") | Some("55P03") => {
                    LedgerError::Conflict(msg)
                }
                _ => LedgerError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            LedgerError::Storage(format!("connection pool closed in {}", operation))
        }
        _ => LedgerError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use stockledger_inventory::MovementType;

    async fn connect() -> Option<PostgresLedgerStore> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let pool = PgPool::connect(&url).await.ok()?;
        let store = PostgresLedgerStore::new(pool, Duration::from_millis(2000));
        store.migrate().await.ok()?;
        Some(store)
    }

    #[test]
    fn non_database_errors_map_to_storage() {
        assert!(matches!(
            map_sqlx_error("op", sqlx::Error::PoolClosed),
            LedgerError::Storage(_)
        ));
        let err = map_sqlx_error("select_balance", sqlx::Error::RowNotFound);
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("select_balance"));
    }

    #[tokio::test]
    async fn round_trips_a_balance_and_its_movement() {
        let Some(store) = connect().await else {
            return;
        };
        let tenant = TenantId::new();
        let mut balance =
            StockBalance::open(tenant, StoreId::new(), ProductId::new(), 10, Utc::now()).unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.insert_balance(&mut balance).await.unwrap();
        balance.add_stock(7, Utc::now()).unwrap();
        tx.save_balance(&mut balance).await.unwrap();
        let movement =
            MovementRecord::new(&balance, 7, MovementType::Entry, "x", UserId::new(), Utc::now())
                .unwrap()
                .with_reference("C-1");
        tx.append_movement(&movement).await.unwrap();
        tx.commit().await.unwrap();

        let stored = store
            .find_balance(tenant, balance.id_typed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.current_stock(), 7);
        assert_eq!(stored.version(), balance.version());

        let filter = MovementFilter {
            reference: Some("C-1".to_string()),
            ..Default::default()
        };
        let found = store.query_movements(tenant, &filter, 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].movement.quantity, 7);
    }

    #[tokio::test]
    async fn stale_write_is_a_conflict() {
        let Some(store) = connect().await else {
            return;
        };
        let tenant = TenantId::new();
        let mut balance =
            StockBalance::open(tenant, StoreId::new(), ProductId::new(), 0, Utc::now()).unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.insert_balance(&mut balance).await.unwrap();
        let mut stale = balance.clone();
        tx.save_balance(&mut balance).await.unwrap();
        assert!(matches!(
            tx.save_balance(&mut stale).await,
            Err(LedgerError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn uom_audit_values_keep_full_precision() {
        let Some(store) = connect().await else {
            return;
        };
        let tenant = TenantId::new();
        let mut balance =
            StockBalance::open(tenant, StoreId::new(), ProductId::new(), 0, Utc::now()).unwrap();
        let audit = UomAudit {
            uom_id: Some(UomId::new()),
            uom_code: Some("TER".to_string()),
            entered_quantity: dec!(1000000000000000.12345),
            conversion_factor: dec!(0.3333333),
        };

        let mut tx = store.begin().await.unwrap();
        tx.insert_balance(&mut balance).await.unwrap();
        balance.add_stock(3, Utc::now()).unwrap();
        tx.save_balance(&mut balance).await.unwrap();
        let movement =
            MovementRecord::new(&balance, 3, MovementType::Entry, "x", UserId::new(), Utc::now())
                .unwrap()
                .with_uom(Some(audit.clone()));
        tx.append_movement(&movement).await.unwrap();
        tx.commit().await.unwrap();

        let stored = store
            .movements_for_balance(tenant, balance.id_typed())
            .await
            .unwrap();
        assert_eq!(stored[0].uom.as_ref(), Some(&audit));
    }

    #[tokio::test]
    async fn archived_balance_is_only_visible_through_locking_reads() {
        let Some(store) = connect().await else {
            return;
        };
        let tenant = TenantId::new();
        let mut balance =
            StockBalance::open(tenant, StoreId::new(), ProductId::new(), 0, Utc::now()).unwrap();
        let mut tx = store.begin().await.unwrap();
        tx.insert_balance(&mut balance).await.unwrap();
        balance.soft_delete(Utc::now());
        tx.save_balance(&mut balance).await.unwrap();
        tx.commit().await.unwrap();

        assert!(store.find_balance(tenant, balance.id_typed()).await.unwrap().is_none());
        let mut tx = store.begin().await.unwrap();
        assert!(tx.lock_balance(tenant, balance.id_typed()).await.unwrap().is_some());
    }
}
