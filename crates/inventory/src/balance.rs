//! Per-store stock balances.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{
    BalanceId, Entity, LedgerError, LedgerResult, ProductId, StoreId, TenantId,
};

/// On-hand quantity of one product at one store, in base units.
///
/// There is exactly one live (non-deleted) balance per (tenant, store, product).
/// `current_stock` only changes through [`StockBalance::add_stock`] and
/// [`StockBalance::remove_stock`], and never goes below zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockBalance {
    id: BalanceId,
    tenant_id: TenantId,
    store_id: StoreId,
    product_id: ProductId,
    current_stock: i64,
    minimum_stock: i64,
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

/// Column-level view used by storage adapters to rebuild a balance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceRow {
    pub id: BalanceId,
    pub tenant_id: TenantId,
    pub store_id: StoreId,
    pub product_id: ProductId,
    pub current_stock: i64,
    pub minimum_stock: i64,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl StockBalance {
    /// A fresh balance starts empty; stock arrives only through movements.
    pub fn open(
        tenant_id: TenantId,
        store_id: StoreId,
        product_id: ProductId,
        minimum_stock: i64,
        now: DateTime<Utc>,
    ) -> LedgerResult<Self> {
        ensure_minimum(minimum_stock)?;
        Ok(Self {
            id: BalanceId::new(),
            tenant_id,
            store_id,
            product_id,
            current_stock: 0,
            minimum_stock,
            version: 0,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        })
    }

    pub fn from_row(row: BalanceRow) -> Self {
        Self {
            id: row.id,
            tenant_id: row.tenant_id,
            store_id: row.store_id,
            product_id: row.product_id,
            current_stock: row.current_stock,
            minimum_stock: row.minimum_stock,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        }
    }

    pub fn id_typed(&self) -> BalanceId {
        self.id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn store_id(&self) -> StoreId {
        self.store_id
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn current_stock(&self) -> i64 {
        self.current_stock
    }

    pub fn minimum_stock(&self) -> i64 {
        self.minimum_stock
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_low_stock(&self) -> bool {
        self.current_stock <= self.minimum_stock
    }

    pub fn ensure_tenant(&self, tenant_id: TenantId) -> LedgerResult<()> {
        if self.tenant_id != tenant_id {
            return Err(LedgerError::not_found("stock balance", self.id));
        }
        Ok(())
    }

    pub fn add_stock(&mut self, quantity: i64, now: DateTime<Utc>) -> LedgerResult<()> {
        ensure_non_negative(quantity)?;
        self.current_stock = self
            .current_stock
            .checked_add(quantity)
            .ok_or_else(|| LedgerError::invalid_argument("stock would overflow"))?;
        self.updated_at = now;
        Ok(())
    }

    pub fn remove_stock(&mut self, quantity: i64, now: DateTime<Utc>) -> LedgerResult<()> {
        ensure_non_negative(quantity)?;
        if quantity > self.current_stock {
            return Err(LedgerError::InsufficientStock {
                product_id: self.product_id,
                store_id: self.store_id,
                available: self.current_stock,
                requested: quantity,
            });
        }
        self.current_stock -= quantity;
        self.updated_at = now;
        Ok(())
    }

    /// Apply a signed delta through `add_stock`/`remove_stock`.
    pub fn apply_delta(&mut self, delta: i64, now: DateTime<Utc>) -> LedgerResult<()> {
        if delta >= 0 {
            self.add_stock(delta, now)
        } else {
            self.remove_stock(delta.checked_neg().unwrap_or(i64::MAX), now)
        }
    }

    pub fn update_minimum_stock(&mut self, minimum_stock: i64, now: DateTime<Utc>) -> LedgerResult<()> {
        ensure_minimum(minimum_stock)?;
        self.minimum_stock = minimum_stock;
        self.updated_at = now;
        Ok(())
    }

    pub fn soft_delete(&mut self, now: DateTime<Utc>) {
        self.deleted_at = Some(now);
        self.updated_at = now;
    }

    pub fn restore(&mut self, now: DateTime<Utc>) {
        self.deleted_at = None;
        self.updated_at = now;
    }

    /// Record that the row was persisted at the next version.
    pub fn mark_persisted(&mut self) {
        self.version += 1;
    }
}

impl Entity for StockBalance {
    type Id = BalanceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

fn ensure_non_negative(quantity: i64) -> LedgerResult<()> {
    if quantity < 0 {
        return Err(LedgerError::invalid_argument(format!(
            "stock quantity cannot be negative (got {quantity})"
        )));
    }
    Ok(())
}

fn ensure_minimum(minimum_stock: i64) -> LedgerResult<()> {
    if minimum_stock < 0 {
        return Err(LedgerError::invalid_argument(format!(
            "minimum stock cannot be negative (got {minimum_stock})"
        )));
    }
    Ok(())
}
