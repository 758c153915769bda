//! The single write path for stock.
//!
//! Every engine changes a balance through [`post`], which applies the delta to the
//! locked balance, writes it back and appends the matching movement inside the caller's
//! transaction. There is no other way to change `current_stock`.

use chrono::{DateTime, Utc};
use tracing::warn;

use stockledger_core::{
    BalanceId, LedgerError, LedgerResult, ProductId, StoreId, TenantId, UserId,
};
use stockledger_inventory::{MovementRecord, MovementType, StockBalance, UomAudit};

use crate::ledger_store::LedgerTx;

/// Movement fields supplied by the engine; the signed quantity comes from the posting.
#[derive(Debug, Clone)]
pub(crate) struct MovementDraft {
    pub movement_type: MovementType,
    pub reason: String,
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
    pub reference: Option<String>,
    pub uom: Option<UomAudit>,
}

impl MovementDraft {
    pub fn new(
        movement_type: MovementType,
        reason: impl Into<String>,
        user_id: UserId,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            movement_type,
            reason: reason.into(),
            user_id,
            occurred_at,
            reference: None,
            uom: None,
        }
    }

    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn uom(mut self, uom: Option<UomAudit>) -> Self {
        self.uom = uom;
        self
    }
}

/// Apply a signed delta to a locked balance and append its movement.
pub(crate) async fn post<T: LedgerTx>(
    tx: &mut T,
    balance: &mut StockBalance,
    delta: i64,
    draft: MovementDraft,
) -> LedgerResult<MovementRecord> {
    balance.apply_delta(delta, draft.occurred_at)?;

    let mut movement = MovementRecord::new(
        balance,
        delta,
        draft.movement_type,
        draft.reason,
        draft.user_id,
        draft.occurred_at,
    )?
    .with_uom(draft.uom);
    if let Some(reference) = draft.reference {
        movement = movement.with_reference(reference);
    }

    tx.save_balance(balance).await?;
    tx.append_movement(&movement).await?;
    Ok(movement)
}

pub(crate) async fn post_increase<T: LedgerTx>(
    tx: &mut T,
    balance: &mut StockBalance,
    quantity: i64,
    draft: MovementDraft,
) -> LedgerResult<MovementRecord> {
    ensure_positive(quantity)?;
    post(tx, balance, quantity, draft).await
}

pub(crate) async fn post_decrease<T: LedgerTx>(
    tx: &mut T,
    balance: &mut StockBalance,
    quantity: i64,
    draft: MovementDraft,
) -> LedgerResult<MovementRecord> {
    ensure_positive(quantity)?;
    post(tx, balance, -quantity, draft).await
}

/// Lock a live balance of the tenant by id.
pub(crate) async fn require_balance<T: LedgerTx>(
    tx: &mut T,
    tenant_id: TenantId,
    balance_id: BalanceId,
) -> LedgerResult<StockBalance> {
    tx.lock_balance(tenant_id, balance_id)
        .await?
        .filter(|b| !b.is_deleted())
        .ok_or_else(|| LedgerError::not_found("stock balance", balance_id))
}

/// Lock the live balance for the pair, restoring or creating it when missing.
///
/// Lookup is tenant-scoped. A soft-deleted row of the same tenant is restored with its
/// stock and minimum intact. Rows of other tenants for the same (store, product) are
/// left alone and reported.
pub(crate) async fn get_or_restore<T: LedgerTx>(
    tx: &mut T,
    tenant_id: TenantId,
    store_id: StoreId,
    product_id: ProductId,
    minimum_stock: i64,
    now: DateTime<Utc>,
) -> LedgerResult<StockBalance> {
    let rows = tx.lock_balance_rows(store_id, product_id).await?;

    let foreign = rows.iter().filter(|b| b.tenant_id() != tenant_id).count();
    if foreign > 0 {
        warn!(
            tenant_id = %tenant_id,
            store_id = %store_id,
            product_id = %product_id,
            foreign_rows = foreign,
            "balance rows for this store/product exist under another tenant"
        );
    }

    let mut own: Vec<StockBalance> = rows
        .into_iter()
        .filter(|b| b.tenant_id() == tenant_id)
        .collect();

    if let Some(pos) = own.iter().position(|b| !b.is_deleted()) {
        return Ok(own.swap_remove(pos));
    }

    // Most recently deleted row wins.
    own.sort_by_key(|b| b.deleted_at());
    if let Some(mut deleted) = own.pop() {
        deleted.restore(now);
        tx.save_balance(&mut deleted).await?;
        return Ok(deleted);
    }

    let mut balance = StockBalance::open(tenant_id, store_id, product_id, minimum_stock, now)?;
    tx.insert_balance(&mut balance).await?;
    Ok(balance)
}

fn ensure_positive(quantity: i64) -> LedgerResult<()> {
    if quantity <= 0 {
        return Err(LedgerError::invalid_argument(format!(
            "quantity must be greater than zero (got {quantity})"
        )));
    }
    Ok(())
}
