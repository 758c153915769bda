use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use stockledger_core::{BalanceId, LedgerResult, ProductId, StoreId, TenantId, TransferId};
use stockledger_inventory::{
    Adjustment, MovementEntry, MovementFilter, MovementRecord, StockBalance, Transfer,
    TransferStatus,
};

/// Filter for balance listings. The tenant is always passed separately.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceFilter {
    pub store_id: Option<StoreId>,
    pub product_id: Option<ProductId>,
    /// Include soft-deleted rows.
    pub include_deleted: bool,
}

impl BalanceFilter {
    pub fn matches(&self, balance: &StockBalance) -> bool {
        self.store_id.is_none_or(|s| s == balance.store_id())
            && self.product_id.is_none_or(|p| p == balance.product_id())
            && (self.include_deleted || !balance.is_deleted())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferFilter {
    pub origin_store_id: Option<StoreId>,
    pub destination_store_id: Option<StoreId>,
    pub status: Option<TransferStatus>,
}

impl TransferFilter {
    pub fn matches(&self, transfer: &Transfer) -> bool {
        self.origin_store_id
            .is_none_or(|s| s == transfer.origin_store_id())
            && self
                .destination_store_id
                .is_none_or(|s| s == transfer.destination_store_id())
            && self.status.is_none_or(|s| s == transfer.status())
    }
}

/// Transactional stock ledger storage.
///
/// The store hands out [`LedgerTx`] units of work for every mutation and answers
/// side-effect-free reads directly. Reads never observe uncommitted work.
///
/// ## Implementation Requirements
///
/// Implementations must:
/// - scope every read and write by tenant
/// - keep at most one live balance per (tenant, store, product)
/// - make all writes of a transaction visible together on `commit`, and none of them
///   if the transaction is dropped
/// - return movements and transfers newest first
#[async_trait]
pub trait LedgerStore: Send + Sync {
    type Tx: LedgerTx;

    async fn begin(&self) -> LedgerResult<Self::Tx>;

    /// Live balance by id. Archived rows are only reachable through [`LedgerTx::lock_balance`]
    /// and listings with `include_deleted`.
    async fn find_balance(
        &self,
        tenant_id: TenantId,
        balance_id: BalanceId,
    ) -> LedgerResult<Option<StockBalance>>;

    /// Live balance for the (store, product) pair.
    async fn find_balance_for(
        &self,
        tenant_id: TenantId,
        store_id: StoreId,
        product_id: ProductId,
    ) -> LedgerResult<Option<StockBalance>>;

    async fn list_balances(
        &self,
        tenant_id: TenantId,
        filter: &BalanceFilter,
    ) -> LedgerResult<Vec<StockBalance>>;

    /// Newest first, at most `limit` rows.
    async fn query_movements(
        &self,
        tenant_id: TenantId,
        filter: &MovementFilter,
        limit: usize,
    ) -> LedgerResult<Vec<MovementEntry>>;

    /// Every movement of one balance, oldest first.
    async fn movements_for_balance(
        &self,
        tenant_id: TenantId,
        balance_id: BalanceId,
    ) -> LedgerResult<Vec<MovementRecord>>;

    async fn find_transfer(
        &self,
        tenant_id: TenantId,
        transfer_id: TransferId,
    ) -> LedgerResult<Option<Transfer>>;

    async fn find_transfer_by_number(
        &self,
        tenant_id: TenantId,
        number: &str,
    ) -> LedgerResult<Option<Transfer>>;

    async fn list_transfers(
        &self,
        tenant_id: TenantId,
        filter: &TransferFilter,
    ) -> LedgerResult<Vec<Transfer>>;

    /// Adjustment audit rows, newest first.
    async fn list_adjustments(
        &self,
        tenant_id: TenantId,
        balance_id: Option<BalanceId>,
    ) -> LedgerResult<Vec<Adjustment>>;
}

/// One unit of work against the ledger.
///
/// Balance reads through a transaction are locking reads: once a row is returned, no
/// other transaction can change it until this one ends. Writes check the row version
/// they were read at and fail with `Conflict` on a mismatch.
///
/// Dropping a transaction without calling [`LedgerTx::commit`] rolls it back.
#[async_trait]
pub trait LedgerTx: Send {
    async fn lock_balance(
        &mut self,
        tenant_id: TenantId,
        balance_id: BalanceId,
    ) -> LedgerResult<Option<StockBalance>>;

    /// Live balance for the (store, product) pair, locked.
    async fn lock_balance_for(
        &mut self,
        tenant_id: TenantId,
        store_id: StoreId,
        product_id: ProductId,
    ) -> LedgerResult<Option<StockBalance>>;

    /// Every row for the (store, product) pair under any tenant, deleted or not, locked.
    async fn lock_balance_rows(
        &mut self,
        store_id: StoreId,
        product_id: ProductId,
    ) -> LedgerResult<Vec<StockBalance>>;

    /// Every movement of one balance as this transaction sees it, oldest first.
    async fn movements_for_balance(
        &mut self,
        tenant_id: TenantId,
        balance_id: BalanceId,
    ) -> LedgerResult<Vec<MovementRecord>>;

    /// Insert a fresh balance (version 0) and mark it persisted.
    async fn insert_balance(&mut self, balance: &mut StockBalance) -> LedgerResult<()>;

    /// Write back a locked balance and mark it persisted.
    async fn save_balance(&mut self, balance: &mut StockBalance) -> LedgerResult<()>;

    async fn append_movement(&mut self, movement: &MovementRecord) -> LedgerResult<()>;

    async fn insert_adjustment(&mut self, adjustment: &Adjustment) -> LedgerResult<()>;

    /// Insert a new transfer with its lines and mark it persisted.
    async fn insert_transfer(&mut self, transfer: &mut Transfer) -> LedgerResult<()>;

    async fn lock_transfer(
        &mut self,
        tenant_id: TenantId,
        transfer_id: TransferId,
    ) -> LedgerResult<Option<Transfer>>;

    /// Persist status, receiver and timestamps of a locked transfer.
    async fn save_transfer(&mut self, transfer: &mut Transfer) -> LedgerResult<()>;

    async fn commit(self) -> LedgerResult<()>;
}

#[async_trait]
impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore,
{
    type Tx = S::Tx;

    async fn begin(&self) -> LedgerResult<Self::Tx> {
        (**self).begin().await
    }

    async fn find_balance(
        &self,
        tenant_id: TenantId,
        balance_id: BalanceId,
    ) -> LedgerResult<Option<StockBalance>> {
        (**self).find_balance(tenant_id, balance_id).await
    }

    async fn find_balance_for(
        &self,
        tenant_id: TenantId,
        store_id: StoreId,
        product_id: ProductId,
    ) -> LedgerResult<Option<StockBalance>> {
        (**self).find_balance_for(tenant_id, store_id, product_id).await
    }

    async fn list_balances(
        &self,
        tenant_id: TenantId,
        filter: &BalanceFilter,
    ) -> LedgerResult<Vec<StockBalance>> {
        (**self).list_balances(tenant_id, filter).await
    }

    async fn query_movements(
        &self,
        tenant_id: TenantId,
        filter: &MovementFilter,
        limit: usize,
    ) -> LedgerResult<Vec<MovementEntry>> {
        (**self).query_movements(tenant_id, filter, limit).await
    }

    async fn movements_for_balance(
        &self,
        tenant_id: TenantId,
        balance_id: BalanceId,
    ) -> LedgerResult<Vec<MovementRecord>> {
        (**self).movements_for_balance(tenant_id, balance_id).await
    }

    async fn find_transfer(
        &self,
        tenant_id: TenantId,
        transfer_id: TransferId,
    ) -> LedgerResult<Option<Transfer>> {
        (**self).find_transfer(tenant_id, transfer_id).await
    }

    async fn find_transfer_by_number(
        &self,
        tenant_id: TenantId,
        number: &str,
    ) -> LedgerResult<Option<Transfer>> {
        (**self).find_transfer_by_number(tenant_id, number).await
    }

    async fn list_transfers(
        &self,
        tenant_id: TenantId,
        filter: &TransferFilter,
    ) -> LedgerResult<Vec<Transfer>> {
        (**self).list_transfers(tenant_id, filter).await
    }

    async fn list_adjustments(
        &self,
        tenant_id: TenantId,
        balance_id: Option<BalanceId>,
    ) -> LedgerResult<Vec<Adjustment>> {
        (**self).list_adjustments(tenant_id, balance_id).await
    }
}
