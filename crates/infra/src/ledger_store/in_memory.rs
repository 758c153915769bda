use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use stockledger_core::{
    BalanceId, Entity, ExpectedVersion, LedgerError, LedgerResult, ProductId, StoreId, TenantId,
    TransferId,
};
use stockledger_inventory::{
    Adjustment, MovementEntry, MovementFilter, MovementRecord, StockBalance, Transfer,
};

use super::r#trait::{BalanceFilter, LedgerStore, LedgerTx, TransferFilter};

#[derive(Debug, Default)]
struct LedgerState {
    balances: HashMap<BalanceId, StockBalance>,
    movements: Vec<MovementEntry>,
    adjustments: Vec<Adjustment>,
    transfers: HashMap<TransferId, Transfer>,
}

/// Writes of an open transaction, merged into the shared state on commit.
#[derive(Debug, Default)]
struct Staged {
    balances: HashMap<BalanceId, StockBalance>,
    movements: Vec<MovementEntry>,
    adjustments: Vec<Adjustment>,
    transfers: HashMap<TransferId, Transfer>,
}

/// In-memory ledger store.
///
/// Intended for tests/dev. Transactions are serialized: `begin` waits for the previous
/// transaction to finish, so every locking read is trivially exclusive. Reads through
/// the store wait as well and only ever see committed state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<Mutex<LedgerState>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug)]
pub struct InMemoryLedgerTx {
    state: OwnedMutexGuard<LedgerState>,
    staged: Staged,
}

impl InMemoryLedgerTx {
    fn balance(&self, id: BalanceId) -> Option<&StockBalance> {
        self.staged
            .balances
            .get(&id)
            .or_else(|| self.state.balances.get(&id))
    }

    fn balances(&self) -> impl Iterator<Item = &StockBalance> {
        self.staged.balances.values().chain(
            self.state
                .balances
                .values()
                .filter(|b| !self.staged.balances.contains_key(&b.id_typed())),
        )
    }

    fn transfer(&self, id: TransferId) -> Option<&Transfer> {
        self.staged
            .transfers
            .get(&id)
            .or_else(|| self.state.transfers.get(&id))
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    type Tx = InMemoryLedgerTx;

    async fn begin(&self) -> LedgerResult<Self::Tx> {
        Ok(InMemoryLedgerTx {
            state: self.state.clone().lock_owned().await,
            staged: Staged::default(),
        })
    }

    async fn find_balance(
        &self,
        tenant_id: TenantId,
        balance_id: BalanceId,
    ) -> LedgerResult<Option<StockBalance>> {
        let state = self.state.lock().await;
        Ok(state
            .balances
            .get(&balance_id)
            .filter(|b| b.tenant_id() == tenant_id && !b.is_deleted())
            .cloned())
    }

    async fn find_balance_for(
        &self,
        tenant_id: TenantId,
        store_id: StoreId,
        product_id: ProductId,
    ) -> LedgerResult<Option<StockBalance>> {
        let state = self.state.lock().await;
        Ok(state
            .balances
            .values()
            .find(|b| {
                b.tenant_id() == tenant_id
                    && b.store_id() == store_id
                    && b.product_id() == product_id
                    && !b.is_deleted()
            })
            .cloned())
    }

    async fn list_balances(
        &self,
        tenant_id: TenantId,
        filter: &BalanceFilter,
    ) -> LedgerResult<Vec<StockBalance>> {
        let state = self.state.lock().await;
        let mut out: Vec<StockBalance> = state
            .balances
            .values()
            .filter(|b| b.tenant_id() == tenant_id && filter.matches(b))
            .cloned()
            .collect();
        out.sort_by_key(|b| (b.created_at(), b.id_typed()));
        Ok(out)
    }

    async fn query_movements(
        &self,
        tenant_id: TenantId,
        filter: &MovementFilter,
        limit: usize,
    ) -> LedgerResult<Vec<MovementEntry>> {
        let state = self.state.lock().await;
        // Reverse append order first so equal timestamps stay newest-first after the stable sort.
        let mut out: Vec<MovementEntry> = state
            .movements
            .iter()
            .rev()
            .filter(|e| e.movement.tenant_id == tenant_id && filter.matches(e))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.movement.occurred_at.cmp(&a.movement.occurred_at));
        out.truncate(limit);
        Ok(out)
    }

    async fn movements_for_balance(
        &self,
        tenant_id: TenantId,
        balance_id: BalanceId,
    ) -> LedgerResult<Vec<MovementRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .movements
            .iter()
            .filter(|e| e.movement.tenant_id == tenant_id && e.movement.balance_id == balance_id)
            .map(|e| e.movement.clone())
            .collect())
    }

    async fn find_transfer(
        &self,
        tenant_id: TenantId,
        transfer_id: TransferId,
    ) -> LedgerResult<Option<Transfer>> {
        let state = self.state.lock().await;
        Ok(state
            .transfers
            .get(&transfer_id)
            .filter(|t| t.tenant_id() == tenant_id)
            .cloned())
    }

    async fn find_transfer_by_number(
        &self,
        tenant_id: TenantId,
        number: &str,
    ) -> LedgerResult<Option<Transfer>> {
        let state = self.state.lock().await;
        Ok(state
            .transfers
            .values()
            .find(|t| t.tenant_id() == tenant_id && t.number().as_str() == number)
            .cloned())
    }

    async fn list_transfers(
        &self,
        tenant_id: TenantId,
        filter: &TransferFilter,
    ) -> LedgerResult<Vec<Transfer>> {
        let state = self.state.lock().await;
        let mut out: Vec<Transfer> = state
            .transfers
            .values()
            .filter(|t| t.tenant_id() == tenant_id && filter.matches(t))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| b.id_typed().cmp(&a.id_typed()))
        });
        Ok(out)
    }

    async fn list_adjustments(
        &self,
        tenant_id: TenantId,
        balance_id: Option<BalanceId>,
    ) -> LedgerResult<Vec<Adjustment>> {
        let state = self.state.lock().await;
        let mut out: Vec<Adjustment> = state
            .adjustments
            .iter()
            .rev()
            .filter(|a| a.tenant_id == tenant_id && balance_id.is_none_or(|id| id == a.balance_id))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.adjusted_at.cmp(&a.adjusted_at));
        Ok(out)
    }
}

#[async_trait]
impl LedgerTx for InMemoryLedgerTx {
    async fn lock_balance(
        &mut self,
        tenant_id: TenantId,
        balance_id: BalanceId,
    ) -> LedgerResult<Option<StockBalance>> {
        Ok(self
            .balance(balance_id)
            .filter(|b| b.tenant_id() == tenant_id)
            .cloned())
    }

    async fn lock_balance_for(
        &mut self,
        tenant_id: TenantId,
        store_id: StoreId,
        product_id: ProductId,
    ) -> LedgerResult<Option<StockBalance>> {
        Ok(self
            .balances()
            .find(|b| {
                b.tenant_id() == tenant_id
                    && b.store_id() == store_id
                    && b.product_id() == product_id
                    && !b.is_deleted()
            })
            .cloned())
    }

    async fn lock_balance_rows(
        &mut self,
        store_id: StoreId,
        product_id: ProductId,
    ) -> LedgerResult<Vec<StockBalance>> {
        Ok(self
            .balances()
            .filter(|b| b.store_id() == store_id && b.product_id() == product_id)
            .cloned()
            .collect())
    }

    async fn movements_for_balance(
        &mut self,
        tenant_id: TenantId,
        balance_id: BalanceId,
    ) -> LedgerResult<Vec<MovementRecord>> {
        Ok(self
            .state
            .movements
            .iter()
            .chain(self.staged.movements.iter())
            .filter(|e| e.movement.tenant_id == tenant_id && e.movement.balance_id == balance_id)
            .map(|e| e.movement.clone())
            .collect())
    }

    async fn insert_balance(&mut self, balance: &mut StockBalance) -> LedgerResult<()> {
        ExpectedVersion::Exact(0).check(balance.version())?;
        if self.balance(balance.id_typed()).is_some() {
            return Err(LedgerError::conflict(format!(
                "stock balance {} already exists",
                balance.id_typed()
            )));
        }
        let duplicate = self.balances().any(|b| {
            b.tenant_id() == balance.tenant_id()
                && b.store_id() == balance.store_id()
                && b.product_id() == balance.product_id()
                && !b.is_deleted()
        });
        if duplicate {
            return Err(LedgerError::conflict(format!(
                "a live balance already exists for product {} at store {}",
                balance.product_id(),
                balance.store_id()
            )));
        }

        balance.mark_persisted();
        self.staged
            .balances
            .insert(balance.id_typed(), balance.clone());
        Ok(())
    }

    async fn save_balance(&mut self, balance: &mut StockBalance) -> LedgerResult<()> {
        let stored = self
            .balance(balance.id_typed())
            .ok_or_else(|| LedgerError::not_found("stock balance", balance.id_typed()))?;
        ExpectedVersion::Exact(balance.version()).check(stored.version())?;

        balance.mark_persisted();
        self.staged
            .balances
            .insert(balance.id_typed(), balance.clone());
        Ok(())
    }

    async fn append_movement(&mut self, movement: &MovementRecord) -> LedgerResult<()> {
        let balance = self
            .balance(movement.balance_id)
            .filter(|b| b.tenant_id() == movement.tenant_id)
            .ok_or_else(|| LedgerError::not_found("stock balance", movement.balance_id))?;

        let entry = MovementEntry {
            movement: movement.clone(),
            store_id: balance.store_id(),
            product_id: balance.product_id(),
        };
        self.staged.movements.push(entry);
        Ok(())
    }

    async fn insert_adjustment(&mut self, adjustment: &Adjustment) -> LedgerResult<()> {
        if self.balance(adjustment.balance_id).is_none() {
            return Err(LedgerError::not_found("stock balance", adjustment.balance_id));
        }
        self.staged.adjustments.push(adjustment.clone());
        Ok(())
    }

    async fn insert_transfer(&mut self, transfer: &mut Transfer) -> LedgerResult<()> {
        ExpectedVersion::Exact(0).check(transfer.version())?;
        let taken = self
            .staged
            .transfers
            .values()
            .chain(self.state.transfers.values())
            .any(|t| t.tenant_id() == transfer.tenant_id() && t.number() == transfer.number());
        if taken {
            return Err(LedgerError::conflict(format!(
                "transfer number {} already exists",
                transfer.number()
            )));
        }

        transfer.mark_persisted();
        self.staged
            .transfers
            .insert(transfer.id_typed(), transfer.clone());
        Ok(())
    }

    async fn lock_transfer(
        &mut self,
        tenant_id: TenantId,
        transfer_id: TransferId,
    ) -> LedgerResult<Option<Transfer>> {
        Ok(self
            .transfer(transfer_id)
            .filter(|t| t.tenant_id() == tenant_id)
            .cloned())
    }

    async fn save_transfer(&mut self, transfer: &mut Transfer) -> LedgerResult<()> {
        let stored = self
            .transfer(transfer.id_typed())
            .ok_or_else(|| LedgerError::not_found("transfer", transfer.id_typed()))?;
        ExpectedVersion::Exact(transfer.version()).check(stored.version())?;

        transfer.mark_persisted();
        self.staged
            .transfers
            .insert(transfer.id_typed(), transfer.clone());
        Ok(())
    }

    async fn commit(self) -> LedgerResult<()> {
        let Self { mut state, staged } = self;
        state.balances.extend(staged.balances);
        state.movements.extend(staged.movements);
        state.adjustments.extend(staged.adjustments);
        state.transfers.extend(staged.transfers);
        Ok(())
    }
}
