//! Out-of-band check that every balance equals the sum of its movements.

use serde::Serialize;
use tracing::{info, instrument, warn};

use stockledger_core::{BalanceId, LedgerError, LedgerResult, ProductId, StoreId, TenantId};

use crate::ledger_store::{BalanceFilter, LedgerStore, LedgerTx};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    pub balance_id: BalanceId,
    pub store_id: StoreId,
    pub product_id: ProductId,
    pub current_stock: i64,
    pub ledger_sum: i64,
    pub movement_count: usize,
}

impl ReconciliationReport {
    pub fn is_consistent(&self) -> bool {
        self.current_stock == self.ledger_sum
    }

    /// `current_stock - ledger_sum`.
    pub fn discrepancy(&self) -> i64 {
        self.current_stock - self.ledger_sum
    }
}

/// Read-only; never corrects anything.
#[derive(Debug, Clone)]
pub struct Reconciler<S> {
    store: S,
}

impl<S: LedgerStore> Reconciler<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Reads the balance and its movements under the row lock, so a posting is either
    /// fully counted or not at all. The transaction is never committed.
    pub async fn reconcile_balance(
        &self,
        tenant_id: TenantId,
        balance_id: BalanceId,
    ) -> LedgerResult<ReconciliationReport> {
        let mut tx = self.store.begin().await?;
        let balance = tx
            .lock_balance(tenant_id, balance_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("stock balance", balance_id))?;
        let movements = tx.movements_for_balance(tenant_id, balance_id).await?;
        drop(tx);

        let ledger_sum = movements
            .iter()
            .try_fold(0i64, |sum, m| sum.checked_add(m.quantity))
            .ok_or_else(|| LedgerError::storage("movement sum overflows"))?;

        Ok(ReconciliationReport {
            balance_id,
            store_id: balance.store_id(),
            product_id: balance.product_id(),
            current_stock: balance.current_stock(),
            ledger_sum,
            movement_count: movements.len(),
        })
    }

    /// Reports for every balance of the store (archived ones included) that does not add up.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, store_id = %store_id), err)]
    pub async fn reconcile_store(
        &self,
        tenant_id: TenantId,
        store_id: StoreId,
    ) -> LedgerResult<Vec<ReconciliationReport>> {
        let filter = BalanceFilter {
            store_id: Some(store_id),
            product_id: None,
            include_deleted: true,
        };
        let balances = self.store.list_balances(tenant_id, &filter).await?;
        let checked = balances.len();

        let mut discrepancies = Vec::new();
        for balance in balances {
            let report = self.reconcile_balance(tenant_id, balance.id_typed()).await?;
            if !report.is_consistent() {
                warn!(
                    balance_id = %report.balance_id,
                    product_id = %report.product_id,
                    current_stock = report.current_stock,
                    ledger_sum = report.ledger_sum,
                    "balance does not match its ledger"
                );
                discrepancies.push(report);
            }
        }

        info!(checked, discrepancies = discrepancies.len(), "store reconciled");
        Ok(discrepancies)
    }
}
