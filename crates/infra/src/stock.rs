//! Direct balance maintenance: explicit creation, manual entries and exits, count
//! corrections, minimum stock and archiving.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use stockledger_core::{
    BalanceId, LedgerError, LedgerResult, ProductId, StoreId, TenantId, UserId,
};
use stockledger_inventory::{EnteredQuantity, MovementRecord, MovementType, StockBalance};

use crate::config::LedgerSettings;
use crate::ledger_store::{LedgerStore, LedgerTx};
use crate::postings::{self, MovementDraft};

/// A manual entry or exit of stock at one store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockChange {
    pub tenant_id: TenantId,
    pub store_id: StoreId,
    pub product_id: ProductId,
    pub quantity: EnteredQuantity,
    pub reason: String,
    pub user_id: UserId,
}

/// Balance state after a posting, with the movement that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posted {
    pub balance: StockBalance,
    pub movement: MovementRecord,
}

#[derive(Debug, Clone)]
pub struct StockEngine<S> {
    store: S,
    settings: LedgerSettings,
}

impl<S: LedgerStore> StockEngine<S> {
    pub fn new(store: S, settings: LedgerSettings) -> Self {
        Self { store, settings }
    }

    /// Open an empty balance. Fails with `Conflict` if a live one already exists; a
    /// soft-deleted one is restored instead.
    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    pub async fn create_balance(
        &self,
        tenant_id: TenantId,
        store_id: StoreId,
        product_id: ProductId,
        minimum_stock: i64,
    ) -> LedgerResult<StockBalance> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;

        if tx
            .lock_balance_for(tenant_id, store_id, product_id)
            .await?
            .is_some()
        {
            return Err(LedgerError::conflict(format!(
                "a balance already exists for product {product_id} at store {store_id}"
            )));
        }

        let mut balance =
            postings::get_or_restore(&mut tx, tenant_id, store_id, product_id, minimum_stock, now)
                .await?;
        if balance.minimum_stock() != minimum_stock {
            balance.update_minimum_stock(minimum_stock, now)?;
            tx.save_balance(&mut balance).await?;
        }
        tx.commit().await?;

        info!(balance_id = %balance.id_typed(), "stock balance opened");
        Ok(balance)
    }

    /// Post an `Entry`, creating the balance with the default minimum if needed.
    #[instrument(skip(self, change), fields(tenant_id = %change.tenant_id), err)]
    pub async fn add_stock(&self, change: StockChange) -> LedgerResult<Posted> {
        self.increase(change, MovementType::Entry).await
    }

    /// Post a customer `Return`.
    #[instrument(skip(self, change), fields(tenant_id = %change.tenant_id), err)]
    pub async fn record_return(&self, change: StockChange) -> LedgerResult<Posted> {
        self.increase(change, MovementType::Return).await
    }

    /// Post an `Exit`. The balance must exist.
    #[instrument(skip(self, change), fields(tenant_id = %change.tenant_id), err)]
    pub async fn remove_stock(&self, change: StockChange) -> LedgerResult<Posted> {
        let resolved = change.quantity.resolve()?;
        let now = Utc::now();
        let mut tx = self.store.begin().await?;

        let mut balance = tx
            .lock_balance_for(change.tenant_id, change.store_id, change.product_id)
            .await?
            .ok_or_else(|| {
                LedgerError::not_found(
                    "stock balance",
                    format!("{}/{}", change.store_id, change.product_id),
                )
            })?;

        let draft = MovementDraft::new(MovementType::Exit, change.reason, change.user_id, now)
            .uom(resolved.audit);
        let movement = postings::post_decrease(&mut tx, &mut balance, resolved.base, draft).await?;
        tx.commit().await?;

        Ok(Posted { balance, movement })
    }

    /// Set the balance to a counted quantity, writing one signed `Adjustment`.
    #[instrument(skip(self, reason), fields(tenant_id = %tenant_id, balance_id = %balance_id), err)]
    pub async fn set_stock(
        &self,
        tenant_id: TenantId,
        balance_id: BalanceId,
        counted: i64,
        reason: &str,
        user_id: UserId,
    ) -> LedgerResult<Posted> {
        if counted < 0 {
            return Err(LedgerError::invalid_argument(format!(
                "counted stock cannot be negative (got {counted})"
            )));
        }
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let mut balance = postings::require_balance(&mut tx, tenant_id, balance_id).await?;

        let delta = counted - balance.current_stock();
        if delta == 0 {
            return Err(LedgerError::invalid_argument(format!(
                "balance already holds {counted} units"
            )));
        }

        let draft = MovementDraft::new(MovementType::Adjustment, reason, user_id, now);
        let movement = postings::post(&mut tx, &mut balance, delta, draft).await?;
        tx.commit().await?;

        info!(delta, counted, "stock count applied");
        Ok(Posted { balance, movement })
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, balance_id = %balance_id), err)]
    pub async fn update_minimum_stock(
        &self,
        tenant_id: TenantId,
        balance_id: BalanceId,
        minimum_stock: i64,
    ) -> LedgerResult<StockBalance> {
        let mut tx = self.store.begin().await?;
        let mut balance = postings::require_balance(&mut tx, tenant_id, balance_id).await?;
        balance.update_minimum_stock(minimum_stock, Utc::now())?;
        tx.save_balance(&mut balance).await?;
        tx.commit().await?;
        Ok(balance)
    }

    /// Soft-delete an empty balance. A later receipt or transfer restores it.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, balance_id = %balance_id), err)]
    pub async fn archive_balance(
        &self,
        tenant_id: TenantId,
        balance_id: BalanceId,
    ) -> LedgerResult<StockBalance> {
        let mut tx = self.store.begin().await?;
        let mut balance = postings::require_balance(&mut tx, tenant_id, balance_id).await?;
        if balance.current_stock() != 0 {
            return Err(LedgerError::invalid_argument(format!(
                "cannot archive a balance holding {} units",
                balance.current_stock()
            )));
        }
        balance.soft_delete(Utc::now());
        tx.save_balance(&mut balance).await?;
        tx.commit().await?;
        Ok(balance)
    }

    async fn increase(&self, change: StockChange, movement_type: MovementType) -> LedgerResult<Posted> {
        let resolved = change.quantity.resolve()?;
        let now = Utc::now();
        let mut tx = self.store.begin().await?;

        let mut balance = postings::get_or_restore(
            &mut tx,
            change.tenant_id,
            change.store_id,
            change.product_id,
            self.settings.default_minimum_stock,
            now,
        )
        .await?;

        let draft = MovementDraft::new(movement_type, change.reason, change.user_id, now)
            .uom(resolved.audit);
        let movement = postings::post_increase(&mut tx, &mut balance, resolved.base, draft).await?;
        tx.commit().await?;

        Ok(Posted { balance, movement })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger_store::InMemoryLedgerStore;
    use rust_decimal_macros::dec;
    use stockledger_core::UomId;
    use stockledger_inventory::UnitOfMeasure;

    fn engine() -> StockEngine<InMemoryLedgerStore> {
        StockEngine::new(InMemoryLedgerStore::new(), LedgerSettings::default())
    }

    fn change(tenant: TenantId, store: StoreId, product: ProductId, qty: i64) -> StockChange {
        StockChange {
            tenant_id: tenant,
            store_id: store,
            product_id: product,
            quantity: EnteredQuantity::base(qty),
            reason: "manual".to_string(),
            user_id: UserId::new(),
        }
    }

    #[tokio::test]
    async fn add_then_remove_stock() {
        let engine = engine();
        let (t, s, p) = (TenantId::new(), StoreId::new(), ProductId::new());

        let added = engine.add_stock(change(t, s, p, 12)).await.unwrap();
        assert_eq!(added.balance.current_stock(), 12);
        assert_eq!(added.balance.minimum_stock(), 10);
        assert_eq!(added.movement.movement_type, MovementType::Entry);

        let removed = engine.remove_stock(change(t, s, p, 5)).await.unwrap();
        assert_eq!(removed.balance.current_stock(), 7);
        assert_eq!(removed.movement.quantity, -5);

        let err = engine.remove_stock(change(t, s, p, 8)).await.unwrap_err();
        assert_eq!(err.user_message(), "insufficient stock: have 7, need 8");
    }

    #[tokio::test]
    async fn entered_units_are_converted_with_ceil() {
        let engine = engine();
        let mut c = change(TenantId::new(), StoreId::new(), ProductId::new(), 0);
        c.quantity = EnteredQuantity::in_unit(
            dec!(2.34),
            UnitOfMeasure {
                id: UomId::new(),
                code: "DOC".to_string(),
                conversion_factor: dec!(12),
            },
        );
        let posted = engine.add_stock(c).await.unwrap();
        assert_eq!(posted.balance.current_stock(), 29);
        assert_eq!(posted.movement.uom.unwrap().entered_quantity, dec!(2.34));
    }

    #[tokio::test]
    async fn remove_from_missing_balance_is_not_found() {
        let engine = engine();
        let err = engine
            .remove_stock(change(TenantId::new(), StoreId::new(), ProductId::new(), 1))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { .. }));
    }

    #[tokio::test]
    async fn create_balance_twice_conflicts() {
        let engine = engine();
        let (t, s, p) = (TenantId::new(), StoreId::new(), ProductId::new());
        let b = engine.create_balance(t, s, p, 4).await.unwrap();
        assert_eq!(b.minimum_stock(), 4);
        assert_eq!(b.current_stock(), 0);
        assert!(matches!(
            engine.create_balance(t, s, p, 4).await,
            Err(LedgerError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn set_stock_writes_signed_adjustment() {
        let engine = engine();
        let (t, s, p) = (TenantId::new(), StoreId::new(), ProductId::new());
        let b = engine.add_stock(change(t, s, p, 20)).await.unwrap().balance;

        let counted = engine
            .set_stock(t, b.id_typed(), 17, "conteo", UserId::new())
            .await
            .unwrap();
        assert_eq!(counted.balance.current_stock(), 17);
        assert_eq!(counted.movement.quantity, -3);
        assert_eq!(counted.movement.movement_type, MovementType::Adjustment);

        assert!(matches!(
            engine.set_stock(t, b.id_typed(), 17, "again", UserId::new()).await,
            Err(LedgerError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn archive_requires_empty_balance_and_receipt_restores_it() {
        let engine = engine();
        let (t, s, p) = (TenantId::new(), StoreId::new(), ProductId::new());
        let b = engine.add_stock(change(t, s, p, 2)).await.unwrap().balance;

        assert!(engine.archive_balance(t, b.id_typed()).await.is_err());
        engine.remove_stock(change(t, s, p, 2)).await.unwrap();
        let archived = engine.archive_balance(t, b.id_typed()).await.unwrap();
        assert!(archived.is_deleted());

        let back = engine.add_stock(change(t, s, p, 1)).await.unwrap();
        assert_eq!(back.balance.id_typed(), b.id_typed());
        assert!(!back.balance.is_deleted());
    }

    #[tokio::test]
    async fn minimum_stock_update_rejects_negative() {
        let engine = engine();
        let (t, s, p) = (TenantId::new(), StoreId::new(), ProductId::new());
        let b = engine.create_balance(t, s, p, 0).await.unwrap();
        let updated = engine.update_minimum_stock(t, b.id_typed(), 25).await.unwrap();
        assert_eq!(updated.minimum_stock(), 25);
        assert!(engine.update_minimum_stock(t, b.id_typed(), -1).await.is_err());
    }
}
