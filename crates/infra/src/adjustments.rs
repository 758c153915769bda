//! Manual stock corrections, single and batched.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use stockledger_core::{
    BalanceId, LedgerError, LedgerResult, ProductId, StoreId, TenantId, UserId,
};
use stockledger_inventory::{
    Adjustment, AdjustmentType, DocumentCode, DocumentKind, EnteredQuantity, MovementRecord,
    StockBalance, reason,
};

use crate::ledger_store::{LedgerStore, LedgerTx};
use crate::postings::{self, MovementDraft};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentRequest {
    pub tenant_id: TenantId,
    pub balance_id: BalanceId,
    pub adjustment_type: AdjustmentType,
    pub quantity: EnteredQuantity,
    pub is_positive: bool,
    pub reason: String,
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdjustmentReceipt {
    pub balance: StockBalance,
    pub adjustment: Adjustment,
    pub movement: MovementRecord,
}

/// Which balance a batch line applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchTarget {
    /// An existing balance; it must belong to the batch's store.
    Balance(BalanceId),
    /// A product at the batch's store, created empty when missing.
    Product(ProductId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItem {
    pub target: BatchTarget,
    pub quantity: EnteredQuantity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchAdjustmentRequest {
    pub tenant_id: TenantId,
    pub store_id: StoreId,
    pub adjustment_type: AdjustmentType,
    pub reason: String,
    pub is_positive: bool,
    pub user_id: UserId,
    pub items: Vec<BatchItem>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReceipt {
    pub code: DocumentCode,
    /// Balance snapshots after each line, in request order.
    pub balances: Vec<StockBalance>,
}

#[derive(Debug, Clone)]
pub struct AdjustmentEngine<S> {
    store: S,
}

impl<S: LedgerStore> AdjustmentEngine<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    #[instrument(
        skip(self, request),
        fields(tenant_id = %request.tenant_id, balance_id = %request.balance_id),
        err
    )]
    pub async fn adjust(&self, request: AdjustmentRequest) -> LedgerResult<AdjustmentReceipt> {
        let resolved = request.quantity.resolve()?;
        let now = Utc::now();
        let mut tx = self.store.begin().await?;

        let mut balance =
            postings::require_balance(&mut tx, request.tenant_id, request.balance_id).await?;
        let previous_stock = balance.current_stock();

        let draft = MovementDraft::new(
            request.adjustment_type.movement_type(),
            reason::single_adjustment(request.adjustment_type.code(), &request.reason),
            request.user_id,
            now,
        )
        .uom(resolved.audit);
        let movement = if request.is_positive {
            postings::post_increase(&mut tx, &mut balance, resolved.base, draft).await?
        } else {
            postings::post_decrease(&mut tx, &mut balance, resolved.base, draft).await?
        };

        let adjustment = Adjustment::record(
            request.tenant_id,
            balance.id_typed(),
            request.adjustment_type,
            resolved.base,
            request.is_positive,
            previous_stock,
            request.reason,
            request.user_id,
            now,
        )?;
        tx.insert_adjustment(&adjustment).await?;
        tx.commit().await?;

        info!(
            adjustment_type = %adjustment.adjustment_type,
            delta = adjustment.delta(),
            new_stock = adjustment.new_stock,
            "adjustment applied"
        );
        Ok(AdjustmentReceipt {
            balance,
            adjustment,
            movement,
        })
    }

    /// Apply every line under one `ADJ-` code, or none of them.
    #[instrument(
        skip(self, request),
        fields(tenant_id = %request.tenant_id, store_id = %request.store_id, lines = request.items.len()),
        err
    )]
    pub async fn adjust_batch(&self, request: BatchAdjustmentRequest) -> LedgerResult<BatchReceipt> {
        if request.items.is_empty() {
            return Err(LedgerError::invalid_argument(
                "batch adjustment must have at least one line",
            ));
        }
        let resolved = request
            .items
            .iter()
            .map(|item| item.quantity.resolve())
            .collect::<LedgerResult<Vec<_>>>()?;

        let now = Utc::now();
        let code = DocumentCode::generate(DocumentKind::Adjustment, now);
        let type_code = request.adjustment_type.code().to_string();
        let movement_type = request.adjustment_type.movement_type();
        let line_reason = reason::batch_adjustment(&request.reason, &code, &type_code);

        let mut tx = self.store.begin().await?;
        let mut balances = Vec::with_capacity(request.items.len());

        for (item, quantity) in request.items.iter().zip(resolved) {
            let mut balance = match item.target {
                BatchTarget::Balance(balance_id) => {
                    let balance =
                        postings::require_balance(&mut tx, request.tenant_id, balance_id).await?;
                    if balance.store_id() != request.store_id {
                        return Err(LedgerError::invalid_argument(format!(
                            "balance {balance_id} belongs to store {}, not {}",
                            balance.store_id(),
                            request.store_id
                        )));
                    }
                    balance
                }
                BatchTarget::Product(product_id) => {
                    postings::get_or_restore(
                        &mut tx,
                        request.tenant_id,
                        request.store_id,
                        product_id,
                        0,
                        now,
                    )
                    .await?
                }
            };
            let previous_stock = balance.current_stock();

            let draft = MovementDraft::new(movement_type, line_reason.clone(), request.user_id, now)
                .reference(code.as_str())
                .uom(quantity.audit);
            if request.is_positive {
                postings::post_increase(&mut tx, &mut balance, quantity.base, draft).await?;
            } else {
                postings::post_decrease(&mut tx, &mut balance, quantity.base, draft).await?;
            }

            let adjustment = Adjustment::record(
                request.tenant_id,
                balance.id_typed(),
                request.adjustment_type.clone(),
                quantity.base,
                request.is_positive,
                previous_stock,
                request.reason.clone(),
                request.user_id,
                now,
            )?
            .with_reference(code.as_str());
            tx.insert_adjustment(&adjustment).await?;

            balances.push(balance);
        }
        tx.commit().await?;

        info!(code = %code, lines = balances.len(), "batch adjustment committed");
        Ok(BatchReceipt { code, balances })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerSettings;
    use crate::ledger_store::InMemoryLedgerStore;
    use crate::stock::{StockChange, StockEngine};
    use stockledger_inventory::MovementType;

    struct Fixture {
        store: InMemoryLedgerStore,
        stock: StockEngine<InMemoryLedgerStore>,
        engine: AdjustmentEngine<InMemoryLedgerStore>,
        tenant: TenantId,
        shop: StoreId,
    }

    fn fixture() -> Fixture {
        let store = InMemoryLedgerStore::new();
        Fixture {
            stock: StockEngine::new(store.clone(), LedgerSettings::default()),
            engine: AdjustmentEngine::new(store.clone()),
            store,
            tenant: TenantId::new(),
            shop: StoreId::new(),
        }
    }

    impl Fixture {
        async fn stocked(&self, qty: i64) -> StockBalance {
            self.stock
                .add_stock(StockChange {
                    tenant_id: self.tenant,
                    store_id: self.shop,
                    product_id: ProductId::new(),
                    quantity: EnteredQuantity::base(qty),
                    reason: "carga".to_string(),
                    user_id: UserId::new(),
                })
                .await
                .unwrap()
                .balance
        }

        fn single(&self, balance: &StockBalance, kind: AdjustmentType, qty: i64, up: bool) -> AdjustmentRequest {
            AdjustmentRequest {
                tenant_id: self.tenant,
                balance_id: balance.id_typed(),
                adjustment_type: kind,
                quantity: EnteredQuantity::base(qty),
                is_positive: up,
                reason: "conteo".to_string(),
                user_id: UserId::new(),
            }
        }

        fn batch(&self, items: Vec<BatchItem>, up: bool) -> BatchAdjustmentRequest {
            BatchAdjustmentRequest {
                tenant_id: self.tenant,
                store_id: self.shop,
                adjustment_type: AdjustmentType::Shrinkage,
                reason: "inventario".to_string(),
                is_positive: up,
                user_id: UserId::new(),
                items,
            }
        }
    }

    fn line(balance: &StockBalance, qty: i64) -> BatchItem {
        BatchItem {
            target: BatchTarget::Balance(balance.id_typed()),
            quantity: EnteredQuantity::base(qty),
        }
    }

    #[tokio::test]
    async fn shrinkage_posts_a_loss_with_audit_row() {
        let f = fixture();
        let b = f.stocked(50).await;

        let receipt = f
            .engine
            .adjust(f.single(&b, AdjustmentType::Shrinkage, 5, false))
            .await
            .unwrap();
        assert_eq!(receipt.balance.current_stock(), 45);
        assert_eq!(receipt.movement.movement_type, MovementType::Loss);
        assert_eq!(receipt.movement.quantity, -5);
        assert_eq!(receipt.movement.reason, "Ajuste: MERMA - conteo");
        assert_eq!(receipt.adjustment.previous_stock, 50);
        assert_eq!(receipt.adjustment.new_stock, 45);

        let audit = f.store.list_adjustments(f.tenant, Some(b.id_typed())).await.unwrap();
        assert_eq!(audit.len(), 1);
    }

    #[tokio::test]
    async fn initial_load_posts_an_entry() {
        let f = fixture();
        let b = f.stocked(1).await;
        let receipt = f
            .engine
            .adjust(f.single(&b, AdjustmentType::InitialLoad, 9, true))
            .await
            .unwrap();
        assert_eq!(receipt.movement.movement_type, MovementType::Entry);
        assert_eq!(receipt.balance.current_stock(), 10);
    }

    #[tokio::test]
    async fn negative_adjustment_beyond_stock_is_rejected() {
        let f = fixture();
        let b = f.stocked(4).await;
        let err = f
            .engine
            .adjust(f.single(&b, AdjustmentType::Correction, 10, false))
            .await
            .unwrap_err();
        assert_eq!(err.user_message(), "insufficient stock: have 4, need 10");
        assert!(f.store.list_adjustments(f.tenant, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn batch_shares_one_code_across_lines() {
        let f = fixture();
        let a = f.stocked(10).await;
        let b = f.stocked(10).await;

        let receipt = f
            .engine
            .adjust_batch(f.batch(vec![line(&a, 2), line(&b, 3)], false))
            .await
            .unwrap();
        assert_eq!(receipt.code.kind(), DocumentKind::Adjustment);
        assert_eq!(
            receipt
                .balances
                .iter()
                .map(StockBalance::current_stock)
                .collect::<Vec<_>>(),
            vec![8, 7]
        );

        let filter = stockledger_inventory::MovementFilter {
            reference: Some(receipt.code.to_string()),
            ..Default::default()
        };
        let movements = f.store.query_movements(f.tenant, &filter, 100).await.unwrap();
        assert_eq!(movements.len(), 2);
        for entry in &movements {
            assert_eq!(
                entry.movement.reason,
                format!("Lote: inventario ({}) - MERMA", receipt.code)
            );
        }
        let audit = f.store.list_adjustments(f.tenant, None).await.unwrap();
        assert!(audit.iter().all(|a| a.reference.as_deref() == Some(receipt.code.as_str())));
    }

    #[tokio::test]
    async fn batch_failure_on_any_line_changes_nothing() {
        let f = fixture();
        let a = f.stocked(10).await;
        let b = f.stocked(3).await;
        let c = f.stocked(10).await;

        let err = f
            .engine
            .adjust_batch(f.batch(vec![line(&a, 1), line(&b, 5), line(&c, 1)], false))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientStock { available: 3, requested: 5, .. }));

        for (balance, expected) in [(&a, 10), (&b, 3), (&c, 10)] {
            let now = f.store.find_balance(f.tenant, balance.id_typed()).await.unwrap().unwrap();
            assert_eq!(now.current_stock(), expected);
            let history = f.store.movements_for_balance(f.tenant, balance.id_typed()).await.unwrap();
            assert_eq!(history.len(), 1);
        }
    }

    #[tokio::test]
    async fn batch_creates_missing_balances_by_product() {
        let f = fixture();
        let product = ProductId::new();
        let receipt = f
            .engine
            .adjust_batch(f.batch(
                vec![BatchItem {
                    target: BatchTarget::Product(product),
                    quantity: EnteredQuantity::base(6),
                }],
                true,
            ))
            .await
            .unwrap();
        let created = &receipt.balances[0];
        assert_eq!(created.product_id(), product);
        assert_eq!(created.current_stock(), 6);
        assert_eq!(created.minimum_stock(), 0);
    }

    #[tokio::test]
    async fn batch_rejects_empty_and_foreign_store_lines() {
        let f = fixture();
        assert!(matches!(
            f.engine.adjust_batch(f.batch(Vec::new(), true)).await,
            Err(LedgerError::InvalidArgument(_))
        ));

        let b = f.stocked(5).await;
        let mut request = f.batch(vec![line(&b, 1)], true);
        request.store_id = StoreId::new();
        assert!(matches!(
            f.engine.adjust_batch(request).await,
            Err(LedgerError::InvalidArgument(_))
        ));
    }
}
