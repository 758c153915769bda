//! Read side: balance listings, movement history and display views.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use stockledger_core::{
    BalanceId, LedgerError, LedgerResult, MovementId, ProductId, StoreId, TenantId, TransferId,
    UserId,
};
use stockledger_inventory::{
    Adjustment, MovementEntry, MovementFilter, MovementType, StockBalance, TransferStatus,
};

use crate::catalog::{ProductCatalog, ProductInfoCache};
use crate::config::LedgerSettings;
use crate::ledger_store::{BalanceFilter, LedgerStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockView {
    pub balance_id: BalanceId,
    pub store_id: StoreId,
    pub product_id: ProductId,
    pub product_code: String,
    pub product_name: String,
    pub current_stock: i64,
    pub minimum_stock: i64,
    pub is_low_stock: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MovementView {
    pub movement_id: MovementId,
    pub store_id: StoreId,
    pub product_id: ProductId,
    pub product_code: String,
    pub product_name: String,
    pub quantity: i64,
    pub movement_type: MovementType,
    pub type_label: &'static str,
    pub reason: String,
    pub reference: Option<String>,
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
    pub uom_code: Option<String>,
    pub entered_quantity: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferLineView {
    pub line_no: u32,
    pub product_id: ProductId,
    pub product_code: String,
    pub product_name: String,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferView {
    pub transfer_id: TransferId,
    pub number: String,
    pub origin_store_id: StoreId,
    pub destination_store_id: StoreId,
    pub status: TransferStatus,
    pub status_label: &'static str,
    pub notes: String,
    pub requested_by: UserId,
    pub received_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub total_quantity: i64,
    pub lines: Vec<TransferLineView>,
}

/// Queries never lock and never write.
#[derive(Clone)]
pub struct LedgerQueries<S> {
    store: S,
    catalog: Arc<dyn ProductCatalog>,
    settings: LedgerSettings,
}

impl<S: LedgerStore> LedgerQueries<S> {
    pub fn new(store: S, catalog: Arc<dyn ProductCatalog>, settings: LedgerSettings) -> Self {
        Self {
            store,
            catalog,
            settings,
        }
    }

    /// Live balance by id; archived balances are `NotFound`.
    pub async fn balance(&self, tenant_id: TenantId, balance_id: BalanceId) -> LedgerResult<StockBalance> {
        self.store
            .find_balance(tenant_id, balance_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("stock balance", balance_id))
    }

    pub async fn balance_for(
        &self,
        tenant_id: TenantId,
        store_id: StoreId,
        product_id: ProductId,
    ) -> LedgerResult<Option<StockBalance>> {
        self.store.find_balance_for(tenant_id, store_id, product_id).await
    }

    /// Live balances of one store.
    pub async fn list_balances(
        &self,
        tenant_id: TenantId,
        store_id: StoreId,
    ) -> LedgerResult<Vec<StockBalance>> {
        let filter = BalanceFilter {
            store_id: Some(store_id),
            ..Default::default()
        };
        self.store.list_balances(tenant_id, &filter).await
    }

    /// Live balances of one product across every store.
    pub async fn balances_for_product(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> LedgerResult<Vec<StockBalance>> {
        let filter = BalanceFilter {
            product_id: Some(product_id),
            ..Default::default()
        };
        self.store.list_balances(tenant_id, &filter).await
    }

    /// Balances at or below their minimum.
    pub async fn low_stock(&self, tenant_id: TenantId, store_id: StoreId) -> LedgerResult<Vec<StockBalance>> {
        let mut balances = self.list_balances(tenant_id, store_id).await?;
        balances.retain(StockBalance::is_low_stock);
        Ok(balances)
    }

    /// Newest first. `limit` is capped at the configured history limit.
    pub async fn movement_history(
        &self,
        tenant_id: TenantId,
        filter: &MovementFilter,
        limit: Option<usize>,
    ) -> LedgerResult<Vec<MovementEntry>> {
        let cap = self.settings.history_limit;
        let limit = limit.map_or(cap, |l| l.min(cap));
        self.store.query_movements(tenant_id, filter, limit).await
    }

    /// Every movement written under a document code, for reprint. Not capped by
    /// `history_limit`.
    pub async fn movements_by_reference(
        &self,
        tenant_id: TenantId,
        reference: &str,
    ) -> LedgerResult<Vec<MovementEntry>> {
        let filter = MovementFilter {
            reference: Some(reference.to_string()),
            ..Default::default()
        };
        self.store.query_movements(tenant_id, &filter, usize::MAX).await
    }

    pub async fn adjustments(
        &self,
        tenant_id: TenantId,
        balance_id: Option<BalanceId>,
    ) -> LedgerResult<Vec<Adjustment>> {
        self.store.list_adjustments(tenant_id, balance_id).await
    }

    pub async fn stock_view(&self, tenant_id: TenantId, store_id: StoreId) -> LedgerResult<Vec<StockView>> {
        let balances = self.list_balances(tenant_id, store_id).await?;
        let mut cache = ProductInfoCache::default();
        let mut views = Vec::with_capacity(balances.len());
        for balance in balances {
            let info = cache
                .get(self.catalog.as_ref(), tenant_id, balance.product_id())
                .await;
            views.push(StockView {
                balance_id: balance.id_typed(),
                store_id: balance.store_id(),
                product_id: balance.product_id(),
                product_code: info.code,
                product_name: info.name,
                current_stock: balance.current_stock(),
                minimum_stock: balance.minimum_stock(),
                is_low_stock: balance.is_low_stock(),
                updated_at: balance.updated_at(),
            });
        }
        Ok(views)
    }

    pub async fn movement_view(
        &self,
        tenant_id: TenantId,
        filter: &MovementFilter,
        limit: Option<usize>,
    ) -> LedgerResult<Vec<MovementView>> {
        let entries = self.movement_history(tenant_id, filter, limit).await?;
        let mut cache = ProductInfoCache::default();
        let mut views = Vec::with_capacity(entries.len());
        for entry in entries {
            let info = cache
                .get(self.catalog.as_ref(), tenant_id, entry.product_id)
                .await;
            let movement = entry.movement;
            let (uom_code, entered_quantity) = match movement.uom {
                Some(audit) => (audit.uom_code, Some(audit.entered_quantity)),
                None => (None, None),
            };
            views.push(MovementView {
                movement_id: movement.id,
                store_id: entry.store_id,
                product_id: entry.product_id,
                product_code: info.code,
                product_name: info.name,
                quantity: movement.quantity,
                movement_type: movement.movement_type,
                type_label: movement.movement_type.label(),
                reason: movement.reason,
                reference: movement.reference,
                user_id: movement.user_id,
                occurred_at: movement.occurred_at,
                uom_code,
                entered_quantity,
            });
        }
        Ok(views)
    }

    pub async fn transfer_view(&self, tenant_id: TenantId, transfer_id: TransferId) -> LedgerResult<TransferView> {
        let transfer = self
            .store
            .find_transfer(tenant_id, transfer_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("transfer", transfer_id))?;

        let mut cache = ProductInfoCache::default();
        let mut lines = Vec::with_capacity(transfer.lines().len());
        for line in transfer.lines() {
            let info = cache
                .get(self.catalog.as_ref(), tenant_id, line.product_id)
                .await;
            lines.push(TransferLineView {
                line_no: line.line_no,
                product_id: line.product_id,
                product_code: info.code,
                product_name: info.name,
                quantity: line.quantity,
            });
        }

        Ok(TransferView {
            transfer_id: transfer.id_typed(),
            number: transfer.number().to_string(),
            origin_store_id: transfer.origin_store_id(),
            destination_store_id: transfer.destination_store_id(),
            status: transfer.status(),
            status_label: transfer.status().label(),
            notes: transfer.notes().to_string(),
            requested_by: transfer.requested_by(),
            received_by: transfer.received_by(),
            created_at: transfer.created_at(),
            completed_at: transfer.completed_at(),
            cancelled_at: transfer.cancelled_at(),
            total_quantity: transfer.total_quantity(),
            lines,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{InMemoryProductCatalog, NullCatalog, ProductInfo};
    use crate::ledger_store::InMemoryLedgerStore;
    use crate::receiving::ReceivingAdapter;
    use crate::stock::{StockChange, StockEngine};
    use crate::transfers::{CreateTransfer, TransferEngine, TransferLineRequest};
    use stockledger_inventory::{EnteredQuantity, PurchaseReceived, ReceivedLine};

    async fn add(stock: &StockEngine<InMemoryLedgerStore>, t: TenantId, s: StoreId, p: ProductId, qty: i64) {
        stock
            .add_stock(StockChange {
                tenant_id: t,
                store_id: s,
                product_id: p,
                quantity: EnteredQuantity::base(qty),
                reason: "alta".to_string(),
                user_id: UserId::new(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn low_stock_lists_balances_at_or_below_minimum() {
        let store = InMemoryLedgerStore::new();
        let settings = LedgerSettings::default();
        let stock = StockEngine::new(store.clone(), settings);
        let queries = LedgerQueries::new(store, Arc::new(NullCatalog), settings);
        let (t, s) = (TenantId::new(), StoreId::new());
        let (low, exact, fine) = (ProductId::new(), ProductId::new(), ProductId::new());
        add(&stock, t, s, low, 3).await;
        add(&stock, t, s, exact, 10).await;
        add(&stock, t, s, fine, 11).await;

        let mut flagged: Vec<ProductId> = queries
            .low_stock(t, s)
            .await
            .unwrap()
            .iter()
            .map(StockBalance::product_id)
            .collect();
        flagged.sort();
        let mut expected = vec![low, exact];
        expected.sort();
        assert_eq!(flagged, expected);
        assert_eq!(queries.balances_for_product(t, fine).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn history_limit_caps_requests() {
        let store = InMemoryLedgerStore::new();
        let settings = LedgerSettings {
            history_limit: 2,
            ..LedgerSettings::default()
        };
        let stock = StockEngine::new(store.clone(), settings);
        let queries = LedgerQueries::new(store, Arc::new(NullCatalog), settings);
        let (t, s, p) = (TenantId::new(), StoreId::new(), ProductId::new());
        for qty in 1..=4 {
            add(&stock, t, s, p, qty).await;
        }

        let history = queries
            .movement_history(t, &MovementFilter::default(), Some(100))
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        let few = queries
            .movement_history(t, &MovementFilter::default(), Some(1))
            .await
            .unwrap();
        assert_eq!(few.len(), 1);
    }

    #[tokio::test]
    async fn views_are_enriched_and_degrade_to_placeholders() {
        let store = InMemoryLedgerStore::new();
        let settings = LedgerSettings::default();
        let catalog = Arc::new(InMemoryProductCatalog::new());
        let stock = StockEngine::new(store.clone(), settings);
        let transfers = TransferEngine::new(store.clone(), settings);
        let queries = LedgerQueries::new(store, catalog.clone(), settings);
        let (t, s) = (TenantId::new(), StoreId::new());
        let (known, unknown) = (ProductId::new(), ProductId::new());
        catalog
            .insert(
                t,
                ProductInfo {
                    product_id: known,
                    code: "P-7".to_string(),
                    name: "Aceite 1L".to_string(),
                    units: Vec::new(),
                },
            )
            .unwrap();
        add(&stock, t, s, known, 30).await;
        add(&stock, t, s, unknown, 30).await;

        let view = queries.stock_view(t, s).await.unwrap();
        let known_view = view.iter().find(|v| v.product_id == known).unwrap();
        assert_eq!(known_view.product_name, "Aceite 1L");
        let unknown_view = view.iter().find(|v| v.product_id == unknown).unwrap();
        assert_eq!(unknown_view.product_code, "UNKNOWN");

        let movements = queries
            .movement_view(t, &MovementFilter::default(), None)
            .await
            .unwrap();
        assert!(movements.iter().all(|m| m.type_label == "Entrada"));

        let transfer = transfers
            .create(CreateTransfer {
                tenant_id: t,
                origin_store_id: s,
                destination_store_id: StoreId::new(),
                requested_by: UserId::new(),
                notes: String::new(),
                lines: vec![TransferLineRequest {
                    product_id: known,
                    quantity: EnteredQuantity::base(5),
                }],
            })
            .await
            .unwrap();
        let tv = queries.transfer_view(t, transfer.id_typed()).await.unwrap();
        assert_eq!(tv.status_label, "En Tránsito");
        assert_eq!(tv.lines[0].product_code, "P-7");
        assert_eq!(tv.total_quantity, 5);

        let reprint = queries
            .movements_by_reference(t, transfer.number().as_str())
            .await
            .unwrap();
        assert_eq!(reprint.len(), 1);
    }

    #[tokio::test]
    async fn reference_lookup_returns_every_line_past_the_history_cap() {
        let store = InMemoryLedgerStore::new();
        let settings = LedgerSettings {
            history_limit: 2,
            ..LedgerSettings::default()
        };
        let receiving = ReceivingAdapter::new(store.clone(), settings);
        let queries = LedgerQueries::new(store, Arc::new(NullCatalog), settings);
        let (t, s) = (TenantId::new(), StoreId::new());
        let lines = (0..5)
            .map(|_| ReceivedLine {
                product_id: ProductId::new(),
                store_id: s,
                quantity: EnteredQuantity::base(4),
                bonus: None,
            })
            .collect();
        receiving
            .receive_purchase(PurchaseReceived {
                tenant_id: t,
                purchase_number: "OC-000900".to_string(),
                received_by: UserId::new(),
                occurred_at: Utc::now(),
                lines,
            })
            .await
            .unwrap();

        let reprint = queries.movements_by_reference(t, "OC-000900").await.unwrap();
        assert_eq!(reprint.len(), 5);
        let capped = queries
            .movement_history(t, &MovementFilter::default(), None)
            .await
            .unwrap();
        assert_eq!(capped.len(), 2);
    }

    #[tokio::test]
    async fn archived_balance_is_hidden_from_lookup_by_id() {
        let store = InMemoryLedgerStore::new();
        let settings = LedgerSettings::default();
        let stock = StockEngine::new(store.clone(), settings);
        let queries = LedgerQueries::new(store.clone(), Arc::new(NullCatalog), settings);
        let (t, s, p) = (TenantId::new(), StoreId::new(), ProductId::new());
        let b = stock.create_balance(t, s, p, 5).await.unwrap();
        assert_eq!(queries.balance(t, b.id_typed()).await.unwrap().minimum_stock(), 5);

        stock.archive_balance(t, b.id_typed()).await.unwrap();
        assert!(matches!(
            queries.balance(t, b.id_typed()).await,
            Err(LedgerError::NotFound { .. })
        ));
        assert!(queries.balance_for(t, s, p).await.unwrap().is_none());
        let all = store
            .list_balances(
                t,
                &BalanceFilter {
                    include_deleted: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
    }
}
