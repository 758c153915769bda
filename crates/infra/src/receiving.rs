//! Posts `Entry` movements when the purchasing side marks a purchase as received.

use tracing::{info, instrument};

use stockledger_core::{LedgerError, LedgerResult};
use stockledger_inventory::{MovementType, PurchaseReceived, StockBalance, reason};

use crate::config::LedgerSettings;
use crate::ledger_store::{LedgerStore, LedgerTx};
use crate::postings::{self, MovementDraft};

#[derive(Debug, Clone)]
pub struct ReceivingAdapter<S> {
    store: S,
    settings: LedgerSettings,
}

impl<S: LedgerStore> ReceivingAdapter<S> {
    pub fn new(store: S, settings: LedgerSettings) -> Self {
        Self { store, settings }
    }

    /// Credit every line of the purchase in one transaction. Returns one final snapshot
    /// per touched balance, in first-seen order.
    #[instrument(
        skip(self, event),
        fields(tenant_id = %event.tenant_id, purchase_number = %event.purchase_number),
        err
    )]
    pub async fn receive_purchase(&self, event: PurchaseReceived) -> LedgerResult<Vec<StockBalance>> {
        if event.lines.is_empty() {
            return Err(LedgerError::invalid_argument(
                "received purchase must have at least one line",
            ));
        }
        let resolved = event
            .lines
            .iter()
            .map(|line| line.resolve())
            .collect::<LedgerResult<Vec<_>>>()?;

        let entry_reason = reason::purchase_received(&event.purchase_number);
        let mut tx = self.store.begin().await?;
        let mut touched: Vec<StockBalance> = Vec::with_capacity(event.lines.len());

        for (line, quantity) in event.lines.iter().zip(resolved) {
            let mut balance = postings::get_or_restore(
                &mut tx,
                event.tenant_id,
                line.store_id,
                line.product_id,
                self.settings.default_minimum_stock,
                event.occurred_at,
            )
            .await?;
            let draft = MovementDraft::new(
                MovementType::Entry,
                entry_reason.clone(),
                event.received_by,
                event.occurred_at,
            )
            .reference(event.purchase_number.clone())
            .uom(quantity.audit);
            postings::post_increase(&mut tx, &mut balance, quantity.base, draft).await?;
            // Repeated (store, product) lines keep one entry with the latest state.
            match touched.iter_mut().find(|b| b.id_typed() == balance.id_typed()) {
                Some(seen) => *seen = balance,
                None => touched.push(balance),
            }
        }
        tx.commit().await?;

        info!(lines = event.lines.len(), balances = touched.len(), "purchase received");
        Ok(touched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger_store::InMemoryLedgerStore;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use stockledger_core::{ProductId, StoreId, TenantId, UomId, UserId};
    use stockledger_inventory::{EnteredQuantity, MovementFilter, ReceivedLine, UnitOfMeasure};

    fn event(tenant: TenantId, lines: Vec<ReceivedLine>) -> PurchaseReceived {
        PurchaseReceived {
            tenant_id: tenant,
            purchase_number: "OC-000123".to_string(),
            received_by: UserId::new(),
            occurred_at: Utc::now(),
            lines,
        }
    }

    #[tokio::test]
    async fn receipt_creates_balances_with_default_minimum() {
        let store = InMemoryLedgerStore::new();
        let adapter = ReceivingAdapter::new(store.clone(), LedgerSettings::default());
        let tenant = TenantId::new();
        let line = ReceivedLine {
            product_id: ProductId::new(),
            store_id: StoreId::new(),
            quantity: EnteredQuantity::in_unit(
                dec!(2),
                UnitOfMeasure {
                    id: UomId::new(),
                    code: "CJA".to_string(),
                    conversion_factor: dec!(24),
                },
            ),
            bonus: Some(EnteredQuantity::base(3)),
        };

        let touched = adapter.receive_purchase(event(tenant, vec![line])).await.unwrap();
        assert_eq!(touched[0].current_stock(), 51);
        assert_eq!(touched[0].minimum_stock(), 10);

        let filter = MovementFilter {
            reference: Some("OC-000123".to_string()),
            ..Default::default()
        };
        let movements = store.query_movements(tenant, &filter, 10).await.unwrap();
        assert_eq!(movements.len(), 1);
        let movement = &movements[0].movement;
        assert_eq!(movement.movement_type, MovementType::Entry);
        assert_eq!(movement.reason, "Compra OC-000123 recibida");
        assert_eq!(movement.uom.as_ref().unwrap().entered_quantity, dec!(2));
    }

    #[tokio::test]
    async fn a_bad_line_rejects_the_whole_receipt() {
        let store = InMemoryLedgerStore::new();
        let adapter = ReceivingAdapter::new(store.clone(), LedgerSettings::default());
        let tenant = TenantId::new();
        let good = ReceivedLine {
            product_id: ProductId::new(),
            store_id: StoreId::new(),
            quantity: EnteredQuantity::base(5),
            bonus: None,
        };
        let bad = ReceivedLine {
            quantity: EnteredQuantity::base(0),
            ..good.clone()
        };

        assert!(adapter.receive_purchase(event(tenant, vec![good, bad])).await.is_err());
        assert!(adapter.receive_purchase(event(tenant, Vec::new())).await.is_err());
        let all = store
            .query_movements(tenant, &MovementFilter::default(), 10)
            .await
            .unwrap();
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn repeated_lines_return_one_final_snapshot() {
        let store = InMemoryLedgerStore::new();
        let adapter = ReceivingAdapter::new(store.clone(), LedgerSettings::default());
        let tenant = TenantId::new();
        let first = ReceivedLine {
            product_id: ProductId::new(),
            store_id: StoreId::new(),
            quantity: EnteredQuantity::base(5),
            bonus: None,
        };
        let other = ReceivedLine {
            product_id: ProductId::new(),
            ..first.clone()
        };
        let again = ReceivedLine {
            quantity: EnteredQuantity::base(7),
            ..first.clone()
        };

        let touched = adapter
            .receive_purchase(event(tenant, vec![first.clone(), other.clone(), again]))
            .await
            .unwrap();
        assert_eq!(touched.len(), 2);
        assert_eq!(touched[0].product_id(), first.product_id);
        assert_eq!(touched[0].current_stock(), 12);
        assert_eq!(touched[1].product_id(), other.product_id);
        assert_eq!(touched[1].current_stock(), 5);

        let movements = store
            .query_movements(tenant, &MovementFilter::default(), 10)
            .await
            .unwrap();
        assert_eq!(movements.len(), 3);
    }
}
