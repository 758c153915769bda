//! One handle over every engine sharing a single store.

use std::sync::Arc;

use crate::adjustments::AdjustmentEngine;
use crate::catalog::ProductCatalog;
use crate::config::LedgerSettings;
use crate::ledger_store::LedgerStore;
use crate::queries::LedgerQueries;
use crate::receiving::ReceivingAdapter;
use crate::reconciliation::Reconciler;
use crate::stock::StockEngine;
use crate::transfers::TransferEngine;

#[derive(Clone)]
pub struct StockLedger<S> {
    store: S,
    stock: StockEngine<S>,
    adjustments: AdjustmentEngine<S>,
    transfers: TransferEngine<S>,
    receiving: ReceivingAdapter<S>,
    queries: LedgerQueries<S>,
    reconciler: Reconciler<S>,
}

impl<S: LedgerStore + Clone> StockLedger<S> {
    pub fn new(store: S, catalog: Arc<dyn ProductCatalog>, settings: LedgerSettings) -> Self {
        Self {
            stock: StockEngine::new(store.clone(), settings),
            adjustments: AdjustmentEngine::new(store.clone()),
            transfers: TransferEngine::new(store.clone(), settings),
            receiving: ReceivingAdapter::new(store.clone(), settings),
            queries: LedgerQueries::new(store.clone(), catalog, settings),
            reconciler: Reconciler::new(store.clone()),
            store,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn stock(&self) -> &StockEngine<S> {
        &self.stock
    }

    pub fn adjustments(&self) -> &AdjustmentEngine<S> {
        &self.adjustments
    }

    pub fn transfers(&self) -> &TransferEngine<S> {
        &self.transfers
    }

    pub fn receiving(&self) -> &ReceivingAdapter<S> {
        &self.receiving
    }

    pub fn queries(&self) -> &LedgerQueries<S> {
        &self.queries
    }

    pub fn reconciler(&self) -> &Reconciler<S> {
        &self.reconciler
    }
}
