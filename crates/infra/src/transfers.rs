//! Inter-store transfers: the two-step `InTransit` flow and the single-call direct transfer.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use stockledger_core::{
    LedgerError, LedgerResult, ProductId, StoreId, TenantId, TransferId, UserId,
};
use stockledger_inventory::{
    DocumentCode, DocumentKind, EnteredQuantity, MovementType, NewTransferLine, Transfer, reason,
};

use crate::config::LedgerSettings;
use crate::ledger_store::{LedgerStore, LedgerTx, TransferFilter};
use crate::postings::{self, MovementDraft};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLineRequest {
    pub product_id: ProductId,
    pub quantity: EnteredQuantity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTransfer {
    pub tenant_id: TenantId,
    pub origin_store_id: StoreId,
    pub destination_store_id: StoreId,
    pub requested_by: UserId,
    pub notes: String,
    pub lines: Vec<TransferLineRequest>,
}

/// Legacy single-call transfer: origin debited and destination credited at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectTransfer {
    pub tenant_id: TenantId,
    pub origin_store_id: StoreId,
    pub destination_store_id: StoreId,
    pub user_id: UserId,
    pub reason: String,
    pub lines: Vec<TransferLineRequest>,
}

#[derive(Debug, Clone)]
pub struct TransferEngine<S> {
    store: S,
    settings: LedgerSettings,
}

impl<S: LedgerStore> TransferEngine<S> {
    pub fn new(store: S, settings: LedgerSettings) -> Self {
        Self { store, settings }
    }

    /// Open a transfer and take its stock out of the origin.
    #[instrument(
        skip(self, request),
        fields(
            tenant_id = %request.tenant_id,
            origin = %request.origin_store_id,
            destination = %request.destination_store_id
        ),
        err
    )]
    pub async fn create(&self, request: CreateTransfer) -> LedgerResult<Transfer> {
        let mut lines = Vec::with_capacity(request.lines.len());
        for line in &request.lines {
            let resolved = line.quantity.resolve()?;
            lines.push(NewTransferLine {
                product_id: line.product_id,
                quantity: resolved.base,
                uom: resolved.audit,
            });
        }

        let now = Utc::now();
        let mut transfer = Transfer::open(
            request.tenant_id,
            request.origin_store_id,
            request.destination_store_id,
            request.requested_by,
            request.notes,
            lines,
            now,
        )?;
        let sent = reason::transfer_sent(transfer.number(), transfer.notes());

        let mut tx = self.store.begin().await?;
        for line in transfer.lines() {
            let mut origin = tx
                .lock_balance_for(request.tenant_id, request.origin_store_id, line.product_id)
                .await?
                .ok_or(LedgerError::InsufficientStock {
                    product_id: line.product_id,
                    store_id: request.origin_store_id,
                    available: 0,
                    requested: line.quantity,
                })?;

            let draft = MovementDraft::new(
                MovementType::TransferOut,
                sent.clone(),
                request.requested_by,
                now,
            )
            .reference(transfer.number().as_str())
            .uom(line.uom.clone());
            postings::post_decrease(&mut tx, &mut origin, line.quantity, draft).await?;
        }
        tx.insert_transfer(&mut transfer).await?;
        tx.commit().await?;

        info!(
            transfer_number = %transfer.number(),
            lines = transfer.lines().len(),
            total = transfer.total_quantity(),
            "transfer created"
        );
        Ok(transfer)
    }

    /// Receive an in-transit transfer at its destination.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, transfer_id = %transfer_id), err)]
    pub async fn complete(
        &self,
        tenant_id: TenantId,
        transfer_id: TransferId,
        received_by: UserId,
    ) -> LedgerResult<Transfer> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let mut transfer = lock_transfer(&mut tx, tenant_id, transfer_id).await?;
        transfer.complete(received_by, now)?;

        let received = reason::transfer_received(transfer.number(), transfer.notes());
        for line in transfer.lines() {
            let mut destination = postings::get_or_restore(
                &mut tx,
                tenant_id,
                transfer.destination_store_id(),
                line.product_id,
                0,
                now,
            )
            .await?;
            let draft = MovementDraft::new(MovementType::TransferIn, received.clone(), received_by, now)
                .reference(transfer.number().as_str())
                .uom(line.uom.clone());
            postings::post_increase(&mut tx, &mut destination, line.quantity, draft).await?;
        }
        tx.save_transfer(&mut transfer).await?;
        tx.commit().await?;

        info!(transfer_number = %transfer.number(), "transfer completed");
        Ok(transfer)
    }

    /// Return the goods of an in-transit transfer to its origin.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, transfer_id = %transfer_id), err)]
    pub async fn cancel(
        &self,
        tenant_id: TenantId,
        transfer_id: TransferId,
        cancelled_by: UserId,
    ) -> LedgerResult<Transfer> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let mut transfer = lock_transfer(&mut tx, tenant_id, transfer_id).await?;
        transfer.cancel(now)?;

        let reversed = reason::transfer_cancelled(transfer.number());
        for line in transfer.lines() {
            let mut origin = postings::get_or_restore(
                &mut tx,
                tenant_id,
                transfer.origin_store_id(),
                line.product_id,
                0,
                now,
            )
            .await?;
            let draft = MovementDraft::new(
                MovementType::TransferReversal,
                reversed.clone(),
                cancelled_by,
                now,
            )
            .reference(transfer.number().as_str())
            .uom(line.uom.clone());
            postings::post_increase(&mut tx, &mut origin, line.quantity, draft).await?;
        }
        tx.save_transfer(&mut transfer).await?;
        tx.commit().await?;

        info!(transfer_number = %transfer.number(), "transfer cancelled");
        Ok(transfer)
    }

    pub async fn get(&self, tenant_id: TenantId, transfer_id: TransferId) -> LedgerResult<Transfer> {
        self.store
            .find_transfer(tenant_id, transfer_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("transfer", transfer_id))
    }

    pub async fn get_by_number(&self, tenant_id: TenantId, number: &str) -> LedgerResult<Transfer> {
        self.store
            .find_transfer_by_number(tenant_id, number)
            .await?
            .ok_or_else(|| LedgerError::not_found("transfer", number))
    }

    /// Newest first.
    pub async fn list(
        &self,
        tenant_id: TenantId,
        filter: &TransferFilter,
    ) -> LedgerResult<Vec<Transfer>> {
        self.store.list_transfers(tenant_id, filter).await
    }

    /// Move every line from origin to destination in one transaction and return the
    /// `TRF-` code written on both legs.
    #[instrument(
        skip(self, request),
        fields(
            tenant_id = %request.tenant_id,
            origin = %request.origin_store_id,
            destination = %request.destination_store_id
        ),
        err
    )]
    pub async fn transfer_direct(&self, request: DirectTransfer) -> LedgerResult<DocumentCode> {
        if request.origin_store_id == request.destination_store_id {
            return Err(LedgerError::invalid_argument(
                "origin and destination store must differ",
            ));
        }
        if request.lines.is_empty() {
            return Err(LedgerError::invalid_argument("transfer must have at least one line"));
        }
        let resolved = request
            .lines
            .iter()
            .map(|line| line.quantity.resolve())
            .collect::<LedgerResult<Vec<_>>>()?;

        let now = Utc::now();
        let code = DocumentCode::generate(DocumentKind::Transfer, now);
        let sent = reason::transfer_sent(&code, &request.reason);
        let received = reason::transfer_received(&code, &request.reason);

        let mut tx = self.store.begin().await?;
        for (line, quantity) in request.lines.iter().zip(resolved) {
            let mut origin = tx
                .lock_balance_for(request.tenant_id, request.origin_store_id, line.product_id)
                .await?
                .ok_or_else(|| {
                    LedgerError::not_found(
                        "stock balance",
                        format!("{}/{}", request.origin_store_id, line.product_id),
                    )
                })?;
            let out = MovementDraft::new(MovementType::Transfer, sent.clone(), request.user_id, now)
                .reference(code.as_str())
                .uom(quantity.audit.clone());
            postings::post_decrease(&mut tx, &mut origin, quantity.base, out).await?;

            let mut destination = postings::get_or_restore(
                &mut tx,
                request.tenant_id,
                request.destination_store_id,
                line.product_id,
                self.settings.default_minimum_stock,
                now,
            )
            .await?;
            let inbound =
                MovementDraft::new(MovementType::Transfer, received.clone(), request.user_id, now)
                    .reference(code.as_str())
                    .uom(quantity.audit);
            postings::post_increase(&mut tx, &mut destination, quantity.base, inbound).await?;
        }
        tx.commit().await?;

        info!(code = %code, lines = request.lines.len(), "direct transfer committed");
        Ok(code)
    }
}

async fn lock_transfer<T: LedgerTx>(
    tx: &mut T,
    tenant_id: TenantId,
    transfer_id: TransferId,
) -> LedgerResult<Transfer> {
    tx.lock_transfer(tenant_id, transfer_id)
        .await?
        .ok_or_else(|| LedgerError::not_found("transfer", transfer_id))
}
