//! Inter-store transfer state machine.
//!
//! ```text
//! InTransit ──complete──▶ Completed
//!     │
//!     └──────cancel─────▶ Cancelled
//! ```
//!
//! Stock leaves the origin when the transfer is opened and only reappears at the
//! destination on completion (or back at the origin on cancellation). The aggregate
//! here owns the status rules; balance postings are done by the transfer engine in
//! the same transaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{
    Entity, LedgerError, LedgerResult, ProductId, StoreId, TenantId, TransferId, UserId,
};

use crate::codes::{DocumentCode, DocumentKind};
use crate::uom::UomAudit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    InTransit,
    Completed,
    Cancelled,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::InTransit => "in_transit",
            TransferStatus::Completed => "completed",
            TransferStatus::Cancelled => "cancelled",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TransferStatus::InTransit => "En Tránsito",
            TransferStatus::Completed => "Completada",
            TransferStatus::Cancelled => "Cancelada",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransferStatus::InTransit)
    }
}

impl core::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for TransferStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_transit" => Ok(TransferStatus::InTransit),
            "completed" => Ok(TransferStatus::Completed),
            "cancelled" => Ok(TransferStatus::Cancelled),
            other => Err(LedgerError::invalid_argument(format!(
                "unknown transfer status '{other}'"
            ))),
        }
    }
}

/// One product line of a transfer, in base units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLine {
    pub line_no: u32,
    pub product_id: ProductId,
    pub quantity: i64,
    pub uom: Option<UomAudit>,
}

/// Line as requested, before numbering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransferLine {
    pub product_id: ProductId,
    pub quantity: i64,
    pub uom: Option<UomAudit>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    id: TransferId,
    tenant_id: TenantId,
    number: DocumentCode,
    origin_store_id: StoreId,
    destination_store_id: StoreId,
    status: TransferStatus,
    requested_by: UserId,
    received_by: Option<UserId>,
    notes: String,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    version: u64,
    lines: Vec<TransferLine>,
}

/// Column-level view used by storage adapters to rebuild a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRow {
    pub id: TransferId,
    pub tenant_id: TenantId,
    pub number: DocumentCode,
    pub origin_store_id: StoreId,
    pub destination_store_id: StoreId,
    pub status: TransferStatus,
    pub requested_by: UserId,
    pub received_by: Option<UserId>,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub version: u64,
    pub lines: Vec<TransferLine>,
}

impl Transfer {
    /// Open a transfer in `InTransit`, generating its `TRF-` number.
    pub fn open(
        tenant_id: TenantId,
        origin_store_id: StoreId,
        destination_store_id: StoreId,
        requested_by: UserId,
        notes: impl Into<String>,
        lines: Vec<NewTransferLine>,
        now: DateTime<Utc>,
    ) -> LedgerResult<Self> {
        if origin_store_id == destination_store_id {
            return Err(LedgerError::invalid_argument(
                "origin and destination store must differ",
            ));
        }
        if lines.is_empty() {
            return Err(LedgerError::invalid_argument("transfer must have at least one line"));
        }

        let mut numbered = Vec::with_capacity(lines.len());
        for (idx, line) in lines.into_iter().enumerate() {
            if line.quantity <= 0 {
                return Err(LedgerError::invalid_argument(format!(
                    "transfer line {} quantity must be greater than zero (got {})",
                    idx + 1,
                    line.quantity
                )));
            }
            numbered.push(TransferLine {
                line_no: u32::try_from(idx + 1)
                    .map_err(|_| LedgerError::invalid_argument("transfer has too many lines"))?,
                product_id: line.product_id,
                quantity: line.quantity,
                uom: line.uom,
            });
        }

        Ok(Self {
            id: TransferId::new(),
            tenant_id,
            number: DocumentCode::generate(DocumentKind::Transfer, now),
            origin_store_id,
            destination_store_id,
            status: TransferStatus::InTransit,
            requested_by,
            received_by: None,
            notes: notes.into(),
            created_at: now,
            completed_at: None,
            cancelled_at: None,
            version: 0,
            lines: numbered,
        })
    }

    pub fn from_row(row: TransferRow) -> Self {
        Self {
            id: row.id,
            tenant_id: row.tenant_id,
            number: row.number,
            origin_store_id: row.origin_store_id,
            destination_store_id: row.destination_store_id,
            status: row.status,
            requested_by: row.requested_by,
            received_by: row.received_by,
            notes: row.notes,
            created_at: row.created_at,
            completed_at: row.completed_at,
            cancelled_at: row.cancelled_at,
            version: row.version,
            lines: row.lines,
        }
    }

    pub fn id_typed(&self) -> TransferId {
        self.id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn number(&self) -> &DocumentCode {
        &self.number
    }

    pub fn origin_store_id(&self) -> StoreId {
        self.origin_store_id
    }

    pub fn destination_store_id(&self) -> StoreId {
        self.destination_store_id
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    pub fn requested_by(&self) -> UserId {
        self.requested_by
    }

    pub fn received_by(&self) -> Option<UserId> {
        self.received_by
    }

    pub fn notes(&self) -> &str {
        &self.notes
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn cancelled_at(&self) -> Option<DateTime<Utc>> {
        self.cancelled_at
    }

    pub fn lines(&self) -> &[TransferLine] {
        &self.lines
    }

    pub fn total_quantity(&self) -> i64 {
        self.lines.iter().map(|l| l.quantity).sum()
    }

    pub fn ensure_tenant(&self, tenant_id: TenantId) -> LedgerResult<()> {
        if self.tenant_id != tenant_id {
            return Err(LedgerError::not_found("transfer", self.id));
        }
        Ok(())
    }

    /// `InTransit -> Completed`, recording who received the goods.
    pub fn complete(&mut self, received_by: UserId, now: DateTime<Utc>) -> LedgerResult<()> {
        self.ensure_in_transit("complete")?;
        self.status = TransferStatus::Completed;
        self.received_by = Some(received_by);
        self.completed_at = Some(now);
        Ok(())
    }

    /// `InTransit -> Cancelled`. `received_by` stays unset.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> LedgerResult<()> {
        self.ensure_in_transit("cancel")?;
        self.status = TransferStatus::Cancelled;
        self.cancelled_at = Some(now);
        Ok(())
    }

    pub fn mark_persisted(&mut self) {
        self.version += 1;
    }

    fn ensure_in_transit(&self, attempted: &'static str) -> LedgerResult<()> {
        if self.status != TransferStatus::InTransit {
            return Err(LedgerError::invalid_state("transfer", self.status, attempted));
        }
        Ok(())
    }
}

impl Entity for Transfer {
    type Id = TransferId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}
