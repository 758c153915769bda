use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{
    BalanceId, LedgerError, LedgerResult, MovementId, ProductId, StoreId, TenantId, UserId,
};

use crate::balance::StockBalance;
use crate::uom::UomAudit;

/// Kind of balance change recorded in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    /// Purchase receipt or batch initial load.
    Entry,
    /// Manual removal.
    Exit,
    /// Signed correction.
    Adjustment,
    /// Single-call transfer leg (both sides).
    Transfer,
    /// Customer return.
    Return,
    /// Shrinkage, expiry or damage.
    Loss,
    TransferIn,
    TransferOut,
    /// Goods credited back to the origin because a transfer was cancelled.
    TransferReversal,
}

impl MovementType {
    pub const ALL: [MovementType; 9] = [
        MovementType::Entry,
        MovementType::Exit,
        MovementType::Adjustment,
        MovementType::Transfer,
        MovementType::Return,
        MovementType::Loss,
        MovementType::TransferIn,
        MovementType::TransferOut,
        MovementType::TransferReversal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Entry => "entry",
            MovementType::Exit => "exit",
            MovementType::Adjustment => "adjustment",
            MovementType::Transfer => "transfer",
            MovementType::Return => "return",
            MovementType::Loss => "loss",
            MovementType::TransferIn => "transfer_in",
            MovementType::TransferOut => "transfer_out",
            MovementType::TransferReversal => "transfer_reversal",
        }
    }

    /// Display name used by the reporting screens.
    pub fn label(&self) -> &'static str {
        match self {
            MovementType::Entry => "Entrada",
            MovementType::Exit => "Salida",
            MovementType::Adjustment => "Ajuste",
            MovementType::Transfer => "Transferencia",
            MovementType::Return => "Devolución",
            MovementType::Loss => "Pérdida/Merma",
            MovementType::TransferIn => "Transferencia Recibida",
            MovementType::TransferOut => "Transferencia Enviada",
            MovementType::TransferReversal => "Transferencia Revertida",
        }
    }
}

impl core::fmt::Display for MovementType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for MovementType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MovementType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| LedgerError::invalid_argument(format!("unknown movement type '{s}'")))
    }
}

/// Immutable, signed record of one balance change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRecord {
    pub id: MovementId,
    pub tenant_id: TenantId,
    pub balance_id: BalanceId,
    /// Signed delta in base units.
    pub quantity: i64,
    pub movement_type: MovementType,
    pub reason: String,
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
    /// Document code (TRF-, ADJ-, purchase number) the movement belongs to.
    pub reference: Option<String>,
    pub uom: Option<UomAudit>,
}

impl MovementRecord {
    pub fn new(
        balance: &StockBalance,
        quantity: i64,
        movement_type: MovementType,
        reason: impl Into<String>,
        user_id: UserId,
        occurred_at: DateTime<Utc>,
    ) -> LedgerResult<Self> {
        if quantity == 0 {
            return Err(LedgerError::invalid_argument("movement quantity cannot be zero"));
        }
        Ok(Self {
            id: MovementId::new(),
            tenant_id: balance.tenant_id(),
            balance_id: balance.id_typed(),
            quantity,
            movement_type,
            reason: reason.into(),
            user_id,
            occurred_at,
            reference: None,
            uom: None,
        })
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_uom(mut self, uom: Option<UomAudit>) -> Self {
        self.uom = uom;
        self
    }
}

/// A movement joined with the store/product of its balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementEntry {
    pub movement: MovementRecord,
    pub store_id: StoreId,
    pub product_id: ProductId,
}

/// Operational history filter. The tenant is always passed separately.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementFilter {
    pub store_id: Option<StoreId>,
    pub product_id: Option<ProductId>,
    /// Inclusive lower bound.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound.
    pub until: Option<DateTime<Utc>>,
    pub reference: Option<String>,
}

impl MovementFilter {
    pub fn matches(&self, entry: &MovementEntry) -> bool {
        self.store_id.is_none_or(|s| s == entry.store_id)
            && self.product_id.is_none_or(|p| p == entry.product_id)
            && self.from.is_none_or(|from| entry.movement.occurred_at >= from)
            && self.until.is_none_or(|until| entry.movement.occurred_at < until)
            && self
                .reference
                .as_deref()
                .is_none_or(|r| entry.movement.reference.as_deref() == Some(r))
    }
}
