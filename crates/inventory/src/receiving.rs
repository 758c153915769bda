//! Input consumed from the purchasing side when a purchase is marked received.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{LedgerError, LedgerResult, ProductId, StoreId, TenantId, UserId};

use crate::uom::{EnteredQuantity, ResolvedQuantity, ceil_to_units};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseReceived {
    pub tenant_id: TenantId,
    pub purchase_number: String,
    pub received_by: UserId,
    pub occurred_at: DateTime<Utc>,
    pub lines: Vec<ReceivedLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedLine {
    pub product_id: ProductId,
    pub store_id: StoreId,
    pub quantity: EnteredQuantity,
    /// Free goods shipped with the line, possibly in another unit.
    pub bonus: Option<EnteredQuantity>,
}

impl ReceivedLine {
    /// `ceil(quantity * factor + bonus * bonus_factor)`; the audit tuple describes the
    /// ordered quantity only.
    pub fn resolve(&self) -> LedgerResult<ResolvedQuantity> {
        if self.quantity.quantity <= Decimal::ZERO {
            return Err(LedgerError::invalid_argument(format!(
                "received quantity must be greater than zero (got {})",
                self.quantity.quantity
            )));
        }

        let mut total = self.quantity.base_value()?;
        if let Some(bonus) = self.bonus.as_ref().filter(|b| b.quantity > Decimal::ZERO) {
            total = total
                .checked_add(bonus.base_value()?)
                .ok_or_else(|| LedgerError::invalid_argument("received quantity overflows"))?;
        }

        Ok(ResolvedQuantity {
            base: ceil_to_units(total)?,
            audit: self.quantity.audit(),
        })
    }
}
