use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{AdjustmentId, BalanceId, LedgerError, LedgerResult, TenantId, UserId};

use crate::movement::MovementType;

/// Adjustment taxonomy as stored and reported.
///
/// The known codes drive movement typing; anything else is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AdjustmentType {
    InitialLoad,
    Shrinkage,
    Damaged,
    Expired,
    Correction,
    Other,
    Custom(String),
}

impl AdjustmentType {
    pub fn code(&self) -> &str {
        match self {
            AdjustmentType::InitialLoad => "CARGA_INICIAL",
            AdjustmentType::Shrinkage => "MERMA",
            AdjustmentType::Damaged => "DAÑADO",
            AdjustmentType::Expired => "VENCIDO",
            AdjustmentType::Correction => "CORRECCION",
            AdjustmentType::Other => "OTRO",
            AdjustmentType::Custom(code) => code,
        }
    }

    /// Movement type written for this adjustment.
    pub fn movement_type(&self) -> MovementType {
        match self {
            AdjustmentType::Shrinkage | AdjustmentType::Damaged | AdjustmentType::Expired => {
                MovementType::Loss
            }
            AdjustmentType::InitialLoad => MovementType::Entry,
            _ => MovementType::Adjustment,
        }
    }
}

impl core::fmt::Display for AdjustmentType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.code())
    }
}

impl core::str::FromStr for AdjustmentType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Ok(match trimmed {
            "CARGA_INICIAL" => AdjustmentType::InitialLoad,
            "MERMA" => AdjustmentType::Shrinkage,
            "DAÑADO" => AdjustmentType::Damaged,
            "VENCIDO" => AdjustmentType::Expired,
            "CORRECCION" => AdjustmentType::Correction,
            "OTRO" => AdjustmentType::Other,
            "" => return Err(LedgerError::invalid_argument("adjustment type cannot be empty")),
            other => AdjustmentType::Custom(other.to_string()),
        })
    }
}

impl TryFrom<String> for AdjustmentType {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AdjustmentType> for String {
    fn from(value: AdjustmentType) -> Self {
        value.code().to_string()
    }
}

/// Audit record layered on top of the movement an adjustment produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adjustment {
    pub id: AdjustmentId,
    pub tenant_id: TenantId,
    pub balance_id: BalanceId,
    pub adjustment_type: AdjustmentType,
    /// Magnitude in base units.
    pub quantity: i64,
    pub is_positive: bool,
    pub previous_stock: i64,
    pub new_stock: i64,
    pub reason: String,
    pub user_id: UserId,
    pub adjusted_at: DateTime<Utc>,
    /// Batch code (`ADJ-...`) when the adjustment was part of a batch.
    pub reference: Option<String>,
}

impl Adjustment {
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        tenant_id: TenantId,
        balance_id: BalanceId,
        adjustment_type: AdjustmentType,
        quantity: i64,
        is_positive: bool,
        previous_stock: i64,
        reason: impl Into<String>,
        user_id: UserId,
        adjusted_at: DateTime<Utc>,
    ) -> LedgerResult<Self> {
        if quantity <= 0 {
            return Err(LedgerError::invalid_argument(format!(
                "adjustment quantity must be greater than zero (got {quantity})"
            )));
        }
        let new_stock = if is_positive {
            previous_stock + quantity
        } else {
            previous_stock - quantity
        };
        Ok(Self {
            id: AdjustmentId::new(),
            tenant_id,
            balance_id,
            adjustment_type,
            quantity,
            is_positive,
            previous_stock,
            new_stock,
            reason: reason.into(),
            user_id,
            adjusted_at,
            reference: None,
        })
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    /// Signed delta the adjustment applied.
    pub fn delta(&self) -> i64 {
        if self.is_positive {
            self.quantity
        } else {
            -self.quantity
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loss_codes_map_to_loss_movements() {
        for code in ["MERMA", "DAÑADO", "VENCIDO"] {
            let t: AdjustmentType = code.parse().unwrap();
            assert_eq!(t.movement_type(), MovementType::Loss, "{code}");
            assert_eq!(t.code(), code);
        }
        assert_eq!(AdjustmentType::InitialLoad.movement_type(), MovementType::Entry);
        assert_eq!(AdjustmentType::Correction.movement_type(), MovementType::Adjustment);
    }

    #[test]
    fn unknown_codes_are_kept_verbatim() {
        let t: AdjustmentType = "ROBO".parse().unwrap();
        assert_eq!(t, AdjustmentType::Custom("ROBO".to_string()));
        assert_eq!(t.movement_type(), MovementType::Adjustment);
        assert!("  ".parse::<AdjustmentType>().is_err());
    }

    #[test]
    fn record_snapshots_previous_and_new_stock() {
        let adj = Adjustment::record(
            TenantId::new(),
            BalanceId::new(),
            AdjustmentType::Shrinkage,
            5,
            false,
            50,
            "rotura",
            UserId::new(),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(adj.previous_stock, 50);
        assert_eq!(adj.new_stock, 45);
        assert_eq!(adj.delta(), -5);
    }

    #[test]
    fn serde_uses_the_stored_code() {
        let json = serde_json::to_string(&AdjustmentType::Damaged).unwrap();
        assert_eq!(json, "\"DAÑADO\"");
        let back: AdjustmentType = serde_json::from_str("\"CARGA_INICIAL\"").unwrap();
        assert_eq!(back, AdjustmentType::InitialLoad);
    }
}
