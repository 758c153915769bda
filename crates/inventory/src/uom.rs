//! Unit-of-measure conversion.
//!
//! Balances are always kept in base units (integers). Callers may enter a quantity in
//! any unit together with the unit's conversion factor ("how many base units one
//! entered unit represents"); the helper converts it with a single rounding policy:
//! **ceil**, so a fractional entry never under-credits the ledger.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use stockledger_core::{LedgerError, LedgerResult, UomId};

/// Replace a zero, negative or missing factor by 1.
pub fn normalize_factor(factor: Option<Decimal>) -> Decimal {
    match factor {
        Some(f) if f > Decimal::ZERO => f,
        _ => Decimal::ONE,
    }
}

/// Convert an entered quantity to base units (ceil).
pub fn to_base_units(entered: Decimal, conversion_factor: Decimal) -> LedgerResult<i64> {
    let factor = normalize_factor(Some(conversion_factor));
    let total = entered
        .checked_mul(factor)
        .ok_or_else(|| LedgerError::invalid_argument("quantity overflows base units"))?;
    ceil_to_units(total)
}

/// Round an already-converted base quantity up to whole units.
pub fn ceil_to_units(total: Decimal) -> LedgerResult<i64> {
    total
        .ceil()
        .to_i64()
        .ok_or_else(|| LedgerError::invalid_argument(format!("{total} does not fit base units")))
}

/// A unit the quantity was entered in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitOfMeasure {
    pub id: UomId,
    pub code: String,
    pub conversion_factor: Decimal,
}

/// Audit tuple stored on a movement. Display only; never used for balance math.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UomAudit {
    pub uom_id: Option<UomId>,
    pub uom_code: Option<String>,
    pub entered_quantity: Decimal,
    pub conversion_factor: Decimal,
}

/// A quantity as a user typed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnteredQuantity {
    pub quantity: Decimal,
    pub uom: Option<UnitOfMeasure>,
}

/// An entered quantity converted to base units, with its audit tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedQuantity {
    pub base: i64,
    pub audit: Option<UomAudit>,
}

impl EnteredQuantity {
    /// Quantity already expressed in base units.
    pub fn base(quantity: i64) -> Self {
        Self {
            quantity: Decimal::from(quantity),
            uom: None,
        }
    }

    pub fn in_unit(quantity: Decimal, uom: UnitOfMeasure) -> Self {
        Self {
            quantity,
            uom: Some(uom),
        }
    }

    pub fn factor(&self) -> Decimal {
        normalize_factor(self.uom.as_ref().map(|u| u.conversion_factor))
    }

    /// Exact (unrounded) value in base units.
    pub fn base_value(&self) -> LedgerResult<Decimal> {
        self.quantity
            .checked_mul(self.factor())
            .ok_or_else(|| LedgerError::invalid_argument("quantity overflows base units"))
    }

    pub fn audit(&self) -> Option<UomAudit> {
        self.uom.as_ref().map(|u| UomAudit {
            uom_id: Some(u.id),
            uom_code: Some(u.code.clone()),
            entered_quantity: self.quantity,
            conversion_factor: self.factor(),
        })
    }

    /// Validate (> 0) and convert.
    pub fn resolve(&self) -> LedgerResult<ResolvedQuantity> {
        if self.quantity <= Decimal::ZERO {
            return Err(LedgerError::invalid_argument(format!(
                "quantity must be greater than zero (got {})",
                self.quantity
            )));
        }
        Ok(ResolvedQuantity {
            base: to_base_units(self.quantity, self.factor())?,
            audit: self.audit(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn dozen() -> UnitOfMeasure {
        UnitOfMeasure {
            id: UomId::new(),
            code: "DOC".to_string(),
            conversion_factor: dec!(12),
        }
    }

    #[test]
    fn factor_one_is_identity() {
        assert_eq!(to_base_units(dec!(7), dec!(1)).unwrap(), 7);
    }

    #[test]
    fn ceil_policy_matches_documented_examples() {
        assert_eq!(to_base_units(dec!(2.5), dec!(12)).unwrap(), 30);
        assert_eq!(to_base_units(dec!(2.34), dec!(12)).unwrap(), 29);
    }

    #[test]
    fn non_positive_factor_falls_back_to_one() {
        assert_eq!(to_base_units(dec!(3), Decimal::ZERO).unwrap(), 3);
        assert_eq!(to_base_units(dec!(3), dec!(-4)).unwrap(), 3);
        assert_eq!(normalize_factor(None), Decimal::ONE);
    }

    #[test]
    fn resolve_rejects_zero_and_negative() {
        assert!(matches!(
            EnteredQuantity::base(0).resolve(),
            Err(LedgerError::InvalidArgument(_))
        ));
        assert!(matches!(
            EnteredQuantity::base(-2).resolve(),
            Err(LedgerError::InvalidArgument(_))
        ));
    }

    #[test]
    fn resolve_carries_audit_tuple() {
        let resolved = EnteredQuantity::in_unit(dec!(2), dozen()).resolve().unwrap();
        assert_eq!(resolved.base, 24);
        let audit = resolved.audit.unwrap();
        assert_eq!(audit.uom_code.as_deref(), Some("DOC"));
        assert_eq!(audit.entered_quantity, dec!(2));
        assert_eq!(audit.conversion_factor, dec!(12));

        assert!(EnteredQuantity::base(5).resolve().unwrap().audit.is_none());
    }

    proptest! {
        /// Ceil never loses stock and never over-credits by a full unit.
        #[test]
        fn ceil_is_tight_upper_bound(cents in 1i64..1_000_000, factor in 1i64..500) {
            let entered = Decimal::new(cents, 2);
            let exact = entered * Decimal::from(factor);
            let base = to_base_units(entered, Decimal::from(factor)).unwrap();
            prop_assert!(Decimal::from(base) >= exact);
            prop_assert!(Decimal::from(base) - exact < Decimal::ONE);
        }
    }
}
