//! Stock ledger domain.
//!
//! This crate contains the business rules for balances, movements, adjustments and
//! transfers, implemented purely as deterministic domain logic (no IO, no HTTP, no
//! storage). Transaction handling lives in `stockledger-infra`.

pub mod adjustment;
pub mod balance;
pub mod codes;
pub mod movement;
pub mod receiving;
pub mod transfer;
pub mod uom;

pub use adjustment::{Adjustment, AdjustmentType};
pub use balance::{BalanceRow, StockBalance};
pub use codes::{DocumentCode, DocumentKind, reason};
pub use movement::{MovementEntry, MovementFilter, MovementRecord, MovementType};
pub use receiving::{PurchaseReceived, ReceivedLine};
pub use transfer::{NewTransferLine, Transfer, TransferLine, TransferRow, TransferStatus};
pub use uom::{EnteredQuantity, ResolvedQuantity, UnitOfMeasure, UomAudit, to_base_units};
