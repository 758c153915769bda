//! `stockledger-core`: foundation building blocks for the stock ledger.
//!
//! This crate contains **pure** primitives (no infrastructure concerns): typed
//! identifiers, the entity/version contract and the ledger error taxonomy.

pub mod entity;
pub mod error;
pub mod id;

pub use entity::{Entity, ExpectedVersion};
pub use error::{LedgerError, LedgerResult};
pub use id::{
    AdjustmentId, BalanceId, MovementId, ProductId, StoreId, TenantId, TransferId, UomId, UserId,
};
