//! Infrastructure layer: transactional ledger storage, the stock engines, read queries
//! and startup wiring.

pub mod adjustments;
pub mod catalog;
pub mod config;
pub mod ledger;
pub mod ledger_store;
pub mod queries;
pub mod receiving;
pub mod reconciliation;
pub mod services;
pub mod stock;
pub mod transfers;

mod postings;


pub use ledger::StockLedger;
pub use services::{LedgerServices, build_services};
