//! Transactional stock ledger storage boundary.
//!
//! Balances, movements, adjustment audit rows and transfers are written through one
//! [`LedgerTx`] per operation, so a balance change and its movement always commit or
//! roll back together.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::{InMemoryLedgerStore, InMemoryLedgerTx};
pub use postgres::{PostgresLedgerStore, PostgresLedgerTx};
pub use r#trait::{BalanceFilter, LedgerStore, LedgerTx, TransferFilter};
