//! Ledger error model.

use thiserror::Error;

use crate::id::{ProductId, StoreId};

/// Result type used across the ledger.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Ledger-level error.
///
/// Every variant aborts the enclosing transaction. None of them is retried inside
/// the ledger; `Conflict` is the only one a caller should retry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// A referenced balance, transfer or product row does not exist for the tenant.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A decrement would take a balance below zero.
    #[error(
        "insufficient stock for product {product_id} at store {store_id}: have {available}, need {requested}"
    )]
    InsufficientStock {
        product_id: ProductId,
        store_id: StoreId,
        available: i64,
        requested: i64,
    },

    /// An operation was attempted from a state that does not allow it.
    #[error("cannot {attempted} {entity} in state {current}")]
    InvalidState {
        entity: &'static str,
        current: String,
        attempted: &'static str,
    },

    /// Malformed input (zero quantity, same origin and destination, empty batch...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Concurrent mutation detected (lock timeout, stale version, unique race).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Internal storage failure.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl LedgerError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn invalid_state(
        entity: &'static str,
        current: impl ToString,
        attempted: &'static str,
    ) -> Self {
        Self::InvalidState {
            entity,
            current: current.to_string(),
            attempted,
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Only concurrency conflicts are worth re-issuing unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Message suitable for an end user.
    ///
    /// Internal failures collapse into a generic "try again" without leaking detail.
    pub fn user_message(&self) -> String {
        match self {
            Self::InsufficientStock {
                available,
                requested,
                ..
            } => format!("insufficient stock: have {available}, need {requested}"),
            Self::Conflict(_) | Self::Storage(_) => {
                "the operation could not be completed, please try again".to_string()
            }
            other => other.to_string(),
        }
    }
}
