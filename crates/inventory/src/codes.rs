//! Human-readable document codes and the reason-text protocol.
//!
//! Codes are persisted and reprinted, so their shape is fixed:
//! `TRF-yyyyMMdd-XXXXXXXX` for transfers and `ADJ-yyyyMMdd-XXXXXXXX` for batch
//! adjustments, where `X` is an uppercase hex digit. Reporting collaborators group a
//! batch's movements by finding the code inside the movement reason, so the reason
//! formats below must stay byte-for-byte stable.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockledger_core::{LedgerError, LedgerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentKind {
    Transfer,
    Adjustment,
}

impl DocumentKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            DocumentKind::Transfer => "TRF",
            DocumentKind::Adjustment => "ADJ",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentCode {
    kind: DocumentKind,
    code: String,
}

impl DocumentCode {
    pub fn generate(kind: DocumentKind, at: DateTime<Utc>) -> Self {
        let random = Uuid::new_v4().simple().to_string();
        let code = format!(
            "{}-{}-{}",
            kind.prefix(),
            at.format("%Y%m%d"),
            random[..8].to_uppercase()
        );
        Self { kind, code }
    }

    pub fn parse(value: &str) -> LedgerResult<Self> {
        let invalid = || LedgerError::invalid_argument(format!("malformed document code '{value}'"));

        let mut parts = value.split('-');
        let (Some(prefix), Some(date), Some(suffix), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };

        let kind = match prefix {
            "TRF" => DocumentKind::Transfer,
            "ADJ" => DocumentKind::Adjustment,
            _ => return Err(invalid()),
        };
        if date.len() != 8 || NaiveDate::parse_from_str(date, "%Y%m%d").is_err() {
            return Err(invalid());
        }
        let hex_upper = |c: char| c.is_ascii_digit() || ('A'..='F').contains(&c);
        if suffix.len() != 8 || !suffix.chars().all(hex_upper) {
            return Err(invalid());
        }

        Ok(Self {
            kind,
            code: value.to_string(),
        })
    }

    pub fn kind(&self) -> DocumentKind {
        self.kind
    }

    pub fn as_str(&self) -> &str {
        &self.code
    }
}

impl core::fmt::Display for DocumentCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.code)
    }
}

impl TryFrom<String> for DocumentCode {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DocumentCode> for String {
    fn from(value: DocumentCode) -> Self {
        value.code
    }
}

/// Movement reason texts.
pub mod reason {
    use super::DocumentCode;

    pub fn transfer_sent(code: &DocumentCode, notes: &str) -> String {
        format!("Transferencia Enviada ({code}): {notes}")
    }

    pub fn transfer_received(code: &DocumentCode, notes: &str) -> String {
        format!("Transferencia Recibida ({code}): {notes}")
    }

    pub fn transfer_cancelled(code: &DocumentCode) -> String {
        format!("Cancelación de Transferencia ({code})")
    }

    pub fn single_adjustment(adjustment_type: &str, reason: &str) -> String {
        format!("Ajuste: {adjustment_type} - {reason}")
    }

    pub fn batch_adjustment(reason: &str, code: &DocumentCode, adjustment_type: &str) -> String {
        format!("Lote: {reason} ({code}) - {adjustment_type}")
    }

    pub fn purchase_received(purchase_number: &str) -> String {
        format!("Compra {purchase_number} recibida")
    }
}
