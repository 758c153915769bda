//! Store selection at startup.

use std::sync::Arc;

use sqlx::PgPool;
use tracing::info;

use stockledger_core::{LedgerError, LedgerResult};

use crate::catalog::ProductCatalog;
use crate::config::{ConfigError, LedgerConfig};
use crate::ledger::StockLedger;
use crate::ledger_store::{InMemoryLedgerStore, PostgresLedgerStore, postgres::map_sqlx_error};

#[derive(Clone)]
pub enum LedgerServices {
    InMemory(StockLedger<InMemoryLedgerStore>),
    Persistent(StockLedger<PostgresLedgerStore>),
}

impl LedgerServices {
    pub fn is_persistent(&self) -> bool {
        matches!(self, LedgerServices::Persistent(_))
    }

    pub fn in_memory(&self) -> Option<&StockLedger<InMemoryLedgerStore>> {
        match self {
            LedgerServices::InMemory(ledger) => Some(ledger),
            LedgerServices::Persistent(_) => None,
        }
    }

    pub fn persistent(&self) -> Option<&StockLedger<PostgresLedgerStore>> {
        match self {
            LedgerServices::Persistent(ledger) => Some(ledger),
            LedgerServices::InMemory(_) => None,
        }
    }
}

/// Build the ledger over the store `config` selects. The Postgres schema is applied on
/// startup.
pub async fn build_services(
    config: &LedgerConfig,
    catalog: Arc<dyn ProductCatalog>,
) -> LedgerResult<LedgerServices> {
    if !config.use_persistent_stores {
        info!("using in-memory stock ledger");
        return Ok(build_in_memory_services(config, catalog));
    }
    build_persistent_services(config, catalog).await
}

pub fn build_in_memory_services(
    config: &LedgerConfig,
    catalog: Arc<dyn ProductCatalog>,
) -> LedgerServices {
    LedgerServices::InMemory(StockLedger::new(
        InMemoryLedgerStore::new(),
        catalog,
        config.settings,
    ))
}

async fn build_persistent_services(
    config: &LedgerConfig,
    catalog: Arc<dyn ProductCatalog>,
) -> LedgerResult<LedgerServices> {
    let database_url = config
        .database_url
        .as_deref()
        .ok_or_else(|| LedgerError::from(ConfigError::MissingDatabaseUrl))?;

    let pool = PgPool::connect(database_url)
        .await
        .map_err(|e| map_sqlx_error("connect", e))?;
    let store = PostgresLedgerStore::new(pool, config.lock_timeout);
    store.migrate().await?;

    info!(
        lock_timeout_ms = config.lock_timeout.as_millis() as u64,
        "using postgres stock ledger"
    );
    Ok(LedgerServices::Persistent(StockLedger::new(
        store,
        catalog,
        config.settings,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::NullCatalog;

    #[tokio::test]
    async fn default_config_builds_in_memory_ledger() {
        let services = build_services(&LedgerConfig::default(), Arc::new(NullCatalog))
            .await
            .unwrap();
        assert!(!services.is_persistent());
        assert!(services.in_memory().is_some());
    }

    #[tokio::test]
    async fn persistent_without_url_is_an_error_not_a_panic() {
        let config = LedgerConfig {
            use_persistent_stores: true,
            ..LedgerConfig::default()
        };
        let err = build_services(&config, Arc::new(NullCatalog))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, LedgerError::InvalidArgument(_)));
    }
}
