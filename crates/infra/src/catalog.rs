//! Read-only product lookup used to enrich ledger views.
//!
//! The ledger never depends on the catalog for correctness: a failed lookup degrades
//! to placeholder values and is logged, it never fails a read or a stock mutation.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use stockledger_core::{ProductId, TenantId};
use stockledger_inventory::UnitOfMeasure;

pub const UNKNOWN_PRODUCT: &str = "UNKNOWN";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductInfo {
    pub product_id: ProductId,
    pub code: String,
    pub name: String,
    /// Units the product can be counted in, with their factor to base units.
    pub units: Vec<UnitOfMeasure>,
}

impl ProductInfo {
    pub fn placeholder(product_id: ProductId) -> Self {
        Self {
            product_id,
            code: UNKNOWN_PRODUCT.to_string(),
            name: UNKNOWN_PRODUCT.to_string(),
            units: Vec::new(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.code == UNKNOWN_PRODUCT
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("product {0} not found in catalog")]
    NotFound(ProductId),

    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn resolve_product_info(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> Result<ProductInfo, CatalogError>;
}

/// Resolve product info, falling back to the placeholder on any failure.
pub async fn resolve_or_placeholder(
    catalog: &dyn ProductCatalog,
    tenant_id: TenantId,
    product_id: ProductId,
) -> ProductInfo {
    match catalog.resolve_product_info(tenant_id, product_id).await {
        Ok(info) => info,
        Err(err) => {
            warn!(
                tenant_id = %tenant_id,
                product_id = %product_id,
                error = %err,
                "product lookup failed, using placeholder"
            );
            ProductInfo::placeholder(product_id)
        }
    }
}

/// Per-call memo so a listing resolves each product once.
#[derive(Default)]
pub(crate) struct ProductInfoCache {
    resolved: HashMap<ProductId, ProductInfo>,
}

impl ProductInfoCache {
    pub async fn get(
        &mut self,
        catalog: &dyn ProductCatalog,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> ProductInfo {
        if let Some(info) = self.resolved.get(&product_id) {
            return info.clone();
        }
        let info = resolve_or_placeholder(catalog, tenant_id, product_id).await;
        self.resolved.insert(product_id, info.clone());
        info
    }
}

/// In-memory catalog.
///
/// Intended for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryProductCatalog {
    products: RwLock<HashMap<(TenantId, ProductId), ProductInfo>>,
}

impl InMemoryProductCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, tenant_id: TenantId, info: ProductInfo) -> Result<(), CatalogError> {
        let mut products = self
            .products
            .write()
            .map_err(|_| CatalogError::Unavailable("lock poisoned".to_string()))?;
        products.insert((tenant_id, info.product_id), info);
        Ok(())
    }
}

#[async_trait]
impl ProductCatalog for InMemoryProductCatalog {
    async fn resolve_product_info(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> Result<ProductInfo, CatalogError> {
        let products = self
            .products
            .read()
            .map_err(|_| CatalogError::Unavailable("lock poisoned".to_string()))?;
        products
            .get(&(tenant_id, product_id))
            .cloned()
            .ok_or(CatalogError::NotFound(product_id))
    }
}

/// Catalog used when no lookup is wired: every product resolves to the placeholder.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCatalog;

#[async_trait]
impl ProductCatalog for NullCatalog {
    async fn resolve_product_info(
        &self,
        _tenant_id: TenantId,
        product_id: ProductId,
    ) -> Result<ProductInfo, CatalogError> {
        Ok(ProductInfo::placeholder(product_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DownCatalog;

    #[async_trait]
    impl ProductCatalog for DownCatalog {
        async fn resolve_product_info(
            &self,
            _tenant_id: TenantId,
            _product_id: ProductId,
        ) -> Result<ProductInfo, CatalogError> {
            Err(CatalogError::Unavailable("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn failures_degrade_to_placeholder() {
        let product = ProductId::new();
        let info = resolve_or_placeholder(&DownCatalog, TenantId::new(), product).await;
        assert!(info.is_placeholder());
        assert_eq!(info.product_id, product);
        assert_eq!(info.name, "UNKNOWN");
    }

    #[tokio::test]
    async fn in_memory_catalog_is_tenant_scoped() {
        let catalog = InMemoryProductCatalog::new();
        let tenant = TenantId::new();
        let product = ProductId::new();
        catalog
            .insert(
                tenant,
                ProductInfo {
                    product_id: product,
                    code: "P-001".to_string(),
                    name: "Arroz 1kg".to_string(),
                    units: Vec::new(),
                },
            )
            .unwrap();

        let found = catalog.resolve_product_info(tenant, product).await.unwrap();
        assert_eq!(found.code, "P-001");
        assert_eq!(
            catalog
                .resolve_product_info(TenantId::new(), product)
                .await
                .unwrap_err(),
            CatalogError::NotFound(product)
        );
    }
}
