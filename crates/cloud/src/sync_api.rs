//! Blocking wrapper around [`StacClient`].
//!
//! Owns a current-thread Tokio runtime so the sequential acquisition search
//! can call into the async client without an executor of its own.

use crate::error::{CloudError, Result};
use crate::stac_client::{StacCatalog, StacClient, StacClientOptions};
use crate::stac_models::{StacItem, StacItemCollection, StacSearchParams};

pub struct StacClientBlocking {
    rt: tokio::runtime::Runtime,
    inner: StacClient,
}

impl StacClientBlocking {
    pub fn new(catalog: StacCatalog, options: StacClientOptions) -> Result<Self> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| CloudError::Network(format!("failed to start runtime: {e}")))?;
        let inner = StacClient::new(catalog, options)?;
        Ok(Self { rt, inner })
    }

    pub fn catalog(&self) -> &StacCatalog {
        self.inner.catalog()
    }

    pub fn search(&self, params: &StacSearchParams) -> Result<StacItemCollection> {
        self.rt.block_on(self.inner.search(params))
    }

    pub fn search_all(&self, params: &StacSearchParams) -> Result<Vec<StacItem>> {
        self.rt.block_on(self.inner.search_all(params))
    }

    pub fn sign_href(&self, href: &str) -> Result<String> {
        self.rt.block_on(self.inner.sign_href(href))
    }

    /// Sign if needed, then download.
    pub fn fetch_asset(&self, href: &str) -> Result<Vec<u8>> {
        self.rt.block_on(async {
            let url = self.inner.sign_href(href).await?;
            self.inner.download(&url).await
        })
    }
}
