//! Async STAC client.
//!
//! Item search with pagination, asset download and Planetary Computer URL
//! signing. Transient failures are retried with exponential backoff; HTTP
//! 4xx answers are not.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{CloudError, Result};
use crate::stac_models::{StacItem, StacItemCollection, StacLink, StacSearchParams};

/// Landsat Collection 2 Level-2 collection id on both public catalogs
pub const LANDSAT_C2_L2: &str = "landsat-c2-l2";

/// Catalogs known by shorthand, plus any STAC API root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StacCatalog {
    PlanetaryComputer,
    EarthSearch,
    Custom(String),
}

impl StacCatalog {
    /// `POST /search` endpoint
    pub fn search_url(&self) -> String {
        match self {
            Self::PlanetaryComputer => {
                "https://planetarycomputer.microsoft.com/api/stac/v1/search".to_string()
            }
            Self::EarthSearch => "https://earth-search.aws.element84.com/v1/search".to_string(),
            Self::Custom(base) => {
                let base = base.trim_end_matches('/');
                if base.ends_with("/search") {
                    base.to_string()
                } else {
                    format!("{base}/search")
                }
            }
        }
    }

    /// `pc` / `planetary-computer`, `es` / `earth-search`, else a URL.
    pub fn from_str_or_url(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "pc" | "planetary-computer" | "planetarycomputer" => Self::PlanetaryComputer,
            "es" | "earth-search" | "earthsearch" => Self::EarthSearch,
            _ => Self::Custom(s.to_string()),
        }
    }

    /// Whether asset hrefs need a SAS token before download.
    pub fn needs_signing(&self) -> bool {
        matches!(self, Self::PlanetaryComputer)
    }
}

/// Tunables of [`StacClient`].
#[derive(Debug, Clone)]
pub struct StacClientOptions {
    /// Per-request timeout (default: 30 s; downloads get four times this)
    pub request_timeout: Duration,
    /// Retries after the first attempt (default: 3)
    pub max_retries: u32,
    /// First backoff delay, doubled on every retry (default: 500 ms)
    pub backoff: Duration,
    /// Items collected across pages at most (default: 200)
    pub max_items: usize,
}

impl Default for StacClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
            backoff: Duration::from_millis(500),
            max_items: 200,
        }
    }
}

/// Outcome of one attempt.
enum Attempt<T> {
    Done(T),
    /// Worth another try
    Retry(CloudError),
    Fatal(CloudError),
}

pub struct StacClient {
    catalog: StacCatalog,
    client: reqwest::Client,
    options: StacClientOptions,
}

impl StacClient {
    pub fn new(catalog: StacCatalog, options: StacClientOptions) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(options.request_timeout)
            .build()
            .map_err(|e| CloudError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            catalog,
            client,
            options,
        })
    }

    pub fn catalog(&self) -> &StacCatalog {
        &self.catalog
    }

    /// One page of results.
    pub async fn search(&self, params: &StacSearchParams) -> Result<StacItemCollection> {
        self.post_search(&self.catalog.search_url(), params).await
    }

    /// Every page, up to `max_items` items.
    pub async fn search_all(&self, params: &StacSearchParams) -> Result<Vec<StacItem>> {
        let max = self.options.max_items;
        let mut items = Vec::new();
        let mut page = self.search(params).await?;

        loop {
            let next = page.next_link().cloned();
            items.append(&mut page.features);
            if items.len() >= max {
                break;
            }
            let Some(link) = next else { break };
            page = self.follow_next(&link, params).await?;
            if page.is_empty() {
                break;
            }
        }

        items.truncate(max);
        Ok(items)
    }

    /// A downloadable URL for `href` (signed on Planetary Computer).
    pub async fn sign_href(&self, href: &str) -> Result<String> {
        if !self.catalog.needs_signing() {
            return Ok(href.to_string());
        }
        let url = "https://planetarycomputer.microsoft.com/api/sas/v1/sign";
        let body: serde_json::Value = self
            .with_retries("sign", move || async move {
                let resp = match self
                    .client
                    .get(url)
                    .query(&[("href", href)])
                    .timeout(self.options.request_timeout)
                    .send()
                    .await
                {
                    Ok(r) => r,
                    Err(e) => return Attempt::Retry(CloudError::Auth(e.to_string())),
                };
                match classify_status(&resp, "sign") {
                    Some(err) => err,
                    None => match resp.json().await {
                        Ok(v) => Attempt::Done(v),
                        Err(e) => Attempt::Fatal(CloudError::Auth(format!("sign response: {e}"))),
                    },
                }
            })
            .await?;

        body["href"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| CloudError::Auth("sign response has no 'href'".into()))
    }

    /// Whole asset as bytes.
    pub async fn download(&self, url: &str) -> Result<Vec<u8>> {
        debug!("Downloading {url}");
        self.with_retries("download", move || async move {
            let resp = match self
                .client
                .get(url)
                .timeout(self.options.request_timeout * 4)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => return Attempt::Retry(CloudError::Http(e)),
            };
            if let Some(err) = classify_status(&resp, "download") {
                return err;
            }
            match resp.bytes().await {
                Ok(b) => Attempt::Done(b.to_vec()),
                Err(e) => Attempt::Retry(CloudError::Http(e)),
            }
        })
        .await
    }

    async fn post_search(&self, url: &str, params: &StacSearchParams) -> Result<StacItemCollection> {
        self.with_retries("search", move || async move {
            let resp = match self
                .client
                .post(url)
                .json(params)
                .timeout(self.options.request_timeout)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => return Attempt::Retry(CloudError::Http(e)),
            };
            if let Some(err) = classify_status(&resp, "search") {
                return err;
            }
            match resp.text().await {
                Ok(body) => match serde_json::from_str(&body) {
                    Ok(col) => Attempt::Done(col),
                    Err(e) => Attempt::Fatal(CloudError::Stac(e.to_string())),
                },
                Err(e) => Attempt::Retry(CloudError::Http(e)),
            }
        })
        .await
    }

    /// POST links may carry a body to merge into the original request;
    /// anything else is a plain GET.
    async fn follow_next(&self, link: &StacLink, original: &StacSearchParams) -> Result<StacItemCollection> {
        let is_post = link
            .method
            .as_deref()
            .is_some_and(|m| m.eq_ignore_ascii_case("POST"));

        if !is_post {
            return self
                .with_retries("page", move || async move {
                    let resp = match self.client.get(&link.href).send().await {
                        Ok(r) => r,
                        Err(e) => return Attempt::Retry(CloudError::Http(e)),
                    };
                    if let Some(err) = classify_status(&resp, "page") {
                        return err;
                    }
                    match resp.json().await {
                        Ok(col) => Attempt::Done(col),
                        Err(e) => Attempt::Fatal(CloudError::Stac(e.to_string())),
                    }
                })
                .await;
        }

        let mut body = if link.merge.unwrap_or(false) || link.body.is_none() {
            serde_json::to_value(original).map_err(|e| CloudError::Stac(e.to_string()))?
        } else {
            serde_json::Value::Object(Default::default())
        };
        if let (Some(base), Some(extra)) = (
            body.as_object_mut(),
            link.body.as_ref().and_then(|b| b.as_object()),
        ) {
            base.extend(extra.clone());
        }
        let next: StacSearchParams =
            serde_json::from_value(body).map_err(|e| CloudError::Stac(e.to_string()))?;
        self.post_search(&link.href, &next).await
    }

    async fn with_retries<T, F, Fut>(&self, what: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Attempt<T>>,
    {
        let mut delay = self.options.backoff;
        let mut tries = 0;
        loop {
            match attempt().await {
                Attempt::Done(value) => return Ok(value),
                Attempt::Fatal(err) => return Err(err),
                Attempt::Retry(err) if tries >= self.options.max_retries => return Err(err),
                Attempt::Retry(err) => {
                    tries += 1;
                    warn!("STAC {what} failed ({err}), retry {tries} in {delay:?}");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }
}

/// `None` on success, otherwise whether the status is worth retrying.
fn classify_status<T>(resp: &reqwest::Response, what: &str) -> Option<Attempt<T>> {
    let status = resp.status();
    if status.is_success() {
        return None;
    }
    let err = CloudError::Network(format!("STAC {what} returned HTTP {status}"));
    Some(if status.is_client_error() && status.as_u16() != 429 {
        Attempt::Fatal(err)
    } else {
        Attempt::Retry(err)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_search_urls() {
        assert_eq!(
            StacCatalog::EarthSearch.search_url(),
            "https://earth-search.aws.element84.com/v1/search"
        );
        assert_eq!(
            StacCatalog::Custom("https://stac.example.org/v1/".into()).search_url(),
            "https://stac.example.org/v1/search"
        );
        assert_eq!(
            StacCatalog::Custom("https://stac.example.org/v1/search".into()).search_url(),
            "https://stac.example.org/v1/search"
        );
    }

    #[test]
    fn catalog_shorthands() {
        assert_eq!(StacCatalog::from_str_or_url("PC"), StacCatalog::PlanetaryComputer);
        assert_eq!(StacCatalog::from_str_or_url("earth-search"), StacCatalog::EarthSearch);
        assert_eq!(
            StacCatalog::from_str_or_url("https://Example.org/stac"),
            StacCatalog::Custom("https://Example.org/stac".into()),
        );
    }

    #[test]
    fn only_planetary_computer_signs() {
        assert!(StacCatalog::PlanetaryComputer.needs_signing());
        assert!(!StacCatalog::EarthSearch.needs_signing());
    }

    #[tokio::test]
    async fn unsigned_catalog_passes_href_through() {
        let client = StacClient::new(StacCatalog::EarthSearch, StacClientOptions::default()).unwrap();
        let href = "https://example.com/B4.TIF";
        assert_eq!(client.sign_href(href).await.unwrap(), href);
    }
}
