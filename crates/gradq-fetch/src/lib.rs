//! Page fetcher for the paginated results listing.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Url;
use thiserror::Error;
use tracing::{debug, info_span, Instrument};

pub const CRATE_NAME: &str = "gradq-fetch";

pub const DEFAULT_LISTING_URL: &str = "https://www.thegradcafe.com/survey/index.php";

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36";

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub listing_url: String,
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            listing_url: DEFAULT_LISTING_URL.to_string(),
            timeout: Duration::from_secs(20),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub page: u32,
    pub url: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("page numbers are 1-based, got {0}")]
    InvalidPage(u32),
    #[error("invalid listing url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// Retrieves one page of the external listing. Implementations do no retrying
/// and no pagination of their own.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, page: u32) -> Result<FetchedPage, FetchError>;
}

#[derive(Debug)]
pub struct HttpPageFetcher {
    client: reqwest::Client,
    listing_url: String,
}

impl HttpPageFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .user_agent(config.user_agent)
            .build()
            .context("building reqwest client")?;

        Ok(Self {
            client,
            listing_url: config.listing_url,
        })
    }

    pub fn page_url(&self, page: u32) -> Result<Url, FetchError> {
        page_url(&self.listing_url, page)
    }
}

/// Listing URL for a 1-based page, carrying the site's full-listing query.
pub fn page_url(listing_url: &str, page: u32) -> Result<Url, FetchError> {
    if page == 0 {
        return Err(FetchError::InvalidPage(page));
    }
    let page = page.to_string();
    Url::parse_with_params(
        listing_url,
        &[("q", ""), ("t", "a"), ("o", ""), ("page", page.as_str())],
    )
    .map_err(|e| FetchError::InvalidUrl {
        url: listing_url.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch_page(&self, page: u32) -> Result<FetchedPage, FetchError> {
        let url = self.page_url(page)?;
        let span = info_span!("page_fetch", page, url = %url);

        async move {
            let resp = self.client.get(url.clone()).send().await?;
            let status = resp.status();
            let final_url = resp.url().to_string();

            if !status.is_success() {
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: final_url,
                });
            }

            let body = resp.text().await?;
            debug!(bytes = body.len(), "fetched listing page");
            Ok(FetchedPage {
                page,
                url: final_url,
                body,
            })
        }
        .instrument(span)
        .await
    }
}
