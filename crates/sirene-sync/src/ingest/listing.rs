//! Publisher file listing
//!
//! The publisher exposes its current archives as links on an index page.

use async_trait::async_trait;
use regex::Regex;
use reqwest::Url;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

use super::models::RemoteArchive;

#[derive(Debug, Error)]
pub enum ListingError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid selector: {0}")]
    Selector(String),
}

/// Lists the archives the publisher currently offers
#[async_trait]
pub trait RemoteListing: Send + Sync {
    /// Current archives, each with a local path under `destination`
    async fn list_current_files(&self, destination: &Path) -> Result<Vec<RemoteArchive>, ListingError>;
}

/// [`RemoteListing`] scraping the publisher's HTML index page
#[derive(Debug, Clone)]
pub struct HttpListing {
    client: reqwest::Client,
    index_url: Url,
    pattern: Regex,
}

impl HttpListing {
    pub fn new(client: reqwest::Client, index_url: &str, pattern: Regex) -> Result<Self, ListingError> {
        let index_url = Url::parse(index_url).map_err(|err| ListingError::InvalidUrl {
            url: index_url.to_string(),
            reason: err.to_string(),
        })?;
        Ok(Self {
            client,
            index_url,
            pattern,
        })
    }
}

#[async_trait]
impl RemoteListing for HttpListing {
    async fn list_current_files(&self, destination: &Path) -> Result<Vec<RemoteArchive>, ListingError> {
        let response = self.client.get(self.index_url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ListingError::Status {
                url: self.index_url.to_string(),
                status: status.as_u16(),
            });
        }

        let html = response.text().await?;
        let archives = parse_listing(&html, &self.index_url, &self.pattern, destination)?;
        info!(url = %self.index_url, count = archives.len(), "Listed remote archives");
        Ok(archives)
    }
}

/// Extract archive links from an index page
///
/// Links are resolved against `base`, filtered on their file name and
/// de-duplicated by file name, keeping page order.
pub fn parse_listing(
    html: &str,
    base: &Url,
    pattern: &Regex,
    destination: &Path,
) -> Result<Vec<RemoteArchive>, ListingError> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href]").map_err(|err| ListingError::Selector(err.to_string()))?;

    let mut seen = HashSet::new();
    let mut archives = Vec::new();

    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let Ok(url) = base.join(href.trim()) else {
            debug!(href, "Skipping unresolvable link");
            continue;
        };
        let Some(file_name) = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
        else {
            continue;
        };

        if pattern.is_match(&file_name) && seen.insert(file_name.clone()) {
            archives.push(RemoteArchive::new(file_name, url.to_string(), destination));
        }
    }

    Ok(archives)
}
