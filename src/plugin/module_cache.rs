//! Process-lifetime cache of remote module sources.
//!
//! The loader reads CDN modules through this cache. Entries are written only
//! after a successful fetch and never invalidated; a failed fetch leaves no
//! trace, so the next build retries it. Concurrent misses for the same URL
//! are not coalesced: both requests go out and the identical bodies race to
//! the same key.

use std::future::Future;

use arcstr::ArcStr;
use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Failed to fetch {url}: {message}")]
pub struct FetchError {
    pub url: String,
    pub message: String,
}

/// Source of remote module text.
pub trait RemoteFetcher: Send + Sync + 'static {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<String, FetchError>> + Send;
}

/// Fetches modules over HTTP(S).
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl RemoteFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<String, FetchError>> + Send {
        let url = url.to_string();
        let client = self.client.clone();

        async move {
            info!(url = %url, "fetching remote module");

            let response = client.get(&url).send().await.map_err(|e| FetchError {
                url: url.clone(),
                message: e.to_string(),
            })?;

            if !response.status().is_success() {
                return Err(FetchError {
                    url: url.clone(),
                    message: format!("HTTP {}", response.status()),
                });
            }

            let body = response.text().await.map_err(|e| FetchError {
                url: url.clone(),
                message: e.to_string(),
            })?;

            debug!(url = %url, size = body.len(), "fetch complete");
            Ok(body)
        }
    }
}

/// Shared, append-only map of resolved URL to module source.
#[derive(Debug, Default)]
pub struct ModuleCache {
    entries: DashMap<String, ArcStr>,
}

impl ModuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached source for `url`, fetching it on a miss.
    pub async fn fetch_remote<F: RemoteFetcher>(
        &self,
        fetcher: &F,
        url: &str,
    ) -> Result<ArcStr, FetchError> {
        if let Some(source) = self.get(url) {
            debug!(url = %url, "module cache hit");
            return Ok(source);
        }

        let body = ArcStr::from(fetcher.fetch(url).await?);
        self.entries.insert(url.to_string(), body.clone());
        Ok(body)
    }

    pub fn get(&self, url: &str) -> Option<ArcStr> {
        self.entries.get(url).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, url: &str) -> bool {
        self.entries.contains_key(url)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
