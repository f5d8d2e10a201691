//! Feed acquisition collaborator: HTTP client seam plus retry policy.

mod basic;
mod client;

pub use basic::BasicClient;
pub use client::HttpClient;

use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

pub async fn fetch_bytes<C: HttpClient>(client: &C, url: &str) -> Result<Vec<u8>> {
    let req = reqwest::Request::new(reqwest::Method::GET, url.parse()?);

    let resp = client.execute(req).await?;
    Ok(resp.bytes().await?.to_vec())
}

/// Fetches with exponential backoff (1s, 2s, 4s, ...) between attempts.
/// Transient feed failures are expected; the final error is returned once
/// `max_retries` attempts are exhausted.
pub async fn fetch_bytes_with_retry<C: HttpClient>(
    client: &C,
    url: &str,
    max_retries: u32,
) -> Result<Vec<u8>> {
    let mut attempt = 0u32;
    loop {
        match fetch_bytes(client, url).await {
            Ok(bytes) => return Ok(bytes),
            Err(e) if attempt + 1 < max_retries => {
                let backoff_secs = 2u64.pow(attempt);
                warn!(
                    attempt = attempt + 1,
                    max_retries,
                    backoff_secs,
                    error = %e,
                    "Feed fetch failed, retrying"
                );
                tokio::time::sleep(std::time::Duration::from_secs(backoff_secs)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Where a poll cycle gets its raw feed bytes from.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<u8>>;
}

#[async_trait]
impl FeedSource for Box<dyn FeedSource> {
    async fn fetch(&self) -> Result<Vec<u8>> {
        (**self).fetch().await
    }
}

/// Live HTTP feed with retries.
pub struct HttpFeedSource<C: HttpClient> {
    client: C,
    url: String,
    max_retries: u32,
}

impl<C: HttpClient> HttpFeedSource<C> {
    pub fn new(client: C, url: impl Into<String>, max_retries: u32) -> Self {
        Self {
            client,
            url: url.into(),
            max_retries,
        }
    }
}

#[async_trait]
impl<C: HttpClient> FeedSource for HttpFeedSource<C> {
    async fn fetch(&self) -> Result<Vec<u8>> {
        fetch_bytes_with_retry(&self.client, &self.url, self.max_retries).await
    }
}

/// Replays a fixed snapshot, e.g. a feed dump read from disk.
pub struct StaticFeedSource(Vec<u8>);

impl StaticFeedSource {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

#[async_trait]
impl FeedSource for StaticFeedSource {
    async fn fetch(&self) -> Result<Vec<u8>> {
        Ok(self.0.clone())
    }
}
