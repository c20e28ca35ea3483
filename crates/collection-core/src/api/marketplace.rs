//! Marketplace HTTP client.
//!
//! Fetches activity JSON and raw activity pages. Requests are single-shot with a
//! bounded timeout; retrying is left to the next poll cycle.

use crate::{Error, Result};
use async_trait::async_trait;
use std::time::Duration as StdDuration;
use tracing::debug;

/// Read access to a marketplace.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait MarketplaceSource: Send + Sync {
    /// GET `path` and parse the body as JSON.
    async fn fetch_json(&self, path: &str) -> Result<serde_json::Value>;

    /// GET `path` and return the body as text.
    async fn fetch_page(&self, path: &str) -> Result<String>;
}

/// Marketplace client for activity endpoints and pages.
pub struct MarketplaceClient {
    base_url: String,
    api_key: Option<(String, String)>,
    http_client: reqwest::Client,
}

impl MarketplaceClient {
    const USER_AGENT: &'static str =
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

    pub fn new(
        base_url: String,
        api_key_header: &str,
        api_key: Option<String>,
        timeout: StdDuration,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(Self::USER_AGENT)
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(|key| (api_key_header.to_string(), key)),
            http_client,
        })
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    async fn get(&self, path: &str, accept: &str) -> Result<reqwest::Response> {
        let url = self.url(path);
        let mut request = self.http_client.get(&url).header("Accept", accept);
        if let Some((header, key)) = &self.api_key {
            request = request.header(header.as_str(), key.as_str());
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(Error::Api {
                message: format!("GET {} failed: {}", url, response.status()),
                status: Some(response.status().as_u16()),
            });
        }

        debug!(url = %url, status = %response.status(), "Marketplace request succeeded");
        Ok(response)
    }
}

#[async_trait]
impl MarketplaceSource for MarketplaceClient {
    async fn fetch_json(&self, path: &str) -> Result<serde_json::Value> {
        let response = self.get(path, "application/json").await?;
        Ok(response.json().await?)
    }

    async fn fetch_page(&self, path: &str) -> Result<String> {
        let response = self.get(path, "text/html,application/xhtml+xml").await?;
        Ok(response.text().await?)
    }
}
