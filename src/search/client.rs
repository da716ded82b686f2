use std::time::Duration;

use tracing::{debug, warn};

use super::SearchResponse;
use crate::config::SearchConfig;
use crate::error::SearchError;

pub struct SearchClient {
    client: reqwest::Client,
    config: SearchConfig,
}

impl SearchClient {
    pub fn new(config: SearchConfig) -> Self {
        if config.api_key.is_empty() {
            warn!("No search API key configured; requests will likely be rejected");
        }
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Run a query against the search API.
    ///
    /// A non-2xx answer becomes [`SearchError::Status`] carrying the status,
    /// headers and body for diagnostics; anything that prevents a response
    /// (connect failure, timeout, undecodable body) is [`SearchError::Request`].
    pub async fn search(&self, query: &str) -> Result<SearchResponse, SearchError> {
        debug!("Sending search request to {}: {}", self.config.base_url, query);

        let response = self
            .client
            .get(&self.config.base_url)
            .query(&[("q", query)])
            .header("Accept", "application/json")
            .header("X-Api-Key", &self.config.api_key)
            .timeout(Duration::from_millis(self.config.timeout_ms))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let headers = format!("{:?}", response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::Status {
                status,
                headers,
                body,
            });
        }

        Ok(response.json().await?)
    }
}
