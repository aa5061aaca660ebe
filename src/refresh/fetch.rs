use std::time::Duration;

use async_trait::async_trait;

use crate::error::RefreshError;

/// Source of raw text documents, addressed by URL.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch_text(&self, url: &str) -> Result<String, RefreshError>;
}

/// [`ContentFetcher`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, RefreshError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RefreshError::Fetch {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String, RefreshError> {
        let fetch_error = |e: reqwest::Error| RefreshError::Fetch {
            url: url.to_string(),
            message: e.to_string(),
        };

        self.client
            .get(url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(fetch_error)?
            .text()
            .await
            .map_err(fetch_error)
    }
}
