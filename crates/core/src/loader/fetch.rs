use crate::error::LoadError;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

/// HTTP fetcher with bounded retries on transient failures.
///
/// 429 and 5xx responses and transport errors are retried with exponential
/// backoff; any other non-success status fails immediately.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    retries: u32,
    retry_delay: Duration,
}

impl Fetcher {
    pub fn new(client: Client, retries: u32, retry_delay: Duration) -> Self {
        Self {
            client,
            retries,
            retry_delay,
        }
    }

    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, LoadError> {
        let mut attempt = 0u32;
        loop {
            match self.fetch_once(url).await {
                Ok(bytes) => return Ok(bytes),
                Err(error) if error.is_retryable() && attempt < self.retries => {
                    let delay = self.retry_delay * 2u32.saturating_pow(attempt);
                    warn!(url = %url, attempt = attempt + 1, error = %error, "fetch failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<Vec<u8>, LoadError> {
        debug!(url = %url, "fetching document");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|error| LoadError::Unreachable {
                url: url.to_string(),
                reason: error.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(LoadError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|error| LoadError::Unreachable {
                url: url.to_string(),
                reason: error.to_string(),
            })?;
        Ok(body.to_vec())
    }
}
