use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::{Client, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::config::Settings;

const BASE_BACKOFF_MS: u64 = 1000;

/// Result of fetching one page. HTTP failures are values, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Page { status: u16, html: String },
    HttpStatus { status: u16 },
    Transport { message: String },
    Cancelled,
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url, cancel: &CancellationToken) -> FetchOutcome;
}

/// `reqwest`-backed fetcher. Retries 429 and 5xx with exponential backoff.
pub struct HttpFetcher {
    client: Client,
    max_retries: u32,
}

impl HttpFetcher {
    pub fn new(settings: &Settings) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&settings.user_agent).context("Invalid user agent")?,
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml;q=0.9,*/*;q=0.8"),
        );
        let client = Client::builder()
            .timeout(settings.request_timeout())
            .default_headers(headers)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            max_retries: settings.fetch_retries,
        })
    }

    async fn fetch_once(&self, url: &Url, cancel: &CancellationToken) -> FetchOutcome {
        let response = tokio::select! {
            result = self.client.get(url.clone()).send() => match result {
                Ok(r) => r,
                Err(e) => return FetchOutcome::Transport { message: e.to_string() },
            },
            _ = cancel.cancelled() => return FetchOutcome::Cancelled,
        };

        let status = response.status();
        if !status.is_success() {
            return FetchOutcome::HttpStatus {
                status: status.as_u16(),
            };
        }

        tokio::select! {
            result = response.text() => match result {
                Ok(html) => FetchOutcome::Page { status: status.as_u16(), html },
                Err(e) => FetchOutcome::Transport { message: e.to_string() },
            },
            _ = cancel.cancelled() => FetchOutcome::Cancelled,
        }
    }
}

fn is_retryable(outcome: &FetchOutcome) -> bool {
    match outcome {
        FetchOutcome::HttpStatus { status } => {
            *status == StatusCode::TOO_MANY_REQUESTS.as_u16() || *status >= 500
        }
        _ => false,
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url, cancel: &CancellationToken) -> FetchOutcome {
        if cancel.is_cancelled() {
            return FetchOutcome::Cancelled;
        }
        let mut attempt = 0;
        loop {
            let outcome = self.fetch_once(url, cancel).await;
            if !is_retryable(&outcome) || attempt == self.max_retries {
                if let FetchOutcome::Page { html, .. } = &outcome {
                    debug!(url = %url, bytes = html.len(), "Fetched page");
                }
                return outcome;
            }

            let backoff = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt));
            warn!(
                "{:?} on {} (attempt {}/{}), backing off {:.1}s",
                outcome,
                url,
                attempt + 1,
                self.max_retries,
                backoff.as_secs_f64()
            );
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = cancel.cancelled() => return FetchOutcome::Cancelled,
            }
            attempt += 1;
        }
    }
}
