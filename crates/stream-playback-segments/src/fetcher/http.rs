use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use reqwest::Client;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use super::{FetchProgress, Fetcher, ProgressCallback};
use crate::error::{SegmentError, SegmentResult};
use crate::settings::SegmentSettings;

/// HTTP fetcher built on a shared `reqwest` client.
///
/// Supports cancellation and bounded retries/backoff. `request_timeout` bounds the
/// response headers and every gap between body chunks.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,

    request_timeout: Duration,
    max_retries: u32,
    retry_base_delay: Duration,
    max_retry_delay: Duration,

    // Cancels every request issued through this fetcher (and its clones).
    cancel: CancellationToken,
}

impl HttpFetcher {
    /// Creates a fetcher with a fresh client.
    pub fn new(settings: &SegmentSettings, cancel: CancellationToken) -> Self {
        Self {
            client: Client::new(),
            request_timeout: settings.request_timeout,
            max_retries: settings.max_retries,
            retry_base_delay: settings.retry_base_delay,
            max_retry_delay: settings.max_retry_delay,
            cancel,
        }
    }

    /// Reuse an existing client (connection pool, proxy configuration, ...).
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Returns the cancellation token used by this fetcher.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    // ----------------------------
    // Internals: retry policy
    // ----------------------------

    async fn retry_with_backoff(
        &self,
        url: &Url,
        progress: Option<&ProgressCallback>,
    ) -> SegmentResult<Bytes> {
        let mut last_error: Option<SegmentError> = None;
        let mut delay = self.retry_base_delay;

        for attempt in 0..=self.max_retries {
            if self.cancel.is_cancelled() {
                return Err(SegmentError::Cancelled);
            }

            match self.try_fetch_once(url, progress).await {
                Ok(bytes) => {
                    if attempt > 0 {
                        debug!(
                            url = url.as_str(),
                            attempts = attempt + 1,
                            "fetch succeeded after retry"
                        );
                    }
                    return Ok(bytes);
                }
                Err(SegmentError::Cancelled) => return Err(SegmentError::Cancelled),
                Err(e) => {
                    debug!(
                        url = url.as_str(),
                        attempt = attempt + 1,
                        max_attempts = self.max_retries + 1,
                        "fetch attempt failed: {}",
                        e
                    );
                    let retryable = Self::is_retryable(&e);
                    last_error = Some(e);

                    if !retryable {
                        break;
                    }
                    if attempt < self.max_retries {
                        tokio::select! {
                            biased;
                            _ = self.cancel.cancelled() => return Err(SegmentError::Cancelled),
                            _ = tokio::time::sleep(delay) => {},
                        }
                        delay = (delay * 2).min(self.max_retry_delay);
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| SegmentError::fetch(url.as_str(), "no attempt made")))
    }

    // Client errors will not change on retry; everything else might.
    fn is_retryable(err: &SegmentError) -> bool {
        !matches!(err, SegmentError::Http { status, .. } if (400..500).contains(status))
    }

    // ----------------------------
    // Internals: request attempts
    // ----------------------------

    async fn try_fetch_once(
        &self,
        url: &Url,
        progress: Option<&ProgressCallback>,
    ) -> SegmentResult<Bytes> {
        let uri = url.as_str();
        let send = timeout(self.request_timeout, self.client.get(url.clone()).send());

        let response = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(SegmentError::Cancelled),
            res = send => match res {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => return Err(SegmentError::fetch(uri, e)),
                Err(_) => return Err(SegmentError::Timeout(uri.to_string())),
            },
        };

        let status = response.status();
        if !status.is_success() {
            return Err(SegmentError::Http {
                status: status.as_u16(),
                uri: uri.to_string(),
            });
        }

        let total = response.content_length();
        let capacity = total.map_or(16 * 1024, |t| t.min(64 * 1024 * 1024) as usize);
        let mut buf = BytesMut::with_capacity(capacity);
        let mut body = response.bytes_stream();

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(SegmentError::Cancelled),
                item = timeout(self.request_timeout, body.next()) => match item {
                    Ok(v) => v,
                    Err(_) => return Err(SegmentError::Timeout(uri.to_string())),
                },
            };

            match next {
                Some(Ok(chunk)) => {
                    buf.extend_from_slice(&chunk);
                    if let Some(cb) = progress {
                        cb(FetchProgress {
                            uri: uri.to_string(),
                            loaded: buf.len() as u64,
                            total,
                        });
                    }
                }
                Some(Err(e)) => return Err(SegmentError::fetch(uri, e)),
                None => break,
            }
        }

        Ok(buf.freeze())
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, uri: &str, progress: Option<ProgressCallback>) -> SegmentResult<Bytes> {
        let url = Url::parse(uri).map_err(|e| SegmentError::fetch(uri, e))?;
        self.retry_with_backoff(&url, progress.as_ref()).await
    }
}
