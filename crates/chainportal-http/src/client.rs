//! HTTP portal transport backed by `reqwest`.
//!
//! Features:
//! - Automatic retry with exponential backoff (or an explicit schedule)
//!   for connection errors, timeouts and 429/502/503/504
//! - Header timeout per attempt and per-chunk body timeout
//! - Streamed response bodies for the finalized stream
//! - Cancellation of in-flight requests and back-off sleeps

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use chainportal_core::error::PortalError;
use chainportal_core::policy::{RetryConfig, RetryPolicy};
use chainportal_core::transport::{BodyStream, PortalResponse, PortalTransport, RequestOptions};

/// Configuration for `HttpPortalTransport`.
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    pub retry: RetryConfig,
    pub connect_timeout: Duration,
    /// Default wait for response headers; `None` waits indefinitely.
    pub http_timeout: Option<Duration>,
    /// Default wait for each body chunk; `None` waits indefinitely.
    pub body_timeout: Option<Duration>,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            connect_timeout: Duration::from_secs(10),
            http_timeout: Some(Duration::from_secs(60)),
            body_timeout: Some(Duration::from_secs(60)),
        }
    }
}

/// reqwest-based [`PortalTransport`].
///
/// Cheap to share: one instance (and its connection pool) serves every
/// stream of a client concurrently.
pub struct HttpPortalTransport {
    http: reqwest::Client,
    retry: RetryPolicy,
    http_timeout: Option<Duration>,
    body_timeout: Option<Duration>,
}

impl HttpPortalTransport {
    /// Build a transport with its own connection pool.
    pub fn new(config: HttpTransportConfig) -> Result<Self, PortalError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| PortalError::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(http, config))
    }

    /// Build a transport on top of an existing `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, config: HttpTransportConfig) -> Self {
        Self {
            http,
            retry: RetryPolicy::new(config.retry),
            http_timeout: config.http_timeout,
            body_timeout: config.body_timeout,
        }
    }

    /// Send the request produced by `build`, retrying transient failures.
    async fn execute<F>(
        &self,
        url: &str,
        options: &RequestOptions,
        build: F,
    ) -> Result<reqwest::Response, PortalError>
    where
        F: Fn() -> reqwest::RequestBuilder + Send + Sync,
    {
        let policy = self.retry.for_request(options);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.send_once(url, options, build()).await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_retryable() => match policy.next_delay(attempt) {
                    Some(delay) => {
                        tracing::warn!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            url,
                            "retrying portal request"
                        );
                        abortable(options.abort.as_ref(), async {
                            tokio::time::sleep(delay).await;
                            Ok(())
                        })
                        .await?;
                    }
                    None => {
                        tracing::error!(attempt, error = %e, url, "max retries exceeded");
                        return Err(e);
                    }
                },
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once(
        &self,
        url: &str,
        options: &RequestOptions,
        mut req: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, PortalError> {
        for (name, value) in &options.headers {
            req = req.header(name.as_str(), value.as_str());
        }
        let http_timeout = options.http_timeout.or(self.http_timeout);

        let resp = abortable(options.abort.as_ref(), async move {
            let send = req.send();
            let result = match http_timeout {
                Some(limit) => tokio::time::timeout(limit, send)
                    .await
                    .map_err(|_| PortalError::Timeout {
                        ms: limit.as_millis() as u64,
                    })?,
                None => send.await,
            };
            result.map_err(|e| PortalError::Http(e.to_string()))
        })
        .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(PortalError::UnexpectedStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(resp)
    }

    fn body_stream(&self, resp: reqwest::Response, options: &RequestOptions) -> BodyStream {
        let chunks = resp
            .bytes_stream()
            .map_err(|e| PortalError::Http(e.to_string()));
        match options.body_timeout.or(self.body_timeout) {
            Some(limit) => Box::pin(with_chunk_timeout(chunks, limit)),
            None => Box::pin(chunks),
        }
    }
}

#[async_trait]
impl PortalTransport for HttpPortalTransport {
    async fn get_text(&self, url: &str, options: &RequestOptions) -> Result<String, PortalError> {
        let resp = self.execute(url, options, || self.http.get(url)).await?;
        let body = self.body_stream(resp, options);
        let bytes = abortable(options.abort.as_ref(), PortalResponse::new(200, body).bytes()).await?;
        String::from_utf8(bytes.to_vec()).map_err(|e| PortalError::Http(format!("non UTF-8 body: {e}")))
    }

    async fn post_json(
        &self,
        url: &str,
        body: &Value,
        options: &RequestOptions,
    ) -> Result<PortalResponse, PortalError> {
        let resp = self
            .execute(url, options, || self.http.post(url).json(body))
            .await?;
        let status = resp.status().as_u16();
        tracing::debug!(status, url, "portal response");
        Ok(PortalResponse::new(status, self.body_stream(resp, options)))
    }
}

/// Run `fut` unless `abort` fires first.
async fn abortable<T, F>(abort: Option<&CancellationToken>, fut: F) -> Result<T, PortalError>
where
    F: Future<Output = Result<T, PortalError>>,
{
    match abort {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => Err(PortalError::Cancelled),
            res = fut => res,
        },
        None => fut.await,
    }
}

/// Fail with `PortalError::Timeout` when no chunk arrives within `limit`.
/// The stream ends right after the timeout error.
fn with_chunk_timeout<S>(chunks: S, limit: Duration) -> impl Stream<Item = Result<Bytes, PortalError>> + Send
where
    S: Stream<Item = Result<Bytes, PortalError>> + Send + 'static,
{
    let chunks: BodyStream = Box::pin(chunks);
    futures::stream::unfold(Some(chunks), move |state| async move {
        let mut chunks = state?;
        match tokio::time::timeout(limit, chunks.next()).await {
            Ok(Some(item)) => Some((item, Some(chunks))),
            Ok(None) => None,
            Err(_) => Some((
                Err(PortalError::Timeout {
                    ms: limit.as_millis() as u64,
                }),
                None,
            )),
        }
    })
}
