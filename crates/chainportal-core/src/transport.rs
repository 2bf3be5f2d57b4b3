//! The `PortalTransport` trait: the HTTP collaborator the portal client drives.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, TryStreamExt};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::PortalError;

/// Incrementally readable response body. Dropping it cancels the read.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, PortalError>> + Send>>;

/// Status plus body of a portal response.
pub struct PortalResponse {
    pub status: u16,
    pub body: BodyStream,
}

impl PortalResponse {
    pub fn new(status: u16, body: BodyStream) -> Self {
        Self { status, body }
    }

    /// A response without a body (e.g. `204 No Content`).
    pub fn empty(status: u16) -> Self {
        Self {
            status,
            body: Box::pin(futures::stream::empty()),
        }
    }

    /// Read the whole body into memory.
    pub async fn bytes(self) -> Result<Bytes, PortalError> {
        let buf = self
            .body
            .try_fold(BytesMut::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await?;
        Ok(buf.freeze())
    }
}

impl std::fmt::Debug for PortalResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortalResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Per-request options understood by transports.
///
/// `None` always means "use the transport's default".
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Extra headers sent with the request.
    pub headers: Vec<(String, String)>,
    /// Override the number of retries after the first attempt.
    pub retry_attempts: Option<u32>,
    /// Override retry delays; entries are used in order and the last one repeats.
    pub retry_schedule: Option<Vec<Duration>>,
    /// Upper bound on the wait for response headers.
    pub http_timeout: Option<Duration>,
    /// Upper bound on the wait for each body chunk.
    pub body_timeout: Option<Duration>,
    /// Cancels the request, including retry back-off sleeps.
    pub abort: Option<CancellationToken>,
}

impl RequestOptions {
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Copy of these options bound to `token`.
    pub fn with_abort(&self, token: CancellationToken) -> Self {
        Self {
            abort: Some(token),
            ..self.clone()
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.as_ref().is_some_and(CancellationToken::is_cancelled)
    }
}

/// The HTTP collaborator every portal transport must implement.
///
/// Transports own retry and back-off; callers never retry on their own.
///
/// # Thread Safety
/// Implementations must be `Send + Sync`: one transport is shared by every
/// stream and one-shot call of a client.
#[async_trait]
pub trait PortalTransport: Send + Sync + 'static {
    /// `GET url` and return the body as text. Non-2xx statuses are errors.
    async fn get_text(&self, url: &str, options: &RequestOptions) -> Result<String, PortalError>;

    /// `POST url` with a JSON body and hand back an incrementally readable body.
    ///
    /// Any 2xx status is returned to the caller; other statuses are errors.
    async fn post_json(
        &self,
        url: &str,
        body: &Value,
        options: &RequestOptions,
    ) -> Result<PortalResponse, PortalError>;

    /// `POST url` and read the full body.
    ///
    /// Default implementation drains [`PortalTransport::post_json`].
    async fn post_json_buffered(
        &self,
        url: &str,
        body: &Value,
        options: &RequestOptions,
    ) -> Result<(u16, Bytes), PortalError> {
        let resp = self.post_json(url, body, options).await?;
        let status = resp.status;
        Ok((status, resp.bytes().await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bytes_concatenates_chunks() {
        let chunks: Vec<Result<Bytes, PortalError>> =
            vec![Ok(Bytes::from_static(b"ab")), Ok(Bytes::from_static(b"cd"))];
        let resp = PortalResponse::new(200, Box::pin(futures::stream::iter(chunks)));
        assert_eq!(resp.bytes().await.unwrap(), Bytes::from_static(b"abcd"));
    }

    #[tokio::test]
    async fn bytes_surfaces_body_errors() {
        let chunks: Vec<Result<Bytes, PortalError>> =
            vec![Ok(Bytes::from_static(b"ab")), Err(PortalError::Timeout { ms: 5 })];
        let resp = PortalResponse::new(200, Box::pin(futures::stream::iter(chunks)));
        assert!(matches!(resp.bytes().await, Err(PortalError::Timeout { ms: 5 })));
    }

    #[test]
    fn abort_flag_follows_token() {
        let token = CancellationToken::new();
        let opts = RequestOptions::default().with_abort(token.clone());
        assert!(!opts.is_aborted());
        token.cancel();
        assert!(opts.is_aborted());
        assert!(!RequestOptions::default().is_aborted());
    }
}
