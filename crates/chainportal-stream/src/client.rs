//! `PortalClient`: one-shot portal calls and the finalized stream entry point.

use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use url::Url;

use chainportal_core::error::PortalError;
use chainportal_core::query::PortalQuery;
use chainportal_core::transport::{BodyStream, PortalTransport, RequestOptions};
use chainportal_core::types::PortalBlock;
use chainportal_http::HttpPortalTransport;

use crate::buffer::StreamBuffer;
use crate::decoder::parse_blocks;
use crate::ingest::IngestLoop;
use crate::options::{PortalClientConfig, StreamOptions};
use crate::stream::PortalStream;

const HEIGHT_PATH: &str = "finalized-stream/height";
const STREAM_PATH: &str = "finalized-stream";

/// Client for one portal dataset URL.
///
/// Cloning is cheap; clones share the transport and its connection pool.
/// Every stream opened from a client owns its own buffer, loop and
/// cancellation token.
#[derive(Clone)]
pub struct PortalClient {
    transport: Arc<dyn PortalTransport>,
    height_url: String,
    stream_url: String,
    config: PortalClientConfig,
}

impl std::fmt::Debug for PortalClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortalClient")
            .field("stream_url", &self.stream_url)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PortalClient {
    /// Client with default configuration over HTTP.
    pub fn new(url: &str) -> Result<Self, PortalError> {
        Self::with_config(url, PortalClientConfig::default())
    }

    pub fn with_config(url: &str, config: PortalClientConfig) -> Result<Self, PortalError> {
        let transport = HttpPortalTransport::new(config.http.clone())?;
        Self::with_transport(url, Arc::new(transport), config)
    }

    /// Client over a caller-supplied transport.
    pub fn with_transport(
        url: &str,
        transport: Arc<dyn PortalTransport>,
        config: PortalClientConfig,
    ) -> Result<Self, PortalError> {
        let base = parse_base_url(url)?;
        Ok(Self {
            transport,
            height_url: join_url(&base, HEIGHT_PATH),
            stream_url: join_url(&base, STREAM_PATH),
            config,
        })
    }

    pub fn config(&self) -> &PortalClientConfig {
        &self.config
    }

    /// Current finalized height of the dataset.
    pub async fn finalized_height(&self) -> Result<u64, PortalError> {
        self.finalized_height_with(&self.config.request).await
    }

    pub async fn finalized_height_with(&self, options: &RequestOptions) -> Result<u64, PortalError> {
        let body = self.transport.get_text(&self.height_url, options).await?;
        parse_height(&body)
    }

    /// Run `query` once and read the whole response.
    ///
    /// Not backpressured: the body is buffered in memory. Meant for bounded
    /// ranges; use [`PortalClient::finalized_stream`] for anything else.
    pub async fn finalized_query<B: PortalBlock>(&self, query: &PortalQuery) -> Result<Vec<B>, PortalError> {
        let result = self.run_query(query).await;
        if let Err(e) = &result {
            tracing::error!(
                url = %self.stream_url,
                dataset = query.kind(),
                from_block = query.first_block(),
                to_block = ?query.to_block,
                error = %e,
                "finalized query failed"
            );
        }
        result
    }

    async fn run_query<B: PortalBlock>(&self, query: &PortalQuery) -> Result<Vec<B>, PortalError> {
        let body = query_body(query)?;
        let (status, bytes) = self
            .transport
            .post_json_buffered(&self.stream_url, &body, &self.config.request)
            .await?;
        match status {
            200 => parse_blocks(&bytes),
            204 => Ok(Vec::new()),
            status => Err(self.unexpected(status)),
        }
    }

    /// Stream finalized blocks starting at `query.from_block` with the
    /// client's default stream options.
    pub fn finalized_stream<B: PortalBlock>(&self, query: PortalQuery) -> PortalStream<B> {
        self.finalized_stream_with(query, self.config.stream.clone())
    }

    /// Stream finalized blocks with explicit options.
    ///
    /// The ingestion loop runs on its own Tokio task and is cancelled when the
    /// returned stream is cancelled or dropped. Must be called from within a
    /// Tokio runtime.
    pub fn finalized_stream_with<B: PortalBlock>(&self, query: PortalQuery, options: StreamOptions) -> PortalStream<B> {
        let request = options.request.clone().unwrap_or_else(|| self.config.request.clone());
        // A caller-supplied abort token also stops the stream.
        let cancel = request
            .abort
            .as_ref()
            .map_or_else(CancellationToken::new, CancellationToken::child_token);
        let request = request.with_abort(cancel.clone());

        let buffer = Arc::new(StreamBuffer::new(options.buffer_config()));
        let (tip_tx, tip_rx) = watch::channel(None);

        tracing::info!(
            url = %self.stream_url,
            dataset = query.kind(),
            from_block = query.first_block(),
            to_block = ?query.to_block,
            "opening finalized stream"
        );

        let ingest = IngestLoop::new(
            self.clone(),
            query,
            &options,
            request,
            buffer.clone(),
            tip_tx,
            cancel.clone(),
        );
        let failed = buffer.clone();
        tokio::spawn(async move {
            if std::panic::AssertUnwindSafe(ingest.run()).catch_unwind().await.is_err() {
                failed.fail(PortalError::Other("ingestion task panicked".into()));
            }
        });

        PortalStream::new(buffer, tip_rx, cancel)
    }

    /// Issue one finalized-stream request.
    ///
    /// `Ok(None)` means the portal has no data past its finalized tip for
    /// this request.
    pub(crate) async fn open_stream(
        &self,
        query: &PortalQuery,
        options: &RequestOptions,
    ) -> Result<Option<BodyStream>, PortalError> {
        let body = query_body(query)?;
        let resp = self.transport.post_json(&self.stream_url, &body, options).await?;
        match resp.status {
            200 => Ok(Some(resp.body)),
            204 => Ok(None),
            status => Err(self.unexpected(status)),
        }
    }

    fn unexpected(&self, status: u16) -> PortalError {
        PortalError::UnexpectedStatus {
            status,
            url: self.stream_url.clone(),
        }
    }
}

fn parse_base_url(url: &str) -> Result<Url, PortalError> {
    let parsed = Url::parse(url).map_err(|e| PortalError::InvalidUrl(format!("{url}: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(PortalError::InvalidUrl(format!("{url}: unsupported scheme {scheme:?}"))),
    }
}

/// `path` appended to the path of `base` with exactly one separator.
/// The query string of `base` is kept.
fn join_url(base: &Url, path: &str) -> String {
    let mut url = base.clone();
    url.set_path(&format!("{}/{}", base.path().trim_end_matches('/'), path));
    url.set_fragment(None);
    url.to_string()
}

fn parse_height(body: &str) -> Result<u64, PortalError> {
    body.trim().parse().map_err(|_| PortalError::InvalidHeight {
        body: body.to_string(),
    })
}

fn query_body(query: &PortalQuery) -> Result<serde_json::Value, PortalError> {
    serde_json::to_value(query).map_err(|e| PortalError::Other(format!("failed to encode query: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_with_single_slash() {
        for base in [
            "https://portal.example/datasets/ethereum-mainnet",
            "https://portal.example/datasets/ethereum-mainnet/",
        ] {
            let url = parse_base_url(base).unwrap();
            assert_eq!(
                join_url(&url, HEIGHT_PATH),
                "https://portal.example/datasets/ethereum-mainnet/finalized-stream/height"
            );
        }
    }

    #[test]
    fn join_keeps_query_string() {
        let url = parse_base_url("https://portal.example/datasets/eth?apiKey=abc").unwrap();
        assert_eq!(
            join_url(&url, HEIGHT_PATH),
            "https://portal.example/datasets/eth/finalized-stream/height?apiKey=abc"
        );
        let url = parse_base_url("https://portal.example/datasets/eth/?apiKey=abc#frag").unwrap();
        assert_eq!(
            join_url(&url, STREAM_PATH),
            "https://portal.example/datasets/eth/finalized-stream?apiKey=abc"
        );
    }

    #[test]
    fn joins_onto_bare_host() {
        let url = parse_base_url("http://localhost:8080").unwrap();
        assert_eq!(join_url(&url, STREAM_PATH), "http://localhost:8080/finalized-stream");
    }

    #[test]
    fn rejects_invalid_urls() {
        assert!(matches!(parse_base_url("not a url"), Err(PortalError::InvalidUrl(_))));
        assert!(matches!(parse_base_url("ftp://portal.example"), Err(PortalError::InvalidUrl(_))));
    }

    #[test]
    fn height_parsing() {
        assert_eq!(parse_height("12345\n").unwrap(), 12345);
        assert_eq!(parse_height(" 7 ").unwrap(), 7);
        for bad in ["", "abc", "-1", "1.5", "12 34"] {
            let err = parse_height(bad).unwrap_err();
            assert!(matches!(err, PortalError::InvalidHeight { .. }), "{bad:?}");
        }
    }
}
