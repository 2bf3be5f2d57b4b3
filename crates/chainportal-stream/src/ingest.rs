//! The producer side of a finalized stream.
//!
//! One loop per stream. It walks the cursor from `from_block` upwards,
//! issuing one request per iteration and feeding parsed blocks into the
//! [`StreamBuffer`]. Every await point races the stream's cancellation token.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use chainportal_core::error::PortalError;
use chainportal_core::query::PortalQuery;
use chainportal_core::transport::{BodyStream, RequestOptions};
use chainportal_core::types::{BlockRef, PortalBlock};

use crate::buffer::StreamBuffer;
use crate::client::PortalClient;
use crate::decoder::{is_blank, parse_block, split_lines};
use crate::height::HeightCache;
use crate::options::StreamOptions;

pub(crate) struct IngestLoop<B> {
    client: PortalClient,
    query: PortalQuery,
    request: RequestOptions,
    head_poll_interval: Duration,
    stop_on_head: bool,
    buffer: Arc<StreamBuffer<B>>,
    tip: watch::Sender<Option<BlockRef>>,
    cancel: CancellationToken,
    height: HeightCache,
}

impl<B: PortalBlock> IngestLoop<B> {
    pub(crate) fn new(
        client: PortalClient,
        query: PortalQuery,
        options: &StreamOptions,
        request: RequestOptions,
        buffer: Arc<StreamBuffer<B>>,
        tip: watch::Sender<Option<BlockRef>>,
        cancel: CancellationToken,
    ) -> Self {
        let height = HeightCache::new(client.config().tip_refresh_interval);
        Self {
            client,
            query,
            request,
            head_poll_interval: options.head_poll_interval,
            stop_on_head: options.stop_on_head,
            buffer,
            tip,
            cancel,
            height,
        }
    }

    /// Drive the loop to completion and settle the buffer accordingly.
    pub(crate) async fn run(mut self) {
        match self.ingest().await {
            Ok(next) => {
                tracing::info!(next_block = next, "finalized stream completed");
                self.buffer.close();
            }
            Err(e) if e.is_cancelled() || self.cancel.is_cancelled() => {
                tracing::debug!("finalized stream cancelled");
                self.buffer.close();
            }
            Err(e) => {
                tracing::error!(error = %e, kind = %e.kind(), "finalized stream failed");
                self.buffer.fail(e);
            }
        }
    }

    /// Returns the cursor the loop stopped at.
    async fn ingest(&mut self) -> Result<u64, PortalError> {
        let mut cursor = self.query.first_block();
        while self.query.to_block.map_or(true, |to| cursor <= to) {
            if self.cancel.is_cancelled() {
                return Err(PortalError::Cancelled);
            }

            let tip = self.resolve_tip().await?;
            let request = self.query.at(cursor);
            let body = cancellable(&self.cancel, self.client.open_stream(&request, &self.request)).await?;

            let next = match body {
                Some(body) => {
                    self.tip.send_replace(Some(tip));
                    let next = self.drain(body, cursor).await?;
                    self.buffer.ready();
                    next
                }
                None => cursor,
            };

            if next == cursor {
                // Nothing past the finalized tip for this cursor.
                if self.stop_on_head {
                    tracing::debug!(cursor, "reached finalized head, stopping");
                    break;
                }
                tracing::debug!(
                    cursor,
                    poll_ms = self.head_poll_interval.as_millis() as u64,
                    "at finalized head, polling"
                );
                cancellable(&self.cancel, async {
                    tokio::time::sleep(self.head_poll_interval).await;
                    Ok(())
                })
                .await?;
            }
            cursor = next;
        }
        Ok(cursor)
    }

    async fn resolve_tip(&mut self) -> Result<BlockRef, PortalError> {
        let client = &self.client;
        let request = &self.request;
        let fetch = || client.finalized_height_with(request);
        let number = cancellable(&self.cancel, self.height.get(fetch)).await?;
        Ok(BlockRef::new(number, ""))
    }

    /// Feed one response body into the buffer; returns the advanced cursor.
    ///
    /// Dropping the line stream on any exit path cancels the body read.
    async fn drain(&self, body: BodyStream, mut cursor: u64) -> Result<u64, PortalError> {
        let lines = split_lines(body);
        tokio::pin!(lines);

        while let Some(group) = cancellable(&self.cancel, async { lines.next().await.transpose() }).await? {
            let mut blocks = Vec::with_capacity(group.len());
            let mut bytes = 0;
            for line in group.iter().filter(|line| !is_blank(line)) {
                let block: B = parse_block(line)?;
                cursor = block.number().saturating_add(1);
                bytes += line.len();
                blocks.push(block);
            }
            if blocks.is_empty() {
                continue;
            }

            tracing::debug!(blocks = blocks.len(), bytes, next_block = cursor, "buffering blocks");
            cancellable(&self.cancel, async {
                self.buffer.put(blocks, bytes).await;
                Ok(())
            })
            .await?;
        }
        Ok(cursor)
    }
}

/// Run `fut` unless `cancel` fires first.
async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, PortalError>
where
    F: Future<Output = Result<T, PortalError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PortalError::Cancelled),
        res = fut => res,
    }
}
