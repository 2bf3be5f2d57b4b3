//! Consumer-facing side of a finalized stream.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tokio::sync::watch;
use tokio_util::sync::{CancellationToken, DropGuard};

use chainportal_core::error::PortalError;
use chainportal_core::types::{BlockRef, StreamBatch};

use crate::buffer::StreamBuffer;

/// Pull-based stream of finalized block batches.
///
/// Yields `Ok(batch)` per buffer release, at most one `Err` if the ingestion
/// loop fails, then ends. Dropping the stream cancels the ingestion loop and
/// any in-flight request.
///
/// ```no_run
/// use futures::StreamExt;
/// use chainportal_core::{Block, EvmRequest, PortalQuery};
/// use chainportal_stream::PortalClient;
///
/// # async fn run() -> Result<(), chainportal_core::PortalError> {
/// let client = PortalClient::new("https://portal.sqd.dev/datasets/ethereum-mainnet")?;
/// let query = PortalQuery::evm(EvmRequest::default()).from_block(20_000_000);
/// let mut stream = client.finalized_stream::<Block>(query);
/// while let Some(batch) = stream.next().await {
///     let batch = batch?;
///     println!("{:?}..{:?} tip {:?}", batch.first_block(), batch.last_block(), batch.finalized_head);
/// }
/// # Ok(())
/// # }
/// ```
pub struct PortalStream<B = chainportal_core::types::Block> {
    inner: BoxStream<'static, Result<StreamBatch<B>, PortalError>>,
    cancel: CancellationToken,
    _guard: DropGuard,
}

impl<B: Send + 'static> PortalStream<B> {
    pub(crate) fn new(
        buffer: Arc<StreamBuffer<B>>,
        tip: watch::Receiver<Option<BlockRef>>,
        cancel: CancellationToken,
    ) -> Self {
        let inner = futures::stream::unfold(Some((buffer, tip)), |state| async move {
            let (buffer, tip) = state?;
            match buffer.take().await {
                Ok(Some(blocks)) => {
                    let batch = StreamBatch {
                        blocks,
                        finalized_head: tip.borrow().clone(),
                    };
                    Some((Ok(batch), Some((buffer, tip))))
                }
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
        .boxed();

        Self {
            inner,
            _guard: cancel.clone().drop_guard(),
            cancel,
        }
    }
}

impl<B> PortalStream<B> {
    /// Stop the ingestion loop. Blocks already buffered are still delivered,
    /// then the stream ends without an error.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token observed by the ingestion loop; cancelling it is the same as
    /// calling [`PortalStream::cancel`].
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl<B> Stream for PortalStream<B> {
    type Item = Result<StreamBatch<B>, PortalError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl<B> std::fmt::Debug for PortalStream<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortalStream")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::buffer::BufferConfig;

    fn parts() -> (Arc<StreamBuffer<u64>>, watch::Sender<Option<BlockRef>>, PortalStream<u64>) {
        let buffer = Arc::new(StreamBuffer::new(BufferConfig::new(1, Some(1024), None, None)));
        let (tx, rx) = watch::channel(None);
        let stream = PortalStream::new(buffer.clone(), rx, CancellationToken::new());
        (buffer, tx, stream)
    }

    #[tokio::test]
    async fn attaches_current_tip_to_every_batch() {
        let (buffer, tip, mut stream) = parts();

        tip.send_replace(Some(BlockRef::new(100, "")));
        buffer.put(vec![1, 2], 2).await;
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.blocks, vec![1, 2]);
        assert_eq!(first.finalized_head, Some(BlockRef::new(100, "")));

        tip.send_replace(Some(BlockRef::new(120, "")));
        buffer.put(vec![3], 1).await;
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.finalized_head.unwrap().number, 120);
    }

    #[tokio::test]
    async fn error_then_end() {
        let (buffer, _tip, mut stream) = parts();
        buffer.fail(PortalError::Http("boom".into()));
        assert!(matches!(stream.next().await, Some(Err(PortalError::Http(_)))));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn drop_cancels_token() {
        let (_buffer, _tip, stream) = parts();
        let token = stream.cancellation_token();
        assert!(!token.is_cancelled());
        drop(stream);
        assert!(token.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn closed_buffer_ends_stream() {
        let (buffer, _tip, mut stream) = parts();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            buffer.close();
        });
        assert!(stream.next().await.is_none());
    }
}
