//! Backpressure buffer between the ingestion loop and the consumer.
//!
//! A single pending unit accumulates blocks from `put` until one of the
//! release conditions holds:
//!
//! ```text
//!   bytes >= min_bytes ──┐
//!   idle >= max_idle ────┤
//!   ready() hint ────────┼──> ready ──┐
//!   waited >= max_wait ──┘            ├──> take() returns the unit
//!   at least one put since last take ─┘
//!   closed / failed ─────────────────────> take() returns immediately
//! ```
//!
//! `put` suspends once the unit holds `max_bytes` or more, until the next
//! `take` drains it. The producer is never more than one unit ahead.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use chainportal_core::error::PortalError;

/// Buffer lifecycle. Transitions only go out of `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    Open,
    Closed,
    Failed,
}

/// Release thresholds of a [`StreamBuffer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferConfig {
    /// Release as soon as this many bytes are pending.
    pub min_bytes: usize,
    /// Suspend `put` once this many bytes are pending. Never below `min_bytes`.
    pub max_bytes: usize,
    /// Release partial data after this much silence since the last `put`.
    pub max_idle_time: Option<Duration>,
    /// Release whatever is pending after waiting this long in one `take`.
    pub max_wait_time: Option<Duration>,
}

impl BufferConfig {
    pub fn new(
        min_bytes: usize,
        max_bytes: Option<usize>,
        max_idle_time: Option<Duration>,
        max_wait_time: Option<Duration>,
    ) -> Self {
        Self {
            min_bytes,
            max_bytes: max_bytes.unwrap_or(min_bytes).max(min_bytes),
            max_idle_time,
            max_wait_time,
        }
    }
}

struct Pending<B> {
    blocks: Vec<B>,
    bytes: usize,
}

struct Inner<B> {
    pending: Option<Pending<B>>,
    state: BufferState,
    error: Option<PortalError>,
    /// A release condition fired since the last take.
    ready: bool,
    /// At least one put since the last take.
    filled: bool,
    last_put: Option<Instant>,
    /// Number of completed takes; put waiters compare against it.
    takes: u64,
}

/// Single-slot rendezvous between one producer and one consumer.
pub struct StreamBuffer<B> {
    config: BufferConfig,
    inner: Mutex<Inner<B>>,
    /// Something changed that a waiting `take` should look at.
    put_signal: Notify,
    /// The pending unit was drained or the buffer left `Open`.
    take_signal: Notify,
}

impl<B> StreamBuffer<B> {
    pub fn new(config: BufferConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                pending: None,
                state: BufferState::Open,
                error: None,
                ready: false,
                filled: false,
                last_put: None,
                takes: 0,
            }),
            put_signal: Notify::new(),
            take_signal: Notify::new(),
        }
    }

    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Inner<B>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> BufferState {
        self.lock().state
    }

    /// Bytes accumulated in the pending unit.
    pub fn pending_bytes(&self) -> usize {
        self.lock().pending.as_ref().map_or(0, |p| p.bytes)
    }

    /// `true` when a `take` would return the pending unit right now.
    pub fn is_ready(&self) -> bool {
        let inner = self.lock();
        inner.state != BufferState::Open || (inner.ready && inner.filled)
    }

    /// Append blocks to the pending unit.
    ///
    /// Suspends while the unit holds `max_bytes` or more, until a `take`
    /// drains it or the buffer closes. Data put after close or failure is
    /// discarded.
    pub async fn put(&self, blocks: Vec<B>, bytes: usize) {
        let takes = {
            let mut inner = self.lock();
            if inner.state != BufferState::Open {
                return;
            }
            inner.last_put = Some(Instant::now());
            let pending = inner.pending.get_or_insert_with(|| Pending {
                blocks: Vec::new(),
                bytes: 0,
            });
            pending.blocks.extend(blocks);
            pending.bytes += bytes;
            let total = pending.bytes;

            if total >= self.config.min_bytes {
                inner.ready = true;
            }
            inner.filled = true;
            self.put_signal.notify_waiters();

            if total < self.config.max_bytes {
                return;
            }
            inner.takes
        };

        loop {
            let drained = self.take_signal.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();
            {
                let inner = self.lock();
                if inner.takes != takes || inner.state != BufferState::Open {
                    return;
                }
            }
            drained.await;
        }
    }

    /// Wait for the next release.
    ///
    /// `Ok(None)` means the buffer is closed and fully drained. A stored
    /// failure is returned exactly once; later calls report end of stream.
    pub async fn take(&self) -> Result<Option<Vec<B>>, PortalError> {
        let wait_deadline = self.config.max_wait_time.map(|d| Instant::now() + d);
        loop {
            let changed = self.put_signal.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            let wake_at = {
                let mut inner = self.lock();
                match inner.state {
                    BufferState::Failed => {
                        inner.pending = None;
                        return inner.error.take().map_or(Ok(None), Err);
                    }
                    BufferState::Closed => {
                        return Ok(inner.pending.take().map(|p| p.blocks));
                    }
                    BufferState::Open => {}
                }

                let now = Instant::now();
                let idle_deadline = match (&inner.pending, inner.last_put, self.config.max_idle_time) {
                    (Some(_), Some(last), Some(idle)) => Some(last + idle),
                    _ => None,
                };
                if wait_deadline.is_some_and(|d| now >= d) || idle_deadline.is_some_and(|d| now >= d) {
                    inner.ready = true;
                }

                if inner.ready && inner.filled {
                    if let Some(pending) = inner.pending.take() {
                        inner.ready = false;
                        inner.filled = false;
                        inner.last_put = None;
                        inner.takes += 1;
                        self.take_signal.notify_waiters();
                        return Ok(Some(pending.blocks));
                    }
                }

                let wait_deadline = wait_deadline.filter(|_| !inner.ready);
                match (wait_deadline, idle_deadline) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                }
            };

            match wake_at {
                Some(at) => {
                    tokio::select! {
                        _ = &mut changed => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => changed.await,
            }
        }
    }

    /// Release whatever is pending without waiting for `min_bytes`.
    pub fn ready(&self) {
        let mut inner = self.lock();
        if inner.pending.is_none() {
            return;
        }
        inner.ready = true;
        self.put_signal.notify_waiters();
    }

    /// End of data. Pending blocks remain available to `take`.
    pub fn close(&self) {
        let mut inner = self.lock();
        if inner.state != BufferState::Open {
            return;
        }
        inner.state = BufferState::Closed;
        self.put_signal.notify_waiters();
        self.take_signal.notify_waiters();
    }

    /// Terminal failure, reported by the next `take`.
    ///
    /// A cancellation is not a failure and closes the buffer instead.
    pub fn fail(&self, error: PortalError) {
        if error.is_cancelled() {
            self.close();
            return;
        }
        let mut inner = self.lock();
        if inner.state != BufferState::Open {
            return;
        }
        inner.state = BufferState::Failed;
        inner.error = Some(error);
        self.put_signal.notify_waiters();
        self.take_signal.notify_waiters();
    }
}
