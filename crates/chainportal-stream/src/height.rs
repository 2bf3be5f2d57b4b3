//! Per-stream cache of the finalized height used as the tip marker.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use chainportal_core::error::PortalError;

/// Reuses the last fetched height for `interval`.
#[derive(Debug)]
pub(crate) struct HeightCache {
    interval: Duration,
    last: Option<(Instant, u64)>,
}

impl HeightCache {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Cached height, or the result of `fetch` when the cache is empty or stale.
    pub(crate) async fn get<F, Fut>(&mut self, fetch: F) -> Result<u64, PortalError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<u64, PortalError>>,
    {
        if let Some((at, height)) = self.last {
            if at.elapsed() < self.interval {
                return Ok(height);
            }
        }
        let height = fetch().await?;
        self.last = Some((Instant::now(), height));
        Ok(height)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn refreshes_after_interval() {
        let counter = AtomicU64::new(0);
        let calls = &counter;
        let fetch = move || async move {
            Ok::<_, PortalError>(100 + calls.fetch_add(1, Ordering::SeqCst))
        };
        let mut cache = HeightCache::new(Duration::from_secs(20));

        assert_eq!(cache.get(fetch).await.unwrap(), 100);
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(cache.get(fetch).await.unwrap(), 100);
        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(cache.get(fetch).await.unwrap(), 101);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let mut cache = HeightCache::new(Duration::from_secs(20));
        let err = cache
            .get(|| async { Err(PortalError::Http("down".into())) })
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(cache.get(|| async { Ok(7) }).await.unwrap(), 7);
    }
}
