//! Client and stream configuration.

use std::time::Duration;

use chainportal_core::transport::RequestOptions;
use chainportal_http::HttpTransportConfig;

use crate::buffer::BufferConfig;

/// Default release threshold: 40 MiB of wire data.
pub const DEFAULT_MIN_BYTES: usize = 40 * 1024 * 1024;
/// Default force-flush after upstream silence.
pub const DEFAULT_MAX_IDLE_TIME: Duration = Duration::from_millis(300);
/// Default hard ceiling on one release cycle.
pub const DEFAULT_MAX_WAIT_TIME: Duration = Duration::from_millis(5_000);
/// Default delay between polls while no data is available past the tip.
pub const DEFAULT_HEAD_POLL_INTERVAL: Duration = Duration::from_millis(5_000);
/// Default lifetime of a cached finalized height.
pub const DEFAULT_TIP_REFRESH_INTERVAL: Duration = Duration::from_secs(20);

/// Options of one finalized stream.
///
/// Optional durations follow one rule: `None` disables that timer.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Release threshold in bytes.
    pub min_bytes: usize,
    /// Backpressure ceiling; `None` means `min_bytes`. Raised to `min_bytes` if lower.
    pub max_bytes: Option<usize>,
    /// Release partial data after this much upstream silence.
    pub max_idle_time: Option<Duration>,
    /// Release partial data after a consumer has waited this long.
    pub max_wait_time: Option<Duration>,
    /// Delay between requests while the portal has nothing past the tip.
    pub head_poll_interval: Duration,
    /// End the stream instead of polling once the portal has nothing past the tip.
    pub stop_on_head: bool,
    /// Request options for this stream; `None` uses the client's.
    pub request: Option<RequestOptions>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            min_bytes: DEFAULT_MIN_BYTES,
            max_bytes: None,
            max_idle_time: Some(DEFAULT_MAX_IDLE_TIME),
            max_wait_time: Some(DEFAULT_MAX_WAIT_TIME),
            head_poll_interval: DEFAULT_HEAD_POLL_INTERVAL,
            stop_on_head: false,
            request: None,
        }
    }
}

impl StreamOptions {
    pub fn with_min_bytes(mut self, min_bytes: usize) -> Self {
        self.min_bytes = min_bytes;
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    pub fn with_max_idle_time(mut self, max_idle_time: Option<Duration>) -> Self {
        self.max_idle_time = max_idle_time;
        self
    }

    pub fn with_max_wait_time(mut self, max_wait_time: Option<Duration>) -> Self {
        self.max_wait_time = max_wait_time;
        self
    }

    pub fn with_head_poll_interval(mut self, interval: Duration) -> Self {
        self.head_poll_interval = interval;
        self
    }

    pub fn stop_on_head(mut self, stop: bool) -> Self {
        self.stop_on_head = stop;
        self
    }

    pub fn with_request(mut self, request: RequestOptions) -> Self {
        self.request = Some(request);
        self
    }

    pub fn buffer_config(&self) -> BufferConfig {
        BufferConfig::new(
            self.min_bytes,
            self.max_bytes,
            self.max_idle_time,
            self.max_wait_time,
        )
    }
}

/// Configuration for [`crate::PortalClient`].
#[derive(Debug, Clone)]
pub struct PortalClientConfig {
    /// Transport settings used when the client builds its own HTTP transport.
    pub http: HttpTransportConfig,
    /// Request options applied to every call unless a stream overrides them.
    pub request: RequestOptions,
    /// Defaults for [`crate::PortalClient::finalized_stream`].
    pub stream: StreamOptions,
    /// How long a fetched finalized height is reused as the tip marker.
    pub tip_refresh_interval: Duration,
}

impl Default for PortalClientConfig {
    fn default() -> Self {
        Self {
            http: HttpTransportConfig::default(),
            request: RequestOptions::default(),
            stream: StreamOptions::default(),
            tip_refresh_interval: DEFAULT_TIP_REFRESH_INTERVAL,
        }
    }
}
