//! chainportal-stream: backpressured finalized-block streaming for ChainPortal.
//!
//! # Architecture
//!
//! ```text
//!   portal ──HTTP──> IngestLoop ──put──> StreamBuffer ──take──> PortalStream ──> consumer
//!                       │  ^                                        │
//!                       │  └────────── CancellationToken ───────────┘
//!                       └─ LineSplitter (NDJSON framing)
//! ```
//!
//! - [`PortalClient`]: height, one-shot query and stream entry points
//! - [`StreamBuffer`]: single-slot rendezvous with byte and time release thresholds
//! - [`PortalStream`]: `futures::Stream` of [`StreamBatch`]es carrying the tip marker
//! - [`LineSplitter`]: newline framing across arbitrary chunk boundaries
//!
//! The producer never runs more than one `max_bytes` unit ahead of the
//! consumer, and cancelling (or dropping) the stream stops the producer at
//! its next await point.
//!
//! [`StreamBatch`]: chainportal_core::StreamBatch

pub mod buffer;
pub mod client;
pub mod decoder;
pub mod options;
pub mod stream;

mod height;
mod ingest;

pub use buffer::{BufferConfig, BufferState, StreamBuffer};
pub use client::PortalClient;
pub use decoder::LineSplitter;
pub use options::{PortalClientConfig, StreamOptions};
pub use stream::PortalStream;
