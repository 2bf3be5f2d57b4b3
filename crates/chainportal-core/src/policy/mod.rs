//! Request policies applied by transports.
//!
//! ```text
//! Request → [RetryPolicy] → [Transport]
//! ```

pub mod retry;

pub use retry::{RetryConfig, RetryPolicy};
