//! chainportal-http: HTTP transport for ChainPortal backed by `reqwest`.

pub mod client;

pub use client::{HttpPortalTransport, HttpTransportConfig};
