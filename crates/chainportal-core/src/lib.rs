//! chainportal-core: foundation traits and types for ChainPortal.
//!
//! # Overview
//!
//! ChainPortal streams finalized chain data out of a portal data service.
//! The core crate defines:
//!
//! - [`PortalTransport`]: the async HTTP collaborator every transport implements
//! - [`PortalQuery`] / [`DatasetQuery`]: the request body sent to the portal
//! - [`Block`] / [`BlockRef`] / [`StreamBatch`]: wire and delivery types
//! - [`PortalError`]: structured error type
//! - [`policy`] module: retry policy used by transports

pub mod error;
pub mod policy;
pub mod query;
pub mod transport;
pub mod types;

pub use error::{ErrorKind, PortalError};
pub use policy::{RetryConfig, RetryPolicy};
pub use query::{DatasetQuery, EvmRequest, PortalQuery, SolanaRequest, SubstrateRequest};
pub use transport::{BodyStream, PortalResponse, PortalTransport, RequestOptions};
pub use types::{Block, BlockHeader, BlockRef, PortalBlock, StreamBatch};
