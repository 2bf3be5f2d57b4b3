//! Portal error taxonomy.

use thiserror::Error;

/// Broad class of a [`PortalError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network or transport failure reported by the HTTP collaborator.
    Transport,
    /// The portal answered with a status the protocol does not define.
    Protocol,
    /// Malformed height text or malformed JSON line.
    Parse,
    /// Explicit cancellation. Not a failure.
    Cancelled,
    /// Configuration or usage error.
    Other,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport => write!(f, "transport"),
            Self::Protocol => write!(f, "protocol"),
            Self::Parse => write!(f, "parse"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Errors that can occur while talking to a portal.
#[derive(Debug, Error)]
pub enum PortalError {
    /// HTTP request failed (connection refused, reset, TLS, etc.).
    #[error("HTTP error: {0}")]
    Http(String),

    /// Request or body read timed out after the configured duration.
    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// The portal returned a status outside the protocol.
    #[error("Unexpected HTTP status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },

    /// The height endpoint returned something that is not a decimal integer.
    #[error("Invalid finalized height: {body:?}")]
    InvalidHeight { body: String },

    /// A line of the block stream is not a valid block document.
    #[error("Malformed block line {line:?}: {source}")]
    MalformedBlock {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    /// The operation was cancelled by the caller.
    #[error("Cancelled")]
    Cancelled,

    /// The portal base URL could not be parsed.
    #[error("Invalid portal URL: {0}")]
    InvalidUrl(String),

    /// An unexpected error.
    #[error("{0}")]
    Other(String),
}

impl PortalError {
    /// Longest line prefix kept in [`PortalError::MalformedBlock`].
    const LINE_PREVIEW: usize = 256;

    /// Build a [`PortalError::MalformedBlock`] keeping a bounded preview of the line.
    pub fn malformed_block(line: &[u8], source: serde_json::Error) -> Self {
        let end = line.len().min(Self::LINE_PREVIEW);
        Self::MalformedBlock {
            line: String::from_utf8_lossy(&line[..end]).into_owned(),
            source,
        }
    }

    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Http(_) | Self::Timeout { .. } => ErrorKind::Transport,
            Self::UnexpectedStatus { .. } => ErrorKind::Protocol,
            Self::InvalidHeight { .. } | Self::MalformedBlock { .. } => ErrorKind::Parse,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::InvalidUrl(_) | Self::Other(_) => ErrorKind::Other,
        }
    }

    /// Returns `true` if the error is transient and the request may be repeated.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Timeout { .. } => true,
            Self::UnexpectedStatus { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }

    /// Returns `true` if this error only reports a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Statuses a transport may retry: rate limiting and gateway hiccups.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 502 | 503 | 504)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds() {
        assert_eq!(PortalError::Http("reset".into()).kind(), ErrorKind::Transport);
        assert_eq!(PortalError::Timeout { ms: 10 }.kind(), ErrorKind::Transport);
        assert_eq!(
            PortalError::UnexpectedStatus { status: 500, url: "u".into() }.kind(),
            ErrorKind::Protocol
        );
        assert_eq!(PortalError::InvalidHeight { body: "x".into() }.kind(), ErrorKind::Parse);
        assert_eq!(PortalError::Cancelled.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn retryable_statuses() {
        let status = |status| PortalError::UnexpectedStatus { status, url: String::new() };
        assert!(status(503).is_retryable());
        assert!(status(429).is_retryable());
        assert!(!status(400).is_retryable());
        assert!(!status(500).is_retryable());
        assert!(!PortalError::Cancelled.is_retryable());
    }

    #[test]
    fn malformed_block_preview_is_bounded() {
        let line = vec![b'x'; 1000];
        let source = serde_json::from_slice::<serde_json::Value>(&line).unwrap_err();
        match PortalError::malformed_block(&line, source) {
            PortalError::MalformedBlock { line, .. } => assert_eq!(line.len(), 256),
            other => panic!("unexpected {other:?}"),
        }
    }
}
