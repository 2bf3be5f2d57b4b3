//! Newline-delimited JSON framing.
//!
//! Splitting happens on raw bytes: `\n` never occurs inside a multi-byte
//! UTF-8 sequence, so a chunk boundary in the middle of a character is
//! harmless and each line is validated once by the JSON parser.

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;

use chainportal_core::error::PortalError;
use chainportal_core::transport::BodyStream;

const SEPARATOR: u8 = b'\n';

/// Stateful line splitter holding the trailing partial line between chunks.
#[derive(Debug, Default)]
pub struct LineSplitter {
    fragment: BytesMut,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return the lines it completed, without separators.
    ///
    /// Returns an empty vec when the chunk holds no separator; the chunk is
    /// then only appended to the held fragment.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        let mut lines = Vec::new();
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|&b| b == SEPARATOR) {
            self.fragment.extend_from_slice(&rest[..pos]);
            lines.push(self.fragment.split().freeze());
            rest = &rest[pos + 1..];
        }
        self.fragment.extend_from_slice(rest);
        lines
    }

    /// End of input: the held fragment, if any, is the final line.
    pub fn finish(&mut self) -> Option<Bytes> {
        if self.fragment.is_empty() {
            None
        } else {
            Some(self.fragment.split().freeze())
        }
    }

    /// Bytes of the incomplete line currently held.
    pub fn pending(&self) -> usize {
        self.fragment.len()
    }
}

/// Turn a response body into a stream of line groups, one group per body
/// chunk (possibly empty), followed by the unterminated tail if there is one.
///
/// The body is dropped, and thereby cancelled, together with the returned stream.
pub fn split_lines(body: BodyStream) -> impl Stream<Item = Result<Vec<Bytes>, PortalError>> + Send {
    futures::stream::unfold(Some((body, LineSplitter::new())), |state| async move {
        let (mut body, mut splitter) = state?;
        match body.next().await {
            Some(Ok(chunk)) => {
                let lines = splitter.push(&chunk);
                Some((Ok(lines), Some((body, splitter))))
            }
            Some(Err(e)) => Some((Err(e), None)),
            None => splitter.finish().map(|tail| (Ok(vec![tail]), None)),
        }
    })
}

/// `true` for lines holding nothing but ASCII whitespace (e.g. a stray `\r`).
pub fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}

/// Parse one line as a block document.
pub fn parse_block<B: DeserializeOwned>(line: &[u8]) -> Result<B, PortalError> {
    serde_json::from_slice(line).map_err(|e| PortalError::malformed_block(line, e))
}

/// Parse a fully buffered body, skipping blank lines.
pub fn parse_blocks<B: DeserializeOwned>(body: &[u8]) -> Result<Vec<B>, PortalError> {
    body.split(|&b| b == SEPARATOR)
        .filter(|line| !is_blank(line))
        .map(parse_block::<B>)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(chunks: &[&str]) -> Vec<String> {
        let mut splitter = LineSplitter::new();
        let mut out = Vec::new();
        for chunk in chunks {
            out.extend(splitter.push(chunk.as_bytes()));
        }
        out.extend(splitter.finish());
        out.into_iter()
            .map(|l| String::from_utf8(l.to_vec()).unwrap())
            .collect()
    }

    #[test]
    fn no_separator_only_buffers() {
        let mut splitter = LineSplitter::new();
        assert!(splitter.push(b"{\"a\":").is_empty());
        assert_eq!(splitter.pending(), 5);
        let lines = splitter.push(b"1}\n");
        assert_eq!(lines, vec![Bytes::from_static(b"{\"a\":1}")]);
        assert_eq!(splitter.pending(), 0);
        assert!(splitter.finish().is_none());
    }

    #[test]
    fn one_chunk_many_lines() {
        let mut splitter = LineSplitter::new();
        let lines = splitter.push(b"a\nb\nc");
        assert_eq!(lines.len(), 2);
        assert_eq!(splitter.finish(), Some(Bytes::from_static(b"c")));
    }

    #[test]
    fn every_split_point_reassembles() {
        let text = "{\"n\":1}\n{\"n\":2}\n\n{\"n\":3}";
        let expected: Vec<String> = text.split('\n').map(str::to_string).collect();
        for i in 0..=text.len() {
            for j in i..=text.len() {
                let got = feed(&[&text[..i], &text[i..j], &text[j..]]);
                assert_eq!(got, expected, "split at {i}/{j}");
            }
        }
    }

    #[test]
    fn trailing_separator_leaves_no_tail() {
        assert_eq!(feed(&["x\n", "y\n"]), vec!["x", "y"]);
    }

    #[test]
    fn split_inside_utf8_sequence() {
        let text = "{\"s\":\"ünï\"}\n".as_bytes();
        let mut splitter = LineSplitter::new();
        assert!(splitter.push(&text[..7]).is_empty());
        let lines = splitter.push(&text[7..]);
        assert_eq!(std::str::from_utf8(&lines[0]).unwrap(), "{\"s\":\"ünï\"}");
    }

    #[test]
    fn blank_lines() {
        assert!(is_blank(b""));
        assert!(is_blank(b"\r"));
        assert!(!is_blank(b" {} "));
    }

    #[test]
    fn parse_blocks_skips_blank_lines() {
        let body = b"{\"header\":{\"number\":1}}\r\n\n{\"header\":{\"number\":2}}\n";
        let blocks: Vec<chainportal_core::Block> = parse_blocks(body).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].header.number, 2);
    }

    #[test]
    fn parse_block_reports_line() {
        let err = parse_block::<chainportal_core::Block>(b"{\"header\":").unwrap_err();
        assert_eq!(err.kind(), chainportal_core::ErrorKind::Parse);
        assert!(err.to_string().contains("{\\\"header\\\":"));
    }

    #[tokio::test]
    async fn split_lines_emits_groups_then_tail() {
        let chunks: Vec<Result<Bytes, PortalError>> = vec![
            Ok(Bytes::from_static(b"1\n2")),
            Ok(Bytes::from_static(b"2")),
            Ok(Bytes::from_static(b"\n3")),
        ];
        let groups: Vec<_> = split_lines(Box::pin(futures::stream::iter(chunks)))
            .map(|g| g.unwrap().len())
            .collect()
            .await;
        assert_eq!(groups, vec![1, 0, 1, 1]);
    }

    #[tokio::test]
    async fn split_lines_stops_on_body_error() {
        let chunks: Vec<Result<Bytes, PortalError>> = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(PortalError::Http("reset".into())),
        ];
        let items: Vec<_> = split_lines(Box::pin(futures::stream::iter(chunks)))
            .collect()
            .await;
        assert_eq!(items.len(), 2);
        assert!(items[1].is_err());
    }
}
