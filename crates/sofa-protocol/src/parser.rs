//! Newline-delimited JSON framing for the continuous changes feed

use crate::body::FeedLine;
use crate::error::{ProtocolError, ProtocolResult};
use bytes::{Bytes, BytesMut};
use tracing::trace;

/// Maximum size of a single line (1MB)
pub const MAX_LINE_SIZE: usize = 1024 * 1024;

/// Splits a byte stream into lines.
///
/// Chunks may end anywhere, including inside a multi-byte character; bytes
/// are held until the terminating `\n` arrives. A trailing `\r` is stripped.
#[derive(Debug)]
pub struct LineParser {
    buffer: BytesMut,
    max_line: usize,
}

impl LineParser {
    pub fn new() -> Self {
        Self::with_max_line(MAX_LINE_SIZE)
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            max_line,
        }
    }

    /// Add data to the buffer
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Take the next complete line, if any
    pub fn next_line(&mut self) -> ProtocolResult<Option<Bytes>> {
        let line_end = match self.buffer.iter().position(|&b| b == b'\n') {
            Some(pos) => pos,
            None => {
                if self.buffer.len() > self.max_line {
                    return Err(ProtocolError::LineTooLong {
                        size: self.buffer.len(),
                        max: self.max_line,
                    });
                }
                return Ok(None);
            }
        };

        if line_end > self.max_line {
            return Err(ProtocolError::LineTooLong {
                size: line_end,
                max: self.max_line,
            });
        }

        let mut line = self.buffer.split_to(line_end + 1);
        line.truncate(line_end);
        if line.last() == Some(&b'\r') {
            line.truncate(line_end - 1);
        }
        Ok(Some(line.freeze()))
    }

    /// Bytes of an unterminated trailing line
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for LineParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Decodes continuous-feed lines into [`FeedLine`]s.
///
/// Blank lines are heartbeats and are skipped. A partial line left when the
/// stream ends is never decoded; call [`ChangesParser::finish`] to drop it.
#[derive(Debug, Default)]
pub struct ChangesParser {
    lines: LineParser,
}

impl ChangesParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            lines: LineParser::with_max_line(max_line),
        }
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.lines.feed(data);
    }

    /// Next decoded entry, skipping heartbeats
    pub fn next_line(&mut self) -> ProtocolResult<Option<FeedLine>> {
        while let Some(line) = self.lines.next_line()? {
            if line.iter().all(u8::is_ascii_whitespace) {
                trace!("heartbeat");
                continue;
            }
            let entry: FeedLine = serde_json::from_slice(&line)?;
            return Ok(Some(entry));
        }
        Ok(None)
    }

    /// Discard any unterminated line, returning its length
    pub fn finish(&mut self) -> usize {
        let dropped = self.lines.pending();
        if dropped > 0 {
            trace!(bytes = dropped, "discarding partial line at end of stream");
        }
        self.lines.clear();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sofa_core::Seq;

    #[test]
    fn test_lines_split_across_chunks() {
        let mut parser = LineParser::new();
        parser.feed(b"{\"a\":");
        assert!(parser.next_line().unwrap().is_none());

        parser.feed(b"1}\r\n{\"b\":2}\n{\"c\"");
        assert_eq!(parser.next_line().unwrap().unwrap().as_ref(), b"{\"a\":1}");
        assert_eq!(parser.next_line().unwrap().unwrap().as_ref(), b"{\"b\":2}");
        assert!(parser.next_line().unwrap().is_none());
        assert_eq!(parser.pending(), 4);
    }

    #[test]
    fn test_multibyte_char_split_across_chunks() {
        let text = "{\"name\":\"caf\u{e9}\"}\n".as_bytes();
        let split = text.iter().position(|&b| b == 0xc3).unwrap() + 1;

        let mut parser = LineParser::new();
        parser.feed(&text[..split]);
        assert!(parser.next_line().unwrap().is_none());
        parser.feed(&text[split..]);

        let line = parser.next_line().unwrap().unwrap();
        assert_eq!(std::str::from_utf8(&line).unwrap(), "{\"name\":\"caf\u{e9}\"}");
    }

    #[test]
    fn test_line_too_long() {
        let mut parser = LineParser::with_max_line(8);
        parser.feed(b"0123456789");
        assert!(matches!(
            parser.next_line(),
            Err(ProtocolError::LineTooLong { max: 8, .. })
        ));
    }

    #[test]
    fn test_changes_skip_heartbeats() {
        let mut parser = ChangesParser::new();
        parser.feed(b"\n\n{\"seq\":1,\"id\":\"a\",\"changes\":[{\"rev\":\"1-x\"}]}\n\n");
        parser.feed(b"{\"last_seq\":1}\n");

        match parser.next_line().unwrap() {
            Some(FeedLine::Change(event)) => {
                assert_eq!(event.id, "a");
                assert_eq!(event.seq, Seq::Number(1));
            }
            other => panic!("unexpected {:?}", other),
        }
        match parser.next_line().unwrap() {
            Some(FeedLine::Finished { last_seq, .. }) => assert_eq!(last_seq, Seq::Number(1)),
            other => panic!("unexpected {:?}", other),
        }
        assert!(parser.next_line().unwrap().is_none());
    }

    #[test]
    fn test_partial_line_discarded() {
        let mut parser = ChangesParser::new();
        parser.feed(b"{\"seq\":2,\"id\":\"b\",\"chan");
        assert!(parser.next_line().unwrap().is_none());
        assert_eq!(parser.finish(), 23);
        assert!(parser.next_line().unwrap().is_none());
    }

    #[test]
    fn test_malformed_line_is_an_error() {
        let mut parser = ChangesParser::new();
        parser.feed(b"not json\n");
        assert!(matches!(parser.next_line(), Err(ProtocolError::InvalidJson(_))));
    }
}
