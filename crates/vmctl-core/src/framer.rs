//! Stream framer: turns an arbitrary byte stream into discrete JSON messages.
//!
//! Messages on the control channel have no length prefix and no separator;
//! an object ends where its braces balance. The [`Framer`] keeps whatever
//! has not formed a complete object yet and resumes scanning on the next
//! [`Framer::push`], so chunk boundaries never affect what is emitted.
//!
//! # Brace modes
//!
//! [`BraceMode::Lexical`] counts every `{` and `}` byte, including those
//! inside string literals. A brace inside a string therefore corrupts the
//! segment boundary; this is the historical wire behaviour and the default.
//! [`BraceMode::StringAware`] tracks string and escape state so that braces
//! inside strings are ignored.
//!
//! # Buffer limit
//!
//! An unbalanced `{`, or an unterminated string in `StringAware` mode,
//! would otherwise hold a connection's buffer open forever. Once the
//! pending segment grows past [`Framer::max_buffered`] it is discarded and
//! scanning starts over with the next input.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};

use crate::Message;

/// How the framer treats brace characters that appear inside strings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BraceMode {
    /// Count every brace byte.
    #[default]
    Lexical,
    /// Ignore braces inside JSON string literals.
    StringAware,
}

impl fmt::Display for BraceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Lexical => "lexical",
            Self::StringAware => "string_aware",
        };
        f.write_str(s)
    }
}

impl FromStr for BraceMode {
    type Err = BraceModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lexical" => Ok(Self::Lexical),
            "string_aware" | "string-aware" => Ok(Self::StringAware),
            other => Err(BraceModeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`BraceMode`] string.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid brace mode: {0:?} (expected lexical or string_aware)")]
pub struct BraceModeParseError(pub String);

/// Errors raised while reading messages off a byte stream.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("failed to read from stream: {0}")]
    Io(#[from] std::io::Error),

    #[error("stream closed with {0} bytes of an incomplete message")]
    Truncated(usize),
}

/// Size of one socket read in [`Framer::read_message`].
const READ_CHUNK: usize = 4096;

/// Default cap on bytes held for one incomplete message.
pub const DEFAULT_MAX_BUFFERED: usize = 1024 * 1024;

/// Incremental JSON object framer.
///
/// Invariant: `buf` never holds a segment that has already been emitted;
/// bytes up to and including a segment's closing brace are removed when
/// the segment is cut.
#[derive(Debug)]
pub struct Framer {
    mode: BraceMode,
    max_buffered: usize,
    buf: Vec<u8>,
    /// Next byte of `buf` to scan.
    cursor: usize,
    /// Open-brace balance of the segment being scanned.
    depth: usize,
    /// Offset of the opening brace of the segment being scanned.
    start: Option<usize>,
    in_string: bool,
    escaped: bool,
}

impl Default for Framer {
    fn default() -> Self {
        Self::new(BraceMode::default())
    }
}

impl Framer {
    /// Create an empty framer.
    pub fn new(mode: BraceMode) -> Self {
        Self {
            mode,
            max_buffered: DEFAULT_MAX_BUFFERED,
            buf: Vec::new(),
            cursor: 0,
            depth: 0,
            start: None,
            in_string: false,
            escaped: false,
        }
    }

    /// Replace the cap on bytes held for one incomplete message.
    pub fn with_max_buffered(mut self, max: usize) -> Self {
        self.max_buffered = max;
        self
    }

    pub fn mode(&self) -> BraceMode {
        self.mode
    }

    pub fn max_buffered(&self) -> usize {
        self.max_buffered
    }

    /// Append raw bytes. Zero-length chunks are accepted.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Number of bytes held back waiting for more input.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Return the next successfully decoded message, if one is complete.
    ///
    /// Segments that are not valid JSON are logged and dropped; scanning
    /// continues with the rest of the buffer.
    pub fn next_message(&mut self) -> Option<Message> {
        loop {
            let segment = self.next_segment()?;
            match serde_json::from_slice::<Value>(&segment) {
                Ok(Value::Object(map)) => return Some(map),
                Ok(other) => {
                    warn!(value = %other, "discarding non-object JSON segment");
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        segment = %String::from_utf8_lossy(&segment),
                        "unable to parse JSON message, ignoring it"
                    );
                }
            }
        }
    }

    /// Lazily yield every message that is complete right now.
    pub fn drain(&mut self) -> impl Iterator<Item = Message> + '_ {
        std::iter::from_fn(move || self.next_message())
    }

    /// Push a chunk and collect every message it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Message> {
        self.push(chunk);
        self.drain().collect()
    }

    /// Read from `reader` until a message is complete.
    ///
    /// Returns `Ok(None)` on a clean end of stream and
    /// [`FrameError::Truncated`] when the stream ends inside a segment.
    pub async fn read_message<R>(&mut self, reader: &mut R) -> Result<Option<Message>, FrameError>
    where
        R: AsyncRead + Unpin,
    {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(msg) = self.next_message() {
                return Ok(Some(msg));
            }
            let n = reader.read(&mut chunk).await?;
            if n == 0 {
                return match self.buffered() {
                    0 => Ok(None),
                    pending => Err(FrameError::Truncated(pending)),
                };
            }
            self.push(&chunk[..n]);
        }
    }

    /// Cut the next brace-balanced segment out of the buffer.
    fn next_segment(&mut self) -> Option<Vec<u8>> {
        while self.cursor < self.buf.len() {
            let byte = self.buf[self.cursor];

            if self.mode == BraceMode::StringAware && self.start.is_some() && self.scan_string(byte)
            {
                self.cursor += 1;
                continue;
            }

            match (byte, self.start) {
                (b'{', None) => {
                    self.start = Some(self.cursor);
                    self.depth = 1;
                }
                (b'{', Some(_)) => self.depth += 1,
                (b'}', Some(start)) => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        let end = self.cursor + 1;
                        let segment = self.buf[start..end].to_vec();
                        self.buf.drain(..end);
                        self.cursor = 0;
                        self.start = None;
                        debug!(len = segment.len(), remaining = self.buf.len(), "cut JSON segment");
                        return Some(segment);
                    }
                }
                _ => {}
            }
            self.cursor += 1;
        }

        self.compact();
        if self.buf.len() > self.max_buffered {
            warn!(
                pending = self.buf.len(),
                max = self.max_buffered,
                "incomplete message exceeds buffer limit, discarding it"
            );
            self.reset();
        }
        None
    }

    /// Forget the pending segment and all scan state.
    fn reset(&mut self) {
        self.buf.clear();
        self.cursor = 0;
        self.depth = 0;
        self.start = None;
        self.in_string = false;
        self.escaped = false;
    }

    /// Track string state; returns `true` when `byte` is string content.
    fn scan_string(&mut self, byte: u8) -> bool {
        if self.in_string {
            if self.escaped {
                self.escaped = false;
            } else if byte == b'\\' {
                self.escaped = true;
            } else if byte == b'"' {
                self.in_string = false;
            }
            return true;
        }
        if byte == b'"' {
            self.in_string = true;
            return true;
        }
        false
    }

    /// Drop scanned bytes that can never become part of a segment.
    fn compact(&mut self) {
        match self.start {
            None => {
                self.buf.clear();
                self.cursor = 0;
            }
            Some(start) if start > 0 => {
                self.buf.drain(..start);
                self.cursor -= start;
                self.start = Some(0);
            }
            Some(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_values(messages: Vec<Message>) -> Vec<Value> {
        messages.into_iter().map(Value::Object).collect()
    }

    fn feed_in_chunks(mode: BraceMode, input: &[u8], sizes: &[usize]) -> Vec<Value> {
        let mut framer = Framer::new(mode);
        let mut out = Vec::new();
        let mut rest = input;
        let mut i = 0;
        while !rest.is_empty() {
            let n = sizes[i % sizes.len()].clamp(1, rest.len());
            out.extend(framer.feed(&rest[..n]));
            rest = &rest[n..];
            i += 1;
        }
        as_values(out)
    }

    #[test]
    fn two_objects_split_at_every_offset() {
        let input = br#"{"a":1}{"b":2}"#;
        for split in 0..=input.len() {
            let mut framer = Framer::new(BraceMode::Lexical);
            let mut out = framer.feed(&input[..split]);
            out.extend(framer.feed(&input[split..]));
            assert_eq!(
                as_values(out),
                vec![json!({"a": 1}), json!({"b": 2})],
                "split at {split}"
            );
            assert_eq!(framer.buffered(), 0);
        }
    }

    #[test]
    fn malformed_segment_between_valid_ones_is_dropped() {
        let mut framer = Framer::new(BraceMode::Lexical);
        let out = framer.feed(br#"{"a":1}{bad}{"b":2}"#);
        assert_eq!(as_values(out), vec![json!({"a": 1}), json!({"b": 2})]);
    }

    #[test]
    fn chunking_does_not_change_output() {
        let input = r#" {"hosts":{"mme":{"host_name":"mme","ip":"10.0.0.1/24"}}}
{"command":"start"}{oops}{"nested":{"deep":{"x":[1,2,{"y":3}]}}}  {"z":"ü"}"#
            .as_bytes();
        for mode in [BraceMode::Lexical, BraceMode::StringAware] {
            let whole = feed_in_chunks(mode, input, &[input.len()]);
            assert_eq!(whole.len(), 4);
            for sizes in [&[1][..], &[2, 3], &[7, 1, 13], &[5, 40, 2, 9]] {
                assert_eq!(feed_in_chunks(mode, input, sizes), whole, "sizes {sizes:?}");
            }
        }
    }

    #[test]
    fn partial_object_is_retained() {
        let mut framer = Framer::new(BraceMode::Lexical);
        assert!(framer.feed(br#"{"key1": 1"#).is_empty());
        assert_eq!(framer.buffered(), 10);
        assert!(framer.feed(b"").is_empty());
        let out = framer.feed(br#", "key2": 2}"#);
        assert_eq!(as_values(out), vec![json!({"key1": 1, "key2": 2})]);
    }

    #[test]
    fn bytes_outside_segments_are_discarded() {
        let mut framer = Framer::new(BraceMode::Lexical);
        assert!(framer.feed(b"\r\n  } noise ").is_empty());
        assert_eq!(framer.buffered(), 0);
        let out = framer.feed(b"junk{\"a\":true}\n");
        assert_eq!(as_values(out), vec![json!({"a": true})]);
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn leading_garbage_is_trimmed_while_waiting() {
        let mut framer = Framer::new(BraceMode::Lexical);
        framer.feed(b"xxxx{\"a\"");
        assert_eq!(framer.buffered(), 4);
    }

    #[test]
    fn multibyte_characters_split_across_chunks() {
        let input = "{\"name\":\"árvíztűrő\"}".as_bytes();
        let out = feed_in_chunks(BraceMode::Lexical, input, &[1]);
        assert_eq!(out, vec![json!({"name": "árvíztűrő"})]);
    }

    #[test]
    fn lexical_mode_miscounts_braces_in_strings() {
        let mut framer = Framer::new(BraceMode::Lexical);
        let out = framer.feed(br#"{"a":"}"}{"b":2}"#);
        // `{"a":"}` is cut early and fails to decode; the stray `"}` is skipped.
        assert_eq!(as_values(out), vec![json!({"b": 2})]);
    }

    #[test]
    fn string_aware_mode_ignores_braces_in_strings() {
        let mut framer = Framer::new(BraceMode::StringAware);
        let out = framer.feed(br#"{"a":"}{\"{"}{"b":2}"#);
        assert_eq!(as_values(out), vec![json!({"a": "}{\"{"}), json!({"b": 2})]);
    }

    #[test]
    fn drain_is_resumable() {
        let mut framer = Framer::new(BraceMode::Lexical);
        framer.push(br#"{"a":1}{"b":2}{"c""#);
        let mut iter = framer.drain();
        assert_eq!(iter.next().map(Value::Object), Some(json!({"a": 1})));
        drop(iter);
        assert_eq!(framer.next_message().map(Value::Object), Some(json!({"b": 2})));
        assert!(framer.next_message().is_none());
        framer.push(b":3}");
        assert_eq!(framer.next_message().map(Value::Object), Some(json!({"c": 3})));
    }

    #[test]
    fn oversized_pending_message_is_discarded() {
        for mode in [BraceMode::Lexical, BraceMode::StringAware] {
            let mut framer = Framer::new(mode).with_max_buffered(16);
            assert!(framer.feed(br#"{"a":"unterminated value that never ends"#).is_empty());
            assert_eq!(framer.buffered(), 0, "{mode}");

            let out = framer.feed(br#"{"b":2}"#);
            assert_eq!(as_values(out), vec![json!({"b": 2})], "{mode}");
        }
    }

    #[test]
    fn messages_within_limit_are_kept() {
        let mut framer = Framer::new(BraceMode::Lexical).with_max_buffered(16);
        assert!(framer.feed(br#"{"a":"#).is_empty());
        assert_eq!(framer.buffered(), 5);
        assert_eq!(as_values(framer.feed(b"1}")), vec![json!({"a": 1})]);
        assert_eq!(Framer::default().max_buffered(), DEFAULT_MAX_BUFFERED);
    }

    #[test]
    fn brace_mode_parses_and_displays() {
        assert_eq!("lexical".parse::<BraceMode>().unwrap(), BraceMode::Lexical);
        assert_eq!("string_aware".parse::<BraceMode>().unwrap(), BraceMode::StringAware);
        assert_eq!(BraceMode::StringAware.to_string(), "string_aware");
        assert!("json".parse::<BraceMode>().is_err());
    }

    #[tokio::test]
    async fn read_message_pulls_from_stream() {
        let mut reader: &[u8] = br#"  {"a":1}
{"b":2}"#;
        let mut framer = Framer::new(BraceMode::Lexical);
        let first = framer.read_message(&mut reader).await.unwrap();
        let second = framer.read_message(&mut reader).await.unwrap();
        assert_eq!(first.map(Value::Object), Some(json!({"a": 1})));
        assert_eq!(second.map(Value::Object), Some(json!({"b": 2})));
        assert!(framer.read_message(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn read_message_reports_truncated_stream() {
        let mut reader: &[u8] = br#"{"a":1}{"b""#;
        let mut framer = Framer::new(BraceMode::Lexical);
        assert!(framer.read_message(&mut reader).await.unwrap().is_some());
        let err = framer.read_message(&mut reader).await.unwrap_err();
        assert!(matches!(err, FrameError::Truncated(4)));
    }
}
