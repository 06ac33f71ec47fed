//! Framing for JSON envelopes on a byte stream.
//!
//! Each envelope is one JSON value. Values delimit themselves, so the decoder
//! needs no length prefix: it scans the buffered bytes for the end of the
//! first value, tracking nesting, strings and escapes, and resumes where it
//! stopped when more bytes arrive. Only a complete value is handed to
//! `serde_json`. The encoder writes compact JSON followed by a newline, which
//! peers using line-oriented readers also accept.
//!
//! Syntactically broken input does not poison the stream. The decoder drops
//! bytes up to the next newline, even when that newline arrives in a later
//! read, and then yields one [`Frame::Malformed`]. The caller can answer with
//! a single parse error and keep reading.

use bytes::{Buf, BufMut, BytesMut};
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::error::Error;
use crate::mcp::protocol::Message;

/// Default upper bound on the size of one encoded value.
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// One decoded unit from the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A complete JSON value.
    Value(Value),
    /// Bytes that could not be parsed as JSON; they have been discarded.
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Object,
    Array,
}

/// What the scanner accepts next, outside strings and scalars.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Value,
    /// Right after `[`.
    ValueOrEnd,
    /// Right after `{`.
    KeyOrEnd,
    /// After `,` inside an object.
    Key,
    Colon,
    CommaOrEnd,
}

enum Scan {
    /// The first value ends at this offset (exclusive).
    Complete(usize),
    Incomplete,
    /// A byte at this offset cannot continue any JSON value.
    Invalid(usize, String),
}

/// Codec for self-delimiting JSON values.
#[derive(Debug, Clone)]
pub struct JsonCodec {
    max_frame_len: usize,
    /// Bytes of the current value already scanned.
    scanned: usize,
    stack: Vec<Container>,
    expect: Expect,
    in_string: bool,
    string_is_key: bool,
    escaped: bool,
    in_scalar: bool,
    /// Set while dropping the rest of a broken line.
    discarding: Option<String>,
}

impl Default for JsonCodec {
    fn default() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }
}

fn is_scalar_start(b: u8) -> bool {
    b == b'-' || b.is_ascii_digit() || matches!(b, b't' | b'f' | b'n')
}

fn is_scalar_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'+' | b'.')
}

fn skip_whitespace(src: &mut BytesMut) {
    let leading = src
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(src.len());
    src.advance(leading);
}

impl JsonCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// A codec that rejects values longer than `max_frame_len` bytes.
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            max_frame_len,
            scanned: 0,
            stack: Vec::new(),
            expect: Expect::Value,
            in_string: false,
            string_is_key: false,
            escaped: false,
            in_scalar: false,
            discarding: None,
        }
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    fn reset(&mut self) {
        self.scanned = 0;
        self.stack.clear();
        self.expect = Expect::Value;
        self.in_string = false;
        self.string_is_key = false;
        self.escaped = false;
        self.in_scalar = false;
    }

    /// A value just ended at `end`. Returns `Some(end)` if it was the
    /// top-level value.
    fn value_done(&mut self, end: usize) -> Option<usize> {
        if self.stack.is_empty() {
            Some(end)
        } else {
            self.expect = Expect::CommaOrEnd;
            None
        }
    }

    fn close_container(&mut self, end: usize) -> Option<usize> {
        self.stack.pop();
        self.value_done(end)
    }

    fn scan(&mut self, buf: &[u8]) -> Scan {
        let mut i = self.scanned;
        while i < buf.len() {
            let b = buf[i];

            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if b == b'\\' {
                    self.escaped = true;
                } else if b == b'"' {
                    self.in_string = false;
                    if self.string_is_key {
                        self.expect = Expect::Colon;
                    } else if let Some(end) = self.value_done(i + 1) {
                        return Scan::Complete(end);
                    }
                }
                i += 1;
                continue;
            }

            if self.in_scalar {
                if is_scalar_byte(b) {
                    i += 1;
                    continue;
                }
                // The terminator belongs to whatever follows the scalar.
                self.in_scalar = false;
                if let Some(end) = self.value_done(i) {
                    return Scan::Complete(end);
                }
                continue;
            }

            if b.is_ascii_whitespace() {
                i += 1;
                continue;
            }

            let top = self.stack.last().copied();
            match (self.expect, b) {
                (Expect::Value | Expect::ValueOrEnd, b'{') => {
                    self.stack.push(Container::Object);
                    self.expect = Expect::KeyOrEnd;
                }
                (Expect::Value | Expect::ValueOrEnd, b'[') => {
                    self.stack.push(Container::Array);
                    self.expect = Expect::ValueOrEnd;
                }
                (Expect::Value | Expect::ValueOrEnd, b'"') => {
                    self.in_string = true;
                    self.string_is_key = false;
                }
                (Expect::Value | Expect::ValueOrEnd, b) if is_scalar_start(b) => {
                    self.in_scalar = true;
                }
                (Expect::KeyOrEnd | Expect::Key, b'"') => {
                    self.in_string = true;
                    self.string_is_key = true;
                }
                (Expect::Colon, b':') => self.expect = Expect::Value,
                (Expect::CommaOrEnd, b',') => {
                    self.expect = match top {
                        Some(Container::Object) => Expect::Key,
                        _ => Expect::Value,
                    };
                }
                (Expect::KeyOrEnd | Expect::CommaOrEnd, b'}')
                    if top == Some(Container::Object) =>
                {
                    if let Some(end) = self.close_container(i + 1) {
                        return Scan::Complete(end);
                    }
                }
                (Expect::ValueOrEnd | Expect::CommaOrEnd, b']')
                    if top == Some(Container::Array) =>
                {
                    if let Some(end) = self.close_container(i + 1) {
                        return Scan::Complete(end);
                    }
                }
                _ => {
                    return Scan::Invalid(
                        i,
                        format!("unexpected character {:?} at offset {}", char::from(b), i),
                    )
                }
            }
            i += 1;
        }

        self.scanned = i;
        Scan::Incomplete
    }

    /// Drop bytes from `from` through the next newline. Without a newline in
    /// the buffer, keep dropping in later calls and report once it arrives.
    fn discard_line(&mut self, src: &mut BytesMut, from: usize, reason: String) -> Option<Frame> {
        match src[from..].iter().position(|b| *b == b'\n') {
            Some(newline) => {
                src.advance(from + newline + 1);
                Some(Frame::Malformed(reason))
            }
            None => {
                src.clear();
                self.discarding = Some(reason);
                None
            }
        }
    }
}

impl Decoder for JsonCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Error> {
        if let Some(reason) = self.discarding.take() {
            if let Some(frame) = self.discard_line(src, 0, reason) {
                return Ok(Some(frame));
            }
            return Ok(None);
        }

        if self.scanned == 0 {
            skip_whitespace(src);
        }
        if src.is_empty() {
            return Ok(None);
        }

        match self.scan(&src[..]) {
            Scan::Complete(end) => {
                self.reset();
                if end > self.max_frame_len {
                    let reason = format!("message of {} bytes exceeds limit of {}", end, self.max_frame_len);
                    src.advance(end);
                    return Ok(Some(Frame::Malformed(reason)));
                }
                match serde_json::from_slice::<Value>(&src[..end]) {
                    Ok(value) => {
                        trace!("Decoded frame of {} bytes", end);
                        src.advance(end);
                        Ok(Some(Frame::Value(value)))
                    }
                    Err(e) => Ok(self.discard_line(src, end, e.to_string())),
                }
            }
            Scan::Incomplete if src.len() > self.max_frame_len => {
                self.reset();
                let reason = format!("message exceeds limit of {} bytes", self.max_frame_len);
                let len = src.len();
                Ok(self.discard_line(src, len, reason))
            }
            Scan::Incomplete => Ok(None),
            Scan::Invalid(at, reason) => {
                self.reset();
                Ok(self.discard_line(src, at, reason))
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if let Some(reason) = self.discarding.take() {
            src.clear();
            return Ok(Some(Frame::Malformed(reason)));
        }
        if src.is_empty() {
            return Ok(None);
        }

        // A top-level number or literal is only terminated by end of stream.
        let bare_scalar = self.in_scalar && self.stack.is_empty();
        let frame = match serde_json::from_slice::<Value>(&src[..]) {
            Ok(value) if bare_scalar => Frame::Value(value),
            _ => Frame::Malformed(format!(
                "stream ended inside a message ({} bytes pending)",
                src.len()
            )),
        };
        self.reset();
        src.clear();
        Ok(Some(frame))
    }
}

impl<'a> Encoder<&'a Message> for JsonCodec {
    type Error = Error;

    fn encode(&mut self, item: &'a Message, dst: &mut BytesMut) -> Result<(), Error> {
        let json = serde_json::to_vec(item)?;
        trace!("Encoding frame: {}", String::from_utf8_lossy(&json));
        dst.reserve(json.len() + 1);
        dst.put_slice(&json);
        dst.put_u8(b'\n');
        Ok(())
    }
}
