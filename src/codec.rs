use bytes::{BufMut, BytesMut};
use std::collections::VecDeque;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{ConnError, ProtocolError};
use crate::frame::{Frame, is_utf8_compatible, parse_content_type};
use crate::headers::Headers;
use crate::parser::FrameParser;
use crate::protocol::ProtocolVersion;

/// Escape a header name or value for wire transmission.
///
/// STOMP 1.0 has no escaping: LF is dropped from values, and LF and `:` are
/// dropped from names. STOMP 1.1 escapes:
/// - backslash (0x5c) → `\\`
/// - line feed (0x0a) → `\n`
/// - colon (0x3a) → `\c`
pub fn escape_header(version: ProtocolVersion, input: &str, is_name: bool) -> String {
    let mut result = String::with_capacity(input.len());
    match version {
        ProtocolVersion::V1_0 => {
            for ch in input.chars() {
                match ch {
                    '\n' => {}
                    ':' if is_name => {}
                    _ => result.push(ch),
                }
            }
        }
        ProtocolVersion::V1_1 => {
            for ch in input.chars() {
                match ch {
                    '\\' => result.push_str("\\\\"),
                    '\n' => result.push_str("\\n"),
                    ':' => result.push_str("\\c"),
                    _ => result.push(ch),
                }
            }
        }
    }
    result
}

/// Serialize `frame` for the given protocol version, appending to `dst`.
///
/// A heartbeat is a single LF. Otherwise `content-length` is forced to the
/// body length whenever a body is present, and STOMP 1.1 additionally
/// infers `content-type` (with a charset for text bodies).
pub fn serialize_into(version: ProtocolVersion, frame: &Frame, dst: &mut BytesMut) {
    let Some(command) = frame.command.as_deref() else {
        dst.put_u8(b'\n');
        return;
    };

    let mut headers = frame.headers.clone();
    if let Some(body) = &frame.body {
        headers.set("content-length", body.len());
        if version == ProtocolVersion::V1_1 {
            infer_content_type(&mut headers, body);
        }
    }

    dst.extend_from_slice(command.as_bytes());
    dst.put_u8(b'\n');
    for (k, v) in headers.iter() {
        dst.extend_from_slice(escape_header(version, k, true).as_bytes());
        dst.put_u8(b':');
        dst.extend_from_slice(escape_header(version, v, false).as_bytes());
        dst.put_u8(b'\n');
    }
    dst.put_u8(b'\n');
    if let Some(body) = &frame.body {
        dst.extend_from_slice(body);
    }
    dst.put_u8(0);
}

/// Serialize `frame` into a fresh buffer.
pub fn serialize(version: ProtocolVersion, frame: &Frame) -> BytesMut {
    let mut dst = BytesMut::new();
    serialize_into(version, frame, &mut dst);
    dst
}

fn infer_content_type(headers: &mut Headers, body: &[u8]) {
    match headers.get("content-type").and_then(parse_content_type) {
        None => {
            if std::str::from_utf8(body).is_ok() {
                headers.set("content-type", "text/plain;charset=UTF-8");
            } else {
                headers.set("content-type", "application/octet-stream");
            }
        }
        Some((ty, sub, None)) if ty.eq_ignore_ascii_case("text") => {
            headers.set("content-type", format!("{}/{};charset=UTF-8", ty, sub));
        }
        Some(_) => {}
    }
}

/// Re-apply the declared charset to a frame parsed under STOMP 1.1.
fn apply_charset(frame: &mut Frame) {
    if frame.body.is_none() {
        return;
    }
    frame.charset = match frame.content_type() {
        Some((_, _, Some(charset))) => Some(charset),
        Some((ty, _, None)) if ty.eq_ignore_ascii_case("text") => Some("UTF-8".to_string()),
        _ => None,
    };
    if let Some(cs) = &frame.charset {
        if is_utf8_compatible(cs) && frame.body_str().is_none() {
            tracing::debug!(charset = %cs, "body does not decode with its declared charset");
        }
    }
}

/// `StompCodec` implements `tokio_util::codec::{Decoder, Encoder}` for the
/// STOMP wire protocol.
///
/// Responsibilities:
/// - Decode incoming bytes into `Frame`s (heartbeats have no command),
///   keeping partial frames across calls.
/// - Encode `Frame`s with the escaping rules of the configured version.
pub struct StompCodec {
    parser: FrameParser,
    ready: VecDeque<Frame>,
}

impl StompCodec {
    pub fn new(version: ProtocolVersion) -> Self {
        Self {
            parser: FrameParser::new(version),
            ready: VecDeque::new(),
        }
    }

    pub fn version(&self) -> ProtocolVersion {
        self.parser.version()
    }

    /// Switch to the version negotiated on CONNECTED.
    pub fn set_version(&mut self, version: ProtocolVersion) {
        self.parser.set_version(version);
    }

    /// True while bytes of an unfinished frame are buffered.
    pub fn is_mid_frame(&self) -> bool {
        self.parser.is_mid_frame()
    }

    /// Feed raw bytes and return every frame they complete.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Frame>, ProtocolError> {
        let mut frames = self.parser.feed(chunk)?;
        if self.version() == ProtocolVersion::V1_1 {
            frames.iter_mut().for_each(apply_charset);
        }
        Ok(frames)
    }
}

impl Decoder for StompCodec {
    type Item = Frame;
    type Error = ConnError;

    /// Decode bytes from `src` into a `Frame`.
    ///
    /// Unlike a slice parser, the whole of `src` is consumed on every call:
    /// completed frames are queued and handed out one per call, partial ones
    /// stay inside the parser.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.ready.is_empty() && !src.is_empty() {
            let chunk = src.split();
            let frames = self.feed(&chunk)?;
            self.ready.extend(frames);
        }
        Ok(self.ready.pop_front())
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if self.is_mid_frame() => Err(ProtocolError::MalformedFrame(
                "connection closed in the middle of a frame".to_string(),
            )
            .into()),
            None => Ok(None),
        }
    }
}

impl Encoder<Frame> for StompCodec {
    type Error = ConnError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        serialize_into(self.version(), &item, dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v1_1_infers_binary_content_type() {
        let f = Frame::new("SEND").set_body(vec![0xffu8, 0x00, 0x01]);
        let out = serialize(ProtocolVersion::V1_1, &f);
        let text = String::from_utf8_lossy(&out);
        assert!(text.contains("content-type:application/octet-stream\n"));
        assert!(text.contains("content-length:3\n"));
    }

    #[test]
    fn v1_0_leaves_content_type_alone() {
        let f = Frame::new("SEND").set_body("hi");
        let out = serialize(ProtocolVersion::V1_0, &f);
        assert_eq!(&out[..], b"SEND\ncontent-length:2\n\nhi\0");
    }
}
