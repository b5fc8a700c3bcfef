// Streaming STOMP frame parser (keeps its state across arbitrary chunk boundaries)
use std::mem;

use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::protocol::ProtocolVersion;

/// Where the parser currently is inside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    /// Accumulating the command line
    Command,
    /// Accumulating a header line (or the blank line ending the headers)
    HeaderLine,
    /// Accumulating body bytes
    Body,
    /// A frame has just been emitted
    Completed,
}

/// Stateful parser fed with raw socket chunks.
///
/// Every call to [`FrameParser::feed`] consumes the whole chunk; bytes that
/// do not yet complete a frame are kept in the parser, so a command line,
/// header line, escape sequence or body may be split anywhere.
#[derive(Debug)]
pub struct FrameParser {
    version: ProtocolVersion,
    state: ParseState,
    line: Vec<u8>,
    frame: Frame,
    content_length: Option<usize>,
    body: Vec<u8>,
}

impl FrameParser {
    pub fn new(version: ProtocolVersion) -> Self {
        Self {
            version,
            state: ParseState::Command,
            line: Vec::new(),
            frame: Frame::default(),
            content_length: None,
            body: Vec::new(),
        }
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Switch header unescaping rules. Takes effect from the next header line.
    pub fn set_version(&mut self, version: ProtocolVersion) {
        self.version = version;
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    /// True while a frame has been started but not finished.
    pub fn is_mid_frame(&self) -> bool {
        match self.state {
            ParseState::Command => !self.line.is_empty(),
            ParseState::HeaderLine | ParseState::Body => true,
            ParseState::Completed => false,
        }
    }

    /// Feed a chunk and return every frame it completes.
    ///
    /// A bare LF where a command is expected yields a heartbeat frame
    /// (`command == None`).
    pub fn feed(&mut self, input: &[u8]) -> Result<Vec<Frame>, ProtocolError> {
        let mut frames = Vec::new();
        let mut pos = 0usize;
        while pos < input.len() {
            if self.state == ParseState::Completed {
                self.state = ParseState::Command;
            }
            pos += match self.state {
                ParseState::Command => self.read_command(&input[pos..], &mut frames)?,
                ParseState::HeaderLine => self.read_header_line(&input[pos..])?,
                ParseState::Body => self.read_body(&input[pos..], &mut frames)?,
                ParseState::Completed => 0,
            };
        }
        Ok(frames)
    }

    fn read_command(&mut self, input: &[u8], frames: &mut Vec<Frame>) -> Result<usize, ProtocolError> {
        let Some(nl) = input.iter().position(|&b| b == b'\n') else {
            self.line.extend_from_slice(input);
            return Ok(input.len());
        };
        self.line.extend_from_slice(&input[..nl]);
        let line = mem::take(&mut self.line);
        if line.is_empty() {
            frames.push(Frame::heartbeat());
            self.state = ParseState::Completed;
        } else {
            let command = String::from_utf8(line)
                .map_err(|_| ProtocolError::InvalidUtf8("command".to_string()))?;
            self.frame = Frame::new(command);
            self.state = ParseState::HeaderLine;
        }
        Ok(nl + 1)
    }

    fn read_header_line(&mut self, input: &[u8]) -> Result<usize, ProtocolError> {
        let Some(nl) = input.iter().position(|&b| b == b'\n') else {
            self.line.extend_from_slice(input);
            return Ok(input.len());
        };
        self.line.extend_from_slice(&input[..nl]);
        let line = mem::take(&mut self.line);
        if line.is_empty() {
            self.content_length = match self.frame.headers.get("content-length") {
                Some(v) => Some(v.trim().parse::<usize>().map_err(|_| {
                    ProtocolError::MalformedFrame(format!("invalid content-length {:?}", v))
                })?),
                None => None,
            };
            self.state = ParseState::Body;
        } else {
            let colon = line
                .iter()
                .position(|&b| b == b':')
                .ok_or_else(|| ProtocolError::MalformedHeader(String::from_utf8_lossy(&line).into_owned()))?;
            let name = self.decode_header_part(&line[..colon], "header name")?;
            let value = self.decode_header_part(&line[colon + 1..], "header value")?;
            self.frame.headers.append(name, value);
        }
        Ok(nl + 1)
    }

    fn read_body(&mut self, input: &[u8], frames: &mut Vec<Frame>) -> Result<usize, ProtocolError> {
        match self.content_length {
            Some(len) => {
                let wanted = len - self.body.len();
                if input.len() <= wanted {
                    self.body.extend_from_slice(input);
                    return Ok(input.len());
                }
                self.body.extend_from_slice(&input[..wanted]);
                if input[wanted] != 0 {
                    return Err(ProtocolError::MalformedFrame(format!(
                        "expected NUL after {} body bytes, found 0x{:02x}",
                        len, input[wanted]
                    )));
                }
                frames.push(self.finish_frame());
                Ok(wanted + 1)
            }
            None => match input.iter().position(|&b| b == 0) {
                Some(nul) => {
                    self.body.extend_from_slice(&input[..nul]);
                    frames.push(self.finish_frame());
                    Ok(nul + 1)
                }
                None => {
                    self.body.extend_from_slice(input);
                    Ok(input.len())
                }
            },
        }
    }

    fn finish_frame(&mut self) -> Frame {
        let mut frame = mem::take(&mut self.frame);
        let body = mem::take(&mut self.body);
        if !body.is_empty() || self.content_length.is_some() {
            frame.body = Some(body);
        }
        self.content_length = None;
        self.state = ParseState::Completed;
        frame
    }

    fn decode_header_part(&self, raw: &[u8], what: &str) -> Result<String, ProtocolError> {
        let bytes = match self.version {
            ProtocolVersion::V1_0 => raw.to_vec(),
            ProtocolVersion::V1_1 => unescape_header_value(raw)?,
        };
        String::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8(what.to_string()))
    }
}

/// Unescape a STOMP 1.1 header name or value.
///
/// Recognised sequences are `\\`, `\c` and `\n`. Anything else after a
/// backslash, including end of input, is an error.
pub fn unescape_header_value(input: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut out = Vec::with_capacity(input.len());
    let mut iter = input.iter();
    while let Some(&b) = iter.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        match iter.next() {
            Some(b'\\') => out.push(b'\\'),
            Some(b'c') => out.push(b':'),
            Some(b'n') => out.push(b'\n'),
            Some(&other) => {
                return Err(ProtocolError::InvalidHeaderEscapeSequence(format!(
                    "\\{}",
                    other as char
                )));
            }
            None => {
                return Err(ProtocolError::InvalidHeaderEscapeSequence(
                    "\\ at end of header".to_string(),
                ));
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_split_across_chunks() {
        let mut p = FrameParser::new(ProtocolVersion::V1_1);
        assert!(p.feed(b"MESSAGE\nkey:a\\").unwrap().is_empty());
        assert!(p.is_mid_frame());
        let frames = p.feed(b"cb\n\n\0").unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].get_header("key"), Some("a:b"));
        assert!(!p.is_mid_frame());
    }

    #[test]
    fn empty_body_with_content_length_zero() {
        let mut p = FrameParser::new(ProtocolVersion::V1_0);
        let frames = p.feed(b"SEND\ncontent-length:0\n\n\0").unwrap();
        assert_eq!(frames[0].body, Some(Vec::new()));
    }
}
