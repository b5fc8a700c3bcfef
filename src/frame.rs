use std::fmt;

use crate::headers::Headers;

/// STOMP commands understood by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Stomp => "STOMP",
            Command::Connected => "CONNECTED",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Ack => "ACK",
            Command::Nack => "NACK",
            Command::Begin => "BEGIN",
            Command::Commit => "COMMIT",
            Command::Abort => "ABORT",
            Command::Disconnect => "DISCONNECT",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    /// Look up a command by its wire name. Unknown names return `None`.
    pub fn parse(name: &str) -> Option<Self> {
        let cmd = match name {
            "CONNECT" => Command::Connect,
            "STOMP" => Command::Stomp,
            "CONNECTED" => Command::Connected,
            "SEND" => Command::Send,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "ACK" => Command::Ack,
            "NACK" => Command::Nack,
            "BEGIN" => Command::Begin,
            "COMMIT" => Command::Commit,
            "ABORT" => Command::Abort,
            "DISCONNECT" => Command::Disconnect,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            _ => return None,
        };
        Some(cmd)
    }

    /// True for frames a broker sends to a client.
    pub fn is_server_command(&self) -> bool {
        matches!(
            self,
            Command::Connected | Command::Message | Command::Receipt | Command::Error
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bookkeeping carried alongside a frame that never reaches the wire.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct FrameTag {
    /// Identity of the replay-buffer entry this frame belongs to.
    pub(crate) buffer_id: Option<u64>,
    /// Set on frames re-sent by a failover replay.
    pub(crate) replayed: bool,
}

/// A STOMP frame.
///
/// `Frame` contains the command (e.g. "SEND", "MESSAGE"), an ordered header
/// collection and the optional body bytes. A frame without a command is a
/// heartbeat and is written as a single LF.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    /// STOMP command; `None` for a heartbeat
    pub command: Option<String>,
    /// Ordered headers
    pub headers: Headers,
    /// Raw body bytes
    pub body: Option<Vec<u8>>,
    /// Character set of the body as declared by `content-type`. Only the
    /// STOMP 1.1 parser fills this in.
    pub charset: Option<String>,
    pub(crate) tag: FrameTag,
}

impl Frame {
    /// Create a new frame with the given command and empty headers/body.
    ///
    /// Parameters
    /// - `command`: the STOMP command name (for example, `"SEND"` or
    ///   `"SUBSCRIBE"`). Accepts any type convertible into `String`.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: Some(command.into()),
            ..Self::default()
        }
    }

    /// A heartbeat frame: no command, no headers, no body.
    pub fn heartbeat() -> Self {
        Self::default()
    }

    pub fn is_heartbeat(&self) -> bool {
        self.command.is_none()
    }

    /// The command name, or `None` for a heartbeat.
    pub fn command(&self) -> Option<&str> {
        self.command.as_deref()
    }

    /// The typed command, if the name is a known STOMP command.
    pub fn kind(&self) -> Option<Command> {
        self.command.as_deref().and_then(Command::parse)
    }

    /// True when the frame carries the given command.
    pub fn is(&self, command: Command) -> bool {
        self.command.as_deref() == Some(command.as_str())
    }

    /// Add a header (builder style).
    ///
    /// Repeated names are appended, so the first value given for a name
    /// stays principal.
    pub fn header(mut self, key: impl ToString, value: impl ToString) -> Self {
        self.headers.append(key, value);
        self
    }

    /// Merge a set of headers into the frame (builder style). Names already
    /// present are overwritten.
    pub fn with_headers<K, V, I>(mut self, headers: I) -> Self
    where
        K: ToString,
        V: ToString,
        I: IntoIterator<Item = (K, V)>,
    {
        self.headers.merge(headers);
        self
    }

    /// Set the frame body (builder style).
    pub fn set_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Request a RECEIPT for this frame (builder style).
    pub fn receipt(mut self, receipt_id: impl ToString) -> Self {
        self.headers.set("receipt", receipt_id);
        self
    }

    /// Get the principal value of a header by name.
    pub fn get_header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    /// The declared `content-length`, if present and numeric.
    pub fn content_length(&self) -> Option<usize> {
        self.headers
            .get("content-length")
            .and_then(|v| v.trim().parse().ok())
    }

    /// Make `content-length` match the body exactly. Frames without a body
    /// are left untouched.
    pub fn force_content_length(&mut self) {
        if let Some(body) = &self.body {
            self.headers.set("content-length", body.len());
        }
    }

    /// Split `content-type` into `(type, subtype, charset)`.
    ///
    /// `text/plain;charset=UTF-8` becomes `("text", "plain", Some("UTF-8"))`.
    pub fn content_type(&self) -> Option<(String, String, Option<String>)> {
        self.headers.get("content-type").and_then(parse_content_type)
    }

    /// The body as text, when it is valid UTF-8 and the frame does not declare
    /// a different character set.
    pub fn body_str(&self) -> Option<&str> {
        let body = self.body.as_deref()?;
        match self.charset.as_deref() {
            None => std::str::from_utf8(body).ok(),
            Some(cs) if is_utf8_compatible(cs) => std::str::from_utf8(body).ok(),
            Some(_) => None,
        }
    }

    pub(crate) fn buffer_id(&self) -> Option<u64> {
        self.tag.buffer_id
    }

    pub(crate) fn is_replayed(&self) -> bool {
        self.tag.replayed
    }
}

impl PartialEq for Frame {
    fn eq(&self, other: &Self) -> bool {
        self.command == other.command && self.headers == other.headers && self.body == other.body
    }
}

impl Eq for Frame {}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.command {
            Some(cmd) => writeln!(f, "Command: {}", cmd)?,
            None => return writeln!(f, "Heartbeat"),
        }
        for (k, v) in self.headers.iter() {
            writeln!(f, "{}: {}", k, v)?;
        }
        writeln!(
            f,
            "Body ({} bytes)",
            self.body.as_ref().map(Vec::len).unwrap_or(0)
        )
    }
}

pub(crate) fn parse_content_type(value: &str) -> Option<(String, String, Option<String>)> {
    let mut parts = value.split(';');
    let mime = parts.next()?.trim();
    let (ty, sub) = mime.split_once('/')?;
    let charset = parts.find_map(|p| {
        let (k, v) = p.trim().split_once('=')?;
        k.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| v.trim().trim_matches('"').to_string())
    });
    Some((ty.trim().to_string(), sub.trim().to_string(), charset))
}

pub(crate) fn is_utf8_compatible(charset: &str) -> bool {
    ["utf-8", "utf8", "us-ascii", "ascii"]
        .iter()
        .any(|c| charset.eq_ignore_ascii_case(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_with_charset() {
        let f = Frame::new("SEND").header("content-type", "text/plain; charset=\"ISO-8859-1\"");
        assert_eq!(
            f.content_type(),
            Some((
                "text".to_string(),
                "plain".to_string(),
                Some("ISO-8859-1".to_string())
            ))
        );
    }

    #[test]
    fn equality_ignores_tag() {
        let a = Frame::new("SEND").set_body("x");
        let mut b = a.clone();
        b.tag.replayed = true;
        b.tag.buffer_id = Some(9);
        assert_eq!(a, b);
    }
}
