use std::fmt;
use std::str::FromStr;

use crate::error::ConnError;
use crate::frame::{Command, Frame};
use crate::headers::Headers;
use crate::serial::next_id;

/// STOMP protocol versions spoken by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProtocolVersion {
    V1_0,
    V1_1,
}

impl ProtocolVersion {
    pub const ALL: [ProtocolVersion; 2] = [ProtocolVersion::V1_0, ProtocolVersion::V1_1];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolVersion::V1_0 => "1.0",
            ProtocolVersion::V1_1 => "1.1",
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolVersion {
    type Err = ConnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1.0" => Ok(ProtocolVersion::V1_0),
            "1.1" => Ok(ProtocolVersion::V1_1),
            other => Err(ConnError::UnsupportedProtocolVersion(other.to_string())),
        }
    }
}

/// Parameters of the CONNECT frame.
#[derive(Debug, Clone, Default)]
pub struct ConnectParams<'a> {
    pub versions: &'a [ProtocolVersion],
    pub host: &'a str,
    pub heartbeats: (u64, u64),
    pub login: Option<&'a str>,
    pub passcode: Option<&'a str>,
    pub headers: &'a [(String, String)],
}

/// Version-specific frame builders.
///
/// Selected once when the connection negotiates its version; callers build
/// every client frame through it instead of branching on the version.
pub trait ProtocolOps {
    fn connect_frame(&self, params: &ConnectParams<'_>) -> Frame;

    fn send_frame(&self, destination: &str, body: impl Into<Vec<u8>>, headers: &Headers) -> Frame;

    /// SUBSCRIBE with an `id` (generated when `headers` has none) and `ack`
    /// defaulting to `auto`.
    fn subscribe_frame(&self, destination: &str, headers: &Headers) -> Frame;

    /// UNSUBSCRIBE by subscription id.
    fn unsubscribe_frame(&self, id: &str, headers: &Headers) -> Frame;

    fn ack_frame(
        &self,
        message_id: &str,
        subscription: Option<&str>,
        headers: &Headers,
    ) -> Result<Frame, ConnError>;

    fn nack_frame(
        &self,
        message_id: &str,
        subscription: Option<&str>,
        headers: &Headers,
    ) -> Result<Frame, ConnError>;

    fn begin_frame(&self, transaction: &str, headers: &Headers) -> Frame {
        transaction_frame(Command::Begin, transaction, headers)
    }

    fn commit_frame(&self, transaction: &str, headers: &Headers) -> Frame {
        transaction_frame(Command::Commit, transaction, headers)
    }

    fn abort_frame(&self, transaction: &str, headers: &Headers) -> Frame {
        transaction_frame(Command::Abort, transaction, headers)
    }

    fn disconnect_frame(&self, headers: &Headers) -> Frame {
        let mut frame = Frame::new(Command::Disconnect.as_str());
        frame.headers.merge(headers);
        frame
    }

    fn heartbeat_frame(&self) -> Result<Frame, ConnError>;
}

fn transaction_frame(command: Command, transaction: &str, headers: &Headers) -> Frame {
    let mut frame = Frame::new(command.as_str());
    frame.headers.merge(headers);
    frame.headers.set("transaction", transaction);
    frame
}

impl ProtocolOps for ProtocolVersion {
    fn connect_frame(&self, params: &ConnectParams<'_>) -> Frame {
        let mut frame = Frame::new(Command::Connect.as_str());
        if params.versions.contains(&ProtocolVersion::V1_1) {
            let accept = params
                .versions
                .iter()
                .map(ProtocolVersion::as_str)
                .collect::<Vec<_>>()
                .join(",");
            frame.headers.set("accept-version", accept);
            frame.headers.set(
                "heart-beat",
                format!("{},{}", params.heartbeats.0, params.heartbeats.1),
            );
        }
        frame.headers.set("host", params.host);
        if let Some(login) = params.login {
            frame.headers.set("login", login);
        }
        if let Some(passcode) = params.passcode {
            frame.headers.set("passcode", passcode);
        }
        frame
            .headers
            .merge(params.headers.iter().map(|(k, v)| (k, v)));
        frame
    }

    fn send_frame(&self, destination: &str, body: impl Into<Vec<u8>>, headers: &Headers) -> Frame {
        let mut frame = Frame::new(Command::Send.as_str());
        frame.headers.merge(headers);
        frame.headers.set("destination", destination);
        frame.body = Some(body.into());
        frame
    }

    fn subscribe_frame(&self, destination: &str, headers: &Headers) -> Frame {
        let mut frame = Frame::new(Command::Subscribe.as_str());
        frame.headers.merge(headers);
        frame.headers.set("destination", destination);
        frame.headers.reverse_merge([("id", next_id("sub")), ("ack", "auto".to_string())]);
        frame
    }

    fn unsubscribe_frame(&self, id: &str, headers: &Headers) -> Frame {
        let mut frame = Frame::new(Command::Unsubscribe.as_str());
        frame.headers.merge(headers);
        frame.headers.set("id", id);
        frame
    }

    fn ack_frame(
        &self,
        message_id: &str,
        subscription: Option<&str>,
        headers: &Headers,
    ) -> Result<Frame, ConnError> {
        let mut frame = Frame::new(Command::Ack.as_str());
        frame.headers.merge(headers);
        frame.headers.set("message-id", message_id);
        if let ProtocolVersion::V1_1 = self {
            let sub = subscription.ok_or(ConnError::MissingHeader("subscription"))?;
            frame.headers.set("subscription", sub);
        }
        Ok(frame)
    }

    fn nack_frame(
        &self,
        message_id: &str,
        subscription: Option<&str>,
        headers: &Headers,
    ) -> Result<Frame, ConnError> {
        match self {
            ProtocolVersion::V1_0 => Err(ConnError::UnsupportedCommand {
                command: Command::Nack.as_str(),
                version: self.as_str(),
            }),
            ProtocolVersion::V1_1 => {
                let sub = subscription.ok_or(ConnError::MissingHeader("subscription"))?;
                let mut frame = Frame::new(Command::Nack.as_str());
                frame.headers.merge(headers);
                frame.headers.set("message-id", message_id);
                frame.headers.set("subscription", sub);
                Ok(frame)
            }
        }
    }

    fn heartbeat_frame(&self) -> Result<Frame, ConnError> {
        match self {
            ProtocolVersion::V1_0 => Err(ConnError::UnsupportedCommand {
                command: "heartbeat",
                version: self.as_str(),
            }),
            ProtocolVersion::V1_1 => Ok(Frame::heartbeat()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_keeps_caller_id() {
        let mut h = Headers::new();
        h.set("id", "mine");
        let f = ProtocolVersion::V1_1.subscribe_frame("/queue/a", &h);
        assert_eq!(f.get_header("id"), Some("mine"));
        assert_eq!(f.get_header("ack"), Some("auto"));
    }

    #[test]
    fn connect_frame_for_plain_1_0_omits_negotiation_headers() {
        let params = ConnectParams {
            versions: &[ProtocolVersion::V1_0],
            host: "broker",
            ..ConnectParams::default()
        };
        let f = ProtocolVersion::V1_0.connect_frame(&params);
        assert!(f.get_header("accept-version").is_none());
        assert_eq!(f.get_header("host"), Some("broker"));
    }
}
