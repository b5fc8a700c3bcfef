pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod failover;
pub mod frame;
pub mod headers;
pub mod heartbeat;
pub mod parser;
pub mod protocol;
pub mod serial;
pub mod subscription;
pub mod tls;
pub mod transport;

pub use client::Client;
pub use codec::StompCodec;
pub use config::{BufferStrategy, ConnectOptions, FailoverOptions, TlsOptions};
pub use connection::{Connection, ConnectionState, Dispatcher};
pub use error::{ConnError, ProtocolError};
pub use events::{ConnectionEvent, Event, EventKind, Events};
pub use failover::{FailoverClient, FailoverError, FailoverEvent, FailoverState, parse_failover_uri};
pub use frame::{Command, Frame};
pub use headers::Headers;
pub use heartbeat::{HeartbeatPolicy, negotiate_heartbeats, parse_heartbeat_header};
pub use protocol::{ProtocolOps, ProtocolVersion};
pub use subscription::{AckMode, Subscription, SubscriptionOptions};
pub use transport::BrokerUri;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smoke_frame_display() {
        let f = Frame::new("CONNECT")
            .header("accept-version", "1.0,1.1")
            .set_body(b"hello".to_vec());
        let s = format!("{}", f);
        assert!(s.contains("CONNECT"));
        assert!(s.contains("Body (5 bytes)"));
    }
}
