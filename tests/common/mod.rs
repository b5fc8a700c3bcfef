//! Mock brokers shared by the integration tests.
#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use osmium_stomp::{Frame, ProtocolVersion, StompCodec};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_util::codec::Framed;

pub type Broker<S> = Framed<S, StompCodec>;

/// Read CONNECT and answer with a STOMP 1.1 CONNECTED frame.
pub async fn accept<S>(stream: S) -> Broker<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut broker = Framed::new(stream, StompCodec::new(ProtocolVersion::V1_0));
    let connect = next_frame(&mut broker).await.expect("CONNECT");
    assert_eq!(connect.command(), Some("CONNECT"));
    broker.codec_mut().set_version(ProtocolVersion::V1_1);
    broker
        .send(Frame::new("CONNECTED").header("version", "1.1"))
        .await
        .expect("send CONNECTED");
    broker
}

/// Next non-heartbeat frame, or `None` once the client hung up.
pub async fn next_frame<S>(broker: &mut Broker<S>) -> Option<Frame>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        match broker.next().await? {
            Ok(f) if f.is_heartbeat() => continue,
            Ok(f) => return Some(f),
            Err(_) => return None,
        }
    }
}

/// Like [`next_frame`] but fails the test after two seconds.
pub async fn expect_frame<S>(broker: &mut Broker<S>) -> Frame
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    timeout(Duration::from_secs(2), next_frame(broker))
        .await
        .expect("timed out waiting for a frame")
        .expect("client hung up")
}

/// Bind a loopback listener and return it with its `stomp://` URI.
pub async fn listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    (listener, format!("stomp://127.0.0.1:{}", port))
}

/// Poll `cond` every 10ms for up to two seconds.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    timeout(Duration::from_secs(2), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time")
}
