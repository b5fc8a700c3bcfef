//! Failover against loopback brokers: retry exhaustion, reconnect with
//! replay and graceful disconnect.

mod common;

use common::{accept, eventually, expect_frame, listener, next_frame};
use futures::{SinkExt, StreamExt};
use osmium_stomp::failover::FailoverClient;
use osmium_stomp::{
    BrokerUri, Command, EventKind, FailoverError, FailoverEvent, FailoverOptions, FailoverState,
    Frame, Headers, ProtocolVersion, StompCodec, SubscriptionOptions,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::codec::Framed;

fn fast_retries() -> FailoverOptions {
    FailoverOptions::default()
        .retry_delay(Duration::from_millis(10))
        .exponential_back_off(true, 2.0, Duration::from_millis(40))
}

fn counter(fc: &FailoverClient, event: FailoverEvent) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    fc.on_failover(event, move |_, _| {
        c.fetch_add(1, Ordering::SeqCst);
    });
    count
}

#[tokio::test]
async fn retries_are_bounded() {
    // Bind then release a port so connecting to it is refused.
    let (l, uri) = listener().await;
    drop(l);

    let fc = FailoverClient::from_uris(vec![uri.parse().unwrap()], fast_retries().retry_attempts(3))
        .unwrap();
    let failures = counter(&fc, FailoverEvent::ConnectFailure);
    let exceeded = counter(&fc, FailoverEvent::RetriesExceeded);

    let err = timeout(Duration::from_secs(5), fc.connect())
        .await
        .expect("connect loop should give up")
        .unwrap_err();
    assert!(matches!(err, FailoverError::MaximumRetriesExceeded { attempts: 3 }));
    assert_eq!(failures.load(Ordering::SeqCst), 3);
    assert_eq!(exceeded.load(Ordering::SeqCst), 1);
    assert_eq!(fc.state(), FailoverState::Disconnected);
    assert!(!fc.connected());
}

#[tokio::test]
async fn failed_broker_is_skipped() {
    let (dead, dead_uri) = listener().await;
    drop(dead);
    let (live, live_uri) = listener().await;

    let brokers: Vec<BrokerUri> = vec![dead_uri.parse().unwrap(), live_uri.parse().unwrap()];
    let fc = FailoverClient::from_uris(brokers, fast_retries()).unwrap();
    let failures = counter(&fc, FailoverEvent::ConnectFailure);

    let (connected, _broker) = tokio::join!(fc.connect(), async {
        let (sock, _) = live.accept().await.unwrap();
        accept(sock).await
    });
    connected.unwrap();
    assert_eq!(failures.load(Ordering::SeqCst), 1);
    assert_eq!(fc.state(), FailoverState::Connected);
    assert_eq!(fc.active_client().unwrap().uri().to_string(), live_uri);
}

#[tokio::test]
async fn reconnect_replays_subscriptions_and_open_transactions() {
    let (la, uri_a) = listener().await;
    let (lb, uri_b) = listener().await;
    let fc = FailoverClient::new(&format!("failover:({},{})?retryDelay=10", uri_a, uri_b)).unwrap();
    let lost = counter(&fc, FailoverEvent::Lost);
    let connected = counter(&fc, FailoverEvent::Connected);

    let (result, mut broker_a) = tokio::join!(fc.connect(), async {
        let (sock, _) = la.accept().await.unwrap();
        accept(sock).await
    });
    result.unwrap();

    let received = Arc::new(Mutex::new(Vec::new()));
    let r = received.clone();
    let sub = fc
        .subscribe("/queue/x", SubscriptionOptions::default(), move |msg| {
            r.lock().push(msg.body_str().unwrap_or_default().to_string());
        })
        .unwrap();
    let tx = fc.begin(Some("tx1")).unwrap();
    let mut headers = Headers::new();
    headers.set("transaction", &tx);
    fc.send("/queue/out", "pending", &headers).unwrap();
    fc.send("/queue/out", "done", &Headers::new()).unwrap();

    for expected in [Command::Subscribe, Command::Begin, Command::Send, Command::Send] {
        assert!(expect_frame(&mut broker_a).await.is(expected));
    }
    eventually(|| fc.buffer().len() == 3).await;

    // Broker A goes away; the client moves to B and replays.
    drop(broker_a);
    let (sock, _) = timeout(Duration::from_secs(5), lb.accept())
        .await
        .expect("reconnect to B")
        .unwrap();
    let mut broker_b = accept(sock).await;

    let replayed: Vec<Frame> = vec![
        expect_frame(&mut broker_b).await,
        expect_frame(&mut broker_b).await,
        expect_frame(&mut broker_b).await,
    ];
    assert!(replayed[0].is(Command::Subscribe));
    assert_eq!(replayed[0].get_header("id"), Some(sub.id()));
    assert!(replayed[1].is(Command::Begin));
    assert!(replayed[2].is(Command::Send));
    assert_eq!(replayed[2].get_header("transaction"), Some("tx1"));
    assert_eq!(replayed[2].body_str(), Some("pending"));

    eventually(|| fc.state() == FailoverState::Connected).await;
    assert_eq!(lost.load(Ordering::SeqCst), 1);
    assert_eq!(connected.load(Ordering::SeqCst), 2);
    assert_eq!(fc.active_client().unwrap().uri().to_string(), uri_b);

    // The subscription handler survives the move.
    broker_b
        .send(
            Frame::new("MESSAGE")
                .header("subscription", sub.id())
                .header("destination", "/queue/x")
                .header("message-id", "m-1")
                .set_body("after failover"),
        )
        .await
        .unwrap();
    eventually(|| received.lock().len() == 1).await;
    assert_eq!(received.lock()[0], "after failover");

    // Committing on B releases the transaction from the buffer.
    fc.commit(&tx).unwrap();
    assert!(expect_frame(&mut broker_b).await.is(Command::Commit));
    eventually(|| fc.buffer().len() == 1).await;
    assert!(fc.buffer().snapshot()[0].is(Command::Subscribe));
}

#[tokio::test]
async fn handlers_registered_on_the_failover_client_follow_it() {
    let (la, uri_a) = listener().await;
    let (lb, uri_b) = listener().await;
    let fc = FailoverClient::from_uris(
        vec![uri_a.parse().unwrap(), uri_b.parse().unwrap()],
        fast_retries(),
    )
    .unwrap();
    let messages = Arc::new(AtomicUsize::new(0));
    let m = messages.clone();
    fc.on(EventKind::On(Command::Message), move |_| {
        m.fetch_add(1, Ordering::SeqCst);
    });

    let (result, mut broker_a) = tokio::join!(fc.connect(), async {
        let (sock, _) = la.accept().await.unwrap();
        accept(sock).await
    });
    result.unwrap();
    broker_a.send(Frame::new("MESSAGE").header("destination", "/q")).await.unwrap();
    eventually(|| messages.load(Ordering::SeqCst) == 1).await;

    drop(broker_a);
    let (sock, _) = timeout(Duration::from_secs(5), lb.accept()).await.unwrap().unwrap();
    let mut broker_b = accept(sock).await;
    broker_b.send(Frame::new("MESSAGE").header("destination", "/q")).await.unwrap();
    eventually(|| messages.load(Ordering::SeqCst) == 2).await;
}

#[tokio::test]
async fn graceful_disconnect_does_not_reconnect() {
    let (la, uri_a) = listener().await;
    let (lb, uri_b) = listener().await;
    let fc = FailoverClient::from_uris(
        vec![uri_a.parse().unwrap(), uri_b.parse().unwrap()],
        fast_retries(),
    )
    .unwrap();
    let lost = counter(&fc, FailoverEvent::Lost);

    let (result, mut broker_a) = tokio::join!(fc.connect(), async {
        let (sock, _) = la.accept().await.unwrap();
        accept(sock).await
    });
    result.unwrap();

    fc.disconnect().await.unwrap();
    assert!(expect_frame(&mut broker_a).await.is(Command::Disconnect));
    assert_eq!(fc.state(), FailoverState::Disconnected);
    assert!(timeout(Duration::from_millis(300), lb.accept()).await.is_err());
    assert_eq!(lost.load(Ordering::SeqCst), 0);
    assert!(matches!(
        fc.send("/q", "x", &Headers::new()),
        Err(FailoverError::NotConnected)
    ));
}

#[tokio::test]
async fn disconnect_during_reconnect_wins() {
    let (la, uri_a) = listener().await;
    let fc = FailoverClient::from_uris(vec![uri_a.parse().unwrap()], fast_retries()).unwrap();
    let connected = counter(&fc, FailoverEvent::Connected);

    let (result, broker) = tokio::join!(fc.connect(), async {
        let (sock, _) = la.accept().await.unwrap();
        accept(sock).await
    });
    result.unwrap();

    drop(broker);
    eventually(|| fc.state() == FailoverState::Reconnecting).await;

    // Hold the CONNECTED reply until the caller has asked to disconnect.
    let (sock, _) = timeout(Duration::from_secs(5), la.accept())
        .await
        .expect("reconnect attempt")
        .unwrap();
    let mut broker = Framed::new(sock, StompCodec::new(ProtocolVersion::V1_0));
    let connect = broker.next().await.expect("CONNECT").expect("decode");
    assert!(connect.is(Command::Connect));

    fc.disconnect().await.unwrap();
    broker
        .send(Frame::new("CONNECTED").header("version", "1.0"))
        .await
        .unwrap();

    let closed = timeout(Duration::from_secs(2), next_frame(&mut broker))
        .await
        .expect("client should drop the late connection");
    assert!(closed.is_none());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(fc.state(), FailoverState::Disconnected);
    assert!(!fc.connected());
    assert!(fc.active_client().is_none());
    assert_eq!(connected.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_send_on_a_dead_client_is_not_buffered() {
    let (la, uri_a) = listener().await;
    let fc = FailoverClient::from_uris(
        vec![uri_a.parse().unwrap()],
        fast_retries().retry_attempts(1),
    )
    .unwrap();

    let (result, broker) = tokio::join!(fc.connect(), async {
        let (sock, _) = la.accept().await.unwrap();
        accept(sock).await
    });
    result.unwrap();
    let pooled = fc.active_client().unwrap();

    drop(la);
    drop(broker);
    eventually(|| !pooled.connected()).await;

    let err = pooled.send("/queue/out", "lost?", &Headers::new()).unwrap_err();
    assert!(matches!(err, osmium_stomp::ConnError::NotConnected));
    assert!(fc.buffer().is_empty());
}
