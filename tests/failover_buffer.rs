//! Replay buffer strategies.

use osmium_stomp::failover::{ReceiptsBuffer, ReplayBuffer, WrittenBuffer};
use osmium_stomp::{Command, Frame};

fn queue(buffer: &dyn ReplayBuffer, frame: Frame) -> Frame {
    let mut frame = frame;
    buffer.before_transmitting(&mut frame);
    frame
}

fn commands(buffer: &dyn ReplayBuffer) -> Vec<String> {
    buffer
        .snapshot()
        .iter()
        .map(|f| f.command().unwrap_or_default().to_string())
        .collect()
}

fn receipt_for(frame: &Frame) -> Frame {
    Frame::new("RECEIPT").header("receipt-id", frame.get_header("receipt").expect("receipt header"))
}

// =============================================================================
// Written
// =============================================================================

#[test]
fn written_buffers_everything_but_ack_at_queue_time() {
    let buf = WrittenBuffer::new();
    queue(&buf, Frame::new("BEGIN").header("transaction", "tx1"));
    queue(&buf, Frame::new("SEND").header("destination", "/q").header("transaction", "tx1"));
    queue(&buf, Frame::new("ACK").header("message-id", "m1"));
    queue(&buf, Frame::new("SEND").header("destination", "/q"));
    queue(&buf, Frame::new("COMMIT").header("transaction", "tx1"));

    assert_eq!(commands(&buf), vec!["BEGIN", "SEND", "SEND", "COMMIT"]);
    assert_eq!(buf.transactions(), vec!["tx1".to_string()]);
}

#[test]
fn written_keeps_the_open_transaction_after_everything_is_written() {
    let buf = WrittenBuffer::new();
    let sent = [
        queue(&buf, Frame::new("SEND").header("destination", "/q").set_body("plain")),
        queue(&buf, Frame::new("BEGIN").header("transaction", "tx")),
        queue(&buf, Frame::new("SEND").header("destination", "/q").header("transaction", "tx").set_body("one")),
        queue(&buf, Frame::new("ACK").header("message-id", "m1")),
        queue(&buf, Frame::new("SEND").header("destination", "/q").header("transaction", "tx").set_body("two")),
    ];
    for frame in &sent {
        buf.after_transmitting(frame);
    }

    // The connection drops here, before COMMIT.
    let replay = buf.snapshot();
    assert_eq!(commands(&buf), vec!["BEGIN", "SEND", "SEND"]);
    assert!(replay.iter().all(|f| f.get_header("transaction") == Some("tx")));
    assert_eq!(replay[1].body_str(), Some("one"));
    assert_eq!(replay[2].body_str(), Some("two"));

    let commit = queue(&buf, Frame::new("COMMIT").header("transaction", "tx"));
    buf.after_transmitting(&commit);
    assert!(buf.is_empty());
    assert!(buf.transactions().is_empty());
}

#[test]
fn discarded_frames_leave_the_buffer() {
    let buf = WrittenBuffer::new();
    let sub = queue(&buf, Frame::new("SUBSCRIBE").header("id", "s1").header("destination", "/q"));
    let begin = queue(&buf, Frame::new("BEGIN").header("transaction", "tx"));
    let send = queue(&buf, Frame::new("SEND").header("destination", "/q"));

    buf.discard(&send);
    buf.discard(&begin);
    assert_eq!(commands(&buf), vec!["SUBSCRIBE"]);
    assert!(buf.transactions().is_empty());

    buf.discard(&sub);
    assert!(buf.is_empty());
}

#[test]
fn written_releases_plain_sends_and_whole_transactions() {
    let buf = WrittenBuffer::new();
    let begin = queue(&buf, Frame::new("BEGIN").header("transaction", "tx1"));
    let tx_send = queue(&buf, Frame::new("SEND").header("transaction", "tx1"));
    let plain = queue(&buf, Frame::new("SEND").header("destination", "/q"));
    let commit = queue(&buf, Frame::new("COMMIT").header("transaction", "tx1"));

    buf.after_transmitting(&begin);
    buf.after_transmitting(&tx_send);
    assert_eq!(buf.len(), 4, "BEGIN and transactional SEND stay until the transaction ends");

    buf.after_transmitting(&plain);
    assert_eq!(commands(&buf), vec!["BEGIN", "SEND", "COMMIT"]);

    buf.after_transmitting(&commit);
    assert!(buf.is_empty());
    assert!(buf.transactions().is_empty());
}

#[test]
fn written_abort_releases_its_transaction_only() {
    let buf = WrittenBuffer::new();
    queue(&buf, Frame::new("BEGIN").header("transaction", "a"));
    queue(&buf, Frame::new("BEGIN").header("transaction", "b"));
    queue(&buf, Frame::new("SEND").header("transaction", "b"));
    let abort = queue(&buf, Frame::new("ABORT").header("transaction", "a"));
    buf.after_transmitting(&abort);

    let left = buf.snapshot();
    assert_eq!(left.len(), 2);
    assert!(left.iter().all(|f| f.get_header("transaction") == Some("b")));
}

#[test]
fn subscribe_stays_until_unsubscribe() {
    let buf = WrittenBuffer::new();
    let sub = queue(&buf, Frame::new("SUBSCRIBE").header("id", "s1").header("destination", "/q"));
    queue(&buf, Frame::new("SUBSCRIBE").header("id", "s2").header("destination", "/r"));
    buf.after_transmitting(&sub);
    assert_eq!(buf.len(), 2);

    let unsub = queue(&buf, Frame::new("UNSUBSCRIBE").header("id", "s1"));
    let left = buf.snapshot();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].get_header("id"), Some("s2"));
    buf.after_transmitting(&unsub);
    assert_eq!(buf.len(), 1);
}

#[test]
fn nack_and_disconnect_are_not_buffered() {
    let buf = WrittenBuffer::new();
    queue(&buf, Frame::new("NACK").header("message-id", "m"));
    queue(&buf, Frame::new("DISCONNECT"));
    queue(&buf, Frame::heartbeat());
    assert!(buf.is_empty());
}

// =============================================================================
// Receipts
// =============================================================================

#[test]
fn receipts_tags_buffered_frames() {
    let buf = ReceiptsBuffer::new();
    let send = queue(&buf, Frame::new("SEND").header("destination", "/q"));
    let own = queue(&buf, Frame::new("SEND").receipt("mine"));
    let ack = queue(&buf, Frame::new("ACK").header("message-id", "m"));

    assert!(send.get_header("receipt").is_some());
    assert_eq!(own.get_header("receipt"), Some("mine"));
    assert!(ack.get_header("receipt").is_none());
    assert_eq!(buf.len(), 2);
}

#[test]
fn receipts_release_on_receipt_not_on_write() {
    let buf = ReceiptsBuffer::new();
    let send = queue(&buf, Frame::new("SEND").header("destination", "/q"));
    buf.after_transmitting(&send);
    assert_eq!(buf.len(), 1);

    buf.after_receiving(&Frame::new("RECEIPT").header("receipt-id", "unknown"));
    buf.after_receiving(&Frame::new("MESSAGE").header("receipt-id", send.get_header("receipt").unwrap()));
    assert_eq!(buf.len(), 1);

    buf.after_receiving(&receipt_for(&send));
    assert!(buf.is_empty());
}

#[test]
fn receipts_transaction_ends_with_commit_receipt() {
    let buf = ReceiptsBuffer::new();
    let begin = queue(&buf, Frame::new("BEGIN").header("transaction", "tx"));
    let send = queue(&buf, Frame::new("SEND").header("transaction", "tx"));
    let commit = queue(&buf, Frame::new("COMMIT").header("transaction", "tx"));

    buf.after_receiving(&receipt_for(&begin));
    buf.after_receiving(&receipt_for(&send));
    assert_eq!(buf.len(), 3);

    buf.after_receiving(&receipt_for(&commit));
    assert!(buf.is_empty());
}

#[test]
fn receipts_discard_forgets_the_pending_receipt() {
    let buf = ReceiptsBuffer::new();
    let send = queue(&buf, Frame::new("SEND").header("destination", "/q"));
    buf.discard(&send);
    assert!(buf.is_empty());
    buf.after_receiving(&receipt_for(&send));
    assert!(buf.is_empty());
}

#[test]
fn receipts_subscribe_survives_its_receipt() {
    let buf = ReceiptsBuffer::new();
    let sub = queue(&buf, Frame::new("SUBSCRIBE").header("id", "s1"));
    buf.after_receiving(&receipt_for(&sub));
    assert!(buf.snapshot()[0].is(Command::Subscribe));

    queue(&buf, Frame::new("UNSUBSCRIBE").header("id", "s1"));
    assert!(buf.is_empty());
}
