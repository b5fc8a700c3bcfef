//! Replay buffers: which outbound frames the failover client keeps so they
//! can be re-sent after a reconnect.
//!
//! Both strategies buffer SEND, BEGIN, COMMIT, ABORT and SUBSCRIBE when the
//! frame is queued, never ACK or NACK, and drop a SUBSCRIBE as soon as the
//! matching UNSUBSCRIBE is queued. They differ in what releases a frame:
//! [`WrittenBuffer`] releases it once it has been written to the socket,
//! [`ReceiptsBuffer`] once the broker has confirmed it with a RECEIPT.
//! Frames inside a transaction stay until the COMMIT or ABORT ending the
//! transaction is released, and then leave together with it.

use parking_lot::Mutex;
use std::collections::HashSet;

use crate::frame::{Command, Frame};
use crate::serial::{next_id, next_serial};

/// Common contract of the buffering strategies.
pub trait ReplayBuffer: Send + Sync {
    /// Inspect (and possibly tag) a frame about to be queued.
    fn before_transmitting(&self, frame: &mut Frame);

    /// A frame has been fully written.
    fn after_transmitting(&self, frame: &Frame);

    /// A frame has been received from the broker.
    fn after_receiving(&self, frame: &Frame);

    /// A frame taken by [`ReplayBuffer::before_transmitting`] could not be
    /// queued after all. Forget it, and its transaction if it was a BEGIN.
    fn discard(&self, frame: &Frame);

    /// Buffered frames in their original order.
    fn snapshot(&self) -> Vec<Frame>;

    /// Whether the entry with this id is still buffered.
    fn contains(&self, buffer_id: u64) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
struct FrameBuffer {
    frames: Vec<Frame>,
    transactions: HashSet<String>,
}

impl FrameBuffer {
    /// Tag `frame` with a fresh entry id and keep a copy.
    fn add(&mut self, frame: &mut Frame) {
        frame.tag.buffer_id = Some(next_serial());
        self.frames.push(frame.clone());
        tracing::trace!(command = ?frame.command(), "frame buffered");
    }

    fn remove_entry(&mut self, buffer_id: Option<u64>) {
        if let Some(id) = buffer_id {
            self.frames.retain(|f| f.buffer_id() != Some(id));
        }
    }

    fn remove_transaction(&mut self, tx: &str) {
        self.frames
            .retain(|f| f.get_header("transaction") != Some(tx));
        self.transactions.remove(tx);
    }

    fn remove_subscribe(&mut self, id: &str) {
        self.frames
            .retain(|f| !(f.is(Command::Subscribe) && f.get_header("id") == Some(id)));
    }

    fn discard(&mut self, frame: &Frame) {
        if frame.is_replayed() {
            return;
        }
        if frame.is(Command::Begin) {
            if let Some(tx) = frame.get_header("transaction") {
                self.transactions.remove(tx);
            }
        }
        self.remove_entry(frame.buffer_id());
    }

    /// Release a COMMIT or ABORT: the whole transaction when it is tracked,
    /// only the frame itself otherwise.
    fn end_transaction(&mut self, frame: &Frame) {
        match frame.get_header("transaction") {
            Some(tx) if self.transactions.contains(tx) => self.remove_transaction(tx),
            _ => self.remove_entry(frame.buffer_id()),
        }
    }

    /// Shared queue-time rules.
    fn on_queue(&mut self, frame: &mut Frame) {
        if frame.is_replayed() {
            return;
        }
        match frame.kind() {
            Some(Command::Send | Command::Commit | Command::Abort | Command::Subscribe) => {
                self.add(frame);
            }
            Some(Command::Begin) => {
                if let Some(tx) = frame.get_header("transaction") {
                    self.transactions.insert(tx.to_string());
                }
                self.add(frame);
            }
            Some(Command::Unsubscribe) => {
                if let Some(id) = frame.get_header("id") {
                    self.remove_subscribe(id);
                }
            }
            _ => {}
        }
    }
}

/// Releases frames once they have been written to the socket.
#[derive(Debug, Default)]
pub struct WrittenBuffer {
    inner: Mutex<FrameBuffer>,
}

impl WrittenBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open transactions currently tracked.
    pub fn transactions(&self) -> Vec<String> {
        self.inner.lock().transactions.iter().cloned().collect()
    }
}

impl ReplayBuffer for WrittenBuffer {
    fn before_transmitting(&self, frame: &mut Frame) {
        self.inner.lock().on_queue(frame);
    }

    fn after_transmitting(&self, frame: &Frame) {
        let mut buf = self.inner.lock();
        match frame.kind() {
            Some(Command::Send) if !frame.headers.contains("transaction") => {
                buf.remove_entry(frame.buffer_id());
            }
            Some(Command::Commit | Command::Abort) => buf.end_transaction(frame),
            _ => {}
        }
    }

    fn after_receiving(&self, _frame: &Frame) {}

    fn discard(&self, frame: &Frame) {
        self.inner.lock().discard(frame);
    }

    fn snapshot(&self) -> Vec<Frame> {
        self.inner.lock().frames.clone()
    }

    fn contains(&self, buffer_id: u64) -> bool {
        self.inner
            .lock()
            .frames
            .iter()
            .any(|f| f.buffer_id() == Some(buffer_id))
    }

    fn len(&self) -> usize {
        self.inner.lock().frames.len()
    }
}

/// Releases frames once the broker has sent a RECEIPT for them.
///
/// Every buffered frame is given a `receipt` header unless it already has
/// one.
#[derive(Debug, Default)]
pub struct ReceiptsBuffer {
    inner: Mutex<FrameBuffer>,
}

impl ReceiptsBuffer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReplayBuffer for ReceiptsBuffer {
    fn before_transmitting(&self, frame: &mut Frame) {
        let mut buf = self.inner.lock();
        let buffered = !frame.is_replayed()
            && matches!(
                frame.kind(),
                Some(
                    Command::Send
                        | Command::Begin
                        | Command::Commit
                        | Command::Abort
                        | Command::Subscribe
                )
            );
        if buffered {
            frame.headers.reverse_merge([("receipt", next_id("receipt"))]);
        }
        buf.on_queue(frame);
    }

    fn after_transmitting(&self, _frame: &Frame) {}

    fn discard(&self, frame: &Frame) {
        self.inner.lock().discard(frame);
    }

    fn after_receiving(&self, frame: &Frame) {
        if !frame.is(Command::Receipt) {
            return;
        }
        let Some(receipt) = frame.get_header("receipt-id") else {
            return;
        };
        let mut buf = self.inner.lock();
        let Some(original) = buf
            .frames
            .iter()
            .find(|f| f.get_header("receipt") == Some(receipt))
            .cloned()
        else {
            return;
        };
        match original.kind() {
            Some(Command::Commit | Command::Abort) => buf.end_transaction(&original),
            Some(Command::Send) if !original.headers.contains("transaction") => {
                buf.remove_entry(original.buffer_id());
            }
            _ => {}
        }
    }

    fn snapshot(&self) -> Vec<Frame> {
        self.inner.lock().frames.clone()
    }

    fn contains(&self, buffer_id: u64) -> bool {
        self.inner
            .lock()
            .frames
            .iter()
            .any(|f| f.buffer_id() == Some(buffer_id))
    }

    fn len(&self) -> usize {
        self.inner.lock().frames.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_and_nack_are_never_buffered() {
        let buf = WrittenBuffer::new();
        let mut ack = Frame::new("ACK").header("message-id", "m1");
        let mut nack = Frame::new("NACK").header("message-id", "m2");
        buf.before_transmitting(&mut ack);
        buf.before_transmitting(&mut nack);
        assert!(buf.is_empty());
        assert!(ack.buffer_id().is_none());
    }

    #[test]
    fn replayed_frames_are_not_buffered_again() {
        let buf = WrittenBuffer::new();
        let mut send = Frame::new("SEND").header("destination", "/q");
        buf.before_transmitting(&mut send);
        let mut replay = send.clone();
        replay.tag.replayed = true;
        buf.before_transmitting(&mut replay);
        assert_eq!(buf.len(), 1);
        buf.after_transmitting(&replay);
        assert!(buf.is_empty());
    }

    #[test]
    fn untracked_commit_releases_only_itself() {
        let buf = WrittenBuffer::new();
        let mut send = Frame::new("SEND").header("transaction", "tx9");
        let mut commit = Frame::new("COMMIT").header("transaction", "tx9");
        buf.before_transmitting(&mut send);
        buf.before_transmitting(&mut commit);
        buf.after_transmitting(&commit);
        let left = buf.snapshot();
        assert_eq!(left.len(), 1);
        assert!(left[0].is(Command::Send));
    }
}
