use bytes::{Buf, Bytes};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};

use crate::codec::{StompCodec, serialize};
use crate::config::ConnectOptions;
use crate::error::ConnError;
use crate::events::ConnectionEvent;
use crate::frame::{Command, Frame};
use crate::heartbeat::{HeartbeatPolicy, parse_heartbeat_header};
use crate::protocol::{ConnectParams, ProtocolOps, ProtocolVersion};
use crate::transport::BoxedSocket;

/// Most bytes written to the socket in one write cycle.
pub const WRITE_BUDGET: usize = 8 * 1024;
/// Most bytes read from the socket in one read cycle.
pub const READ_CHUNK: usize = 8 * 1024;
/// Longest a single read or write waits for readiness. Bounds how quickly
/// the worker notices close requests and timeouts.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unconnected,
    Handshaking,
    Open,
    /// No new writes; the socket closes once the queue drains
    Closing,
    Closed,
}

/// Receives what a `Connection` reads, writes and goes through.
///
/// Called from the connection's worker task with no connection lock held,
/// so implementations may queue further frames.
pub trait Dispatcher: Send + Sync {
    /// A complete, non-heartbeat frame was parsed.
    fn dispatch_received(&self, frame: &Frame);
    /// A queued frame has been fully written.
    fn dispatch_transmitted(&self, frame: &Frame);
    fn connection_event(&self, event: ConnectionEvent, message: &str);
}

struct Pending {
    data: Bytes,
    frame: Frame,
}

struct Inner {
    state: ConnectionState,
    version: ProtocolVersion,
    heartbeat: Option<HeartbeatPolicy>,
    queue: VecDeque<Pending>,
    /// When the queue last went from empty to non-empty
    pending_since: Option<Instant>,
    last_transmitted_at: Option<Instant>,
    last_received_at: Option<Instant>,
    opened_at: Instant,
    shutdown: bool,
    finished: bool,
}

struct Shared {
    inner: Mutex<Inner>,
    wakeup: Notify,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    fn set_state(&self, state: ConnectionState) {
        self.inner.lock().state = state;
    }

    fn enqueue(&self, version: ProtocolVersion, frame: Frame) {
        let data = serialize(version, &frame).freeze();
        {
            let mut inner = self.inner.lock();
            if inner.queue.is_empty() {
                inner.pending_since = Some(Instant::now());
            }
            inner.queue.push_back(Pending { data, frame });
        }
        self.wakeup.notify_one();
    }

    fn pop_front(&self) -> Option<Pending> {
        self.inner.lock().queue.pop_front()
    }

    fn push_front(&self, entry: Pending) {
        self.inner.lock().queue.push_front(entry);
    }

    fn has_pending(&self) -> bool {
        !self.inner.lock().queue.is_empty()
    }

    fn mark_transmitted(&self) {
        let mut inner = self.inner.lock();
        inner.last_transmitted_at = Some(Instant::now());
        if inner.queue.is_empty() {
            inner.pending_since = None;
        }
    }

    fn mark_received(&self) {
        self.inner.lock().last_received_at = Some(Instant::now());
    }

    fn since_transmitted(inner: &Inner, now: Instant) -> Duration {
        now.duration_since(inner.last_transmitted_at.unwrap_or(inner.opened_at))
    }

    fn since_received(inner: &Inner, now: Instant) -> Duration {
        now.duration_since(inner.last_received_at.unwrap_or(inner.opened_at))
    }

    fn pulse(&self) -> bool {
        let inner = self.inner.lock();
        let now = Instant::now();
        inner.heartbeat.is_none_or(|policy| {
            policy.pulse(
                Self::since_transmitted(&inner, now),
                Self::since_received(&inner, now),
            )
        })
    }

    /// Fail with `Timeout` (after firing `Blocked`) when queued bytes or an
    /// expected read made no progress in time.
    fn check_timeouts(&self, awaiting_read: bool) -> Result<(), ConnError> {
        let now = Instant::now();
        let (write_blocked, read_blocked) = {
            let inner = self.inner.lock();
            let write_blocked = match (self.write_timeout, inner.pending_since) {
                (Some(limit), Some(since)) if !inner.queue.is_empty() => {
                    let since = inner.last_transmitted_at.map_or(since, |t| t.max(since));
                    now.duration_since(since) > limit
                }
                _ => false,
            };
            let read_blocked = match self.read_timeout {
                Some(limit) if awaiting_read => Self::since_received(&inner, now) > limit,
                _ => false,
            };
            (write_blocked, read_blocked)
        };
        if write_blocked {
            self.dispatcher
                .connection_event(ConnectionEvent::Blocked, "write timeout exceeded");
            return Err(ConnError::Timeout("write"));
        }
        if read_blocked {
            self.dispatcher
                .connection_event(ConnectionEvent::Blocked, "read timeout exceeded");
            return Err(ConnError::Timeout("read"));
        }
        Ok(())
    }

    /// Queue a heartbeat when the negotiated client interval is about to
    /// lapse and nothing else is waiting to go out.
    fn heartbeat_due(&self) -> Option<ProtocolVersion> {
        let inner = self.inner.lock();
        if inner.state != ConnectionState::Open || !inner.queue.is_empty() {
            return None;
        }
        let interval = inner.heartbeat.and_then(|p| p.client_interval())?;
        let elapsed = Self::since_transmitted(&inner, Instant::now());
        (elapsed >= interval.saturating_sub(POLL_INTERVAL)).then_some(inner.version)
    }
}

/// Socket halves, parser and scratch buffer. Owned by the handshake and
/// then by the worker task.
struct IoCore {
    reader: ReadHalf<BoxedSocket>,
    writer: WriteHalf<BoxedSocket>,
    codec: StompCodec,
    chunk: Vec<u8>,
}

impl IoCore {
    fn new(socket: BoxedSocket) -> Self {
        let (reader, writer) = tokio::io::split(socket);
        Self {
            reader,
            writer,
            codec: StompCodec::new(ProtocolVersion::V1_0),
            chunk: vec![0u8; READ_CHUNK],
        }
    }

    /// Write queued bytes until the budget is spent, the queue is empty or
    /// the socket stops accepting data.
    async fn write_cycle(&mut self, shared: &Shared) -> Result<(), ConnError> {
        let mut budget = WRITE_BUDGET;
        while budget > 0 {
            let Some(mut entry) = shared.pop_front() else {
                break;
            };
            let n = entry.data.len().min(budget);
            let written = match timeout(POLL_INTERVAL, self.writer.write(&entry.data[..n])).await {
                Err(_) => {
                    shared.push_front(entry);
                    break;
                }
                Ok(Err(e)) if is_transient(&e) => {
                    shared.push_front(entry);
                    break;
                }
                Ok(Err(e)) => return Err(e.into()),
                Ok(Ok(0)) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(Ok(written)) => written,
            };
            budget = budget.saturating_sub(written);
            if written < entry.data.len() {
                entry.data.advance(written);
                shared.push_front(entry);
                shared.mark_transmitted();
                continue;
            }
            match timeout(POLL_INTERVAL, self.writer.flush()).await {
                Ok(Err(e)) if !is_transient(&e) => return Err(e.into()),
                _ => {}
            }
            shared.mark_transmitted();
            if entry.frame.is_heartbeat() {
                tracing::trace!("heartbeat written");
            } else if entry.frame.is(Command::Connect) {
                tracing::debug!("CONNECT written");
            } else {
                tracing::debug!(command = ?entry.frame.command(), "frame written");
                shared.dispatcher.dispatch_transmitted(&entry.frame);
            }
        }
        Ok(())
    }

    /// Wait up to one poll interval for input and return the complete
    /// non-heartbeat frames it finished. With writes still queued only
    /// input that is already available is taken, so the next write cycle
    /// follows at once.
    async fn read_cycle(&mut self, shared: &Shared) -> Result<Vec<Frame>, ConnError> {
        let writes_pending = shared.has_pending();
        let read = tokio::select! {
            biased;
            r = self.reader.read(&mut self.chunk) => r,
            _ = shared.wakeup.notified() => return Ok(Vec::new()),
            _ = std::future::ready(()), if writes_pending => return Ok(Vec::new()),
            _ = sleep(POLL_INTERVAL), if !writes_pending => return Ok(Vec::new()),
        };
        let n = match read {
            Ok(0) => return Err(ConnError::Closed),
            Ok(n) => n,
            Err(e) if is_transient(&e) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        shared.mark_received();
        let frames = self.codec.feed(&self.chunk[..n])?;
        Ok(frames.into_iter().filter(|f| !f.is_heartbeat()).collect())
    }

    /// Send CONNECT and wait for the broker's answer.
    ///
    /// Returns the CONNECTED frame and any frames that arrived with it.
    async fn handshake(
        &mut self,
        shared: &Shared,
        options: &ConnectOptions,
        host: &str,
    ) -> Result<(Frame, Vec<Frame>), ConnError> {
        let params = ConnectParams {
            versions: &options.versions,
            host,
            heartbeats: options.heartbeats,
            login: options.login.as_deref(),
            passcode: options.passcode.as_deref(),
            headers: &options.headers,
        };
        shared.enqueue(
            ProtocolVersion::V1_0,
            ProtocolVersion::V1_0.connect_frame(&params),
        );
        while shared.has_pending() {
            shared.check_timeouts(false)?;
            self.write_cycle(shared).await?;
        }

        let mut frames = VecDeque::new();
        let reply = loop {
            if let Some(frame) = frames.pop_front() {
                break frame;
            }
            shared.check_timeouts(true)?;
            frames.extend(self.read_cycle(shared).await?);
        };

        if !reply.is(Command::Connected) {
            let message = reply
                .get_header("message")
                .or(reply.command())
                .unwrap_or_default()
                .to_string();
            return Err(ConnError::ConnectFailed(message));
        }
        let version: ProtocolVersion = reply.get_header("version").unwrap_or("1.0").parse()?;
        if !options.versions.contains(&version) {
            return Err(ConnError::UnsupportedProtocolVersion(version.to_string()));
        }

        let heartbeat = (version == ProtocolVersion::V1_1).then(|| {
            let broker = parse_heartbeat_header(reply.get_header("heart-beat").unwrap_or("0,0"));
            HeartbeatPolicy::negotiate(options.heartbeats, broker)
        });
        self.codec.set_version(version);
        {
            let mut inner = shared.inner.lock();
            inner.version = version;
            inner.heartbeat = heartbeat;
            inner.state = ConnectionState::Open;
        }
        Ok((reply, frames.into()))
    }

    async fn shutdown(&mut self) {
        let _ = timeout(POLL_INTERVAL, self.writer.shutdown()).await;
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// How the worker loop ended without an error.
enum Exit {
    Requested,
    Drained,
    Died,
}

async fn drive(io: &mut IoCore, shared: &Shared) -> Result<Exit, ConnError> {
    loop {
        let state = {
            let inner = shared.inner.lock();
            if inner.shutdown {
                return Ok(Exit::Requested);
            }
            inner.state
        };
        if state == ConnectionState::Open && !shared.pulse() {
            return Ok(Exit::Died);
        }
        shared.check_timeouts(io.codec.is_mid_frame())?;
        if let Some(version) = shared.heartbeat_due() {
            shared.enqueue(version, Frame::heartbeat());
        }

        io.write_cycle(shared).await?;

        if shared.state() == ConnectionState::Closing && !shared.has_pending() {
            return Ok(Exit::Drained);
        }

        for frame in io.read_cycle(shared).await? {
            tracing::debug!(command = ?frame.command(), "frame received");
            shared.dispatcher.dispatch_received(&frame);
        }
    }
}

async fn run(mut io: IoCore, shared: Arc<Shared>) -> Result<(), ConnError> {
    let result = drive(&mut io, &shared).await;
    io.shutdown().await;
    drop(io);
    shared.set_state(ConnectionState::Closed);

    let dispatcher = &shared.dispatcher;
    let outcome = match result {
        Ok(Exit::Requested) | Ok(Exit::Drained) => {
            tracing::info!("connection closed");
            Ok(())
        }
        Ok(Exit::Died) => {
            tracing::warn!("heartbeat pulse lost");
            dispatcher.connection_event(ConnectionEvent::Died, "heartbeat pulse lost");
            Ok(())
        }
        Err(e) => {
            tracing::warn!(error = %e, "connection terminated");
            if !matches!(e, ConnError::Timeout(_)) {
                dispatcher.connection_event(ConnectionEvent::Terminated, &e.to_string());
            }
            Err(e)
        }
    };
    dispatcher.connection_event(ConnectionEvent::Closed, "");
    shared.inner.lock().finished = true;
    outcome
}

/// One STOMP session over one socket.
///
/// Created by [`Connection::connect`], which performs the handshake, and
/// brought to life by [`Connection::start`], which spawns the worker task
/// that runs the write/read cycle. A connection is never reused once
/// closed.
pub struct Connection {
    shared: Arc<Shared>,
    unstarted: Mutex<Option<(IoCore, Frame, Vec<Frame>)>>,
    worker: Mutex<Option<JoinHandle<Result<(), ConnError>>>>,
}

impl Connection {
    /// Handshake with the broker over `socket`.
    ///
    /// Writes CONNECT (STOMP 1.0 encoding), waits for the reply and
    /// negotiates the version and heartbeats. On failure the socket is closed
    /// and `ConnectFailed` is reported to `dispatcher`.
    pub async fn connect(
        socket: BoxedSocket,
        options: &ConnectOptions,
        host: &str,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Result<Self, ConnError> {
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                state: ConnectionState::Unconnected,
                version: ProtocolVersion::V1_0,
                heartbeat: None,
                queue: VecDeque::new(),
                pending_since: None,
                last_transmitted_at: None,
                last_received_at: None,
                opened_at: Instant::now(),
                shutdown: false,
                finished: false,
            }),
            wakeup: Notify::new(),
            read_timeout: options.read_timeout,
            write_timeout: options.write_timeout,
            dispatcher,
        });

        let mut io = IoCore::new(socket);
        shared.set_state(ConnectionState::Handshaking);
        match io.handshake(&shared, options, host).await {
            Ok((connected, backlog)) => {
                let version = shared.inner.lock().version;
                tracing::info!(%version, host, "connected");
                Ok(Self {
                    shared,
                    unstarted: Mutex::new(Some((io, connected, backlog))),
                    worker: Mutex::new(None),
                })
            }
            Err(e) => {
                io.shutdown().await;
                {
                    let mut inner = shared.inner.lock();
                    inner.state = ConnectionState::Closed;
                    inner.finished = true;
                }
                tracing::warn!(error = %e, host, "handshake failed");
                shared
                    .dispatcher
                    .connection_event(ConnectionEvent::ConnectFailed, &e.to_string());
                Err(e)
            }
        }
    }

    /// Dispatch CONNECTED and anything read with it, fire `Established`
    /// and spawn the worker. Calling it again has no effect.
    pub fn start(&self) {
        let Some((io, connected, backlog)) = self.unstarted.lock().take() else {
            return;
        };
        let dispatcher = &self.shared.dispatcher;
        dispatcher.dispatch_received(&connected);
        for frame in &backlog {
            dispatcher.dispatch_received(frame);
        }
        dispatcher.connection_event(ConnectionEvent::Established, "");
        let handle = tokio::spawn(run(io, self.shared.clone()));
        *self.worker.lock() = Some(handle);
    }

    /// Serialize `frame` with the negotiated version and queue it. Returns
    /// immediately; the worker writes it.
    pub fn write_frame_nonblock(&self, frame: Frame) -> Result<(), ConnError> {
        let version = {
            let inner = self.shared.inner.lock();
            if inner.state != ConnectionState::Open || inner.shutdown {
                return Err(ConnError::NotConnected);
            }
            inner.version
        };
        tracing::debug!(command = ?frame.command(), "frame queued");
        self.shared.enqueue(version, frame);
        Ok(())
    }

    /// Whether [`Connection::write_frame_nonblock`] would currently accept a
    /// frame.
    pub fn accepts_writes(&self) -> bool {
        let inner = self.shared.inner.lock();
        inner.state == ConnectionState::Open && !inner.shutdown
    }

    /// Close the connection.
    ///
    /// `blocking` stops the worker and closes the socket at once. Otherwise
    /// new writes are refused and the socket closes after everything
    /// already queued has been written.
    pub fn close(&self, blocking: bool) {
        if self.unstarted.lock().take().is_some() {
            let mut inner = self.shared.inner.lock();
            inner.state = ConnectionState::Closed;
            inner.finished = true;
            return;
        }
        {
            let mut inner = self.shared.inner.lock();
            match inner.state {
                ConnectionState::Closed => return,
                _ if blocking => inner.shutdown = true,
                ConnectionState::Open => inner.state = ConnectionState::Closing,
                _ => {}
            }
        }
        self.shared.wakeup.notify_one();
    }

    /// Wait until the worker has finished and every close event has fired.
    pub async fn wait_closed(&self) {
        while !self.is_finished() {
            sleep(Duration::from_millis(10)).await;
        }
    }

    /// Wait for the worker and return the error that ended it, if any.
    pub async fn join(&self) -> Result<(), ConnError> {
        let handle = self.worker.lock().take();
        match handle {
            Some(handle) => handle
                .await
                .map_err(|e| ConnError::Io(io::Error::other(e.to_string())))?,
            None => Ok(()),
        }
    }

    fn is_finished(&self) -> bool {
        self.shared.inner.lock().finished
    }

    /// Socket open and, for STOMP 1.1, heartbeat pulse alive.
    pub fn connected(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Open | ConnectionState::Closing
        ) && self.shared.pulse()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn version(&self) -> ProtocolVersion {
        self.shared.inner.lock().version
    }

    pub fn heartbeat_policy(&self) -> Option<HeartbeatPolicy> {
        self.shared.inner.lock().heartbeat
    }

    /// Frames queued but not yet fully written.
    pub fn pending_writes(&self) -> usize {
        self.shared.inner.lock().queue.len()
    }

    pub fn duration_since_transmitted(&self) -> Option<Duration> {
        self.shared
            .inner
            .lock()
            .last_transmitted_at
            .map(|t| t.elapsed())
    }

    pub fn duration_since_received(&self) -> Option<Duration> {
        self.shared
            .inner
            .lock()
            .last_received_at
            .map(|t| t.elapsed())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shared.inner.lock().shutdown = true;
        self.shared.wakeup.notify_one();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("Connection")
            .field("state", &inner.state)
            .field("version", &inner.version)
            .field("heartbeat", &inner.heartbeat)
            .field("queued", &inner.queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use tokio::io::DuplexStream;
    use tokio_util::codec::Framed;

    #[derive(Default)]
    struct Recorder {
        received: Mutex<Vec<Frame>>,
        transmitted: Mutex<Vec<Frame>>,
        events: Mutex<Vec<ConnectionEvent>>,
    }

    impl Dispatcher for Recorder {
        fn dispatch_received(&self, frame: &Frame) {
            self.received.lock().push(frame.clone());
        }
        fn dispatch_transmitted(&self, frame: &Frame) {
            self.transmitted.lock().push(frame.clone());
        }
        fn connection_event(&self, event: ConnectionEvent, _message: &str) {
            self.events.lock().push(event);
        }
    }

    async fn accept(broker: DuplexStream, reply: Frame) -> Framed<DuplexStream, StompCodec> {
        let mut framed = Framed::new(broker, StompCodec::new(ProtocolVersion::V1_0));
        let connect = framed.next().await.unwrap().unwrap();
        assert!(connect.is(Command::Connect));
        framed.send(reply).await.unwrap();
        framed
    }

    #[tokio::test]
    async fn connected_reply_without_version_means_1_0() {
        let (client, broker) = tokio::io::duplex(4096);
        let broker = tokio::spawn(accept(broker, Frame::new("CONNECTED")));
        let rec = Arc::new(Recorder::default());
        let conn = Connection::connect(Box::new(client), &ConnectOptions::default(), "h", rec.clone())
            .await
            .unwrap();
        let _broker = broker.await.unwrap();
        assert_eq!(conn.version(), ProtocolVersion::V1_0);
        assert!(conn.heartbeat_policy().is_none());
        conn.start();
        assert_eq!(rec.received.lock().len(), 1);
        assert_eq!(rec.events.lock().as_slice(), &[ConnectionEvent::Established]);
    }

    #[tokio::test]
    async fn write_is_rejected_once_closing() {
        let (client, broker) = tokio::io::duplex(4096);
        let broker = tokio::spawn(accept(broker, Frame::new("CONNECTED").header("version", "1.1")));
        let rec = Arc::new(Recorder::default());
        let conn = Connection::connect(Box::new(client), &ConnectOptions::default(), "h", rec.clone())
            .await
            .unwrap();
        let _broker = broker.await.unwrap();
        conn.start();
        conn.close(false);
        assert!(matches!(
            conn.write_frame_nonblock(Frame::new("SEND")),
            Err(ConnError::NotConnected)
        ));
        conn.wait_closed().await;
        assert_eq!(conn.state(), ConnectionState::Closed);
    }
}
