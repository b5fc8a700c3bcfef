use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::time::sleep;

use super::FailoverError;
use super::backoff::Backoff;
use super::buffer::{ReceiptsBuffer, ReplayBuffer, WrittenBuffer};
use super::pool::{Pool, RoundRobin, Shuffle};
use crate::client::Client;
use crate::config::{BufferStrategy, FailoverOptions};
use crate::error::ConnError;
use crate::events::{ConnectionEvent, Event, EventKind, Handler};
use crate::frame::{Command, Frame};
use crate::headers::Headers;
use crate::subscription::{MessageHandler, Subscription, SubscriptionOptions, Subscriptions};
use crate::transport::BrokerUri;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailoverState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Notifications about the failover client itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailoverEvent {
    /// A broker accepted the connection; the message is its URI
    Connected,
    /// One connection attempt failed; the message is the error
    ConnectFailure,
    /// `retry_attempts` attempts failed in a row
    RetriesExceeded,
    /// The active broker connection closed unexpectedly
    Lost,
}

pub type FailoverHandler = Arc<dyn Fn(FailoverEvent, &str) + Send + Sync>;

struct FailoverInner {
    options: FailoverOptions,
    pool: Mutex<Box<dyn Pool>>,
    buffer: Arc<dyn ReplayBuffer>,
    active: Mutex<Option<Client>>,
    /// Bumped on every successful (re)connect
    generation: AtomicU64,
    state: Mutex<FailoverState>,
    disconnecting: AtomicBool,
    reconnecting: AtomicBool,
    subscriptions: Mutex<Subscriptions>,
    handlers: Mutex<HashMap<FailoverEvent, Vec<FailoverHandler>>>,
}

impl FailoverInner {
    fn set_state(&self, state: FailoverState) {
        *self.state.lock() = state;
    }

    fn trigger(&self, event: FailoverEvent, message: &str) {
        let handlers = self.handlers.lock().get(&event).cloned().unwrap_or_default();
        for handler in handlers {
            handler(event, message);
        }
    }

    fn is_active(&self, client_id: u64) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(|c| c.id() == client_id)
    }

    /// Try brokers from the pool until one accepts or the retry budget is
    /// spent.
    async fn connect_loop(&self) -> Result<Client, FailoverError> {
        let mut backoff = Backoff::new(&self.options);
        let mut attempts = 0u32;
        loop {
            if self.disconnecting.load(Ordering::SeqCst) {
                return Err(FailoverError::NotConnected);
            }
            let client = self
                .pool
                .lock()
                .next_client()
                .ok_or(FailoverError::EmptyPool)?;
            attempts += 1;
            match client.connect().await {
                Ok(()) => {
                    tracing::info!(broker = %client.uri(), attempts, "failover connected");
                    return Ok(client);
                }
                Err(e) => {
                    tracing::warn!(broker = %client.uri(), error = %e, attempts, "connection attempt failed");
                    self.trigger(FailoverEvent::ConnectFailure, &e.to_string());
                    if !e.is_retryable() {
                        return Err(e.into());
                    }
                }
            }
            let limit = self.options.retry_attempts;
            if limit > 0 && attempts >= limit {
                self.trigger(FailoverEvent::RetriesExceeded, &attempts.to_string());
                return Err(FailoverError::MaximumRetriesExceeded { attempts });
            }
            sleep(backoff.next_delay()).await;
        }
    }

    /// Make `client` the active client and replay the buffer through it.
    ///
    /// A graceful disconnect requested while the client was connecting wins:
    /// the fresh connection is closed and `NotConnected` returned.
    fn activate(&self, client: Client) -> Result<(), FailoverError> {
        let generation = {
            let mut active = self.active.lock();
            if self.disconnecting.load(Ordering::SeqCst) {
                drop(active);
                tracing::info!(broker = %client.uri(), "disconnect requested while connecting");
                client.close();
                return Err(FailoverError::NotConnected);
            }
            *active = Some(client.clone());
            self.set_state(FailoverState::Connected);
            self.generation.fetch_add(1, Ordering::SeqCst) + 1
        };
        self.trigger(FailoverEvent::Connected, &client.uri().to_string());
        self.replay(&client, generation);
        Ok(())
    }

    /// Re-send buffered frames in their original order.
    ///
    /// Works on a snapshot: entries released meanwhile are skipped, and the
    /// replay stops as soon as a newer connection takes over, since that
    /// connection replays from the start.
    fn replay(&self, client: &Client, generation: u64) {
        let frames = self.buffer.snapshot();
        if !frames.is_empty() {
            tracing::info!(frames = frames.len(), "replaying buffered frames");
        }
        for mut frame in frames {
            if self.generation.load(Ordering::SeqCst) != generation {
                tracing::debug!("replay superseded by a newer connection");
                return;
            }
            let Some(id) = frame.buffer_id() else {
                continue;
            };
            if !self.buffer.contains(id) {
                continue;
            }
            frame.tag.replayed = true;
            if let Err(e) = client.transmit(frame) {
                tracing::warn!(error = %e, "replay interrupted");
                return;
            }
        }
    }
}

/// Run a background reconnect unless one is already running.
fn spawn_reconnect(inner: Arc<FailoverInner>) {
    if inner.reconnecting.swap(true, Ordering::SeqCst) {
        return;
    }
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        tracing::warn!("no runtime available to reconnect");
        inner.reconnecting.store(false, Ordering::SeqCst);
        return;
    };
    handle.spawn(async move {
        let result = inner.connect_loop().await.and_then(|client| inner.activate(client));
        if let Err(e) = result {
            tracing::warn!(error = %e, "reconnect abandoned");
            inner.set_state(FailoverState::Disconnected);
        }
        inner.reconnecting.store(false, Ordering::SeqCst);
    });
}

/// Install the buffering, routing and loss-detection hooks on a pooled
/// client.
fn install_hooks(client: &Client, inner: &Arc<FailoverInner>) {
    let events = client.events();

    let buffer = inner.buffer.clone();
    events.intercept(move |frame| buffer.before_transmitting(frame));

    let buffer = inner.buffer.clone();
    events.on(EventKind::AfterTransmitting, move |event| {
        if let Some(frame) = event.frame() {
            buffer.after_transmitting(frame);
        }
    });

    let buffer = inner.buffer.clone();
    events.on(EventKind::TransmitFailed, move |event| {
        if let Some(frame) = event.frame() {
            buffer.discard(frame);
        }
    });

    let buffer = inner.buffer.clone();
    events.on(EventKind::AfterReceiving, move |event| {
        if let Some(frame) = event.frame() {
            buffer.after_receiving(frame);
        }
    });

    let weak: Weak<FailoverInner> = Arc::downgrade(inner);
    events.on(EventKind::On(Command::Message), move |event| {
        let (Some(inner), Some(frame)) = (weak.upgrade(), event.frame()) else {
            return;
        };
        let handlers = inner.subscriptions.lock().handlers_for(frame);
        for handler in handlers {
            handler(frame);
        }
    });

    let weak: Weak<FailoverInner> = Arc::downgrade(inner);
    let client_id = client.id();
    events.on(
        EventKind::Connection(ConnectionEvent::Closed),
        move |_| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.disconnecting.load(Ordering::SeqCst) || !inner.is_active(client_id) {
                return;
            }
            *inner.active.lock() = None;
            inner.set_state(FailoverState::Reconnecting);
            tracing::warn!("broker connection lost, reconnecting");
            inner.trigger(FailoverEvent::Lost, "");
            spawn_reconnect(inner);
        },
    );
}

/// A client that keeps a STOMP session alive across a pool of brokers.
///
/// Frames are buffered as they are queued and replayed against the next
/// broker after a connection is lost. Subscriptions made through the
/// failover client are replayed too and keep their handlers.
#[derive(Clone)]
pub struct FailoverClient {
    inner: Arc<FailoverInner>,
}

impl FailoverClient {
    /// Build from a `failover:(uri1,uri2)?option=value` URI or a single
    /// broker URI.
    pub fn new(uri: &str) -> Result<Self, FailoverError> {
        let (brokers, options) = super::parse_failover_uri(uri)?;
        Self::from_uris(brokers, options)
    }

    pub fn from_uris(brokers: Vec<BrokerUri>, options: FailoverOptions) -> Result<Self, FailoverError> {
        let clients = brokers
            .into_iter()
            .map(|uri| Client::with_options(uri, options.connect.clone()))
            .collect();
        Self::with_clients(clients, options)
    }

    /// Build over pre-built clients. Their order is the pool order.
    pub fn with_clients(clients: Vec<Client>, options: FailoverOptions) -> Result<Self, FailoverError> {
        if clients.is_empty() {
            return Err(FailoverError::EmptyPool);
        }
        let pool: Box<dyn Pool> = if options.randomize {
            Box::new(Shuffle::new(clients.clone()))
        } else {
            Box::new(RoundRobin::new(clients.clone()))
        };
        let buffer: Arc<dyn ReplayBuffer> = match options.buffer {
            BufferStrategy::Written => Arc::new(WrittenBuffer::new()),
            BufferStrategy::Receipts => Arc::new(ReceiptsBuffer::new()),
        };
        let inner = Arc::new(FailoverInner {
            options,
            pool: Mutex::new(pool),
            buffer,
            active: Mutex::new(None),
            generation: AtomicU64::new(0),
            state: Mutex::new(FailoverState::Disconnected),
            disconnecting: AtomicBool::new(false),
            reconnecting: AtomicBool::new(false),
            subscriptions: Mutex::new(Subscriptions::new()),
            handlers: Mutex::new(HashMap::new()),
        });
        for client in &clients {
            install_hooks(client, &inner);
        }
        Ok(Self { inner })
    }

    /// Connect to the first broker that accepts, retrying per the options.
    pub async fn connect(&self) -> Result<(), FailoverError> {
        let inner = &self.inner;
        inner.disconnecting.store(false, Ordering::SeqCst);
        inner.set_state(FailoverState::Connecting);
        let result = inner.connect_loop().await.and_then(|client| inner.activate(client));
        if result.is_err() {
            inner.set_state(FailoverState::Disconnected);
        }
        result
    }

    /// Gracefully disconnect the active client. No reconnect follows.
    pub async fn disconnect(&self) -> Result<(), FailoverError> {
        self.inner.disconnecting.store(true, Ordering::SeqCst);
        let active = {
            let mut active = self.inner.active.lock();
            self.inner.set_state(FailoverState::Disconnected);
            active.take()
        };
        if let Some(client) = active {
            client.disconnect().await?;
        }
        Ok(())
    }

    pub fn state(&self) -> FailoverState {
        *self.inner.state.lock()
    }

    pub fn connected(&self) -> bool {
        self.inner
            .active
            .lock()
            .as_ref()
            .is_some_and(Client::connected)
    }

    pub fn active_client(&self) -> Option<Client> {
        self.inner.active.lock().clone()
    }

    pub fn clients(&self) -> Vec<Client> {
        self.inner.pool.lock().clients().to_vec()
    }

    /// The replay buffer in use.
    pub fn buffer(&self) -> &dyn ReplayBuffer {
        self.inner.buffer.as_ref()
    }

    /// Register a handler on every pooled client, so it keeps firing after
    /// a failover.
    pub fn on<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&Event<'_>) + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        for client in self.inner.pool.lock().clients() {
            client.events().on_shared(kind, handler.clone());
        }
    }

    pub fn on_failover<F>(&self, event: FailoverEvent, handler: F)
    where
        F: Fn(FailoverEvent, &str) + Send + Sync + 'static,
    {
        self.inner
            .handlers
            .lock()
            .entry(event)
            .or_default()
            .push(Arc::new(handler));
    }

    /// Run `f` against the active client, failing with `NotConnected` when
    /// there is none.
    pub fn with_active_client<T, F>(&self, f: F) -> Result<T, FailoverError>
    where
        F: FnOnce(&Client) -> Result<T, ConnError>,
    {
        let client = self
            .inner
            .active
            .lock()
            .clone()
            .ok_or(FailoverError::NotConnected)?;
        Ok(f(&client)?)
    }

    pub fn transmit(&self, frame: Frame) -> Result<Frame, FailoverError> {
        self.with_active_client(|c| c.transmit(frame))
    }

    pub fn send(&self, destination: &str, body: impl Into<Vec<u8>>, headers: &Headers) -> Result<Frame, FailoverError> {
        self.with_active_client(|c| c.send(destination, body, headers))
    }

    /// Subscribe through the active client. The SUBSCRIBE is buffered, so
    /// the subscription is re-established on whichever broker comes next.
    pub fn subscribe<F>(
        &self,
        destination: &str,
        options: SubscriptionOptions,
        handler: F,
    ) -> Result<Subscription, FailoverError>
    where
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        let handler: MessageHandler = Arc::new(handler);
        self.with_active_client(|c| {
            let frame = c.subscribe_frame(destination, &options)?;
            let id = frame.get_header("id").unwrap_or_default().to_string();
            self.inner
                .subscriptions
                .lock()
                .add(id.clone(), destination, handler);
            if let Err(e) = c.transmit(frame) {
                self.inner.subscriptions.lock().remove(&id);
                return Err(e);
            }
            Ok(Subscription::new(id, destination.to_string(), options.ack))
        })
    }

    pub fn unsubscribe(&self, id: &str) -> Result<Frame, FailoverError> {
        self.inner.subscriptions.lock().remove(id);
        self.with_active_client(|c| c.unsubscribe(id))
    }

    pub fn ack(&self, message: &Frame) -> Result<Frame, FailoverError> {
        self.with_active_client(|c| c.ack(message))
    }

    pub fn nack(&self, message: &Frame) -> Result<Frame, FailoverError> {
        self.with_active_client(|c| c.nack(message))
    }

    pub fn begin(&self, transaction: Option<&str>) -> Result<String, FailoverError> {
        self.with_active_client(|c| c.begin(transaction))
    }

    pub fn commit(&self, transaction: &str) -> Result<Frame, FailoverError> {
        self.with_active_client(|c| c.commit(transaction))
    }

    pub fn abort(&self, transaction: &str) -> Result<Frame, FailoverError> {
        self.with_active_client(|c| c.abort(transaction))
    }

    pub fn beat(&self) -> Result<(), FailoverError> {
        self.with_active_client(Client::beat)
    }
}

impl fmt::Debug for FailoverClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailoverClient")
            .field("state", &self.state())
            .field("active", &self.active_client().map(|c| c.uri().to_string()))
            .field("buffered", &self.inner.buffer.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_calls_need_an_active_client() {
        let fc = FailoverClient::new("failover:(stomp://a,stomp://b)").unwrap();
        assert!(matches!(
            fc.send("/queue/x", "hi", &Headers::new()),
            Err(FailoverError::NotConnected)
        ));
        assert_eq!(fc.state(), FailoverState::Disconnected);
        assert!(fc.buffer().is_empty());
    }

    #[test]
    fn empty_client_list_is_rejected() {
        assert!(matches!(
            FailoverClient::with_clients(Vec::new(), FailoverOptions::default()),
            Err(FailoverError::EmptyPool)
        ));
    }
}
