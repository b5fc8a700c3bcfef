//! Event registry shared by `Client` and the failover layer.
//!
//! Handlers are keyed by [`EventKind`] and run in registration order. The
//! handler list is cloned out of the lock before it is invoked, so a handler
//! may register further handlers or transmit frames without deadlocking.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::frame::{Command, Frame};

/// Connection lifecycle notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionEvent {
    /// Handshake completed and the worker is running
    Established,
    /// The heartbeat pulse stopped
    Died,
    /// A fatal I/O or protocol error ended the connection
    Terminated,
    /// A read or write made no progress within its timeout
    Blocked,
    /// The socket has been closed
    Closed,
    /// The handshake was refused or could not complete
    ConnectFailed,
}

/// What a handler is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Any frame, right before it is queued for writing
    BeforeTransmitting,
    /// Any frame, once it has been fully written
    AfterTransmitting,
    /// A frame that passed the interceptors but could not be queued
    TransmitFailed,
    /// Any frame, as soon as it has been parsed
    BeforeReceiving,
    /// Any frame, after subscriptions and receipts have seen it
    AfterReceiving,
    /// A specific client command, right before it is queued
    Before(Command),
    /// A specific command: after it is written for client commands, when it
    /// arrives for broker commands
    On(Command),
    Connection(ConnectionEvent),
}

/// Payload passed to handlers.
#[derive(Debug, Clone, Copy)]
pub enum Event<'a> {
    Frame(&'a Frame),
    Connection {
        event: ConnectionEvent,
        message: &'a str,
    },
}

impl<'a> Event<'a> {
    pub fn frame(&self) -> Option<&'a Frame> {
        match self {
            Event::Frame(f) => Some(f),
            Event::Connection { .. } => None,
        }
    }
}

pub type Handler = Arc<dyn Fn(&Event<'_>) + Send + Sync>;

/// Rewrites an outbound frame before it is serialized.
pub type Interceptor = Arc<dyn Fn(&mut Frame) + Send + Sync>;

#[derive(Default)]
pub struct Events {
    handlers: Mutex<HashMap<EventKind, Vec<Handler>>>,
    interceptors: Mutex<Vec<Interceptor>>,
}

impl Events {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `kind`.
    pub fn on<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&Event<'_>) + Send + Sync + 'static,
    {
        self.on_shared(kind, Arc::new(handler));
    }

    /// Register an already shared handler, e.g. one installed on several
    /// clients at once.
    pub fn on_shared(&self, kind: EventKind, handler: Handler) {
        self.handlers.lock().entry(kind).or_default().push(handler);
    }

    /// Register a frame interceptor. Interceptors run before any
    /// `BeforeTransmitting` handler and may modify the frame.
    pub fn intercept<F>(&self, interceptor: F)
    where
        F: Fn(&mut Frame) + Send + Sync + 'static,
    {
        self.interceptors.lock().push(Arc::new(interceptor));
    }

    /// Run every handler registered for `kind`.
    pub fn trigger(&self, kind: EventKind, event: &Event<'_>) {
        let handlers = match self.handlers.lock().get(&kind) {
            Some(list) => list.clone(),
            None => return,
        };
        for handler in handlers {
            handler(event);
        }
    }

    pub fn trigger_frame(&self, kind: EventKind, frame: &Frame) {
        self.trigger(kind, &Event::Frame(frame));
    }

    pub fn trigger_connection(&self, event: ConnectionEvent, message: &str) {
        self.trigger(
            EventKind::Connection(event),
            &Event::Connection { event, message },
        );
    }

    /// Pass `frame` through every interceptor in registration order.
    pub fn intercept_outbound(&self, frame: &mut Frame) {
        let interceptors = self.interceptors.lock().clone();
        for interceptor in interceptors {
            interceptor(frame);
        }
    }
}

impl fmt::Debug for Events {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds: Vec<EventKind> = self.handlers.lock().keys().copied().collect();
        f.debug_struct("Events")
            .field("kinds", &kinds)
            .field("interceptors", &self.interceptors.lock().len())
            .finish()
    }
}
