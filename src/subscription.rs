use std::collections::HashMap;
use std::sync::Arc;

use crate::frame::Frame;

/// Callback invoked for every MESSAGE delivered to a subscription.
pub type MessageHandler = Arc<dyn Fn(&Frame) + Send + Sync>;

/// Callback invoked once when the matching RECEIPT arrives.
pub type ReceiptHandler = Box<dyn FnOnce(&Frame) + Send>;

/// Subscription acknowledgement modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMode {
    #[default]
    Auto,
    Client,
    ClientIndividual,
}

impl AckMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckMode::Auto => "auto",
            AckMode::Client => "client",
            AckMode::ClientIndividual => "client-individual",
        }
    }
}

/// Options for `Client::subscribe_with_options`.
///
/// `headers` are forwarded on the SUBSCRIBE frame. An `id` header, when
/// given, is used as the subscription id instead of a generated one.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionOptions {
    pub ack: AckMode,
    pub headers: Vec<(String, String)>,
}

impl SubscriptionOptions {
    pub fn ack(mut self, ack: AckMode) -> Self {
        self.ack = ack;
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }
}

/// A lightweight handle returned from `Client::subscribe` naming the
/// subscription. Pass it (or its id) to `unsubscribe`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    id: String,
    destination: String,
    ack: AckMode,
}

impl Subscription {
    pub(crate) fn new(id: String, destination: String, ack: AckMode) -> Self {
        Self {
            id,
            destination,
            ack,
        }
    }

    /// Returns the subscription id sent in the SUBSCRIBE frame.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the destination this subscription listens to.
    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn ack_mode(&self) -> AckMode {
        self.ack
    }
}

struct Entry {
    destination: String,
    handler: MessageHandler,
}

/// Subscription table: subscription id -> destination and handler.
#[derive(Default)]
pub struct Subscriptions {
    entries: HashMap<String, Entry>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, id: impl Into<String>, destination: impl Into<String>, handler: MessageHandler) {
        self.entries.insert(
            id.into(),
            Entry {
                destination: destination.into(),
                handler,
            },
        );
    }

    /// Forget a subscription. Returns its destination if it was known.
    pub fn remove(&mut self, id: &str) -> Option<String> {
        self.entries.remove(id).map(|e| e.destination)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Handlers that should see `message`.
    ///
    /// A MESSAGE carrying a `subscription` header goes to that subscription
    /// only. Without one (STOMP 1.0 brokers) every subscription on the
    /// message's destination matches.
    pub fn handlers_for(&self, message: &Frame) -> Vec<MessageHandler> {
        if let Some(id) = message.get_header("subscription") {
            return self
                .entries
                .get(id)
                .map(|e| vec![e.handler.clone()])
                .unwrap_or_default();
        }
        let Some(dest) = message.get_header("destination") else {
            return Vec::new();
        };
        self.entries
            .values()
            .filter(|e| e.destination == dest)
            .map(|e| e.handler.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Pending receipt callbacks keyed by receipt id.
#[derive(Default)]
pub struct Receipts {
    pending: HashMap<String, ReceiptHandler>,
}

impl Receipts {
    pub fn add(&mut self, id: impl Into<String>, handler: ReceiptHandler) {
        self.pending.insert(id.into(), handler);
    }

    pub fn take(&mut self, id: &str) -> Option<ReceiptHandler> {
        self.pending.remove(id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
