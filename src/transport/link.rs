//! The pub/sub broker binding.
//!
//! Sessions never talk to a broker client library directly; they own a
//! [`BrokerLink`], a poll-driven, non-blocking handle to one broker
//! connection. Operations queue work and return immediately; outcomes come
//! back as [`LinkEvent`]s on the next [`poll`](BrokerLink::poll), with
//! subscribe and publish acknowledgements correlated by [`RequestId`]
//! rather than arrival order.
//!
//! [`BrokerHub`] + [`InMemoryBroker`] implement the trait fully in-process:
//! a shared hub routes published messages to every attached client whose
//! filter matches, including the publisher itself. That self-echo mirrors
//! real broker behavior on the session control topic and keeps the
//! provenance filter honest in tests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::SessionId;

/// Correlates an asynchronous subscribe/publish request with its
/// acknowledgement.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(u64);

impl RequestId {
    /// Returns the underlying value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Events surfaced by [`BrokerLink::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The broker accepted the connection.
    Connected,
    /// The connection closed (locally or remotely).
    Disconnected,
    /// The broker acknowledged (or rejected) a subscribe request.
    SubscribeAck {
        /// The request being acknowledged.
        request: RequestId,
        /// Whether the subscription was granted.
        success: bool,
    },
    /// The broker confirmed a published message was accepted.
    PublishAck {
        /// The request being acknowledged.
        request: RequestId,
    },
    /// An inbound message on a subscribed topic.
    Message {
        /// The concrete topic the message arrived on.
        topic: String,
        /// Raw message body.
        payload: Vec<u8>,
    },
}

/// A non-blocking binding to one broker connection.
///
/// All methods return immediately. `publish` guarantees the message is
/// queued for transport before returning; delivery and acknowledgement
/// surface later through [`poll`](Self::poll). Implementations must be safe
/// to drive from a single thread per session.
pub trait BrokerLink: Send {
    /// Starts connecting. Emits [`LinkEvent::Connected`] once accepted.
    fn connect(&mut self);

    /// Closes the connection. Emits [`LinkEvent::Disconnected`].
    fn disconnect(&mut self);

    /// Requests a subscription to `filter` (which may end in the `#`
    /// wildcard). The returned id correlates the eventual
    /// [`LinkEvent::SubscribeAck`].
    fn subscribe(&mut self, filter: &str) -> RequestId;

    /// Queues `payload` for publication on `topic`. The returned id
    /// correlates the eventual [`LinkEvent::PublishAck`].
    fn publish(&mut self, topic: &str, payload: Vec<u8>) -> RequestId;

    /// Drains all pending events, in order.
    fn poll(&mut self) -> Vec<LinkEvent>;
}

/// Produces broker links; the process composition root owns one connector
/// and hands it to the [`SessionRegistry`](crate::SessionRegistry).
pub trait BrokerConnector: Send + Sync {
    /// Opens a fresh link for `session`.
    fn open(&self, session: SessionId) -> Box<dyn BrokerLink>;
}

/// Returns `true` if `filter` matches `topic` under segment-wise matching
/// with `+` (one segment) and trailing `#` (rest of tree) wildcards.
fn filter_matches(filter: &str, topic: &str) -> bool {
    let mut filter_parts = filter.split('/');
    let mut topic_parts = topic.split('/');
    loop {
        match (filter_parts.next(), topic_parts.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[derive(Default)]
struct ClientSlot {
    subscriptions: Vec<String>,
    queue: VecDeque<LinkEvent>,
}

#[derive(Default)]
struct HubInner {
    clients: BTreeMap<u64, ClientSlot>,
    next_client: u64,
}

/// The shared routing core of the in-memory broker.
///
/// Cheap to clone; all clones route to the same set of attached clients.
#[derive(Clone, Default)]
pub struct BrokerHub {
    inner: Arc<Mutex<HubInner>>,
}

impl BrokerHub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn attach(&self) -> u64 {
        let mut inner = self.inner.lock();
        inner.next_client += 1;
        let id = inner.next_client;
        inner.clients.insert(id, ClientSlot::default());
        id
    }

    fn detach(&self, client: u64) {
        self.inner.lock().clients.remove(&client);
    }

    fn subscribe(&self, client: u64, filter: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.clients.get_mut(&client) {
            Some(slot) => {
                slot.subscriptions.push(filter.to_owned());
                true
            }
            None => false,
        }
    }

    /// Routes `payload` to every attached client with a matching filter,
    /// the publisher included.
    fn route(&self, topic: &str, payload: &[u8]) {
        let mut inner = self.inner.lock();
        for slot in inner.clients.values_mut() {
            if slot
                .subscriptions
                .iter()
                .any(|filter| filter_matches(filter, topic))
            {
                slot.queue.push_back(LinkEvent::Message {
                    topic: topic.to_owned(),
                    payload: payload.to_vec(),
                });
            }
        }
    }

    fn push(&self, client: u64, event: LinkEvent) {
        if let Some(slot) = self.inner.lock().clients.get_mut(&client) {
            slot.queue.push_back(event);
        }
    }

    fn drain(&self, client: u64) -> Vec<LinkEvent> {
        match self.inner.lock().clients.get_mut(&client) {
            Some(slot) => slot.queue.drain(..).collect(),
            None => Vec::new(),
        }
    }

    fn clear_subscriptions(&self, client: u64) {
        if let Some(slot) = self.inner.lock().clients.get_mut(&client) {
            slot.subscriptions.clear();
        }
    }
}

impl std::fmt::Debug for BrokerHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("BrokerHub")
            .field("clients", &inner.clients.len())
            .finish()
    }
}

impl BrokerConnector for BrokerHub {
    fn open(&self, _session: SessionId) -> Box<dyn BrokerLink> {
        Box::new(InMemoryBroker::attached(self))
    }
}

/// An in-process [`BrokerLink`] attached to a [`BrokerHub`].
///
/// Used by tests and single-process deployments where the broker runs in
/// the same address space as the coordinator.
pub struct InMemoryBroker {
    hub: BrokerHub,
    client: u64,
    connected: bool,
    next_request: u64,
}

impl InMemoryBroker {
    /// Attaches a new client to `hub`.
    #[must_use]
    pub fn attached(hub: &BrokerHub) -> Self {
        let client = hub.attach();
        InMemoryBroker {
            hub: hub.clone(),
            client,
            connected: false,
            next_request: 0,
        }
    }

    fn next_request(&mut self) -> RequestId {
        self.next_request += 1;
        RequestId(self.next_request)
    }
}

impl BrokerLink for InMemoryBroker {
    fn connect(&mut self) {
        if self.connected {
            return;
        }
        self.connected = true;
        self.hub.push(self.client, LinkEvent::Connected);
    }

    fn disconnect(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        self.hub.clear_subscriptions(self.client);
        self.hub.push(self.client, LinkEvent::Disconnected);
    }

    fn subscribe(&mut self, filter: &str) -> RequestId {
        let request = self.next_request();
        let success = self.connected && self.hub.subscribe(self.client, filter);
        self.hub
            .push(self.client, LinkEvent::SubscribeAck { request, success });
        request
    }

    fn publish(&mut self, topic: &str, payload: Vec<u8>) -> RequestId {
        let request = self.next_request();
        if !self.connected {
            // Best-effort transport: the message is lost and no ack will
            // arrive, the same as publishing into a dead connection.
            warn!(topic, "publish on a disconnected link dropped");
            return request;
        }
        self.hub.route(topic, &payload);
        self.hub.push(self.client, LinkEvent::PublishAck { request });
        request
    }

    fn poll(&mut self) -> Vec<LinkEvent> {
        self.hub.drain(self.client)
    }
}

impl Drop for InMemoryBroker {
    fn drop(&mut self) {
        self.hub.detach(self.client);
    }
}

impl std::fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBroker")
            .field("client", &self.client)
            .field("connected", &self.connected)
            .finish()
    }
}
