//! The per-session transport: one broker link, one topic tree.
//!
//! `SessionTransport` owns the session's [`BrokerLink`], tracks the
//! connection/subscription status machine and turns raw broker traffic into
//! typed [`Inbound`] events. Malformed payloads never escape this boundary:
//! they are logged and dropped so a hostile or buggy client cannot crash the
//! coordinator.

use std::collections::BTreeMap;

use tracing::{debug, trace, warn};

use crate::transport::link::{BrokerLink, LinkEvent, RequestId};
use crate::transport::messages::{self, AdminCommand, Broadcast, ClientControl, UpdateData};
use crate::transport::topic::{session_wildcard, SessionTopic};
use crate::{ParticipantId, SessionId};

/// Connection/subscription status of a session's broker binding.
///
/// `Subscribed` is reached only after the broker acknowledges the wildcard
/// subscribe for the session's topic tree; acknowledgements are correlated
/// by request id, not by arrival order.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LinkStatus {
    /// No broker connection.
    Disconnected,
    /// Connected, but the topic tree subscription is not confirmed yet.
    Connected,
    /// Connected and receiving the session's topic tree.
    Subscribed,
}

/// A decoded inbound message for the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Participant control message (`ready`/`leave`).
    Control {
        /// Originating participant, taken from the topic.
        participant: ParticipantId,
        /// The decoded message.
        message: ClientControl,
    },
    /// Session-wide administrative command.
    Admin(AdminCommand),
    /// Participant position update.
    Update {
        /// Originating participant, taken from the topic.
        participant: ParticipantId,
        /// The decoded update payload.
        data: UpdateData,
    },
}

/// Callback invoked once the broker confirms a publish (`true`) or the
/// connection drops before confirmation can arrive (`false`). Never invoked
/// before either outcome is known.
pub type AckCallback = Box<dyn FnOnce(bool) + Send>;

/// Binds one session to the broker under its topic namespace.
pub struct SessionTransport {
    session: SessionId,
    link: Box<dyn BrokerLink>,
    status: LinkStatus,
    /// The outstanding wildcard subscribe for the session tree, if any.
    tree_subscribe: Option<RequestId>,
    /// Outstanding publish-acknowledgement callbacks keyed by request id.
    pending_acks: BTreeMap<RequestId, AckCallback>,
}

impl SessionTransport {
    /// Creates a transport for `session` over `link`. No traffic flows
    /// until [`connect`](Self::connect) is called.
    #[must_use]
    pub fn new(session: SessionId, link: Box<dyn BrokerLink>) -> Self {
        SessionTransport {
            session,
            link,
            status: LinkStatus::Disconnected,
            tree_subscribe: None,
            pending_acks: BTreeMap::new(),
        }
    }

    /// The session this transport serves.
    #[inline]
    #[must_use]
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Current link status.
    #[inline]
    #[must_use]
    pub fn status(&self) -> LinkStatus {
        self.status
    }

    /// Starts connecting. The status transitions to
    /// [`LinkStatus::Connected`] and then [`LinkStatus::Subscribed`] across
    /// subsequent [`poll`](Self::poll) calls as broker acknowledgements
    /// arrive; the caller is never suspended.
    pub fn connect(&mut self) {
        self.link.connect();
    }

    /// Closes the connection.
    pub fn disconnect(&mut self) {
        self.link.disconnect();
    }

    /// Queues `payload` for publication on `topic`. Fire-and-forget from
    /// the caller's perspective: the message is queued before this returns,
    /// and `on_ack`, if given, runs only once the broker confirms (or the
    /// link dies first). While the link is down no confirmation can ever
    /// arrive, so `on_ack` is failed immediately instead of being parked.
    pub fn publish(&mut self, topic: SessionTopic, payload: Vec<u8>, on_ack: Option<AckCallback>) {
        let request = self.link.publish(&topic.render(self.session), payload);
        if let Some(callback) = on_ack {
            if self.status == LinkStatus::Disconnected {
                callback(false);
            } else {
                self.pending_acks.insert(request, callback);
            }
        }
    }

    /// Serializes `broadcast` and publishes it on the session-wide control
    /// channel. Serialization failures are logged and dropped; a broadcast
    /// must never take the coordinator down.
    pub fn broadcast(&mut self, broadcast: &Broadcast, on_ack: Option<AckCallback>) {
        match broadcast.to_payload() {
            Ok(payload) => self.publish(SessionTopic::Control, payload, on_ack),
            Err(err) => warn!(session = %self.session, %err, "dropping unencodable broadcast"),
        }
    }

    /// Drains the link and returns every decoded inbound message, in
    /// arrival order. Drives the status machine as a side effect.
    pub fn poll(&mut self) -> Vec<Inbound> {
        let mut inbound = Vec::new();
        for event in self.link.poll() {
            match event {
                LinkEvent::Connected => {
                    self.status = LinkStatus::Connected;
                    let filter = session_wildcard(self.session);
                    self.tree_subscribe = Some(self.link.subscribe(&filter));
                    trace!(session = %self.session, filter, "connected, subscribing to session tree");
                }
                LinkEvent::Disconnected => {
                    self.status = LinkStatus::Disconnected;
                    self.tree_subscribe = None;
                    // Confirmation can no longer arrive for anything
                    // outstanding; report failure exactly once.
                    for (_, callback) in std::mem::take(&mut self.pending_acks) {
                        callback(false);
                    }
                }
                LinkEvent::SubscribeAck { request, success } => {
                    if self.tree_subscribe == Some(request) {
                        self.tree_subscribe = None;
                        if success && self.status == LinkStatus::Connected {
                            self.status = LinkStatus::Subscribed;
                        } else if !success {
                            warn!(session = %self.session, "session tree subscribe rejected");
                        }
                    }
                }
                LinkEvent::PublishAck { request } => {
                    if let Some(callback) = self.pending_acks.remove(&request) {
                        callback(true);
                    }
                }
                LinkEvent::Message { topic, payload } => {
                    match self.decode(&topic, &payload) {
                        Ok(Some(message)) => inbound.push(message),
                        // Self-delivered broadcast, skipped by design.
                        Ok(None) => trace!(session = %self.session, topic, "skipping own broadcast"),
                        Err(err) => {
                            debug!(session = %self.session, topic, %err, "dropping inbound message");
                        }
                    }
                }
            }
        }
        inbound
    }

    fn decode(
        &self,
        topic: &str,
        payload: &[u8],
    ) -> Result<Option<Inbound>, crate::SwarmError> {
        match SessionTopic::parse(self.session, topic)? {
            SessionTopic::Control => {
                Ok(messages::decode_admin(payload)?.map(Inbound::Admin))
            }
            SessionTopic::ParticipantControl(participant) => {
                let message = messages::decode_client_control(payload)?;
                Ok(Some(Inbound::Control {
                    participant,
                    message,
                }))
            }
            SessionTopic::Updates(participant) => {
                let data = messages::decode_update(payload)?;
                Ok(Some(Inbound::Update { participant, data }))
            }
        }
    }
}

impl std::fmt::Debug for SessionTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTransport")
            .field("session", &self.session)
            .field("status", &self.status)
            .field("pending_acks", &self.pending_acks.len())
            .finish()
    }
}
