//! The per-session topic namespace.
//!
//! Every session owns the topic tree `session/{id}/...` with three logical
//! channels: the session-wide control channel, per-participant control
//! topics and per-participant update topics.

use crate::error::SwarmError;
use crate::{ParticipantId, SessionId};

/// One addressable channel inside a session's topic tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTopic {
    /// `session/{S}/control`: admin commands in, server broadcasts out.
    Control,
    /// `session/{S}/control/{P}`: participant-originated control messages.
    ParticipantControl(ParticipantId),
    /// `session/{S}/updates/{P}`: participant-originated position updates.
    Updates(ParticipantId),
}

impl SessionTopic {
    /// Renders the full topic string for `session`.
    #[must_use]
    pub fn render(&self, session: SessionId) -> String {
        match self {
            SessionTopic::Control => format!("session/{}/control", session),
            SessionTopic::ParticipantControl(p) => {
                format!("session/{}/control/{}", session, p)
            }
            SessionTopic::Updates(p) => format!("session/{}/updates/{}", session, p),
        }
    }

    /// Parses a topic string received on `session`'s subscription.
    ///
    /// # Errors
    ///
    /// [`SwarmError::Protocol`] for topics outside the session's tree, with
    /// an unknown channel name, or with a non-numeric participant segment.
    pub fn parse(session: SessionId, topic: &str) -> Result<SessionTopic, SwarmError> {
        let malformed = || SwarmError::Protocol {
            context: format!("unroutable topic '{}' for session {}", topic, session),
        };

        let mut parts = topic.split('/');
        if parts.next() != Some("session") {
            return Err(malformed());
        }
        let id_part = parts.next().ok_or_else(malformed)?;
        if id_part != session.to_string() {
            return Err(malformed());
        }

        match (parts.next(), parts.next(), parts.next()) {
            (Some("control"), None, _) => Ok(SessionTopic::Control),
            (Some("control"), Some(p), None) => {
                let id = p.parse::<u64>().map_err(|_| malformed())?;
                Ok(SessionTopic::ParticipantControl(ParticipantId::new(id)))
            }
            (Some("updates"), Some(p), None) => {
                let id = p.parse::<u64>().map_err(|_| malformed())?;
                Ok(SessionTopic::Updates(ParticipantId::new(id)))
            }
            _ => Err(malformed()),
        }
    }
}

/// The wildcard filter covering a session's whole topic tree.
#[must_use]
pub fn session_wildcard(session: SessionId) -> String {
    format!("session/{}/#", session)
}
