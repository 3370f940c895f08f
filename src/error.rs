//! Fault classification for the whole crate.

use std::error::Error;
use std::fmt;
use std::fmt::Display;

use crate::{ParticipantId, SessionId};

/// All error conditions this crate can report.
///
/// Coordinator handlers never propagate these to the transport layer; they
/// absorb them as logged no-ops at the handler boundary. The variants exist
/// so that internal code and external embedders (registry, admin surface)
/// can distinguish fault classes.
#[derive(Debug, Clone, PartialEq)]
pub enum SwarmError {
    /// A malformed or unexpected message shape, or an unknown `type`
    /// discriminator. The message is dropped without any state change.
    Protocol {
        /// What was wrong with the message.
        context: String,
    },
    /// An operation targeted a participant id that is not registered with
    /// the session.
    UnknownParticipant {
        /// The unknown participant id.
        participant: ParticipantId,
        /// The session that was asked.
        session: SessionId,
    },
    /// An operation targeted a session id the registry does not know.
    UnknownSession {
        /// The unknown session id.
        session: SessionId,
    },
    /// A weight vector's length disagrees with the configured answer count.
    /// The offending record is skipped and processing continues; this is a
    /// cross-version data-compatibility hazard, not a recoverable condition
    /// for the record itself.
    DataMismatch {
        /// Number of answers in the geometry.
        expected: usize,
        /// Number of components actually present.
        actual: usize,
    },
    /// A filesystem or archival failure while writing session artifacts.
    /// Already-flushed data is not rolled back; the session continues
    /// best-effort.
    Resource {
        /// What failed.
        context: String,
    },
}

impl Display for SwarmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwarmError::Protocol { context } => {
                write!(f, "Protocol error: {}", context)
            }
            SwarmError::UnknownParticipant {
                participant,
                session,
            } => {
                write!(
                    f,
                    "Participant [id={}] not found in Session [id={}]",
                    participant, session
                )
            }
            SwarmError::UnknownSession { session } => {
                write!(f, "Session [id={}] not found", session)
            }
            SwarmError::DataMismatch { expected, actual } => {
                write!(
                    f,
                    "Encoded position size: {}, Answer points size: {}",
                    actual, expected
                )
            }
            SwarmError::Resource { context } => {
                write!(f, "Resource error: {}", context)
            }
        }
    }
}

impl Error for SwarmError {}

impl From<std::io::Error> for SwarmError {
    fn from(err: std::io::Error) -> Self {
        SwarmError::Resource {
            context: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for SwarmError {
    fn from(err: serde_json::Error) -> Self {
        SwarmError::Protocol {
            context: err.to_string(),
        }
    }
}
