//! Participant identity and status.

use serde::{Deserialize, Serialize};

use crate::ParticipantId;

/// Lifecycle status of one joined client.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantStatus {
    /// Joined the session but not yet ready for the active question.
    Joined,
    /// Configured the active question and waiting for the start.
    Ready,
    /// Reserved for future use; nothing transitions into this state today.
    Active,
    /// Left or lost; the participant stays registered so its id remains
    /// referenceable in historical logs.
    Offline,
}

/// One remote client identified by a username.
///
/// Owned exclusively by one session coordinator once registered; status
/// transitions are the only permitted outside mutation, and they go through
/// the coordinator's handlers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Participant {
    /// Process-wide unique id, never reused.
    pub id: ParticipantId,
    /// The username the client joined with.
    pub username: String,
    /// Current lifecycle status.
    pub status: ParticipantStatus,
}

impl Participant {
    /// Creates a freshly joined participant.
    #[must_use]
    pub fn new(id: ParticipantId, username: impl Into<String>) -> Self {
        Participant {
            id,
            username: username.into(),
            status: ParticipantStatus::Joined,
        }
    }

    /// Overwrites the status. Returns `true` if the status actually
    /// changed, so the owner can skip redundant notifications.
    pub fn set_status(&mut self, status: ParticipantStatus) -> bool {
        if self.status == status {
            return false;
        }
        self.status = status;
        true
    }

    /// Marks the participant offline without removing it from the session.
    pub fn mark_offline(&mut self) -> bool {
        self.set_status(ParticipantStatus::Offline)
    }

    /// Case-insensitive username comparison used for join/rejoin matching.
    #[must_use]
    pub fn matches_username(&self, username: &str) -> bool {
        self.username.eq_ignore_ascii_case(username)
    }
}
