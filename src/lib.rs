//! # swarm-session
//!
//! `swarm-session` coordinates real-time, multi-participant swarm decision
//! sessions: a facilitator presents a question with discrete answer options,
//! remote participants continuously publish a 2D cursor position over a
//! low-latency pub/sub channel, and the server aggregates, timestamps and
//! logs those inputs so they can later be reconstructed as per-participant
//! trajectories normalized against the answer geometry.
//!
//! The crate is transport-agnostic: sessions talk to the broker through the
//! [`BrokerLink`] trait, which is poll-driven and never blocks the caller.
//! An in-memory loopback broker ([`InMemoryBroker`]) is provided for tests
//! and single-process deployments.
//!
//! Typical embedding:
//!
//! ```
//! use swarm_session::{BrokerHub, SessionRegistry};
//! use std::sync::Arc;
//!
//! let registry = SessionRegistry::new(Arc::new(BrokerHub::new()));
//! let session = registry.create_session();
//! let mut coordinator = session.lock();
//! coordinator.connect();
//! coordinator.poll(); // drive transport + dispatch inbound messages
//! ```
//!
//! The administrative HTTP surface, broker process supervision and the
//! management UI live outside this crate; they interact with it through
//! [`SessionRegistry`], [`ContentStore`] and [`Archiver`].

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

use serde::{Deserialize, Serialize};

pub mod content;
pub mod error;
pub mod geometry;
pub mod storage;
pub mod trajectory;

/// Session lifecycle, participants and the coordination registry.
pub mod sessions {
    pub mod coordinator;
    pub mod events;
    pub mod participant;
    pub mod registry;
}

/// Pub/sub protocol framing: topics, wire messages and the broker binding.
pub mod transport {
    pub mod link;
    pub mod messages;
    pub mod session_transport;
    pub mod topic;
}

pub use content::{Collection, ContentStore, DirContentStore, EmptyContentStore, Question};
pub use error::SwarmError;
pub use geometry::{AnswerGeometry, Point, WeightVec};
pub use sessions::coordinator::{SessionCoordinator, SessionState, StopMode};
pub use sessions::events::{EventDrain, SessionEvent};
pub use sessions::participant::{Participant, ParticipantStatus};
pub use sessions::registry::{IdSource, SessionRegistry};
pub use storage::{Archiver, NoopArchiver, SessionStorage};
pub use trajectory::TrajectoryBuilder;
pub use transport::link::{
    BrokerConnector, BrokerHub, BrokerLink, InMemoryBroker, LinkEvent, RequestId,
};
pub use transport::messages::{AdminCommand, Broadcast, ClientControl, UpdateData};
pub use transport::session_transport::{Inbound, LinkStatus, SessionTransport};

// #############
// # CONSTANTS #
// #############

/// Radius of the answer polygon in screen units, matching the client canvas.
pub const DEFAULT_RADIUS: f64 = 340.0;

/// Number of answer options a question carries unless specified otherwise.
pub const DEFAULT_NUM_ANSWERS: usize = 6;

/// Session duration in seconds when none has been configured.
pub const DEFAULT_DURATION_SECS: u32 = 10;

/// Identifies one session for the lifetime of the process.
///
/// Allocated by [`IdSource`]; never reused within a process lifetime, so ids
/// remain meaningful in historical log files.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct SessionId(u64);

impl SessionId {
    /// Creates a `SessionId` from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        SessionId(id)
    }

    /// Returns the underlying value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one participant for the lifetime of the process.
///
/// The value `0` is reserved as a sentinel for non-participant log rows and
/// is never allocated to a real participant.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct ParticipantId(u64);

impl ParticipantId {
    /// The reserved sentinel id used for non-participant log rows.
    pub const SENTINEL: ParticipantId = ParticipantId(0);

    /// Creates a `ParticipantId` from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        ParticipantId(id)
    }

    /// Returns the underlying value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns `true` if this is the reserved sentinel id.
    #[inline]
    #[must_use]
    pub const fn is_sentinel(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Milliseconds since the Unix epoch.
pub(crate) fn now_epoch_ms() -> i64 {
    match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_millis() as i64,
        // A clock before 1970 degrades session timing but must not panic
        // inside a message handler.
        Err(_) => 0,
    }
}
