//! Process-wide session bookkeeping.
//!
//! The registry is the composition root: it owns the broker connector, the
//! content store, the storage root and the id allocator, and wires a fresh
//! [`SessionCoordinator`] out of them on demand. Coordinators are handed out
//! behind `Arc<Mutex<..>>` so an embedding server can drive each one from
//! its own timer or task.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::content::{ContentStore, EmptyContentStore};
use crate::sessions::coordinator::SessionCoordinator;
use crate::storage::{Archiver, NoopArchiver, SessionStorage};
use crate::trajectory::TrajectoryBuilder;
use crate::transport::link::BrokerConnector;
use crate::transport::session_transport::SessionTransport;
use crate::{ParticipantId, SessionId};

/// Allocates process-unique session and participant ids.
///
/// Ids are never reused within a process lifetime; participant ids start at
/// one because zero is the reserved sentinel.
#[derive(Debug, Default)]
pub struct IdSource {
    sessions: AtomicU64,
    participants: AtomicU64,
}

impl IdSource {
    /// A source with no ids handed out yet.
    #[must_use]
    pub fn new() -> Self {
        IdSource::default()
    }

    /// The next session id.
    #[must_use]
    pub fn next_session(&self) -> SessionId {
        SessionId::new(self.sessions.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// The next participant id. Never the sentinel.
    #[must_use]
    pub fn next_participant(&self) -> ParticipantId {
        ParticipantId::new(self.participants.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// Creates and tracks the sessions of one server process.
pub struct SessionRegistry {
    connector: Arc<dyn BrokerConnector>,
    ids: Arc<IdSource>,
    content: Arc<dyn ContentStore>,
    archiver: Arc<dyn Archiver>,
    storage_root: PathBuf,
    trajectories_dir: PathBuf,
    sessions: Mutex<BTreeMap<SessionId, Arc<Mutex<SessionCoordinator>>>>,
}

impl SessionRegistry {
    /// A registry over `connector` with default collaborators: run
    /// directories under `session_log/`, trajectories under
    /// `trajectories/`, no content catalog and no archiver.
    #[must_use]
    pub fn new(connector: Arc<dyn BrokerConnector>) -> Self {
        SessionRegistry {
            connector,
            ids: Arc::new(IdSource::new()),
            content: Arc::new(EmptyContentStore),
            archiver: Arc::new(NoopArchiver),
            storage_root: PathBuf::from("session_log"),
            trajectories_dir: PathBuf::from("trajectories"),
            sessions: Mutex::new(BTreeMap::new()),
        }
    }

    /// Replaces the content store new sessions resolve questions against.
    #[must_use]
    pub fn with_content_store(mut self, content: Arc<dyn ContentStore>) -> Self {
        self.content = content;
        self
    }

    /// Replaces the archiver invoked on finished run directories.
    #[must_use]
    pub fn with_archiver(mut self, archiver: Arc<dyn Archiver>) -> Self {
        self.archiver = archiver;
        self
    }

    /// Places run directories under `root` instead of `session_log/`.
    #[must_use]
    pub fn with_storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.storage_root = root.into();
        self
    }

    /// Places derived trajectory files under `dir` instead of
    /// `trajectories/`.
    #[must_use]
    pub fn with_trajectories_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.trajectories_dir = dir.into();
        self
    }

    /// The shared id allocator.
    #[must_use]
    pub fn ids(&self) -> Arc<IdSource> {
        Arc::clone(&self.ids)
    }

    /// Creates a new session in the Waiting state with a fresh broker link.
    /// The caller still has to [`connect`](SessionCoordinator::connect) and
    /// drive it.
    pub fn create_session(&self) -> Arc<Mutex<SessionCoordinator>> {
        let id = self.ids.next_session();
        let transport = SessionTransport::new(id, self.connector.open(id));
        let coordinator = SessionCoordinator::new(
            id,
            transport,
            Arc::clone(&self.ids),
            Arc::clone(&self.content),
            SessionStorage::new(self.storage_root.clone()),
            Arc::clone(&self.archiver),
            TrajectoryBuilder::with_defaults(self.trajectories_dir.clone()),
        );
        let session = Arc::new(Mutex::new(coordinator));
        self.sessions.lock().insert(id, Arc::clone(&session));
        debug!(session = %id, "session created");
        session
    }

    /// Looks up a live session by id.
    #[must_use]
    pub fn get(&self, id: SessionId) -> Option<Arc<Mutex<SessionCoordinator>>> {
        self.sessions.lock().get(&id).cloned()
    }

    /// Ids of all live sessions, in creation order.
    #[must_use]
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.lock().keys().copied().collect()
    }

    /// Drops a session from the registry. Returns `false` for unknown ids.
    /// Outstanding `Arc` handles keep the coordinator alive until released.
    pub fn remove_session(&self, id: SessionId) -> bool {
        let removed = self.sessions.lock().remove(&id).is_some();
        if removed {
            debug!(session = %id, "session removed");
        }
        removed
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.sessions.lock().len())
            .field("storage_root", &self.storage_root)
            .finish()
    }
}
