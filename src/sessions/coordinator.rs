//! The session coordinator.
//!
//! One `SessionCoordinator` owns everything belonging to a single decision
//! session: the participant roster, the broker transport, the active
//! question selection and, while a run is live, the on-disk log. All inbound
//! traffic is applied under the coordinator's exclusive borrow inside
//! [`poll`](SessionCoordinator::poll); there is no interior locking and no
//! handler reentrancy.
//!
//! The status machine is deliberately small:
//!
//! ```text
//! Waiting --start(duration)--> Active --stop(mode)--> Waiting
//! ```
//!
//! The countdown itself is cooperative. The coordinator computes and
//! broadcasts the target end time but never enforces it; an external timer
//! (or an admin command) calls [`stop`](SessionCoordinator::stop).

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::content::ContentStore;
use crate::geometry::sanitize_weights;
use crate::sessions::events::{EventDrain, SessionEvent};
use crate::sessions::participant::{Participant, ParticipantStatus};
use crate::sessions::registry::IdSource;
use crate::storage::{self, Archiver, RunLog, SessionMeta, SessionStorage};
use crate::trajectory::TrajectoryBuilder;
use crate::transport::messages::{AdminCommand, Broadcast, ClientControl, UpdateData};
use crate::transport::session_transport::{Inbound, LinkStatus, SessionTransport};
use crate::{now_epoch_ms, ParticipantId, SessionId, SwarmError, DEFAULT_DURATION_SECS};

/// Maximum number of pending session events. The oldest event is dropped
/// once the limit is reached.
const MAX_EVENT_QUEUE_SIZE: usize = 100;

/// Lifecycle status of a session.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Accepting joins and configuration; no countdown running.
    Waiting,
    /// A countdown is running and position updates are being recorded.
    Active,
}

/// How a stop request should treat the recorded run.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum StopMode {
    /// Finalize the run artifacts only.
    #[default]
    Plain,
    /// Finalize and additionally derive trajectory files from the log.
    Trajectories,
}

impl StopMode {
    /// Parses the wire `mode` string; anything but `"trajectories"` is a
    /// plain stop.
    #[must_use]
    pub fn parse(mode: &str) -> Self {
        if mode.eq_ignore_ascii_case("trajectories") {
            StopMode::Trajectories
        } else {
            StopMode::Plain
        }
    }

    /// The wire representation used in the `stop` broadcast.
    #[must_use]
    pub fn as_wire(self) -> &'static str {
        match self {
            StopMode::Plain => "",
            StopMode::Trajectories => "trajectories",
        }
    }
}

/// Coordinates one multi-participant decision session.
pub struct SessionCoordinator {
    id: SessionId,
    state: SessionState,
    transport: SessionTransport,
    last_link_status: LinkStatus,
    participants: BTreeMap<ParticipantId, Participant>,
    ids: Arc<IdSource>,
    content: Arc<dyn ContentStore>,
    storage: SessionStorage,
    archiver: Arc<dyn Archiver>,
    trajectories: TrajectoryBuilder,
    active_collection: Option<String>,
    active_question: Option<String>,
    duration_secs: u32,
    target_end_epoch_ms: Option<i64>,
    /// Latest raw sample line per participant, exactly as logged.
    pending_answers: BTreeMap<ParticipantId, String>,
    run: Option<RunLog>,
    events: VecDeque<SessionEvent>,
}

impl SessionCoordinator {
    pub(crate) fn new(
        id: SessionId,
        transport: SessionTransport,
        ids: Arc<IdSource>,
        content: Arc<dyn ContentStore>,
        storage: SessionStorage,
        archiver: Arc<dyn Archiver>,
        trajectories: TrajectoryBuilder,
    ) -> Self {
        SessionCoordinator {
            id,
            state: SessionState::Waiting,
            transport,
            last_link_status: LinkStatus::Disconnected,
            participants: BTreeMap::new(),
            ids,
            content,
            storage,
            archiver,
            trajectories,
            active_collection: None,
            active_question: None,
            duration_secs: DEFAULT_DURATION_SECS,
            target_end_epoch_ms: None,
            pending_answers: BTreeMap::new(),
            run: None,
            events: VecDeque::new(),
        }
    }

    /// The session id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current lifecycle status.
    #[inline]
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Current broker link status.
    #[inline]
    #[must_use]
    pub fn link_status(&self) -> LinkStatus {
        self.transport.status()
    }

    /// The currently selected `(collection, question)` pair, if any.
    #[must_use]
    pub fn active_question(&self) -> Option<(&str, &str)> {
        match (&self.active_collection, &self.active_question) {
            (Some(collection), Some(question)) => Some((collection, question)),
            _ => None,
        }
    }

    /// The duration the next (or current) run uses, in seconds.
    #[inline]
    #[must_use]
    pub fn duration_secs(&self) -> u32 {
        self.duration_secs
    }

    /// Changes the duration used by the next run. Ignored while Active.
    pub fn set_duration(&mut self, duration_secs: u32) {
        if self.state == SessionState::Active {
            warn!(session = %self.id, "ignoring duration change while active");
            return;
        }
        self.duration_secs = duration_secs;
    }

    /// Registered participants, including offline ones, in id order.
    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    /// Number of participants currently Ready.
    #[must_use]
    pub fn ready_count(&self) -> usize {
        self.count_status(ParticipantStatus::Ready)
    }

    /// Number of participants currently Offline.
    #[must_use]
    pub fn offline_count(&self) -> usize {
        self.count_status(ParticipantStatus::Offline)
    }

    fn count_status(&self, status: ParticipantStatus) -> usize {
        self.participants
            .values()
            .filter(|p| p.status == status)
            .count()
    }

    /// Milliseconds until the current run's target end, if one is set.
    /// Never negative; an overdue run reports zero.
    #[must_use]
    pub fn remaining_ms(&self) -> Option<i64> {
        self.target_end_epoch_ms
            .map(|target| (target - now_epoch_ms()).max(0))
    }

    /// Starts connecting to the broker. Drive with
    /// [`poll`](Self::poll); the subscription is confirmed asynchronously.
    pub fn connect(&mut self) {
        self.transport.connect();
    }

    /// Closes the broker connection.
    pub fn disconnect(&mut self) {
        self.transport.disconnect();
    }

    /// Drains the transport and applies every inbound message.
    ///
    /// Handlers never fail the poll: invalid references and stale traffic
    /// are logged and dropped.
    pub fn poll(&mut self) {
        let inbound = self.transport.poll();
        let status = self.transport.status();
        if status != self.last_link_status {
            self.last_link_status = status;
            self.push_event(SessionEvent::TransportStatusChanged(status));
        }
        for message in inbound {
            self.dispatch(message);
        }
    }

    fn dispatch(&mut self, message: Inbound) {
        match message {
            Inbound::Control {
                participant,
                message: ClientControl::Ready,
            } => self.on_participant_ready(participant),
            Inbound::Control {
                participant,
                message: ClientControl::Leave,
            } => self.remove_participant(participant),
            Inbound::Admin(AdminCommand::Setup {
                collection_id,
                question_id,
            }) => self.set_active_question(&collection_id, &question_id),
            Inbound::Admin(AdminCommand::Start { duration }) => self.start(duration),
            Inbound::Admin(AdminCommand::Stop { mode }) => self.stop(StopMode::parse(&mode)),
            Inbound::Update { participant, data } => {
                self.on_participant_update(participant, data);
            }
        }
    }

    /// Registers `username`, reusing the existing registration when the
    /// name matches case-insensitively. Returns the participant's id.
    ///
    /// A rejoin while Offline reactivates the participant as Joined; a
    /// rejoin in any other status returns the registration unchanged.
    pub fn add_participant(&mut self, username: &str) -> ParticipantId {
        if let Some(existing) = self
            .participants
            .values_mut()
            .find(|p| p.matches_username(username))
        {
            let id = existing.id;
            if existing.status == ParticipantStatus::Offline
                && existing.set_status(ParticipantStatus::Joined)
            {
                debug!(session = %self.id, participant = %id, username, "participant rejoined");
                self.push_event(SessionEvent::ParticipantStatusChanged {
                    participant: id,
                    status: ParticipantStatus::Joined,
                });
            }
            return id;
        }

        let id = self.ids.next_participant();
        self.participants.insert(id, Participant::new(id, username));
        debug!(session = %self.id, participant = %id, username, "participant joined");
        self.push_event(SessionEvent::ParticipantStatusChanged {
            participant: id,
            status: ParticipantStatus::Joined,
        });
        id
    }

    /// Marks a participant Offline. The registration is kept so the id
    /// stays resolvable in historical logs. Unknown ids are logged no-ops.
    pub fn remove_participant(&mut self, id: ParticipantId) {
        let Some(participant) = self.participants.get_mut(&id) else {
            self.log_unknown_participant(id, "remove");
            return;
        };
        if participant.mark_offline() {
            debug!(session = %self.id, participant = %id, "participant offline");
            self.push_event(SessionEvent::ParticipantStatusChanged {
                participant: id,
                status: ParticipantStatus::Offline,
            });
        }
    }

    /// Selects the active question, resets every non-Offline participant to
    /// Joined and broadcasts `setup` so clients re-establish readiness.
    ///
    /// A selection the [`ContentStore`] cannot resolve is still applied and
    /// broadcast; clients carrying their own content may know it. The miss
    /// is logged.
    pub fn set_active_question(&mut self, collection_id: &str, question_id: &str) {
        if self
            .content
            .resolve(collection_id, question_id)
            .is_none()
        {
            warn!(
                session = %self.id,
                collection = collection_id,
                question = question_id,
                "selected question not found in content store"
            );
        }

        let mut reset = Vec::new();
        for participant in self.participants.values_mut() {
            if participant.status != ParticipantStatus::Offline
                && participant.set_status(ParticipantStatus::Joined)
            {
                reset.push(participant.id);
            }
        }
        for id in reset {
            self.push_event(SessionEvent::ParticipantStatusChanged {
                participant: id,
                status: ParticipantStatus::Joined,
            });
        }

        self.active_collection = Some(collection_id.to_string());
        self.active_question = Some(question_id.to_string());
        self.push_event(SessionEvent::QuestionChanged {
            collection_id: collection_id.to_string(),
            question_id: question_id.to_string(),
        });
        self.transport.broadcast(
            &Broadcast::Setup {
                collection_id: collection_id.to_string(),
                question_id: question_id.to_string(),
            },
            None,
        );
    }

    /// Handles a `ready` from a participant. Joined participants become
    /// Ready; on that transition, while a run is live, the participant
    /// additionally receives a `started` broadcast carrying the target end
    /// time and the accumulated position snapshot, so late joiners can
    /// catch up mid-run. A `ready` without a Joined → Ready transition
    /// (duplicate, or from an Offline participant) is a no-op.
    pub fn on_participant_ready(&mut self, id: ParticipantId) {
        let Some(participant) = self.participants.get_mut(&id) else {
            self.log_unknown_participant(id, "ready");
            return;
        };
        if participant.status != ParticipantStatus::Joined
            || !participant.set_status(ParticipantStatus::Ready)
        {
            return;
        }
        debug!(session = %self.id, participant = %id, "participant ready");
        self.push_event(SessionEvent::ParticipantStatusChanged {
            participant: id,
            status: ParticipantStatus::Ready,
        });

        if self.state == SessionState::Active {
            if let Some(target_date) = self.target_end_epoch_ms {
                let positions = self
                    .pending_answers
                    .iter()
                    .map(|(pid, sample)| (pid.to_string(), sample.clone()))
                    .collect();
                self.transport.broadcast(
                    &Broadcast::Started {
                        target_date,
                        positions,
                    },
                    None,
                );
            }
        }
    }

    /// Begins the answering countdown.
    ///
    /// Requires Waiting with a question selected; anything else is a logged
    /// no-op. Opens the run's log directory and broadcasts `start`. A
    /// storage fault is logged and the run proceeds without disk recording.
    pub fn start(&mut self, duration_secs: u32) {
        if self.state != SessionState::Waiting {
            warn!(session = %self.id, "ignoring start: already active");
            return;
        }
        let Some((collection, question)) = self.active_question() else {
            warn!(session = %self.id, "ignoring start: no question selected");
            return;
        };
        let (collection, question) = (collection.to_string(), question.to_string());

        self.duration_secs = duration_secs;
        let target = now_epoch_ms() + i64::from(duration_secs) * 1000;
        self.target_end_epoch_ms = Some(target);

        match self.storage.begin_run(SessionMeta {
            time: String::new(),
            id: self.id,
            collection: Some(collection),
            question: Some(question),
            duration: duration_secs,
            participants: None,
        }) {
            Ok(run) => {
                debug!(session = %self.id, dir = %run.dir().display(), "run directory opened");
                self.run = Some(run);
            }
            Err(err) => {
                warn!(session = %self.id, %err, "run starts without disk recording");
            }
        }

        self.state = SessionState::Active;
        self.push_event(SessionEvent::StatusChanged(SessionState::Active));
        self.push_event(SessionEvent::Started {
            target_end_epoch_ms: target,
        });
        self.transport.broadcast(
            &Broadcast::Start {
                duration: duration_secs,
            },
            None,
        );
    }

    /// Ends the active period.
    ///
    /// Finalizes the run artifacts, optionally derives trajectories,
    /// archives the run directory, broadcasts `stop` and returns to
    /// Waiting. Only valid while Active; otherwise a logged no-op.
    /// Storage and archival faults are logged and never block the
    /// transition.
    pub fn stop(&mut self, mode: StopMode) {
        if self.state != SessionState::Active {
            warn!(session = %self.id, "ignoring stop: not active");
            return;
        }
        self.target_end_epoch_ms = None;

        if let Some(run) = self.run.take() {
            let snapshot: Vec<Participant> = self.participants.values().cloned().collect();
            match run.finalize(snapshot, &self.pending_answers) {
                Ok(dir) => {
                    if mode == StopMode::Trajectories {
                        if let Err(err) = self.trajectories.derive(&dir) {
                            warn!(session = %self.id, %err, "trajectory derivation failed");
                        }
                    }
                    storage::archive_best_effort(self.archiver.as_ref(), &dir);
                }
                Err(err) => warn!(session = %self.id, %err, "finalizing run artifacts failed"),
            }
        }
        self.pending_answers.clear();

        self.transport.broadcast(
            &Broadcast::Stop {
                mode: mode.as_wire().to_string(),
            },
            None,
        );
        self.state = SessionState::Waiting;
        self.push_event(SessionEvent::StatusChanged(SessionState::Waiting));
        self.push_event(SessionEvent::Stopped);
    }

    /// Records one position update.
    ///
    /// Empty positions are dropped, components are clamped to be
    /// non-negative and rescaled when they sum past one, and the sample is
    /// appended to the run log and cached as the participant's latest
    /// answer. Updates while Waiting are stale traffic and ignored.
    ///
    /// The reserved id `0` is accepted without a registration; it carries
    /// injected reference samples that the trajectory pass filters out.
    pub fn on_participant_update(&mut self, id: ParticipantId, data: UpdateData) {
        if self.state != SessionState::Active {
            trace!(session = %self.id, participant = %id, "ignoring update while waiting");
            return;
        }
        if !id.is_sentinel() && !self.participants.contains_key(&id) {
            self.log_unknown_participant(id, "update");
            return;
        }
        if data.position.is_empty() {
            return;
        }

        let mut weights = data.position;
        sanitize_weights(&mut weights);

        if let Some(run) = &mut self.run {
            if let Err(err) = run.append_sample(id, data.time_stamp, &weights) {
                warn!(session = %self.id, %err, "dropping sample: log write failed");
                return;
            }
        }
        self.pending_answers
            .insert(id, storage::sample_line(data.time_stamp, &weights));
    }

    /// Drains and returns all pending session events.
    pub fn events(&mut self) -> EventDrain<'_> {
        EventDrain::new(&mut self.events)
    }

    fn push_event(&mut self, event: SessionEvent) {
        if self.events.len() >= MAX_EVENT_QUEUE_SIZE {
            // Keeps the queue bounded when nobody drains it.
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    fn log_unknown_participant(&self, id: ParticipantId, operation: &str) {
        let err = SwarmError::UnknownParticipant {
            participant: id,
            session: self.id,
        };
        warn!(session = %self.id, operation, %err, "dropping request");
    }
}

impl std::fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("participants", &self.participants.len())
            .field("active_question", &self.active_question)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::content::EmptyContentStore;
    use crate::storage::NoopArchiver;
    use crate::transport::link::{BrokerHub, BrokerLink, InMemoryBroker, LinkEvent};
    use serde_json::Value;

    const SESSION: SessionId = SessionId::new(1);

    struct Harness {
        coordinator: SessionCoordinator,
        client: InMemoryBroker,
        _root: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let root = tempfile::tempdir().unwrap();
        let hub = BrokerHub::new();
        let transport =
            SessionTransport::new(SESSION, Box::new(InMemoryBroker::attached(&hub)));
        let mut coordinator = SessionCoordinator::new(
            SESSION,
            transport,
            Arc::new(IdSource::new()),
            Arc::new(EmptyContentStore),
            SessionStorage::new(root.path().join("session_log")),
            Arc::new(NoopArchiver),
            TrajectoryBuilder::with_defaults(root.path().join("trajectories")),
        );
        let mut client = InMemoryBroker::attached(&hub);
        client.connect();
        client.subscribe("session/1/control");
        client.poll();
        coordinator.connect();
        coordinator.poll();
        coordinator.poll();
        assert_eq!(coordinator.link_status(), LinkStatus::Subscribed);
        coordinator.events().for_each(drop);
        Harness {
            coordinator,
            client,
            _root: root,
        }
    }

    fn broadcasts(client: &mut InMemoryBroker) -> Vec<Value> {
        client
            .poll()
            .into_iter()
            .filter_map(|event| match event {
                LinkEvent::Message { topic, payload } if topic == "session/1/control" => {
                    Some(serde_json::from_slice(&payload).unwrap())
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn add_participant_allocates_and_rejoins_case_insensitively() {
        let mut h = harness();
        let alice = h.coordinator.add_participant("Alice");
        let bob = h.coordinator.add_participant("bob");
        assert_ne!(alice, bob);

        // Same name, different case: same registration.
        assert_eq!(h.coordinator.add_participant("ALICE"), alice);

        h.coordinator.remove_participant(alice);
        assert_eq!(h.coordinator.offline_count(), 1);

        // Rejoin reactivates as Joined under the same id.
        assert_eq!(h.coordinator.add_participant("alice"), alice);
        assert_eq!(h.coordinator.offline_count(), 0);
    }

    #[test]
    fn remove_unknown_participant_is_a_no_op() {
        let mut h = harness();
        h.coordinator.remove_participant(ParticipantId::new(99));
        assert_eq!(h.coordinator.participants().count(), 0);
    }

    #[test]
    fn ready_moves_joined_to_ready_only() {
        let mut h = harness();
        let alice = h.coordinator.add_participant("alice");
        h.coordinator.on_participant_ready(alice);
        assert_eq!(h.coordinator.ready_count(), 1);

        h.coordinator.remove_participant(alice);
        // Offline does not become Ready.
        h.coordinator.on_participant_ready(alice);
        assert_eq!(h.coordinator.ready_count(), 0);
    }

    #[test]
    fn setup_resets_participants_and_broadcasts() {
        let mut h = harness();
        let alice = h.coordinator.add_participant("alice");
        h.coordinator.on_participant_ready(alice);
        broadcasts(&mut h.client);

        h.coordinator.set_active_question("c1", "q1");
        assert_eq!(h.coordinator.ready_count(), 0);
        assert_eq!(h.coordinator.active_question(), Some(("c1", "q1")));

        let sent = broadcasts(&mut h.client);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["type"], "setup");
        assert_eq!(sent[0]["question_id"], "q1");
        assert_eq!(sent[0]["origin"], "server");
    }

    #[test]
    fn start_requires_waiting_and_a_question() {
        let mut h = harness();
        h.coordinator.start(30);
        assert_eq!(h.coordinator.state(), SessionState::Waiting);

        h.coordinator.set_active_question("c1", "q1");
        h.coordinator.start(30);
        assert_eq!(h.coordinator.state(), SessionState::Active);
        assert!(h.coordinator.remaining_ms().unwrap() <= 30_000);

        // A second start while active is ignored.
        h.coordinator.start(60);
        assert_eq!(h.coordinator.duration_secs(), 30);
    }

    #[test]
    fn stop_while_waiting_is_ignored() {
        let mut h = harness();
        h.coordinator.stop(StopMode::Plain);
        assert!(broadcasts(&mut h.client)
            .iter()
            .all(|msg| msg["type"] != "stop"));
    }

    #[test]
    fn updates_are_sanitized_logged_and_cached() {
        let mut h = harness();
        let alice = h.coordinator.add_participant("alice");
        h.coordinator.set_active_question("c1", "q1");
        h.coordinator.start(30);

        h.coordinator.on_participant_update(
            alice,
            UpdateData {
                position: vec![-0.1, 0.4, 0.8, 0.0, 0.0, 0.0],
                time_stamp: 1000.0,
            },
        );
        // Clamped to zero and rescaled to sum one.
        let sum = 0.0 + 0.4 + 0.8;
        let expected = format!("1000,0,{},{},0,0,0", 0.4 / sum, 0.8 / sum);
        assert_eq!(h.coordinator.pending_answers[&alice], expected);
    }

    #[test]
    fn updates_while_waiting_are_ignored() {
        let mut h = harness();
        let alice = h.coordinator.add_participant("alice");
        h.coordinator.on_participant_update(
            alice,
            UpdateData {
                position: vec![1.0, 0.0],
                time_stamp: 1.0,
            },
        );
        assert!(h.coordinator.pending_answers.is_empty());
    }

    #[test]
    fn sentinel_updates_are_accepted_without_registration() {
        let mut h = harness();
        h.coordinator.set_active_question("c1", "q1");
        h.coordinator.start(30);
        h.coordinator.on_participant_update(
            ParticipantId::SENTINEL,
            UpdateData {
                position: vec![0.5, 0.5],
                time_stamp: 1.0,
            },
        );
        assert!(h
            .coordinator
            .pending_answers
            .contains_key(&ParticipantId::SENTINEL));
    }

    #[test]
    fn empty_position_is_dropped() {
        let mut h = harness();
        let alice = h.coordinator.add_participant("alice");
        h.coordinator.set_active_question("c1", "q1");
        h.coordinator.start(30);
        h.coordinator.on_participant_update(
            alice,
            UpdateData {
                position: vec![],
                time_stamp: 1.0,
            },
        );
        assert!(h.coordinator.pending_answers.is_empty());
    }

    #[test]
    fn late_ready_while_active_receives_started_snapshot() {
        let mut h = harness();
        let alice = h.coordinator.add_participant("alice");
        let bob = h.coordinator.add_participant("bob");
        h.coordinator.set_active_question("c1", "q1");
        h.coordinator.start(30);
        h.coordinator.on_participant_update(
            alice,
            UpdateData {
                position: vec![0.2, 0.0, 0.0, 0.0, 0.0, 0.0],
                time_stamp: 1000.0,
            },
        );
        broadcasts(&mut h.client);

        h.coordinator.on_participant_ready(bob);
        let sent = broadcasts(&mut h.client);
        let started = sent
            .iter()
            .find(|msg| msg["type"] == "started")
            .expect("started broadcast");
        assert!(started["targetDate"].as_i64().unwrap() > 0);
        assert_eq!(
            started["positions"][alice.to_string()],
            "1000,0.2,0,0,0,0,0"
        );
    }

    #[test]
    fn ready_without_a_transition_sends_no_started_snapshot() {
        let mut h = harness();
        let alice = h.coordinator.add_participant("alice");
        let bob = h.coordinator.add_participant("bob");
        h.coordinator.on_participant_ready(alice);
        h.coordinator.remove_participant(bob);
        h.coordinator.set_active_question("c1", "q1");
        h.coordinator.on_participant_ready(alice);
        h.coordinator.start(30);
        broadcasts(&mut h.client);

        // A duplicate ready from an already-Ready participant and a ready
        // from an Offline participant both lack a Joined -> Ready
        // transition, so neither triggers the catch-up broadcast.
        h.coordinator.on_participant_ready(alice);
        h.coordinator.on_participant_ready(bob);
        assert!(broadcasts(&mut h.client)
            .iter()
            .all(|msg| msg["type"] != "started"));
        assert_eq!(h.coordinator.ready_count(), 1);
    }

    #[test]
    fn updates_after_stop_leave_the_log_untouched() {
        let mut h = harness();
        let alice = h.coordinator.add_participant("alice");
        h.coordinator.set_active_question("c1", "q1");
        h.coordinator.start(30);
        h.coordinator.on_participant_update(
            alice,
            UpdateData {
                position: vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0],
                time_stamp: 1000.0,
            },
        );
        let dir = h.coordinator.run.as_ref().unwrap().dir().to_path_buf();
        h.coordinator.stop(StopMode::Plain);

        h.coordinator.on_participant_update(
            alice,
            UpdateData {
                position: vec![0.0, 1.0, 0.0, 0.0, 0.0, 0.0],
                time_stamp: 2000.0,
            },
        );
        let log = std::fs::read_to_string(dir.join("log.csv")).unwrap();
        assert_eq!(log, format!("{},1000,1,0,0,0,0,0\n", alice));
        assert!(h.coordinator.pending_answers.is_empty());
    }

    #[test]
    fn stop_finalizes_artifacts_and_returns_to_waiting() {
        let mut h = harness();
        let alice = h.coordinator.add_participant("alice");
        h.coordinator.set_active_question("c1", "q1");
        h.coordinator.start(30);
        h.coordinator.on_participant_update(
            alice,
            UpdateData {
                position: vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0],
                time_stamp: 1000.0,
            },
        );
        let dir = h.coordinator.run.as_ref().unwrap().dir().to_path_buf();
        h.coordinator.stop(StopMode::Plain);

        assert_eq!(h.coordinator.state(), SessionState::Waiting);
        assert!(h.coordinator.pending_answers.is_empty());
        let resume = std::fs::read_to_string(dir.join("resume.csv")).unwrap();
        assert_eq!(resume, format!("{},1000,1,0,0,0,0,0\n", alice));
        let json: Value =
            serde_json::from_str(&std::fs::read_to_string(dir.join("session.json")).unwrap())
                .unwrap();
        assert_eq!(json["participants"][0]["username"], "alice");

        let sent = broadcasts(&mut h.client);
        assert!(sent.iter().any(|msg| msg["type"] == "stop"));
    }

    #[test]
    fn stop_with_trajectories_derives_a_trajectory_file() {
        let mut h = harness();
        let alice = h.coordinator.add_participant("alice");
        h.coordinator.set_active_question("c1", "q1");
        h.coordinator.start(30);
        h.coordinator.on_participant_update(
            alice,
            UpdateData {
                position: vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0],
                time_stamp: 1000.0,
            },
        );
        let run_name = h
            .coordinator
            .run
            .as_ref()
            .unwrap()
            .dir()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .into_owned();
        h.coordinator.stop(StopMode::Trajectories);

        let trajectory = h
            ._root
            .path()
            .join("trajectories")
            .join(format!("{}_{}.txt", run_name, alice));
        let text = std::fs::read_to_string(trajectory).unwrap();
        assert!(text.starts_with("0\n\n"));
        assert!(text.contains("0,0,-1"));
    }

    #[test]
    fn inbound_traffic_drives_the_lifecycle() {
        let mut h = harness();
        let alice = h.coordinator.add_participant("alice");
        h.client.publish(
            "session/1/control",
            br#"{"type":"setup","collection_id":"c1","question_id":"q1"}"#.to_vec(),
        );
        h.client
            .publish("session/1/control/1", br#"{"type":"ready"}"#.to_vec());
        h.coordinator.poll();
        assert_eq!(h.coordinator.active_question(), Some(("c1", "q1")));
        assert_eq!(h.coordinator.ready_count(), 1);

        h.client
            .publish("session/1/control", br#"{"type":"start","duration":5}"#.to_vec());
        h.coordinator.poll();
        assert_eq!(h.coordinator.state(), SessionState::Active);

        h.client
            .publish("session/1/control/1", br#"{"type":"leave"}"#.to_vec());
        h.client
            .publish("session/1/control", br#"{"type":"stop"}"#.to_vec());
        h.coordinator.poll();
        assert_eq!(h.coordinator.state(), SessionState::Waiting);
        assert_eq!(h.coordinator.offline_count(), 1);
        let _ = alice;
    }

    #[test]
    fn event_queue_is_bounded() {
        let mut h = harness();
        for _ in 0..(MAX_EVENT_QUEUE_SIZE + 20) {
            h.coordinator.push_event(SessionEvent::Stopped);
        }
        assert_eq!(h.coordinator.events().len(), MAX_EVENT_QUEUE_SIZE);
    }

    #[test]
    fn stop_mode_parsing() {
        assert_eq!(StopMode::parse("trajectories"), StopMode::Trajectories);
        assert_eq!(StopMode::parse("TRAJECTORIES"), StopMode::Trajectories);
        assert_eq!(StopMode::parse(""), StopMode::Plain);
        assert_eq!(StopMode::parse("whatever"), StopMode::Plain);
    }
}
