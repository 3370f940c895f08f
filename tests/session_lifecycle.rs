//! End-to-end session lifecycle over the in-memory loopback broker.
//!
//! Drives a full facilitated run the way a deployment would: participants
//! and the administrator talk over broker topics only, and the test asserts
//! the broadcasts, the on-disk artifacts and the derived trajectory file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use swarm_session::{
    BrokerHub, BrokerLink, DirContentStore, InMemoryBroker, LinkEvent, LinkStatus,
    SessionEvent, SessionRegistry, SessionState,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn write_question(content_root: &Path) {
    let dir = content_root.join("c1").join("q1");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("info.json"),
        r#"{"question":"Where should we go?","answers":["a","b","c","d","e","f"]}"#,
    )
    .unwrap();
}

fn control_messages(client: &mut InMemoryBroker) -> Vec<Value> {
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

fn single_run_dir(storage_root: &Path) -> PathBuf {
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(storage_root)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    assert_eq!(dirs.len(), 1, "expected exactly one run directory");
    dirs.remove(0)
}

#[test]
fn facilitated_run_produces_broadcasts_logs_and_trajectories() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let content_root = root.path().join("content");
    write_question(&content_root);

    let hub = BrokerHub::new();
    let registry = SessionRegistry::new(Arc::new(hub.clone()))
        .with_content_store(Arc::new(DirContentStore::open(&content_root).unwrap()))
        .with_storage_root(root.path().join("session_log"))
        .with_trajectories_dir(root.path().join("trajectories"));

    let session = registry.create_session();
    let mut coordinator = session.lock();
    coordinator.connect();
    coordinator.poll();
    coordinator.poll();
    assert_eq!(coordinator.link_status(), LinkStatus::Subscribed);

    // A wire-level client standing in for the admin surface and both
    // participant apps. It watches the session-wide control channel.
    let mut wire = InMemoryBroker::attached(&hub);
    wire.connect();
    wire.subscribe("session/1/control");
    wire.poll();

    // Joins arrive out of band (the admin surface registers usernames).
    let alice = coordinator.add_participant("alice");
    let bob = coordinator.add_participant("bob");
    assert_eq!(alice.as_u64(), 1);
    assert_eq!(bob.as_u64(), 2);

    // Question selection, then both participants signal readiness.
    wire.publish(
        "session/1/control",
        br#"{"type":"setup","collection_id":"c1","question_id":"q1"}"#.to_vec(),
    );
    wire.publish("session/1/control/1", br#"{"type":"ready"}"#.to_vec());
    wire.publish("session/1/control/2", br#"{"type":"ready"}"#.to_vec());
    coordinator.poll();
    assert_eq!(coordinator.active_question(), Some(("c1", "q1")));
    assert_eq!(coordinator.ready_count(), 2);

    let setup_broadcasts = control_messages(&mut wire);
    // The wire client sees its own commands echoed plus the server's setup
    // broadcast, which carries the provenance marker.
    let setup = setup_broadcasts
        .iter()
        .find(|msg| msg["type"] == "setup" && msg["origin"] == "server")
        .expect("setup broadcast");
    assert_eq!(setup["question_id"], "q1");

    // Start the countdown.
    wire.publish(
        "session/1/control",
        br#"{"type":"start","duration":30}"#.to_vec(),
    );
    coordinator.poll();
    assert_eq!(coordinator.state(), SessionState::Active);
    let remaining = coordinator.remaining_ms().expect("target end set");
    assert!(remaining > 0 && remaining <= 30_000);
    assert!(control_messages(&mut wire)
        .iter()
        .any(|msg| msg["type"] == "start" && msg["duration"] == 30));

    // Position updates: alice in-range, bob with a negative component and a
    // sum past one, which must come back clamped and rescaled.
    wire.publish(
        "session/1/updates/1",
        br#"{"data":{"position":[0.2,0.3,0,0,0,0],"timeStamp":1000}}"#.to_vec(),
    );
    wire.publish(
        "session/1/updates/2",
        br#"{"data":{"position":[-0.1,0.4,0.8,0,0,0],"timeStamp":1250}}"#.to_vec(),
    );
    coordinator.poll();

    // Stop and derive trajectories.
    wire.publish(
        "session/1/control",
        br#"{"type":"stop","mode":"trajectories"}"#.to_vec(),
    );
    coordinator.poll();
    assert_eq!(coordinator.state(), SessionState::Waiting);
    assert!(control_messages(&mut wire)
        .iter()
        .any(|msg| msg["type"] == "stop" && msg["mode"] == "trajectories"));

    let events: Vec<SessionEvent> = coordinator.events().collect();
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::StatusChanged(SessionState::Active))));
    assert!(events.iter().any(|e| matches!(e, SessionEvent::Stopped)));
    drop(coordinator);

    // Raw log: one row per update, bob's sanitized to sum one.
    let run_dir = single_run_dir(&root.path().join("session_log"));
    let log = std::fs::read_to_string(run_dir.join("log.csv")).unwrap();
    let rows: Vec<&str> = log.lines().collect();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0], "1,1000,0.2,0.3,0,0,0,0");
    let bob_weights: Vec<f64> = rows[1]
        .split(',')
        .skip(2)
        .map(|w| w.parse().unwrap())
        .collect();
    assert_eq!(bob_weights[0], 0.0);
    assert!((bob_weights[1] - 1.0 / 3.0).abs() < 1e-9);
    assert!((bob_weights[2] - 2.0 / 3.0).abs() < 1e-9);
    assert!((bob_weights.iter().sum::<f64>() - 1.0).abs() < 1e-12);

    // Resume file: the latest sample per participant.
    let resume = std::fs::read_to_string(run_dir.join("resume.csv")).unwrap();
    assert_eq!(resume.lines().count(), 2);
    assert!(resume.starts_with("1,1000,0.2,0.3,0,0,0,0\n"));

    // Session snapshot includes the final participant roster.
    let meta: Value =
        serde_json::from_str(&std::fs::read_to_string(run_dir.join("session.json")).unwrap())
            .unwrap();
    assert_eq!(meta["question"], "q1");
    assert_eq!(meta["duration"], 30);
    assert_eq!(meta["participants"][0]["username"], "alice");
    assert_eq!(meta["participants"][0]["status"], "ready");
    assert_eq!(meta["participants"][1]["username"], "bob");

    // Trajectories: one file per participant, fixed two-line header, and
    // elapsed seconds anchored at that participant's first sample.
    let run_name = run_dir.file_name().unwrap().to_string_lossy().into_owned();
    for participant in [alice, bob] {
        let trajectory = root
            .path()
            .join("trajectories")
            .join(format!("{}_{}.txt", run_name, participant));
        let text = std::fs::read_to_string(trajectory).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "0");
        assert_eq!(lines[1], "");
        assert_eq!(lines.len(), 3);
        assert!(lines[2].starts_with("0,"));
    }
}

#[test]
fn second_run_reuses_the_session_after_stop() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let hub = BrokerHub::new();
    let registry = SessionRegistry::new(Arc::new(hub))
        .with_storage_root(root.path().join("session_log"))
        .with_trajectories_dir(root.path().join("trajectories"));

    let session = registry.create_session();
    let mut coordinator = session.lock();
    coordinator.connect();
    coordinator.poll();
    coordinator.poll();

    coordinator.set_active_question("c1", "q1");
    coordinator.start(1);
    coordinator.stop(swarm_session::StopMode::Plain);
    assert_eq!(coordinator.state(), SessionState::Waiting);

    // The selection survives the stop; a second run starts cleanly.
    coordinator.start(2);
    assert_eq!(coordinator.state(), SessionState::Active);
    assert_eq!(coordinator.duration_secs(), 2);
}
