//! Persisted session artifacts.
//!
//! Every session run gets its own directory under the storage root, keyed
//! by the wall-clock start time:
//!
//! ```text
//! session_log/2026-08-27-14-03-55/
//!   session.json   {time, id, collection, question, duration, participants}
//!   log.csv        participantId,timeStamp,w0,...,wN-1   (append-only)
//!   resume.csv     participantId,lastSample              (written on stop)
//! ```
//!
//! The log and resume files are exclusively owned by the session's [`RunLog`]
//! for the duration of one active period; dropping the handle closes them on
//! both the normal stop path and abnormal teardown.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::warn;

use crate::error::SwarmError;
use crate::sessions::participant::Participant;
use crate::{ParticipantId, SessionId};

/// Metadata snapshot persisted as `session.json`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionMeta {
    /// ISO-8601 start time of the run.
    pub time: String,
    /// The session id.
    pub id: SessionId,
    /// Active collection at start, if any.
    pub collection: Option<String>,
    /// Active question at start, if any.
    pub question: Option<String>,
    /// Configured duration in seconds.
    pub duration: u32,
    /// Final participant snapshot; absent until the run stops.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participants: Option<Vec<Participant>>,
}

/// Factory for per-run log directories under a fixed storage root.
#[derive(Debug, Clone)]
pub struct SessionStorage {
    root: PathBuf,
}

impl SessionStorage {
    /// Uses `root` as the storage root (created on demand).
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        SessionStorage { root: root.into() }
    }

    /// The storage root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the run directory for a session starting now, writes the
    /// initial `session.json` and opens the append-only log and resume
    /// files.
    ///
    /// # Errors
    ///
    /// [`SwarmError::Resource`] for any filesystem failure.
    pub fn begin_run(&self, mut meta: SessionMeta) -> Result<RunLog, SwarmError> {
        let started = chrono::Local::now();
        meta.time = started.to_rfc3339();
        let dir = self.root.join(started.format("%Y-%m-%d-%H-%M-%S").to_string());
        std::fs::create_dir_all(&dir)?;

        write_session_json(&dir, &meta)?;
        let log = BufWriter::new(File::create(dir.join("log.csv"))?);
        let resume = BufWriter::new(File::create(dir.join("resume.csv"))?);
        Ok(RunLog {
            dir,
            meta,
            log,
            resume,
        })
    }
}

fn write_session_json(dir: &Path, meta: &SessionMeta) -> Result<(), SwarmError> {
    let file = File::create(dir.join("session.json"))?;
    serde_json::to_writer_pretty(file, meta).map_err(|err| SwarmError::Resource {
        context: format!("writing session.json: {}", err),
    })
}

/// Formats one raw sample as a log/resume line fragment:
/// `timeStamp,w0,...,wN-1`.
#[must_use]
pub fn sample_line(time_stamp: f64, weights: &[f64]) -> String {
    let mut line = format!("{}", time_stamp);
    for w in weights {
        line.push(',');
        line.push_str(&w.to_string());
    }
    line
}

/// The open artifacts of one active session run.
pub struct RunLog {
    dir: PathBuf,
    meta: SessionMeta,
    log: BufWriter<File>,
    resume: BufWriter<File>,
}

impl RunLog {
    /// The run directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Appends one normalized sample to `log.csv`.
    ///
    /// # Errors
    ///
    /// [`SwarmError::Resource`] on write failure; already-flushed rows stay
    /// on disk.
    pub fn append_sample(
        &mut self,
        participant: ParticipantId,
        time_stamp: f64,
        weights: &[f64],
    ) -> Result<(), SwarmError> {
        writeln!(
            self.log,
            "{},{}",
            participant,
            sample_line(time_stamp, weights)
        )?;
        Ok(())
    }

    /// Finalizes the run: rewrites `session.json` with the participant
    /// snapshot, flushes one `participantId,lastSample` line per recorded
    /// participant into `resume.csv` and closes both files.
    ///
    /// Returns the run directory so the caller can derive trajectories or
    /// archive it.
    ///
    /// # Errors
    ///
    /// [`SwarmError::Resource`] on any write failure. Rows flushed before
    /// the failure are not rolled back.
    pub fn finalize(
        mut self,
        participants: Vec<Participant>,
        answers: &BTreeMap<ParticipantId, String>,
    ) -> Result<PathBuf, SwarmError> {
        self.meta.participants = Some(participants);
        write_session_json(&self.dir, &self.meta)?;

        for (participant, last_sample) in answers {
            writeln!(self.resume, "{},{}", participant, last_sample)?;
        }
        self.log.flush()?;
        self.resume.flush()?;
        Ok(self.dir)
    }
}

impl std::fmt::Debug for RunLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLog").field("dir", &self.dir).finish()
    }
}

/// Packages a completed run directory (zip, upload, copy - deployment's
/// choice). Failures are reported as warnings and never block the session
/// lifecycle.
pub trait Archiver: Send + Sync {
    /// Archives `run_dir`, returning the path of the produced artifact.
    ///
    /// # Errors
    ///
    /// [`SwarmError::Resource`] describing the failure.
    fn archive(&self, run_dir: &Path) -> Result<PathBuf, SwarmError>;
}

/// Leaves the run directory as the archive. The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopArchiver;

impl Archiver for NoopArchiver {
    fn archive(&self, run_dir: &Path) -> Result<PathBuf, SwarmError> {
        Ok(run_dir.to_path_buf())
    }
}

/// Runs the archiver, downgrading failures to a logged warning.
pub(crate) fn archive_best_effort(archiver: &dyn Archiver, run_dir: &Path) {
    if let Err(err) = archiver.archive(run_dir) {
        warn!(run_dir = %run_dir.display(), %err, "archiving session run failed");
    }
}
