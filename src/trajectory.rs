//! Offline trajectory derivation from a run's raw log.
//!
//! The raw `log.csv` stores per-answer weight vectors exactly as clients
//! reported them. For analysis, each row is decoded back to a 2D point,
//! normalized to the unit circle and re-timestamped as seconds elapsed since
//! that participant's first sample. The result is one plain-text file per
//! participant, named after the run directory and the participant id:
//!
//! ```text
//! trajectories/2026-08-27-10-00-00_1.txt
//!   0
//!
//!   0,0,-1
//!   0.25,0.43235294117647055,-0.25
//!   ...
//! ```
//!
//! The two header lines are fixed and reserved for future metadata; the
//! downstream analysis tooling expects them.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::SwarmError;
use crate::geometry::AnswerGeometry;
use crate::ParticipantId;
use crate::{DEFAULT_NUM_ANSWERS, DEFAULT_RADIUS};

/// Converts raw session logs into normalized per-participant trajectory
/// files.
#[derive(Debug, Clone)]
pub struct TrajectoryBuilder {
    geometry: AnswerGeometry,
    target_dir: PathBuf,
}

struct Sample {
    time_stamp: f64,
    x: f64,
    y: f64,
}

impl TrajectoryBuilder {
    /// A builder decoding with `geometry`, writing files into `target_dir`.
    #[must_use]
    pub fn new(geometry: AnswerGeometry, target_dir: impl Into<PathBuf>) -> Self {
        TrajectoryBuilder {
            geometry,
            target_dir: target_dir.into(),
        }
    }

    /// A builder for the standard six-answer layout.
    #[must_use]
    pub fn with_defaults(target_dir: impl Into<PathBuf>) -> Self {
        TrajectoryBuilder::new(
            AnswerGeometry::regular(DEFAULT_NUM_ANSWERS, DEFAULT_RADIUS),
            target_dir,
        )
    }

    /// Derives one trajectory file per participant recorded in `run_dir`'s
    /// log and returns their paths, in participant-id order. Elapsed time
    /// in each file is anchored at that participant's first sample.
    ///
    /// Rows carrying the reserved participant id `0` are dropped, as are
    /// rows that cannot be parsed or whose weight vector does not match the
    /// geometry; both are logged, neither aborts the run.
    ///
    /// # Errors
    ///
    /// [`SwarmError::Resource`] if `log.csv` cannot be read or an output
    /// file cannot be written.
    pub fn derive(&self, run_dir: &Path) -> Result<Vec<PathBuf>, SwarmError> {
        let raw = std::fs::read_to_string(run_dir.join("log.csv"))?;
        let tracks = self.parse_log(&raw);

        let run_name = run_dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "trajectory".to_string());
        std::fs::create_dir_all(&self.target_dir)?;

        let mut written = Vec::with_capacity(tracks.len());
        for (participant, samples) in &tracks {
            let out_path = self
                .target_dir
                .join(format!("{}_{}.txt", run_name, participant));
            write_track(&out_path, samples)?;
            written.push(out_path);
        }

        debug!(
            run = %run_dir.display(),
            participants = tracks.len(),
            "derived trajectory files"
        );
        Ok(written)
    }

    fn parse_log(&self, raw: &str) -> BTreeMap<ParticipantId, Vec<Sample>> {
        let mut tracks: BTreeMap<ParticipantId, Vec<Sample>> = BTreeMap::new();
        for (index, line) in raw.lines().enumerate() {
            if line.is_empty() {
                continue;
            }
            match self.parse_row(line) {
                Ok(Some((participant, sample))) => {
                    tracks.entry(participant).or_default().push(sample);
                }
                Ok(None) => {}
                Err(err) => warn!(row = index, %err, "skipping unusable log row"),
            }
        }
        tracks
    }

    fn parse_row(&self, line: &str) -> Result<Option<(ParticipantId, Sample)>, SwarmError> {
        let mut fields = line.split(',');
        let participant: u64 = fields
            .next()
            .unwrap_or_default()
            .parse()
            .map_err(|_| SwarmError::Protocol {
                context: "log row participant id is not numeric".to_string(),
            })?;
        let participant = ParticipantId::new(participant);
        // Reserved id used by injected reference samples.
        if participant.is_sentinel() {
            return Ok(None);
        }
        let time_stamp: f64 = fields
            .next()
            .ok_or_else(|| SwarmError::Protocol {
                context: "log row missing timestamp".to_string(),
            })?
            .parse()
            .map_err(|_| SwarmError::Protocol {
                context: "log row timestamp is not numeric".to_string(),
            })?;
        let weights = fields
            .map(str::parse)
            .collect::<Result<Vec<f64>, _>>()
            .map_err(|_| SwarmError::Protocol {
                context: "log row weight is not numeric".to_string(),
            })?;

        let point = self.geometry.decode(&weights)?;
        let radius = self.geometry.radius();
        Ok(Some((
            participant,
            Sample {
                time_stamp,
                x: point.x / radius,
                y: point.y / radius,
            },
        )))
    }
}

fn write_track(path: &Path, samples: &[Sample]) -> Result<(), SwarmError> {
    let mut out = BufWriter::new(File::create(path)?);
    out.write_all(b"0\n\n")?;
    let offset = samples.first().map_or(0.0, |sample| sample.time_stamp);
    for sample in samples {
        let elapsed = (sample.time_stamp - offset) / 1000.0;
        writeln!(out, "{},{},{}", elapsed, sample.x, sample.y)?;
    }
    out.flush()?;
    Ok(())
}
