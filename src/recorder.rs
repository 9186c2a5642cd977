use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use log::{info, warn};
use serde::Serialize;

use crate::config::Configuration;
use crate::drivers::{BloodPressure, FilteredSample, PeakRecord, Sample};
use crate::types::MeasurementOutcome;

/// Persistence collaborator: one append-only record stream per session.
pub trait SessionRecorder {
    fn begin_session(&mut self, started_at: SystemTime, config: &Configuration);
    fn record_sample(&mut self, sample: &Sample, filtered: &FilteredSample, cuff_pressure: f64);
    fn record_peak(&mut self, peak: &PeakRecord);
    fn record_outcome(&mut self, outcome: &MeasurementOutcome);
    fn end_session(&mut self);
}

/// Drops everything.
#[derive(Default, Debug, Clone, Copy)]
pub struct NullRecorder;

impl SessionRecorder for NullRecorder {
    fn begin_session(&mut self, _started_at: SystemTime, _config: &Configuration) {}
    fn record_sample(&mut self, _sample: &Sample, _filtered: &FilteredSample, _cuff_pressure: f64) {
    }
    fn record_peak(&mut self, _peak: &PeakRecord) {}
    fn record_outcome(&mut self, _outcome: &MeasurementOutcome) {}
    fn end_session(&mut self) {}
}

#[derive(Serialize)]
struct OutcomeFile<'a> {
    session_started_unix: u64,
    config: &'a Configuration,
    blood_pressure: Option<&'a BloodPressure>,
    failure: Option<String>,
}

struct OpenSession {
    started_unix: u64,
    config: Configuration,
    samples: BufWriter<File>,
    peaks: BufWriter<File>,
    stem: PathBuf,
}

/// Writes `session_<unix>.csv`, `session_<unix>_peaks.csv` and
/// `session_<unix>_result.json` into a directory.
///
/// I/O failures are logged and close the current session's files; they never
/// interrupt the measurement.
pub struct CsvRecorder {
    dir: PathBuf,
    session: Option<OpenSession>,
}

impl CsvRecorder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            session: None,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    fn open(&self, started_unix: u64, config: Configuration) -> Result<OpenSession> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating recording directory {}", self.dir.display()))?;
        let stem = self.dir.join(format!("session_{started_unix}"));
        let samples_path = stem.with_extension("csv");
        let peaks_path = self.dir.join(format!("session_{started_unix}_peaks.csv"));

        let mut samples = BufWriter::new(
            File::create(&samples_path)
                .with_context(|| format!("creating {}", samples_path.display()))?,
        );
        writeln!(samples, "tick,raw_voltage,pressure_value,oscillation_value,cuff_pressure_mmhg")?;
        let mut peaks = BufWriter::new(
            File::create(&peaks_path).with_context(|| format!("creating {}", peaks_path.display()))?,
        );
        writeln!(peaks, "tick,cuff_pressure_mmhg,amplitude")?;

        info!("recording session to {}", samples_path.display());
        Ok(OpenSession {
            started_unix,
            config,
            samples,
            peaks,
            stem,
        })
    }

    fn write_outcome(session: &OpenSession, outcome: &MeasurementOutcome) -> Result<()> {
        let path = PathBuf::from(format!("{}_result.json", session.stem.display()));
        let record = OutcomeFile {
            session_started_unix: session.started_unix,
            config: &session.config,
            blood_pressure: outcome.blood_pressure(),
            failure: match outcome {
                MeasurementOutcome::Failure(err) => Some(err.to_string()),
                MeasurementOutcome::Success(_) => None,
            },
        };
        let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &record)?;
        Ok(())
    }

    fn abandon(&mut self, what: &str, err: impl std::fmt::Display) {
        warn!("recorder: {what} failed, closing session files: {err}");
        self.session = None;
    }
}

impl SessionRecorder for CsvRecorder {
    fn begin_session(&mut self, started_at: SystemTime, config: &Configuration) {
        let started_unix = started_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        match self.open(started_unix, *config) {
            Ok(session) => self.session = Some(session),
            Err(err) => self.abandon("opening session", format!("{err:#}")),
        }
    }

    fn record_sample(&mut self, sample: &Sample, filtered: &FilteredSample, cuff_pressure: f64) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let result = writeln!(
            session.samples,
            "{},{:.6},{:.6},{:.6},{:.2}",
            sample.tick,
            sample.voltage,
            filtered.pressure_value,
            filtered.oscillation_value,
            cuff_pressure
        );
        if let Err(err) = result {
            self.abandon("writing sample", err);
        }
    }

    fn record_peak(&mut self, peak: &PeakRecord) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let result = writeln!(
            session.peaks,
            "{},{:.2},{:.6}",
            peak.tick, peak.cuff_pressure, peak.amplitude
        );
        if let Err(err) = result {
            self.abandon("writing peak", err);
        }
    }

    fn record_outcome(&mut self, outcome: &MeasurementOutcome) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if let Err(err) = Self::write_outcome(session, outcome) {
            self.abandon("writing result", format!("{err:#}"));
        }
    }

    fn end_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            let flushed: io::Result<()> = session
                .samples
                .flush()
                .and_then(|_| session.peaks.flush());
            match flushed {
                Ok(()) => info!("session {} saved", session.started_unix),
                Err(err) => warn!("recorder: flushing session failed: {err}"),
            }
        }
    }
}

impl<R: SessionRecorder + ?Sized> SessionRecorder for Box<R> {
    fn begin_session(&mut self, started_at: SystemTime, config: &Configuration) {
        (**self).begin_session(started_at, config)
    }
    fn record_sample(&mut self, sample: &Sample, filtered: &FilteredSample, cuff_pressure: f64) {
        (**self).record_sample(sample, filtered, cuff_pressure)
    }
    fn record_peak(&mut self, peak: &PeakRecord) {
        (**self).record_peak(peak)
    }
    fn record_outcome(&mut self, outcome: &MeasurementOutcome) {
        (**self).record_outcome(outcome)
    }
    fn end_session(&mut self) {
        (**self).end_session()
    }
}
