use std::fmt;
use std::sync::mpsc::{Sender, SyncSender};

use serde::{Deserialize, Serialize};

use crate::drivers::{BloodPressure, MeasurementError};

/// Measurement state machine states.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Serialize, Deserialize)]
#[repr(u8)]
pub enum MeasurementState {
    /// Before the acquisition loop has produced its first sample.
    Config = 0,
    Idle = 1,
    Inflate = 2,
    Deflate = 3,
    Empty = 4,
    Results = 5,
}

impl MeasurementState {
    /// A session owns the hardware and freezes the configuration.
    pub fn is_session_active(self) -> bool {
        matches!(self, Self::Inflate | Self::Deflate | Self::Empty)
    }

    pub fn accepts_configuration(self) -> bool {
        !self.is_session_active()
    }

    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Config),
            1 => Some(Self::Idle),
            2 => Some(Self::Inflate),
            3 => Some(Self::Deflate),
            4 => Some(Self::Empty),
            5 => Some(Self::Results),
            _ => None,
        }
    }
}

impl fmt::Display for MeasurementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Config => "Config",
            Self::Idle => "Idle",
            Self::Inflate => "Inflate",
            Self::Deflate => "Deflate",
            Self::Empty => "Empty",
            Self::Results => "Results",
        };
        f.write_str(name)
    }
}

/// Final payload of a session that reached `Results`.
#[derive(Clone, Debug, PartialEq)]
pub enum MeasurementOutcome {
    Success(BloodPressure),
    Failure(MeasurementError),
}

impl MeasurementOutcome {
    pub fn blood_pressure(&self) -> Option<&BloodPressure> {
        match self {
            Self::Success(bp) => Some(bp),
            Self::Failure(_) => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Why a notification was published.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Reading,
    StateChanged { from: MeasurementState },
    Outcome(MeasurementOutcome),
    Fault(MeasurementError),
}

/// Snapshot published to observers.
#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
    pub state: MeasurementState,
    pub cuff_pressure_mmhg: f64,
    pub oscillation: f64,
    pub event: Event,
}

impl Notification {
    pub fn systolic(&self) -> Option<f64> {
        self.blood_pressure().map(|bp| bp.systolic)
    }

    pub fn diastolic(&self) -> Option<f64> {
        self.blood_pressure().map(|bp| bp.diastolic)
    }

    fn blood_pressure(&self) -> Option<&BloodPressure> {
        match &self.event {
            Event::Outcome(outcome) => outcome.blood_pressure(),
            _ => None,
        }
    }
}

// Control side -> acquisition thread
pub enum Command {
    Start(Sender<Result<(), MeasurementError>>),
    Subscribe(SyncSender<Notification>),
}
