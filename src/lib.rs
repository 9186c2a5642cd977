//! Acquisition and signal-processing core of an oscillometric blood-pressure
//! monitor: cuff control state machine, pressure/oscillation filtering,
//! oscillation peak detection and ratio-based SBP/DBP estimation.

pub mod config;
pub mod drivers;
pub mod engine;
pub mod processing;
pub mod recorder;
pub mod simulation;
pub mod types;

pub use config::{Configuration, ProcessorSettings};
pub use drivers::{BloodPressure, MeasurementError};
pub use engine::{spawn, EngineHandle, Pacing};
pub use processing::{Processor, SharedState};
pub use types::{Event, MeasurementOutcome, MeasurementState, Notification};
