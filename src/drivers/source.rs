use std::collections::VecDeque;
use std::time::Duration;

use crate::drivers::SourceError;

/// One raw transducer reading.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sample {
    pub tick: u64,
    pub voltage: f64,
}

impl Sample {
    pub fn timestamp(&self, sample_rate_hz: f64) -> Duration {
        Duration::from_secs_f64(self.tick as f64 / sample_rate_hz)
    }
}

/// Anything that can deliver one voltage reading per acquisition tick.
pub trait SampleSource {
    fn read_voltage(&mut self) -> Result<f64, SourceError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Valve {
    Open,
    Closed,
}

/// Pump and vent valve driven by the state machine.
pub trait Actuator {
    fn set_pump(&mut self, on: bool);
    fn set_valve(&mut self, valve: Valve);
}

/// In-memory source useful for tests and deterministic playback.
pub struct ManualSource {
    queue: VecDeque<Result<f64, SourceError>>,
}

impl ManualSource {
    pub fn new(voltages: impl IntoIterator<Item = f64>) -> Self {
        Self {
            queue: voltages.into_iter().map(Ok).collect(),
        }
    }

    pub fn push(&mut self, voltage: f64) {
        self.queue.push_back(Ok(voltage));
    }

    pub fn push_fault(&mut self, error: SourceError) {
        self.queue.push_back(Err(error));
    }

    pub fn remaining(&self) -> usize {
        self.queue.len()
    }
}

impl SampleSource for ManualSource {
    fn read_voltage(&mut self) -> Result<f64, SourceError> {
        self.queue.pop_front().unwrap_or(Err(SourceError::Disconnected))
    }
}

/// Actuator that just remembers the last command, for tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordingActuator {
    pub pump_on: bool,
    pub valve: Valve,
}

impl Default for RecordingActuator {
    fn default() -> Self {
        Self {
            pump_on: false,
            valve: Valve::Open,
        }
    }
}

impl Actuator for RecordingActuator {
    fn set_pump(&mut self, on: bool) {
        self.pump_on = on;
    }

    fn set_valve(&mut self, valve: Valve) {
        self.valve = valve;
    }
}

impl<S: SampleSource + ?Sized> SampleSource for Box<S> {
    fn read_voltage(&mut self) -> Result<f64, SourceError> {
        (**self).read_voltage()
    }
}

impl<A: Actuator + ?Sized> Actuator for Box<A> {
    fn set_pump(&mut self, on: bool) {
        (**self).set_pump(on)
    }

    fn set_valve(&mut self, valve: Valve) {
        (**self).set_valve(valve)
    }
}
