//! Software cuff for running the whole chain without hardware.
//!
//! The model inflates while the pump runs, bleeds linearly through the fixed
//! restrictor while the valve is closed, and vents quickly when it opens. On
//! top of the cuff pressure rides a pulse whose amplitude follows an
//! asymmetric Gaussian envelope centred on the mean arterial pressure.

use std::f64::consts::TAU;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::drivers::{Actuator, SampleSource, SourceError, Transducer, Valve};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CuffParams {
    pub sample_rate_hz: f64,
    pub ambient_voltage: f64,
    pub transducer: Transducer,
    /// mmHg per second with the pump on.
    pub inflate_rate: f64,
    /// mmHg per second through the restrictor.
    pub bleed_rate: f64,
    /// Time constant of the open vent (s).
    pub vent_tau_secs: f64,
    pub heart_rate_hz: f64,
    pub mean_arterial: f64,
    /// Envelope width above the mean arterial pressure (mmHg).
    pub width_high: f64,
    /// Envelope width below it.
    pub width_low: f64,
    /// Pulse amplitude at the envelope maximum (mmHg).
    pub pulse_amplitude: f64,
    /// Peak of the uniform noise added to every reading (V).
    pub noise_volts: f64,
    pub seed: u64,
    /// Reads taken with the valve closed after which the sensor reports an
    /// I/O error, forever.
    pub fail_after: Option<u64>,
}

impl Default for CuffParams {
    fn default() -> Self {
        Self {
            sample_rate_hz: 100.0,
            ambient_voltage: 0.7,
            transducer: Transducer::default(),
            inflate_rate: 10.0,
            bleed_rate: 3.0,
            vent_tau_secs: 0.3,
            heart_rate_hz: 1.2,
            mean_arterial: 95.0,
            width_high: 40.0,
            width_low: 25.0,
            pulse_amplitude: 3.0,
            noise_volts: 2.0e-5,
            seed: 7,
            fail_after: None,
        }
    }
}

impl CuffParams {
    /// Envelope amplitude (mmHg) at a given cuff pressure.
    pub fn envelope(&self, cuff_mmhg: f64) -> f64 {
        let width = if cuff_mmhg >= self.mean_arterial {
            self.width_high
        } else {
            self.width_low
        };
        let x = (cuff_mmhg - self.mean_arterial) / width;
        self.pulse_amplitude * (-x * x).exp()
    }

    /// Cuff pressure above MAP where the envelope falls to `ratio` of its maximum.
    pub fn expected_systolic(&self, ratio: f64) -> f64 {
        self.mean_arterial + self.width_high * (1.0 / ratio).ln().sqrt()
    }

    /// Same, below MAP.
    pub fn expected_diastolic(&self, ratio: f64) -> f64 {
        self.mean_arterial - self.width_low * (1.0 / ratio).ln().sqrt()
    }
}

#[derive(Debug)]
struct CuffModel {
    params: CuffParams,
    pressure_mmhg: f64,
    pump_on: bool,
    valve: Valve,
    reads: u64,
    closed_reads: u64,
    rng: StdRng,
}

impl CuffModel {
    fn step(&mut self) -> Result<f64, SourceError> {
        let p = self.params;
        if let Some(limit) = p.fail_after {
            if self.closed_reads >= limit {
                return Err(SourceError::Io("simulated sensor failure".into()));
            }
        }

        let dt = 1.0 / p.sample_rate_hz;
        if self.valve == Valve::Open {
            self.pressure_mmhg *= (-dt / p.vent_tau_secs).exp();
        } else if self.pump_on {
            self.pressure_mmhg += p.inflate_rate * dt;
        } else {
            self.pressure_mmhg -= p.bleed_rate * dt;
        }
        self.pressure_mmhg = self.pressure_mmhg.max(0.0);

        let t = self.reads as f64 * dt;
        self.reads += 1;
        if self.valve == Valve::Closed {
            self.closed_reads += 1;
        }
        let pulse = p.envelope(self.pressure_mmhg) * (TAU * p.heart_rate_hz * t).sin();
        let noise = if p.noise_volts > 0.0 {
            self.rng.gen_range(-p.noise_volts..=p.noise_volts)
        } else {
            0.0
        };
        Ok(p.transducer.voltage_for(self.pressure_mmhg + pulse, p.ambient_voltage) + noise)
    }
}

type SharedModel = Arc<Mutex<CuffModel>>;

/// Builds the two halves of a simulated cuff that share one pressure model.
pub struct SimulatedCuff;

impl SimulatedCuff {
    pub fn new(params: CuffParams) -> (SimulatedSensor, SimulatedPump) {
        let model = Arc::new(Mutex::new(CuffModel {
            params,
            pressure_mmhg: 0.0,
            pump_on: false,
            valve: Valve::Open,
            reads: 0,
            closed_reads: 0,
            rng: StdRng::seed_from_u64(params.seed),
        }));
        (
            SimulatedSensor {
                model: Arc::clone(&model),
            },
            SimulatedPump { model },
        )
    }
}

/// Transducer side; every read advances the model by one sample period.
pub struct SimulatedSensor {
    model: SharedModel,
}

impl SimulatedSensor {
    /// Read-only view of the model that stays usable after the halves move away.
    pub fn monitor(&self) -> CuffMonitor {
        CuffMonitor {
            model: Arc::clone(&self.model),
        }
    }
}

impl SampleSource for SimulatedSensor {
    fn read_voltage(&mut self) -> Result<f64, SourceError> {
        self.model
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .step()
    }
}

/// Pump and valve side.
pub struct SimulatedPump {
    model: SharedModel,
}

impl SimulatedPump {
    fn lock(&self) -> MutexGuard<'_, CuffModel> {
        self.model.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone)]
pub struct CuffMonitor {
    model: SharedModel,
}

impl CuffMonitor {
    pub fn pressure_mmhg(&self) -> f64 {
        self.lock().pressure_mmhg
    }

    pub fn pump_on(&self) -> bool {
        self.lock().pump_on
    }

    pub fn valve(&self) -> Valve {
        self.lock().valve
    }

    fn lock(&self) -> MutexGuard<'_, CuffModel> {
        self.model.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Actuator for SimulatedPump {
    fn set_pump(&mut self, on: bool) {
        self.lock().pump_on = on;
    }

    fn set_valve(&mut self, valve: Valve) {
        self.lock().valve = valve;
    }
}
