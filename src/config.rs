use serde::{Deserialize, Serialize};

use crate::drivers::{ConfigError, DetectorSettings, SettingsError, Transducer};

/// Hard ceiling for cuff pressure (mmHg); the pump target can never exceed it.
pub const MAX_PUMPUP: f64 = 250.0;
/// Below this cuff pressure (mmHg) the cuff counts as empty.
pub const DEFLATED_THRESHOLD_MMHG: f64 = 5.0;

pub const DEFAULT_RATIO_SBP: f64 = 0.5;
pub const DEFAULT_RATIO_DBP: f64 = 0.8;
pub const DEFAULT_MIN_NBR_PEAKS: usize = 10;
pub const DEFAULT_PUMP_UP_MMHG: f64 = 180.0;
pub const DEFAULT_AMBIENT_VOLTAGE: f64 = 0.7;

const MAX_MIN_NBR_PEAKS: i64 = 1000;
const AMBIENT_VOLTAGE_RANGE: (f64, f64) = (0.0, 5.0);

/// User-tunable measurement parameters. Only mutable while no session is active.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub ratio_sbp: f64,
    pub ratio_dbp: f64,
    pub min_nbr_peaks: usize,
    pub pump_up_mmhg: f64,
    /// Nominal transducer output with the cuff vented (V).
    pub ambient_voltage: f64,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            ratio_sbp: DEFAULT_RATIO_SBP,
            ratio_dbp: DEFAULT_RATIO_DBP,
            min_nbr_peaks: DEFAULT_MIN_NBR_PEAKS,
            pump_up_mmhg: DEFAULT_PUMP_UP_MMHG,
            ambient_voltage: DEFAULT_AMBIENT_VOLTAGE,
        }
    }
}

impl Configuration {
    pub fn set_ratio_sbp(&mut self, value: f64) -> Result<(), ConfigError> {
        if !is_open_unit(value) {
            return Err(ConfigError::RatioSbp(value));
        }
        self.ratio_sbp = value;
        Ok(())
    }

    pub fn set_ratio_dbp(&mut self, value: f64) -> Result<(), ConfigError> {
        if !is_open_unit(value) {
            return Err(ConfigError::RatioDbp(value));
        }
        self.ratio_dbp = value;
        Ok(())
    }

    pub fn set_min_nbr_peaks(&mut self, value: i64) -> Result<(), ConfigError> {
        if !(1..=MAX_MIN_NBR_PEAKS).contains(&value) {
            return Err(ConfigError::MinNbrPeaks(value));
        }
        self.min_nbr_peaks = value as usize;
        Ok(())
    }

    pub fn set_pump_up(&mut self, mmhg: i64) -> Result<(), ConfigError> {
        self.set_pump_up_mmhg(mmhg as f64)
    }

    fn set_pump_up_mmhg(&mut self, value: f64) -> Result<(), ConfigError> {
        if !value.is_finite() || value <= DEFLATED_THRESHOLD_MMHG || value > MAX_PUMPUP {
            return Err(ConfigError::PumpUp {
                value,
                min: DEFLATED_THRESHOLD_MMHG,
                max: MAX_PUMPUP,
            });
        }
        self.pump_up_mmhg = value;
        Ok(())
    }

    pub fn set_ambient_voltage(&mut self, voltage: f64) -> Result<(), ConfigError> {
        let (lo, hi) = AMBIENT_VOLTAGE_RANGE;
        if !voltage.is_finite() || voltage < lo || voltage > hi {
            return Err(ConfigError::AmbientVoltage(voltage));
        }
        self.ambient_voltage = voltage;
        Ok(())
    }

    /// Runs every field through its setter check. Needed for values built as
    /// struct literals or deserialized.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut checked = Configuration::default();
        checked.set_ratio_sbp(self.ratio_sbp)?;
        checked.set_ratio_dbp(self.ratio_dbp)?;
        checked.set_min_nbr_peaks(i64::try_from(self.min_nbr_peaks).unwrap_or(i64::MAX))?;
        checked.set_pump_up_mmhg(self.pump_up_mmhg)?;
        checked.set_ambient_voltage(self.ambient_voltage)
    }

    /// Plausibility gate for the vented-cuff baseline, run before the pump starts.
    pub fn check_ambient(&self, voltage: f64, tolerance: f64) -> bool {
        voltage.is_finite() && (voltage - self.ambient_voltage).abs() <= tolerance
    }
}

fn is_open_unit(value: f64) -> bool {
    value > 0.0 && value < 1.0
}

/// Hardware constants fixed when the processor is built.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProcessorSettings {
    pub sample_rate_hz: f64,
    pub lowpass_cutoff_hz: f64,
    pub highpass_cutoff_hz: f64,
    /// Inflation always stops here, whatever the configured target.
    pub safety_ceiling_mmhg: f64,
    pub deflated_threshold_mmhg: f64,
    /// Accepted deviation of the measured baseline from the nominal ambient voltage (V).
    pub ambient_tolerance: f64,
    pub transducer: Transducer,
    pub refractory_secs: f64,
    /// Peak detection pauses this long after deflation starts.
    pub deflate_settle_secs: f64,
    /// Oscillation amplitude (V) below which maxima are ignored.
    pub noise_floor: f64,
    /// Live readings go out every this many ticks; transitions always do.
    pub publish_every: u64,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            sample_rate_hz: 100.0,
            lowpass_cutoff_hz: 10.0,
            highpass_cutoff_hz: 0.5,
            safety_ceiling_mmhg: MAX_PUMPUP,
            deflated_threshold_mmhg: DEFLATED_THRESHOLD_MMHG,
            ambient_tolerance: 0.1,
            transducer: Transducer::default(),
            refractory_secs: 0.25,
            deflate_settle_secs: 3.0,
            noise_floor: 1.0e-4,
            publish_every: 10,
        }
    }
}

impl ProcessorSettings {
    /// Checked before a processor is built. The ceiling must lie in
    /// `(deflated_threshold, MAX_PUMPUP]`.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let threshold = self.deflated_threshold_mmhg;
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(SettingsError::DeflatedThreshold(threshold));
        }
        let ceiling = self.safety_ceiling_mmhg;
        if !ceiling.is_finite() || ceiling <= threshold || ceiling > MAX_PUMPUP {
            return Err(SettingsError::SafetyCeiling {
                value: ceiling,
                min: threshold,
                max: MAX_PUMPUP,
            });
        }
        if !self.ambient_tolerance.is_finite() || self.ambient_tolerance <= 0.0 {
            return Err(SettingsError::AmbientTolerance(self.ambient_tolerance));
        }
        Ok(())
    }

    pub fn sample_period_secs(&self) -> f64 {
        1.0 / self.sample_rate_hz
    }

    pub fn detector_settings(&self) -> DetectorSettings {
        DetectorSettings {
            refractory_samples: (self.refractory_secs * self.sample_rate_hz).round() as u64,
            blanking_samples: (self.deflate_settle_secs * self.sample_rate_hz).round() as u64,
            noise_floor: self.noise_floor,
        }
    }
}
