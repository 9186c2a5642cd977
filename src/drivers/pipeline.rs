use crate::drivers::filter::Butterworth;
use crate::drivers::FilterDesignError;

/// Literature value, 1 kPa in mmHg.
pub const MMHG_PER_KPA: f64 = 7.500_615_758_456_6;
/// Transducer sensitivity from the data sheet.
pub const KPA_PER_VOLT: f64 = 50.0;
/// Compensates the voltage divider in front of the ADC.
pub const DIVIDER_CORRECTION: f64 = 2.6;

/// One raw sample split into its two frequency bands (both in volts).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FilteredSample {
    pub pressure_value: f64,
    pub oscillation_value: f64,
}

/// Low-pass/high-pass split of the transducer signal.
///
/// Holds persistent filter state; one call consumes exactly one raw sample.
#[derive(Clone, Debug)]
pub struct FilterPipeline {
    lowpass: Butterworth,
    highpass: Butterworth,
    sample_rate_hz: f64,
}

impl FilterPipeline {
    pub fn new(
        sample_rate_hz: f64,
        lowpass_cutoff_hz: f64,
        highpass_cutoff_hz: f64,
    ) -> Result<Self, FilterDesignError> {
        Ok(Self {
            lowpass: Butterworth::lowpass(lowpass_cutoff_hz, sample_rate_hz)?,
            highpass: Butterworth::highpass(highpass_cutoff_hz, sample_rate_hz)?,
            sample_rate_hz,
        })
    }

    pub fn sample_rate_hz(&self) -> f64 {
        self.sample_rate_hz
    }

    pub fn filter(&mut self, raw_voltage: f64) -> FilteredSample {
        FilteredSample {
            pressure_value: self.lowpass.process_sample(raw_voltage),
            oscillation_value: self.highpass.process_sample(raw_voltage),
        }
    }

    /// Settles both branches on `baseline_voltage`. Only called on session entry.
    pub fn prime(&mut self, baseline_voltage: f64) {
        self.lowpass.prime(baseline_voltage);
        self.highpass.prime(baseline_voltage);
    }
}

/// Fixed voltage-to-pressure transfer function of the cuff transducer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transducer {
    pub kpa_per_volt: f64,
    pub correction: f64,
}

impl Default for Transducer {
    fn default() -> Self {
        Self {
            kpa_per_volt: KPA_PER_VOLT,
            correction: DIVIDER_CORRECTION,
        }
    }
}

impl Transducer {
    pub fn mmhg_per_volt(&self) -> f64 {
        self.correction * self.kpa_per_volt * MMHG_PER_KPA
    }

    /// Cuff pressure for a low-passed voltage, relative to the ambient baseline.
    pub fn cuff_pressure(&self, pressure_value: f64, ambient_voltage: f64) -> f64 {
        (pressure_value - ambient_voltage) * self.mmhg_per_volt()
    }

    /// Voltage that corresponds to `mmhg` above the ambient baseline.
    pub fn voltage_for(&self, mmhg: f64, ambient_voltage: f64) -> f64 {
        ambient_voltage + mmhg / self.mmhg_per_volt()
    }
}
