use thiserror::Error;

/// Failure reported by a sample source (ADC driver).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    #[error("sample source disconnected")]
    Disconnected,
    #[error("sample source I/O failure: {0}")]
    Io(String),
    #[error("sample source returned a non-finite reading: {0}")]
    InvalidReading(f64),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterDesignError {
    #[error("sample rate must be greater than zero")]
    InvalidSampleRate,
    #[error("cutoff {cutoff_hz} Hz must lie strictly between 0 and Nyquist ({nyquist_hz} Hz)")]
    CutoffOutOfRange { cutoff_hz: f64, nyquist_hz: f64 },
}

/// Hardware settings a processor refuses to run with.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SettingsError {
    #[error(transparent)]
    Filter(#[from] FilterDesignError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("safety ceiling {value} mmHg outside ({min}, {max}]")]
    SafetyCeiling { value: f64, min: f64, max: f64 },
    #[error("deflated threshold {0} mmHg must be finite and non-negative")]
    DeflatedThreshold(f64),
    #[error("ambient tolerance {0} V must be finite and positive")]
    AmbientTolerance(f64),
}

/// Rejected configuration change.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("configuration cannot change while a measurement session is active")]
    SessionActive,
    #[error("SBP ratio {0} outside (0, 1)")]
    RatioSbp(f64),
    #[error("DBP ratio {0} outside (0, 1)")]
    RatioDbp(f64),
    #[error("minimum peak count {0} outside 1..=1000")]
    MinNbrPeaks(i64),
    #[error("pump-up target {value} mmHg outside ({min}, {max}]")]
    PumpUp { value: f64, min: f64, max: f64 },
    #[error("ambient voltage {0} V outside 0..=5 V")]
    AmbientVoltage(f64),
}

/// Every way a measurement can fail or be interrupted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MeasurementError {
    #[error("sensor fault: {0}")]
    SensorFault(#[from] SourceError),
    #[error("ambient voltage {voltage:.3} V outside {nominal:.3} V +/- {tolerance:.3} V")]
    AmbientOutOfRange {
        voltage: f64,
        nominal: f64,
        tolerance: f64,
    },
    #[error("insufficient data: {found} peaks detected, {required} required")]
    InsufficientData { found: usize, required: usize },
    #[error("degenerate oscillation envelope: {0}")]
    DegenerateEnvelope(String),
    #[error("cuff pressure {pressure:.1} mmHg reached the safety ceiling")]
    SafetyCeilingExceeded { pressure: f64 },
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(#[from] ConfigError),
    #[error("cannot {action} while in state {state}")]
    InvalidState { action: &'static str, state: String },
    #[error("acquisition engine has stopped")]
    EngineStopped,
}
