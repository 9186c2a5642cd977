// Signal path building blocks: sample source, filters, peak detection, estimation.
pub mod detector;
pub mod error;
pub mod estimator;
pub mod filter;
pub mod pipeline;
pub mod source;

pub use detector::{DetectorSettings, OscillationDetector, PeakRecord};
pub use error::{ConfigError, FilterDesignError, MeasurementError, SettingsError, SourceError};
pub use estimator::{BloodPressure, BpEstimator};
pub use filter::{Butterworth, FilterKind};
pub use pipeline::{FilterPipeline, FilteredSample, Transducer};
pub use source::{Actuator, ManualSource, RecordingActuator, Sample, SampleSource, Valve};
