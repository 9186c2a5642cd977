//! Measurement state machine.
//!
//! `Processor` owns the sample source, the actuators, the filter pipeline and
//! the peak detector, and advances one sample per [`Processor::tick`]. It is
//! fully synchronous; [`crate::engine`] runs it on the acquisition thread.
//! Anything another thread may touch lives in [`SharedState`].

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::mpsc::{SyncSender, TrySendError};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::SystemTime;

use log::{debug, error, info, warn};

use crate::config::{Configuration, ProcessorSettings};
use crate::drivers::{
    Actuator, BpEstimator, ConfigError, FilterPipeline, FilteredSample, MeasurementError,
    OscillationDetector, PeakRecord, Sample, SampleSource, SettingsError, Valve,
};
use crate::recorder::SessionRecorder;
use crate::types::{Event, MeasurementOutcome, MeasurementState, Notification};

/// Notifications buffered per subscriber before new ones are dropped.
pub const SUBSCRIBER_QUEUE: usize = 4096;

/// State readable (and configuration writable) from any thread without
/// stalling the acquisition loop.
#[derive(Debug)]
pub struct SharedState {
    state: AtomicU8,
    running: AtomicBool,
    measuring: AtomicBool,
    abort_requested: AtomicBool,
    inflate_target: AtomicU64,
    cuff_pressure: AtomicU64,
    config: RwLock<Configuration>,
    last_outcome: Mutex<Option<MeasurementOutcome>>,
}

impl SharedState {
    pub fn new(config: Configuration) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            state: AtomicU8::new(MeasurementState::Config as u8),
            running: AtomicBool::new(false),
            measuring: AtomicBool::new(false),
            abort_requested: AtomicBool::new(false),
            inflate_target: AtomicU64::new(config.pump_up_mmhg.to_bits()),
            cuff_pressure: AtomicU64::new(0.0f64.to_bits()),
            config: RwLock::new(config),
            last_outcome: Mutex::new(None),
        })
    }

    pub fn state(&self) -> MeasurementState {
        MeasurementState::from_u8(self.state.load(Ordering::Acquire))
            .unwrap_or(MeasurementState::Idle)
    }

    fn store_state(&self, state: MeasurementState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    pub fn is_measuring(&self) -> bool {
        self.measuring.load(Ordering::Acquire)
    }

    pub fn inflate_target(&self) -> f64 {
        f64::from_bits(self.inflate_target.load(Ordering::Acquire))
    }

    pub fn cuff_pressure(&self) -> f64 {
        f64::from_bits(self.cuff_pressure.load(Ordering::Relaxed))
    }

    /// Asks the acquisition loop to vent and return to `Idle` on its next tick.
    pub fn request_abort(&self) {
        self.abort_requested.store(true, Ordering::Release);
    }

    fn take_abort_request(&self) -> bool {
        self.abort_requested.swap(false, Ordering::AcqRel)
    }

    pub fn config(&self) -> Configuration {
        *self.config.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn last_outcome(&self) -> Option<MeasurementOutcome> {
        self.last_outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn store_outcome(&self, outcome: MeasurementOutcome) {
        *self.last_outcome.lock().unwrap_or_else(PoisonError::into_inner) = Some(outcome);
    }

    /// Applies `change` unless a session is active. The state is checked while
    /// the write lock is held, and sessions start under the read lock, so a
    /// change can never land inside a running session.
    pub fn update_config(
        &self,
        change: impl FnOnce(&mut Configuration) -> Result<(), ConfigError>,
    ) -> Result<(), ConfigError> {
        let mut guard = self.config.write().unwrap_or_else(PoisonError::into_inner);
        if !self.state().accepts_configuration() {
            return Err(ConfigError::SessionActive);
        }
        let mut staged = *guard;
        change(&mut staged)?;
        staged.validate()?;
        *guard = staged;
        self.inflate_target
            .store(staged.pump_up_mmhg.to_bits(), Ordering::Release);
        Ok(())
    }

    pub fn set_ratio_sbp(&self, value: f64) -> Result<(), ConfigError> {
        self.update_config(|c| c.set_ratio_sbp(value))
    }

    pub fn set_ratio_dbp(&self, value: f64) -> Result<(), ConfigError> {
        self.update_config(|c| c.set_ratio_dbp(value))
    }

    pub fn set_min_nbr_peaks(&self, value: i64) -> Result<(), ConfigError> {
        self.update_config(|c| c.set_min_nbr_peaks(value))
    }

    pub fn set_pump_up_value(&self, mmhg: i64) -> Result<(), ConfigError> {
        self.update_config(|c| c.set_pump_up(mmhg))
    }

    pub fn set_ambient_voltage(&self, voltage: f64) -> Result<(), ConfigError> {
        self.update_config(|c| c.set_ambient_voltage(voltage))
    }

    pub fn reset_config_values(&self) -> Result<(), ConfigError> {
        self.update_config(|c| {
            *c = Configuration::default();
            Ok(())
        })
    }
}

/// Fan-out of notifications over bounded queues. A full queue loses the
/// notification; a subscriber that hung up is dropped.
#[derive(Default)]
pub struct Publisher {
    subscribers: Vec<SyncSender<Notification>>,
}

impl Publisher {
    pub fn subscribe(&mut self, subscriber: SyncSender<Notification>) {
        self.subscribers.push(subscriber);
    }

    pub fn publish(&mut self, notification: Notification) {
        self.subscribers
            .retain(|tx| match tx.try_send(notification.clone()) {
                Ok(()) | Err(TrySendError::Full(_)) => true,
                Err(TrySendError::Disconnected(_)) => false,
            });
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

/// One inflate -> deflate -> empty cycle.
struct Session {
    config: Configuration,
    ambient_voltage: f64,
    peaks: Vec<PeakRecord>,
}

pub struct Processor<S, A, R> {
    source: S,
    actuator: A,
    recorder: R,
    settings: ProcessorSettings,
    shared: Arc<SharedState>,
    pipeline: FilterPipeline,
    detector: OscillationDetector,
    publisher: Publisher,
    session: Option<Session>,
    tick: u64,
    last: FilteredSample,
    last_pressure: f64,
}

impl<S, A, R> Processor<S, A, R>
where
    S: SampleSource,
    A: Actuator,
    R: SessionRecorder,
{
    pub fn new(
        source: S,
        actuator: A,
        recorder: R,
        settings: ProcessorSettings,
        shared: Arc<SharedState>,
    ) -> Result<Self, SettingsError> {
        settings.validate()?;
        shared.config().validate()?;
        let pipeline = FilterPipeline::new(
            settings.sample_rate_hz,
            settings.lowpass_cutoff_hz,
            settings.highpass_cutoff_hz,
        )?;
        let mut processor = Self {
            source,
            actuator,
            recorder,
            settings,
            shared,
            pipeline,
            detector: OscillationDetector::new(settings.detector_settings()),
            publisher: Publisher::default(),
            session: None,
            tick: 0,
            last: FilteredSample::default(),
            last_pressure: 0.0,
        };
        processor.vent();
        Ok(processor)
    }

    pub fn shared(&self) -> &Arc<SharedState> {
        &self.shared
    }

    pub fn settings(&self) -> &ProcessorSettings {
        &self.settings
    }

    pub fn state(&self) -> MeasurementState {
        self.shared.state()
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn peaks(&self) -> &[PeakRecord] {
        self.session.as_ref().map_or(&[], |s| s.peaks.as_slice())
    }

    pub fn subscribe(&mut self, subscriber: SyncSender<Notification>) {
        self.publisher.subscribe(subscriber);
    }

    /// Captures the ambient baseline, validates it and starts inflating.
    pub fn start_measurement(&mut self) -> Result<(), MeasurementError> {
        let state = self.state();
        if state.is_session_active() {
            return Err(MeasurementError::InvalidState {
                action: "start a measurement",
                state: state.to_string(),
            });
        }
        // A stop that was raised before this start must not cancel it.
        if self.shared.take_abort_request() {
            debug!("discarding stop request that predates the start");
        }

        let voltage = match self.read_voltage() {
            Ok(v) => v,
            Err(err) => {
                self.enter(MeasurementState::Idle);
                self.publish_fault(err.clone());
                return Err(err);
            }
        };

        let shared = Arc::clone(&self.shared);
        let guard = shared.config.read().unwrap_or_else(PoisonError::into_inner);
        let config = *guard;
        if !config.check_ambient(voltage, self.settings.ambient_tolerance) {
            drop(guard);
            let err = MeasurementError::AmbientOutOfRange {
                voltage,
                nominal: config.ambient_voltage,
                tolerance: self.settings.ambient_tolerance,
            };
            warn!("refusing to start: {err}");
            self.enter(MeasurementState::Idle);
            self.publish_fault(err.clone());
            return Err(err);
        }
        // Still under the read lock: no setter can slip in before the state flips.
        self.shared.store_state(MeasurementState::Inflate);
        drop(guard);

        self.pipeline.prime(voltage);
        self.detector.reset();
        self.session = Some(Session {
            config,
            ambient_voltage: voltage,
            peaks: Vec::new(),
        });
        self.shared
            .inflate_target
            .store(config.pump_up_mmhg.to_bits(), Ordering::Release);
        self.shared.measuring.store(true, Ordering::Release);
        self.recorder.begin_session(SystemTime::now(), &config);

        self.actuator.set_valve(Valve::Closed);
        self.actuator.set_pump(true);
        info!(
            "measurement started: ambient {:.3} V, target {:.0} mmHg",
            voltage, config.pump_up_mmhg
        );
        self.announce_transition(state, MeasurementState::Inflate);
        Ok(())
    }

    /// Unconditional safety abort: pump off, vent open, back to `Idle`.
    pub fn stop_measurement(&mut self) {
        self.vent();
        if self.state().is_session_active() {
            info!("measurement aborted in {}", self.state());
            self.recorder.end_session();
            self.session = None;
            self.shared.measuring.store(false, Ordering::Release);
            self.enter(MeasurementState::Idle);
        }
    }

    /// Handles a pending cross-thread abort request. Returns true if one was pending.
    pub fn service_abort(&mut self) -> bool {
        if self.shared.take_abort_request() {
            self.stop_measurement();
            true
        } else {
            false
        }
    }

    /// Processes exactly one sample.
    pub fn tick(&mut self) -> MeasurementState {
        self.service_abort();
        if self.state() == MeasurementState::Config {
            self.enter(MeasurementState::Idle);
        }

        let voltage = match self.read_voltage() {
            Ok(v) => v,
            Err(err) => {
                self.sensor_fault(err);
                return self.state();
            }
        };
        let sample = Sample {
            tick: self.tick,
            voltage,
        };
        self.tick += 1;

        let filtered = self.pipeline.filter(voltage);
        let baseline = match &self.session {
            Some(session) => session.ambient_voltage,
            None => self.shared.config().ambient_voltage,
        };
        let pressure = self
            .settings
            .transducer
            .cuff_pressure(filtered.pressure_value, baseline);
        self.last = filtered;
        self.last_pressure = pressure;
        self.shared
            .cuff_pressure
            .store(pressure.to_bits(), Ordering::Relaxed);
        if self.session.is_some() {
            self.recorder.record_sample(&sample, &filtered, pressure);
        }

        match self.state() {
            MeasurementState::Inflate => self.inflate_step(pressure),
            MeasurementState::Deflate => self.deflate_step(pressure, filtered.oscillation_value),
            MeasurementState::Empty => self.finalize(),
            MeasurementState::Config | MeasurementState::Idle | MeasurementState::Results => {}
        }

        if self.settings.publish_every > 0 && sample.tick % self.settings.publish_every == 0 {
            self.publish(Event::Reading);
        }
        self.state()
    }

    /// Vents the cuff; used when the acquisition loop shuts down.
    pub fn shutdown(&mut self) {
        self.stop_measurement();
        self.publisher = Publisher::default();
    }

    fn inflate_step(&mut self, pressure: f64) {
        let target = self
            .session
            .as_ref()
            .map_or(self.settings.safety_ceiling_mmhg, |s| s.config.pump_up_mmhg);
        if pressure >= self.settings.safety_ceiling_mmhg {
            warn!(
                "safety ceiling reached at {:.1} mmHg (target {:.0}), deflating",
                pressure, target
            );
            self.publish_fault(MeasurementError::SafetyCeilingExceeded { pressure });
            self.enter_deflate();
        } else if pressure >= target {
            debug!("inflate target reached at {:.1} mmHg", pressure);
            self.enter_deflate();
        }
    }

    fn enter_deflate(&mut self) {
        self.actuator.set_pump(false);
        self.actuator.set_valve(Valve::Closed);
        self.detector.reset();
        self.enter(MeasurementState::Deflate);
    }

    fn deflate_step(&mut self, pressure: f64, oscillation: f64) {
        if let Some(peak) = self.detector.observe(pressure, oscillation) {
            self.push_peak(peak);
        }
        if pressure <= self.settings.deflated_threshold_mmhg {
            if let Some(peak) = self.detector.finish() {
                self.push_peak(peak);
            }
            self.actuator.set_valve(Valve::Open);
            self.enter(MeasurementState::Empty);
        }
    }

    fn push_peak(&mut self, peak: PeakRecord) {
        if let Some(session) = self.session.as_mut() {
            debug!(
                "peak #{} at {:.1} mmHg, amplitude {:.5} V",
                session.peaks.len() + 1,
                peak.cuff_pressure,
                peak.amplitude
            );
            session.peaks.push(peak);
            self.recorder.record_peak(&peak);
        }
    }

    fn finalize(&mut self) {
        let Some(session) = self.session.take() else {
            self.enter(MeasurementState::Idle);
            return;
        };
        let estimator = BpEstimator::new(
            session.config.ratio_sbp,
            session.config.ratio_dbp,
            session.config.min_nbr_peaks,
        );
        let outcome = match estimator.estimate(&session.peaks) {
            Ok(bp) => {
                info!(
                    "blood pressure {:.0}/{:.0} mmHg (MAP {:.0}) from {} peaks",
                    bp.systolic, bp.diastolic, bp.mean_arterial, bp.peak_count
                );
                MeasurementOutcome::Success(bp)
            }
            Err(err) => {
                warn!("measurement failed: {err}");
                MeasurementOutcome::Failure(err)
            }
        };
        self.recorder.record_outcome(&outcome);
        self.recorder.end_session();
        self.shared.store_outcome(outcome.clone());
        self.shared.measuring.store(false, Ordering::Release);
        self.enter(MeasurementState::Results);
        self.publish(Event::Outcome(outcome));
    }

    fn sensor_fault(&mut self, err: MeasurementError) {
        if self.state().is_session_active() {
            error!("{err}, aborting measurement");
            self.stop_measurement();
            self.shared
                .store_outcome(MeasurementOutcome::Failure(err.clone()));
        } else {
            debug!("{err}");
        }
        self.publish_fault(err);
    }

    fn read_voltage(&mut self) -> Result<f64, MeasurementError> {
        let voltage = self.source.read_voltage()?;
        if !voltage.is_finite() {
            return Err(crate::drivers::SourceError::InvalidReading(voltage).into());
        }
        Ok(voltage)
    }

    fn vent(&mut self) {
        self.actuator.set_pump(false);
        self.actuator.set_valve(Valve::Open);
    }

    fn enter(&mut self, next: MeasurementState) {
        let previous = self.state();
        if previous == next {
            return;
        }
        self.shared.store_state(next);
        self.announce_transition(previous, next);
    }

    fn announce_transition(&mut self, from: MeasurementState, to: MeasurementState) {
        info!("state {from} -> {to}");
        self.publish(Event::StateChanged { from });
    }

    fn publish_fault(&mut self, err: MeasurementError) {
        self.publish(Event::Fault(err));
    }

    fn publish(&mut self, event: Event) {
        if self.publisher.is_empty() {
            return;
        }
        self.publisher.publish(Notification {
            state: self.state(),
            cuff_pressure_mmhg: self.last_pressure,
            oscillation: self.last.oscillation_value,
            event,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::{ManualSource, RecordingActuator, SourceError, Transducer};
    use crate::recorder::NullRecorder;
    use std::sync::mpsc;

    type TestProcessor = Processor<ManualSource, RecordingActuator, NullRecorder>;

    const AMBIENT: f64 = 0.7;

    fn volts(mmhg: f64) -> f64 {
        Transducer::default().voltage_for(mmhg, AMBIENT)
    }

    fn processor_with(settings: ProcessorSettings, config: Configuration) -> TestProcessor {
        Processor::new(
            ManualSource::new([]),
            RecordingActuator::default(),
            NullRecorder,
            settings,
            Arc::new(SharedState::new(config).unwrap()),
        )
        .unwrap()
    }

    fn processor() -> TestProcessor {
        processor_with(ProcessorSettings::default(), Configuration::default())
    }

    fn feed(processor: &mut TestProcessor, mmhg: f64, ticks: usize) -> MeasurementState {
        let mut state = processor.state();
        for _ in 0..ticks {
            processor.source_mut().push(volts(mmhg));
            state = processor.tick();
        }
        state
    }

    fn start(processor: &mut TestProcessor) {
        processor.source_mut().push(AMBIENT);
        processor.start_measurement().unwrap();
    }

    #[test]
    fn first_tick_leaves_config_state() {
        let mut p = processor();
        assert_eq!(p.state(), MeasurementState::Config);
        assert_eq!(feed(&mut p, 0.0, 1), MeasurementState::Idle);
    }

    #[test]
    fn start_closes_valve_and_runs_pump() {
        let mut p = processor();
        feed(&mut p, 0.0, 1);
        start(&mut p);
        assert_eq!(p.state(), MeasurementState::Inflate);
        assert!(p.actuator().pump_on);
        assert_eq!(p.actuator().valve, Valve::Closed);
        assert!(p.shared().is_measuring());
    }

    #[test]
    fn implausible_ambient_never_starts_the_pump() {
        let mut p = processor();
        feed(&mut p, 0.0, 1);
        p.source_mut().push(1.2);
        let err = p.start_measurement().unwrap_err();
        assert!(matches!(err, MeasurementError::AmbientOutOfRange { .. }));
        assert_eq!(p.state(), MeasurementState::Idle);
        assert!(!p.actuator().pump_on);
        assert_eq!(p.actuator().valve, Valve::Open);
    }

    #[test]
    fn start_while_measuring_is_rejected() {
        let mut p = processor();
        start(&mut p);
        p.source_mut().push(AMBIENT);
        assert!(matches!(
            p.start_measurement(),
            Err(MeasurementError::InvalidState { .. })
        ));
    }

    #[test]
    fn stop_raised_before_start_does_not_cancel_it() {
        let mut p = processor();
        feed(&mut p, 0.0, 1);
        p.shared().request_abort();
        start(&mut p);
        assert_eq!(feed(&mut p, 0.0, 1), MeasurementState::Inflate);
        assert!(p.actuator().pump_on);
    }

    #[test]
    fn stop_raised_after_start_still_aborts() {
        let mut p = processor();
        start(&mut p);
        p.shared().request_abort();
        assert_eq!(feed(&mut p, 0.0, 1), MeasurementState::Idle);
    }

    #[test]
    fn out_of_range_ceiling_refuses_to_build() {
        for ceiling in [400.0, f64::NAN] {
            let settings = ProcessorSettings {
                safety_ceiling_mmhg: ceiling,
                ..ProcessorSettings::default()
            };
            let built = Processor::new(
                ManualSource::new([]),
                RecordingActuator::default(),
                NullRecorder,
                settings,
                Arc::new(SharedState::new(Configuration::default()).unwrap()),
            );
            assert!(matches!(built, Err(SettingsError::SafetyCeiling { .. })));
        }
    }

    #[test]
    fn shared_state_rejects_unchecked_configuration() {
        let config = Configuration {
            pump_up_mmhg: 1000.0,
            ratio_sbp: 0.0,
            min_nbr_peaks: 0,
            ..Configuration::default()
        };
        assert!(SharedState::new(config).is_err());
    }

    #[test]
    fn full_subscriber_queue_drops_notifications_not_the_subscriber() {
        let mut publisher = Publisher::default();
        let (tx, rx) = mpsc::sync_channel(2);
        publisher.subscribe(tx);
        let reading = Notification {
            state: MeasurementState::Idle,
            cuff_pressure_mmhg: 0.0,
            oscillation: 0.0,
            event: Event::Reading,
        };
        for _ in 0..10 {
            publisher.publish(reading.clone());
        }
        assert_eq!(publisher.len(), 1);
        assert_eq!(rx.try_iter().count(), 2);

        publisher.publish(reading.clone());
        assert_eq!(rx.try_iter().count(), 1);

        drop(rx);
        publisher.publish(reading);
        assert!(publisher.is_empty());
    }

    #[test]
    fn reaching_target_switches_to_deflate() {
        let mut p = processor();
        start(&mut p);
        assert_eq!(feed(&mut p, 100.0, 50), MeasurementState::Inflate);
        assert_eq!(feed(&mut p, 185.0, 50), MeasurementState::Deflate);
        assert!(!p.actuator().pump_on);
        assert_eq!(p.actuator().valve, Valve::Closed);
    }

    #[test]
    fn safety_ceiling_wins_over_a_higher_target() {
        let settings = ProcessorSettings {
            safety_ceiling_mmhg: 150.0,
            ..ProcessorSettings::default()
        };
        let mut p = processor_with(settings, Configuration::default());
        let (tx, rx) = mpsc::sync_channel(SUBSCRIBER_QUEUE);
        p.subscribe(tx);
        start(&mut p);
        assert_eq!(p.shared().inflate_target(), 180.0);

        let mut mmhg = 0.0;
        while p.state() == MeasurementState::Inflate && mmhg < 180.0 {
            mmhg += 0.5;
            feed(&mut p, mmhg, 1);
        }
        assert_eq!(p.state(), MeasurementState::Deflate);
        assert!(p.shared().cuff_pressure() >= 150.0);
        assert!(p.shared().cuff_pressure() < 160.0, "deflated late");
        assert!(rx
            .try_iter()
            .any(|n| matches!(n.event, Event::Fault(MeasurementError::SafetyCeilingExceeded { .. }))));
    }

    #[test]
    fn pressure_jump_past_ceiling_deflates_immediately() {
        let mut config = Configuration::default();
        config.set_pump_up(250).unwrap();
        let mut p = processor_with(ProcessorSettings::default(), config);
        start(&mut p);
        assert_eq!(feed(&mut p, 400.0, 20), MeasurementState::Deflate);
    }

    #[test]
    fn stop_from_every_session_state_vents_within_one_tick() {
        for target in [
            MeasurementState::Inflate,
            MeasurementState::Deflate,
            MeasurementState::Empty,
        ] {
            let mut p = processor();
            start(&mut p);
            if target != MeasurementState::Inflate {
                feed(&mut p, 200.0, 100);
            }
            if target == MeasurementState::Empty {
                while p.state() == MeasurementState::Deflate {
                    feed(&mut p, 0.0, 1);
                }
            }
            assert_eq!(p.state(), target);

            p.shared().request_abort();
            assert_eq!(feed(&mut p, 0.0, 1), MeasurementState::Idle);
            assert!(!p.actuator().pump_on);
            assert_eq!(p.actuator().valve, Valve::Open);
            assert!(p.peaks().is_empty());
            assert!(!p.shared().is_measuring());
        }
    }

    #[test]
    fn sensor_fault_aborts_session_to_idle() {
        let mut p = processor();
        start(&mut p);
        feed(&mut p, 50.0, 10);
        p.source_mut().push_fault(SourceError::Io("adc timeout".into()));
        assert_eq!(p.tick(), MeasurementState::Idle);
        assert_eq!(p.actuator().valve, Valve::Open);
        assert!(matches!(
            p.shared().last_outcome(),
            Some(MeasurementOutcome::Failure(MeasurementError::SensorFault(_)))
        ));
    }

    #[test]
    fn config_is_locked_during_session_and_reopens_afterwards() {
        let mut p = processor();
        start(&mut p);
        let shared = Arc::clone(p.shared());
        assert_eq!(shared.set_ratio_sbp(0.6), Err(ConfigError::SessionActive));
        assert_eq!(shared.reset_config_values(), Err(ConfigError::SessionActive));
        assert_eq!(shared.config(), Configuration::default());

        p.stop_measurement();
        shared.set_ratio_sbp(0.6).unwrap();
        assert_eq!(shared.config().ratio_sbp, 0.6);
    }

    #[test]
    fn pump_up_setter_updates_inflate_target() {
        let p = processor();
        p.shared().set_pump_up_value(160).unwrap();
        assert_eq!(p.shared().inflate_target(), 160.0);
        p.shared().reset_config_values().unwrap();
        assert_eq!(p.shared().inflate_target(), 180.0);
    }

    #[test]
    fn reset_config_values_is_idempotent() {
        let p = processor();
        let shared = p.shared();
        shared.set_ratio_dbp(0.7).unwrap();
        shared.set_min_nbr_peaks(4).unwrap();
        shared.reset_config_values().unwrap();
        let once = shared.config();
        shared.reset_config_values().unwrap();
        assert_eq!(shared.config(), once);
        assert_eq!(once, Configuration::default());
    }

    #[test]
    fn empty_deflation_ends_with_insufficient_data() {
        let mut p = processor();
        let (tx, rx) = mpsc::sync_channel(SUBSCRIBER_QUEUE);
        p.subscribe(tx);
        start(&mut p);
        feed(&mut p, 190.0, 100);
        assert_eq!(p.state(), MeasurementState::Deflate);
        feed(&mut p, 0.0, 100);
        assert_eq!(p.state(), MeasurementState::Results);
        assert!(matches!(
            p.shared().last_outcome(),
            Some(MeasurementOutcome::Failure(MeasurementError::InsufficientData { found: 0, .. }))
        ));
        let outcome = rx
            .try_iter()
            .find_map(|n| match n.event {
                Event::Outcome(o) => Some(o),
                _ => None,
            })
            .unwrap();
        assert!(!outcome.is_success());

        // Results accepts a new session straight away.
        start(&mut p);
        assert_eq!(p.state(), MeasurementState::Inflate);
    }

    #[test]
    fn transitions_are_published_in_order() {
        let mut p = processor();
        let (tx, rx) = mpsc::sync_channel(SUBSCRIBER_QUEUE);
        p.subscribe(tx);
        feed(&mut p, 0.0, 1);
        start(&mut p);
        feed(&mut p, 190.0, 100);
        feed(&mut p, 0.0, 100);
        let states: Vec<MeasurementState> = rx
            .try_iter()
            .filter(|n| matches!(n.event, Event::StateChanged { .. }))
            .map(|n| n.state)
            .collect();
        assert_eq!(
            states,
            vec![
                MeasurementState::Idle,
                MeasurementState::Inflate,
                MeasurementState::Deflate,
                MeasurementState::Empty,
                MeasurementState::Results,
            ]
        );
    }
}
