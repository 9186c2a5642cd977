use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};

use crate::config::{Configuration, ProcessorSettings};
use crate::drivers::{Actuator, MeasurementError, SampleSource};
use crate::processing::{Processor, SharedState, SUBSCRIBER_QUEUE};
use crate::recorder::SessionRecorder;
use crate::types::{Command, MeasurementOutcome, MeasurementState, Notification};

/// How the acquisition loop spaces its ticks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pacing {
    /// One tick per sample period of wall-clock time.
    RealTime,
    /// Back-to-back ticks, for simulation and tests.
    Unpaced,
}

/// Control surface of a running acquisition thread.
///
/// Setters and getters touch shared state directly. Starting a measurement is
/// queued to the acquisition thread and waits for its answer; stopping only
/// raises a flag the loop checks before anything else on its next tick.
pub struct EngineHandle {
    shared: Arc<SharedState>,
    commands: Sender<Command>,
    thread: Option<JoinHandle<()>>,
}

/// Builds the processor and runs it on a dedicated thread.
pub fn spawn<S, A, R>(
    source: S,
    actuator: A,
    recorder: R,
    settings: ProcessorSettings,
    config: Configuration,
    pacing: Pacing,
) -> Result<EngineHandle>
where
    S: SampleSource + Send + 'static,
    A: Actuator + Send + 'static,
    R: SessionRecorder + Send + 'static,
{
    let shared = Arc::new(SharedState::new(config).context("validating configuration")?);
    let processor = Processor::new(source, actuator, recorder, settings, Arc::clone(&shared))
        .context("validating processor settings")?;
    let (tx_cmd, rx_cmd) = mpsc::channel();

    shared.set_running(true);
    let thread = thread::Builder::new()
        .name("bp-acquisition".to_owned())
        .spawn(move || run(processor, rx_cmd, pacing))
        .context("spawning acquisition thread")?;

    info!(
        "acquisition running at {:.0} Hz ({:?})",
        settings.sample_rate_hz, pacing
    );
    Ok(EngineHandle {
        shared,
        commands: tx_cmd,
        thread: Some(thread),
    })
}

fn run<S, A, R>(mut processor: Processor<S, A, R>, rx_cmd: Receiver<Command>, pacing: Pacing)
where
    S: SampleSource,
    A: Actuator,
    R: SessionRecorder,
{
    let period = Duration::from_secs_f64(processor.settings().sample_period_secs());
    let shared = Arc::clone(processor.shared());
    let mut deadline = Instant::now();

    while shared.is_running() {
        processor.service_abort();

        loop {
            match rx_cmd.try_recv() {
                Ok(Command::Start(reply)) => {
                    let result = processor.start_measurement();
                    reply.send(result).ok();
                }
                Ok(Command::Subscribe(subscriber)) => processor.subscribe(subscriber),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!("control handle dropped, stopping acquisition");
                    shared.set_running(false);
                    break;
                }
            }
        }
        if !shared.is_running() {
            break;
        }

        processor.tick();

        if pacing == Pacing::RealTime {
            deadline += period;
            let now = Instant::now();
            if deadline > now {
                thread::sleep(deadline - now);
            } else {
                if now - deadline > period * 10 {
                    warn!("acquisition loop overrun by {:?}", now - deadline);
                }
                deadline = now;
            }
        }
    }

    processor.shutdown();
    info!("acquisition thread stopped");
}

impl EngineHandle {
    pub fn start_measurement(&self) -> Result<(), MeasurementError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.commands
            .send(Command::Start(reply_tx))
            .map_err(|_| MeasurementError::EngineStopped)?;
        reply_rx.recv().map_err(|_| MeasurementError::EngineStopped)?
    }

    /// Pump off and vent open on the next tick, whatever the state.
    pub fn stop_measurement(&self) {
        self.shared.request_abort();
    }

    pub fn current_state(&self) -> MeasurementState {
        self.shared.state()
    }

    pub fn is_measuring(&self) -> bool {
        self.shared.is_measuring()
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    pub fn cuff_pressure(&self) -> f64 {
        self.shared.cuff_pressure()
    }

    pub fn inflate_target(&self) -> f64 {
        self.shared.inflate_target()
    }

    pub fn config(&self) -> Configuration {
        self.shared.config()
    }

    pub fn set_ratio_sbp(&self, value: f64) -> Result<(), MeasurementError> {
        Ok(self.shared.set_ratio_sbp(value)?)
    }

    pub fn ratio_sbp(&self) -> f64 {
        self.shared.config().ratio_sbp
    }

    pub fn set_ratio_dbp(&self, value: f64) -> Result<(), MeasurementError> {
        Ok(self.shared.set_ratio_dbp(value)?)
    }

    pub fn ratio_dbp(&self) -> f64 {
        self.shared.config().ratio_dbp
    }

    pub fn set_min_nbr_peaks(&self, value: i64) -> Result<(), MeasurementError> {
        Ok(self.shared.set_min_nbr_peaks(value)?)
    }

    pub fn min_nbr_peaks(&self) -> usize {
        self.shared.config().min_nbr_peaks
    }

    pub fn set_pump_up_value(&self, mmhg: i64) -> Result<(), MeasurementError> {
        Ok(self.shared.set_pump_up_value(mmhg)?)
    }

    pub fn pump_up_value(&self) -> i64 {
        self.shared.config().pump_up_mmhg.round() as i64
    }

    pub fn set_ambient_voltage(&self, voltage: f64) -> Result<(), MeasurementError> {
        Ok(self.shared.set_ambient_voltage(voltage)?)
    }

    pub fn reset_config_values(&self) -> Result<(), MeasurementError> {
        Ok(self.shared.reset_config_values()?)
    }

    /// Notifications from now on; the receiver goes quiet when the thread stops.
    /// Notifications are dropped while the receiver's queue is full.
    pub fn subscribe(&self) -> Result<Receiver<Notification>, MeasurementError> {
        let (tx, rx) = mpsc::sync_channel(SUBSCRIBER_QUEUE);
        self.commands
            .send(Command::Subscribe(tx))
            .map_err(|_| MeasurementError::EngineStopped)?;
        Ok(rx)
    }

    pub fn last_outcome(&self) -> Option<MeasurementOutcome> {
        self.shared.last_outcome()
    }

    /// Terminates the acquisition thread after venting the cuff and waits for it.
    pub fn stop_thread(mut self) -> Result<()> {
        self.join()
    }

    fn join(&mut self) -> Result<()> {
        self.shared.request_abort();
        self.shared.set_running(false);
        match self.thread.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| anyhow!("acquisition thread panicked")),
            None => Ok(()),
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        if let Err(err) = self.join() {
            warn!("{err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::{RecordingActuator, SourceError};
    use crate::recorder::NullRecorder;

    /// Endless flat baseline.
    struct Flat(f64);

    impl SampleSource for Flat {
        fn read_voltage(&mut self) -> Result<f64, SourceError> {
            Ok(self.0)
        }
    }

    fn engine(voltage: f64) -> EngineHandle {
        spawn(
            Flat(voltage),
            RecordingActuator::default(),
            NullRecorder,
            ProcessorSettings::default(),
            Configuration::default(),
            Pacing::RealTime,
        )
        .unwrap()
    }

    fn wait_for(handle: &EngineHandle, state: MeasurementState) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while handle.current_state() != state {
            assert!(Instant::now() < deadline, "never reached {state}");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn start_and_stop_round_trip() {
        let handle = engine(0.7);
        wait_for(&handle, MeasurementState::Idle);
        handle.start_measurement().unwrap();
        assert_eq!(handle.current_state(), MeasurementState::Inflate);
        assert!(handle.is_measuring());

        handle.stop_measurement();
        wait_for(&handle, MeasurementState::Idle);
        assert!(!handle.is_measuring());
        handle.stop_thread().unwrap();
    }

    #[test]
    fn ambient_rejection_is_reported_to_the_caller() {
        let handle = engine(2.0);
        let err = handle.start_measurement().unwrap_err();
        assert!(matches!(err, MeasurementError::AmbientOutOfRange { .. }));
        assert_eq!(handle.current_state(), MeasurementState::Idle);
        handle.stop_thread().unwrap();
    }

    #[test]
    fn setters_are_refused_while_inflating() {
        let handle = engine(0.7);
        handle.set_pump_up_value(200).unwrap();
        assert_eq!(handle.pump_up_value(), 200);
        handle.start_measurement().unwrap();
        assert!(matches!(
            handle.set_ratio_dbp(0.7),
            Err(MeasurementError::InvalidConfiguration(_))
        ));
        assert_eq!(handle.ratio_dbp(), 0.8);
        assert_eq!(handle.inflate_target(), 200.0);
        handle.stop_thread().unwrap();
    }

    #[test]
    fn spawn_refuses_an_unchecked_configuration() {
        let config = Configuration {
            pump_up_mmhg: 1000.0,
            ..Configuration::default()
        };
        let spawned = spawn(
            Flat(0.7),
            RecordingActuator::default(),
            NullRecorder,
            ProcessorSettings::default(),
            config,
            Pacing::Unpaced,
        );
        assert!(spawned.is_err());
    }

    #[test]
    fn stop_before_start_does_not_cancel_the_session() {
        let handle = engine(0.7);
        wait_for(&handle, MeasurementState::Idle);
        handle.stop_measurement();
        handle.start_measurement().unwrap();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(handle.current_state(), MeasurementState::Inflate);
        handle.stop_thread().unwrap();
    }

    #[test]
    fn calls_after_thread_stop_report_engine_stopped() {
        let mut handle = engine(0.7);
        handle.join().unwrap();
        assert!(!handle.is_running());
        assert_eq!(
            handle.start_measurement(),
            Err(MeasurementError::EngineStopped)
        );
    }
}
