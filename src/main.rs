use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{debug, info};

use oscillo_bp::recorder::{CsvRecorder, NullRecorder, SessionRecorder};
use oscillo_bp::simulation::{CuffParams, SimulatedCuff};
use oscillo_bp::{
    spawn, Configuration, Event, MeasurementOutcome, MeasurementState, Pacing, ProcessorSettings,
};

/// Run one oscillometric measurement against the simulated cuff
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// SBP amplitude ratio
    #[arg(long, default_value_t = 0.5)]
    ratio_sbp: f64,

    /// DBP amplitude ratio
    #[arg(long, default_value_t = 0.8)]
    ratio_dbp: f64,

    /// Minimum number of oscillation peaks for a valid result
    #[arg(long, default_value_t = 10)]
    min_peaks: i64,

    /// Inflation target in mmHg
    #[arg(long, default_value_t = 180)]
    pump_up: i64,

    /// Mean arterial pressure of the simulated subject
    #[arg(long, default_value_t = 95.0)]
    map: f64,

    /// Seed for the simulated sensor noise
    #[arg(long, default_value_t = 7)]
    seed: u64,

    /// Write per-session CSV/JSON files into this directory
    #[arg(long)]
    record_dir: Option<PathBuf>,

    /// Pace the loop at the real sample rate instead of as fast as possible
    #[arg(long)]
    real_time: bool,

    /// Print the outcome as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = Configuration::default();
    config.set_ratio_sbp(args.ratio_sbp)?;
    config.set_ratio_dbp(args.ratio_dbp)?;
    config.set_min_nbr_peaks(args.min_peaks)?;
    config.set_pump_up(args.pump_up)?;

    let settings = ProcessorSettings::default();
    let params = CuffParams {
        sample_rate_hz: settings.sample_rate_hz,
        ambient_voltage: config.ambient_voltage,
        mean_arterial: args.map,
        seed: args.seed,
        ..CuffParams::default()
    };
    debug!("simulated cuff: {params:?}");
    let (sensor, pump) = SimulatedCuff::new(params);

    let recorder: Box<dyn SessionRecorder + Send> = match &args.record_dir {
        Some(dir) => Box::new(CsvRecorder::new(dir)),
        None => Box::new(NullRecorder),
    };
    let pacing = if args.real_time {
        Pacing::RealTime
    } else {
        Pacing::Unpaced
    };

    let engine = spawn(sensor, pump, recorder, settings, config, pacing)?;
    let events = engine.subscribe()?;
    engine
        .start_measurement()
        .context("starting measurement")?;

    let outcome = loop {
        let notification = events
            .recv_timeout(Duration::from_secs(300))
            .context("no word from the acquisition thread")?;
        match notification.event {
            Event::Outcome(outcome) => break outcome,
            Event::StateChanged { from } => {
                info!("{} -> {}", from, notification.state);
                if notification.state == MeasurementState::Idle && from.is_session_active() {
                    bail!("measurement aborted");
                }
            }
            Event::Fault(err) => info!("fault: {err}"),
            Event::Reading => {}
        }
    };
    engine.stop_thread()?;

    if args.json {
        let json = match &outcome {
            MeasurementOutcome::Success(bp) => serde_json::to_string_pretty(bp)?,
            MeasurementOutcome::Failure(err) => {
                serde_json::json!({ "error": err.to_string() }).to_string()
            }
        };
        println!("{json}");
        return Ok(());
    }

    match outcome {
        MeasurementOutcome::Success(bp) => {
            println!(
                "SYS {:.0} mmHg  DIA {:.0} mmHg  MAP {:.0} mmHg  ({} peaks)",
                bp.systolic, bp.diastolic, bp.mean_arterial, bp.peak_count
            );
            println!(
                "expected SYS ~{:.0}  DIA ~{:.0}",
                params.expected_systolic(config.ratio_sbp),
                params.expected_diastolic(config.ratio_dbp)
            );
            Ok(())
        }
        MeasurementOutcome::Failure(err) => bail!("measurement failed: {err}"),
    }
}
