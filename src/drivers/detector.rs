use log::trace;
use serde::{Deserialize, Serialize};

/// A confirmed local maximum of the rectified oscillation signal.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PeakRecord {
    /// Sample index within the deflate phase.
    pub tick: u64,
    /// Cuff pressure (mmHg) at the peak.
    pub cuff_pressure: f64,
    /// Rectified oscillation amplitude (V).
    pub amplitude: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DetectorSettings {
    /// Minimum spacing between emitted peaks; a larger maximum inside the
    /// window replaces the pending one.
    pub refractory_samples: u64,
    /// Samples ignored after a reset while the high-pass transient decays.
    pub blanking_samples: u64,
    /// Maxima below this amplitude are treated as noise.
    pub noise_floor: f64,
}

#[derive(Clone, Copy, Debug)]
struct WindowPoint {
    cuff_pressure: f64,
    amplitude: f64,
}

/// Three-sample local-maximum detector over the rectified oscillation channel.
#[derive(Clone, Debug)]
pub struct OscillationDetector {
    settings: DetectorSettings,
    tick: u64,
    previous: Option<WindowPoint>,
    center: Option<WindowPoint>,
    pending: Option<PeakRecord>,
}

impl OscillationDetector {
    pub fn new(settings: DetectorSettings) -> Self {
        Self {
            settings,
            tick: 0,
            previous: None,
            center: None,
            pending: None,
        }
    }

    pub fn settings(&self) -> DetectorSettings {
        self.settings
    }

    pub fn reset(&mut self) {
        self.tick = 0;
        self.previous = None;
        self.center = None;
        self.pending = None;
    }

    /// Feeds one sample. Returns a peak once it is confirmed, which may be a
    /// few samples after the maximum itself when a refractory period is set.
    pub fn observe(&mut self, cuff_pressure: f64, oscillation_value: f64) -> Option<PeakRecord> {
        let tick = self.tick;
        self.tick += 1;
        let current = WindowPoint {
            cuff_pressure,
            amplitude: oscillation_value.abs(),
        };

        let mut emitted = self.take_expired(tick);

        if let (Some(previous), Some(center)) = (self.previous, self.center) {
            let center_tick = tick - 1;
            let is_maximum =
                center.amplitude > previous.amplitude && center.amplitude > current.amplitude;
            if is_maximum
                && center_tick >= self.settings.blanking_samples
                && center.amplitude >= self.settings.noise_floor
            {
                self.offer(PeakRecord {
                    tick: center_tick,
                    cuff_pressure: center.cuff_pressure,
                    amplitude: center.amplitude,
                });
            }
        }

        if emitted.is_none() {
            emitted = self.take_expired(tick);
        }

        self.previous = self.center;
        self.center = Some(current);
        emitted
    }

    /// Flushes a peak still waiting out its refractory window.
    pub fn finish(&mut self) -> Option<PeakRecord> {
        self.pending.take()
    }

    fn offer(&mut self, candidate: PeakRecord) {
        match self.pending {
            Some(pending) if candidate.amplitude <= pending.amplitude => {
                trace!(
                    "dropping minor maximum at tick {} ({:.5} <= {:.5})",
                    candidate.tick,
                    candidate.amplitude,
                    pending.amplitude
                );
            }
            _ => self.pending = Some(candidate),
        }
    }

    fn take_expired(&mut self, tick: u64) -> Option<PeakRecord> {
        match self.pending {
            Some(pending) if tick >= pending.tick + self.settings.refractory_samples => {
                self.pending.take()
            }
            _ => None,
        }
    }
}
