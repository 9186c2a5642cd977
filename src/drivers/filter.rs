use std::f64::consts::PI;

use crate::drivers::FilterDesignError;

/// Butterworth order used for both branches of the pipeline.
pub const BUTTERWORTH_ORDER: usize = 4;

/// Section Qs of a 4th-order Butterworth split into two biquads.
const SECTION_Q: [f64; BUTTERWORTH_ORDER / 2] = [
    0.541_196_100_146_197,  // 1 / (2 cos(pi/8))
    1.306_562_964_876_376_7, // 1 / (2 cos(3pi/8))
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterKind {
    Lowpass,
    Highpass,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct BiquadCoeffs {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl BiquadCoeffs {
    fn dc_gain(&self) -> f64 {
        (self.b0 + self.b1 + self.b2) / (1.0 + self.a1 + self.a2)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct BiquadState {
    z1: f64,
    z2: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct BiquadFilter {
    coeffs: BiquadCoeffs,
    state: BiquadState,
}

impl BiquadFilter {
    fn new(coeffs: BiquadCoeffs) -> Self {
        Self {
            coeffs,
            state: BiquadState::default(),
        }
    }

    fn process(&mut self, input: f64) -> f64 {
        // Transposed direct form II
        let y = self.coeffs.b0 * input + self.state.z1;
        self.state.z1 = self.coeffs.b1 * input - self.coeffs.a1 * y + self.state.z2;
        self.state.z2 = self.coeffs.b2 * input - self.coeffs.a2 * y;
        y
    }

    /// Loads the steady state for a constant `input`; returns the settled output.
    fn prime(&mut self, input: f64) -> f64 {
        let y = self.coeffs.dc_gain() * input;
        self.state.z1 = y - self.coeffs.b0 * input;
        self.state.z2 = self.coeffs.b2 * input - self.coeffs.a2 * y;
        y
    }
}

/// 4th-order Butterworth realised as two cascaded biquad sections.
///
/// Coefficients are fixed at construction; only the section states evolve.
#[derive(Clone, Debug, PartialEq)]
pub struct Butterworth {
    kind: FilterKind,
    cutoff_hz: f64,
    sections: [BiquadFilter; BUTTERWORTH_ORDER / 2],
}

impl Butterworth {
    pub fn lowpass(cutoff_hz: f64, sample_rate_hz: f64) -> Result<Self, FilterDesignError> {
        Self::design(FilterKind::Lowpass, cutoff_hz, sample_rate_hz)
    }

    pub fn highpass(cutoff_hz: f64, sample_rate_hz: f64) -> Result<Self, FilterDesignError> {
        Self::design(FilterKind::Highpass, cutoff_hz, sample_rate_hz)
    }

    pub fn design(
        kind: FilterKind,
        cutoff_hz: f64,
        sample_rate_hz: f64,
    ) -> Result<Self, FilterDesignError> {
        if !sample_rate_hz.is_finite() || sample_rate_hz <= 0.0 {
            return Err(FilterDesignError::InvalidSampleRate);
        }
        let nyquist_hz = sample_rate_hz * 0.5;
        if !(cutoff_hz > 0.0 && cutoff_hz < nyquist_hz) {
            return Err(FilterDesignError::CutoffOutOfRange {
                cutoff_hz,
                nyquist_hz,
            });
        }
        let sections = SECTION_Q.map(|q| {
            let coeffs = match kind {
                FilterKind::Lowpass => lowpass(cutoff_hz, sample_rate_hz, q),
                FilterKind::Highpass => highpass(cutoff_hz, sample_rate_hz, q),
            };
            BiquadFilter::new(coeffs)
        });
        Ok(Self {
            kind,
            cutoff_hz,
            sections,
        })
    }

    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    pub fn cutoff_hz(&self) -> f64 {
        self.cutoff_hz
    }

    pub fn process_sample(&mut self, mut value: f64) -> f64 {
        for section in &mut self.sections {
            value = section.process(value);
        }
        value
    }

    /// Puts the cascade into the state it would settle in after an endless
    /// run of `value`, so the next output starts without a step transient.
    pub fn prime(&mut self, value: f64) {
        let mut input = value;
        for section in &mut self.sections {
            input = section.prime(input);
        }
    }

    pub fn reset(&mut self) {
        for section in &mut self.sections {
            section.state = BiquadState::default();
        }
    }
}

fn lowpass(freq_hz: f64, sample_rate_hz: f64, q: f64) -> BiquadCoeffs {
    let w0 = 2.0 * PI * freq_hz / sample_rate_hz;
    let alpha = w0.sin() / (2.0 * q);
    let cos_w0 = w0.cos();
    let b0 = (1.0 - cos_w0) * 0.5;
    let b1 = 1.0 - cos_w0;
    let b2 = b0;
    let a0 = 1.0 + alpha;
    let a1 = -2.0 * cos_w0;
    let a2 = 1.0 - alpha;
    normalize(b0, b1, b2, a0, a1, a2)
}

fn highpass(freq_hz: f64, sample_rate_hz: f64, q: f64) -> BiquadCoeffs {
    let w0 = 2.0 * PI * freq_hz / sample_rate_hz;
    let alpha = w0.sin() / (2.0 * q);
    let cos_w0 = w0.cos();
    let b0 = (1.0 + cos_w0) * 0.5;
    let b1 = -(1.0 + cos_w0);
    let b2 = b0;
    let a0 = 1.0 + alpha;
    let a1 = -2.0 * cos_w0;
    let a2 = 1.0 - alpha;
    normalize(b0, b1, b2, a0, a1, a2)
}

fn normalize(b0: f64, b1: f64, b2: f64, a0: f64, a1: f64, a2: f64) -> BiquadCoeffs {
    let a0_inv = 1.0 / a0;
    BiquadCoeffs {
        b0: b0 * a0_inv,
        b1: b1 * a0_inv,
        b2: b2 * a0_inv,
        a1: a1 * a0_inv,
        a2: a2 * a0_inv,
    }
}
