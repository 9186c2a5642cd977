//! Oscillometric blood-pressure estimation from the deflate-phase peak envelope.
//!
//! The peak with the largest amplitude marks the mean arterial pressure (MAP).
//! Systolic pressure is where the envelope first rises to `ratio_sbp` of that
//! maximum on the high-pressure side; diastolic pressure is the last peak
//! still above `ratio_dbp` of the maximum on the low-pressure side. Either
//! side without any peak is a degenerate envelope.

use serde::{Deserialize, Serialize};

use crate::drivers::detector::PeakRecord;
use crate::drivers::MeasurementError;

/// Successful result of one measurement.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BloodPressure {
    pub systolic: f64,
    pub diastolic: f64,
    pub mean_arterial: f64,
    pub peak_count: usize,
    pub max_amplitude: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BpEstimator {
    pub ratio_sbp: f64,
    pub ratio_dbp: f64,
    pub min_nbr_peaks: usize,
}

impl BpEstimator {
    pub fn new(ratio_sbp: f64, ratio_dbp: f64, min_nbr_peaks: usize) -> Self {
        Self {
            ratio_sbp,
            ratio_dbp,
            min_nbr_peaks,
        }
    }

    pub fn estimate(&self, peaks: &[PeakRecord]) -> Result<BloodPressure, MeasurementError> {
        if peaks.len() < self.min_nbr_peaks || peaks.is_empty() {
            return Err(MeasurementError::InsufficientData {
                found: peaks.len(),
                required: self.min_nbr_peaks,
            });
        }

        let (max_idx, max_peak) = peaks
            .iter()
            .enumerate()
            .fold((0, peaks[0]), |best, (idx, peak)| {
                if peak.amplitude > best.1.amplitude {
                    (idx, *peak)
                } else {
                    best
                }
            });
        let max_amplitude = max_peak.amplitude;
        if !max_amplitude.is_finite() || max_amplitude <= 0.0 {
            return Err(degenerate("no positive oscillation amplitude"));
        }
        let map = max_peak.cuff_pressure;

        let systolic = self.systolic(&peaks[..max_idx], map, max_amplitude)?;
        let diastolic = self.diastolic(&peaks[max_idx + 1..], map, max_amplitude)?;

        if !(systolic >= map && map >= diastolic) {
            return Err(degenerate(&format!(
                "ordering violated: SBP {systolic:.1}, MAP {map:.1}, DBP {diastolic:.1}"
            )));
        }

        Ok(BloodPressure {
            systolic,
            diastolic,
            mean_arterial: map,
            peak_count: peaks.len(),
            max_amplitude,
        })
    }

    fn systolic(
        &self,
        before_max: &[PeakRecord],
        map: f64,
        max_amplitude: f64,
    ) -> Result<f64, MeasurementError> {
        let threshold = self.ratio_sbp * max_amplitude;
        let mut inflate_side = before_max.iter().filter(|p| p.cuff_pressure > map).peekable();
        if inflate_side.peek().is_none() {
            return Err(degenerate("no peaks above mean arterial pressure"));
        }
        // Falls back to MAP when the envelope crosses between the last
        // systolic-side peak and the maximum.
        Ok(inflate_side
            .find(|p| p.amplitude >= threshold)
            .map_or(map, |p| p.cuff_pressure))
    }

    fn diastolic(
        &self,
        after_max: &[PeakRecord],
        map: f64,
        max_amplitude: f64,
    ) -> Result<f64, MeasurementError> {
        let threshold = self.ratio_dbp * max_amplitude;
        let deflate_side: Vec<&PeakRecord> =
            after_max.iter().filter(|p| p.cuff_pressure < map).collect();
        if deflate_side.is_empty() {
            return Err(degenerate("no peaks below mean arterial pressure"));
        }
        // Without a crossing the outermost recorded peak is the last one
        // still above the threshold.
        let crossing = deflate_side
            .iter()
            .position(|p| p.amplitude <= threshold)
            .unwrap_or(deflate_side.len());
        Ok(match crossing {
            0 => map,
            n => deflate_side[n - 1].cuff_pressure,
        })
    }
}

fn degenerate(reason: &str) -> MeasurementError {
    MeasurementError::DegenerateEnvelope(reason.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peaks(pressures: &[f64], amplitudes: &[f64]) -> Vec<PeakRecord> {
        pressures
            .iter()
            .zip(amplitudes)
            .enumerate()
            .map(|(i, (&cuff_pressure, &amplitude))| PeakRecord {
                tick: i as u64 * 80,
                cuff_pressure,
                amplitude,
            })
            .collect()
    }

    #[test]
    fn reference_envelope() {
        let envelope = peaks(
            &[180.0, 160.0, 140.0, 120.0, 100.0, 80.0, 60.0],
            &[0.1, 0.3, 0.6, 1.0, 0.55, 0.25, 0.08],
        );
        let bp = BpEstimator::new(0.5, 0.5, 5).estimate(&envelope).unwrap();
        assert_eq!(bp.systolic, 140.0);
        assert_eq!(bp.diastolic, 100.0);
        assert_eq!(bp.mean_arterial, 120.0);
        assert_eq!(bp.peak_count, 7);
        assert_eq!(bp.max_amplitude, 1.0);
    }

    #[test]
    fn symmetric_envelopes_bracket_map_for_all_ratios() {
        let pressures: Vec<f64> = (0..41).map(|i| 200.0 - i as f64 * 4.0).collect();
        let amplitudes: Vec<f64> = pressures
            .iter()
            .map(|p| (-((p - 120.0) / 30.0).powi(2)).exp())
            .collect();
        let envelope = peaks(&pressures, &amplitudes);
        for sbp_step in 1..20 {
            for dbp_step in 1..20 {
                let ratio_sbp = sbp_step as f64 * 0.05;
                let ratio_dbp = dbp_step as f64 * 0.05;
                let bp = BpEstimator::new(ratio_sbp, ratio_dbp, 5)
                    .estimate(&envelope)
                    .unwrap_or_else(|e| panic!("ratios {ratio_sbp}/{ratio_dbp}: {e}"));
                assert!(bp.systolic >= bp.mean_arterial);
                assert!(bp.mean_arterial >= bp.diastolic);
                assert!(bp.systolic >= bp.diastolic);
                assert_eq!(bp.mean_arterial, 120.0);
            }
        }
    }

    #[test]
    fn too_few_peaks_is_insufficient_data() {
        let envelope = peaks(&[150.0, 120.0, 90.0], &[0.2, 1.0, 0.2]);
        for min in 4..10 {
            let err = BpEstimator::new(0.5, 0.5, min).estimate(&envelope).unwrap_err();
            assert_eq!(
                err,
                MeasurementError::InsufficientData {
                    found: 3,
                    required: min
                }
            );
        }
        assert!(matches!(
            BpEstimator::new(0.5, 0.5, 1).estimate(&[]),
            Err(MeasurementError::InsufficientData { found: 0, .. })
        ));
    }

    #[test]
    fn maximum_at_the_edge_is_degenerate() {
        let envelope = peaks(&[180.0, 160.0, 140.0, 120.0, 100.0], &[1.0, 0.8, 0.5, 0.3, 0.1]);
        let err = BpEstimator::new(0.5, 0.5, 5).estimate(&envelope).unwrap_err();
        assert!(matches!(err, MeasurementError::DegenerateEnvelope(_)));
    }

    #[test]
    fn envelope_that_never_decays_ends_at_outermost_peak() {
        let envelope = peaks(&[180.0, 160.0, 140.0, 120.0, 100.0], &[0.1, 0.4, 1.0, 0.9, 0.85]);
        let bp = BpEstimator::new(0.5, 0.5, 5).estimate(&envelope).unwrap();
        assert_eq!(bp.mean_arterial, 140.0);
        assert_eq!(bp.diastolic, 100.0);
    }

    #[test]
    fn envelope_starting_above_threshold_takes_first_peak() {
        let envelope = peaks(&[140.0, 130.0, 120.0, 110.0, 100.0], &[0.7, 0.9, 1.0, 0.4, 0.1]);
        let bp = BpEstimator::new(0.5, 0.5, 5).estimate(&envelope).unwrap();
        assert_eq!(bp.systolic, 140.0);
        assert_eq!(bp.diastolic, 120.0);
    }

    #[test]
    fn low_systolic_ratios_select_the_first_peak_of_the_reference_envelope() {
        let envelope = peaks(
            &[180.0, 160.0, 140.0, 120.0, 100.0, 80.0, 60.0],
            &[0.1, 0.3, 0.6, 1.0, 0.55, 0.25, 0.08],
        );
        for ratio_sbp in [0.05, 0.09, 0.1] {
            let bp = BpEstimator::new(ratio_sbp, 0.5, 5).estimate(&envelope).unwrap();
            assert_eq!(bp.systolic, 180.0, "ratio {ratio_sbp}");
        }
    }

    #[test]
    fn coarse_symmetric_envelope_brackets_map_for_all_ratios() {
        let envelope = peaks(&[160.0, 140.0, 120.0, 100.0, 80.0], &[0.3, 0.6, 1.0, 0.6, 0.3]);
        let bp = BpEstimator::new(0.25, 0.5, 5).estimate(&envelope).unwrap();
        assert_eq!(bp.systolic, 160.0);
        assert_eq!(bp.diastolic, 100.0);

        for sbp_step in 1..100 {
            for dbp_step in 1..100 {
                let ratio_sbp = sbp_step as f64 * 0.01;
                let ratio_dbp = dbp_step as f64 * 0.01;
                let bp = BpEstimator::new(ratio_sbp, ratio_dbp, 5)
                    .estimate(&envelope)
                    .unwrap_or_else(|e| panic!("ratios {ratio_sbp}/{ratio_dbp}: {e}"));
                assert!(bp.systolic >= bp.mean_arterial, "ratio {ratio_sbp}");
                assert!(bp.mean_arterial >= bp.diastolic, "ratio {ratio_dbp}");
                assert_eq!(bp.mean_arterial, 120.0);
            }
        }
    }

    #[test]
    fn single_peak_has_no_flanks() {
        let envelope = peaks(&[120.0], &[1.0]);
        let err = BpEstimator::new(0.5, 0.5, 1).estimate(&envelope).unwrap_err();
        assert!(matches!(err, MeasurementError::DegenerateEnvelope(_)));
    }

    #[test]
    fn equal_maxima_resolve_to_the_first() {
        let envelope = peaks(&[160.0, 140.0, 120.0, 100.0, 80.0], &[0.3, 1.0, 1.0, 0.3, 0.1]);
        let bp = BpEstimator::new(0.5, 0.5, 5).estimate(&envelope).unwrap();
        assert_eq!(bp.mean_arterial, 140.0);
        assert_eq!(bp.systolic, 140.0);
        assert_eq!(bp.diastolic, 120.0);
    }

    #[test]
    fn steep_flanks_collapse_onto_map() {
        let envelope = peaks(&[160.0, 140.0, 120.0, 100.0, 80.0], &[0.1, 0.2, 1.0, 0.1, 0.05]);
        let bp = BpEstimator::new(0.5, 0.5, 5).estimate(&envelope).unwrap();
        assert_eq!(bp.systolic, 120.0);
        assert_eq!(bp.diastolic, 120.0);
    }
}
