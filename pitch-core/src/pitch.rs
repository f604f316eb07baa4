//! # Pitch Detection Module
//!
//! This module implements the YIN fundamental-frequency estimator used by the
//! streaming pipeline.
//!
//! ## Features
//! - Squared difference function over lags `1..=frame_size / 2`
//! - Cumulative mean normalized difference (CMND)
//! - Absolute threshold with descent into the local minimum
//! - Global-minimum fallback when nothing crosses the threshold
//! - Parabolic interpolation for sub-sample lag accuracy
//!
//! Scratch buffers are allocated once per estimator and reused in place, so
//! processing a frame never allocates apart from the note name string.

use crate::config::{AnalysisConfig, clamp_threshold};
use crate::tuning;
use crate::PitchResult;

/// Curvature below which the parabola is considered flat.
const INTERPOLATION_EPSILON: f64 = 1e-12;

/// YIN pitch estimator for frames of a fixed length.
#[derive(Debug, Clone)]
pub struct YinDetector {
    sample_rate: f64,
    frame_size: usize,
    max_lag: usize,
    threshold: f64,
    difference: Vec<f64>,
    cumulative: Vec<f64>,
    last_result: PitchResult,
}

impl YinDetector {
    /// Creates an estimator for frames of `frame_size` samples.
    ///
    /// The threshold is clamped into `[0.001, 0.999]`. A frame size below 4 or
    /// a non-positive sample rate is accepted, but every frame will then be
    /// reported as invalid.
    pub fn new(sample_rate: f64, frame_size: usize, threshold: f64) -> Self {
        let max_lag = frame_size / 2;
        Self {
            sample_rate,
            frame_size,
            max_lag,
            threshold: clamp_threshold(threshold),
            difference: vec![0.0; max_lag + 1],
            cumulative: vec![0.0; max_lag + 1],
            last_result: PitchResult::default(),
        }
    }

    /// Creates a detector from an analysis configuration.
    ///
    /// # Arguments
    /// * `config` - Supplies sample rate, frame length and threshold
    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self::new(config.sample_rate, config.frame_size, config.threshold)
    }

    /// Sample rate in Hz used to convert lags to frequencies.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Number of leading samples analysed per call to [`process`](Self::process).
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Current absolute threshold, already clamped into range.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Updates the threshold used by the next call to [`process`](Self::process).
    pub fn set_threshold(&mut self, threshold: f64) {
        self.threshold = clamp_threshold(threshold);
    }

    /// The result of the most recent call to [`process`](Self::process).
    pub fn last_result(&self) -> &PitchResult {
        &self.last_result
    }

    /// Estimates the pitch of one frame.
    ///
    /// Only the first `frame_size` samples are analysed. Frames that are too
    /// short, degenerate configurations and aperiodic input all produce a
    /// result with `is_valid == false` rather than an error.
    pub fn process(&mut self, samples: &[f32]) -> PitchResult {
        let result = self.estimate(samples).unwrap_or_default();
        self.last_result = result.clone();
        result
    }

    fn estimate(&mut self, samples: &[f32]) -> Option<PitchResult> {
        if samples.len() < self.frame_size || self.max_lag < 2 || self.sample_rate <= 0.0 {
            return None;
        }

        let frame = &samples[..self.frame_size];
        self.compute_difference(frame);
        self.compute_cumulative_mean_normalized();

        let (tau, probability) = self.absolute_threshold()?;

        let refined_tau = if tau > 1 && tau < self.max_lag {
            parabolic_interpolation(&self.cumulative, tau)
        } else {
            tau as f64
        };
        if refined_tau <= 0.0 {
            return None;
        }

        let frequency = self.sample_rate / refined_tau;
        if !frequency.is_finite() || frequency <= 0.0 {
            return None;
        }

        let reading = tuning::map_frequency(frequency)?;
        Some(PitchResult {
            is_valid: probability > 0.0,
            frequency,
            midi: reading.midi,
            cents: reading.cents,
            note_name: reading.note_name,
            probability: probability.clamp(0.0, 1.0),
        })
    }

    /// d(tau) = sum over i in [0, N - tau) of (x[i] - x[i + tau])^2, with d(0) = 0.
    fn compute_difference(&mut self, frame: &[f32]) {
        let n = self.frame_size;
        self.difference[0] = 0.0;
        for tau in 1..=self.max_lag {
            let mut sum = 0.0;
            for (a, b) in frame[..n - tau].iter().zip(&frame[tau..]) {
                let delta = f64::from(*a) - f64::from(*b);
                sum += delta * delta;
            }
            self.difference[tau] = sum;
        }
    }

    fn compute_cumulative_mean_normalized(&mut self) {
        self.cumulative[0] = 1.0;
        let mut running_sum = 0.0;
        for tau in 1..=self.max_lag {
            running_sum += self.difference[tau];
            self.cumulative[tau] = if running_sum == 0.0 {
                1.0
            } else {
                self.difference[tau] * tau as f64 / running_sum
            };
        }
    }

    /// Picks the lag and its probability.
    ///
    /// The first lag below the threshold wins, after walking down to the bottom
    /// of its dip. Without such a lag the global minimum is used instead, which
    /// can still report a small nonzero probability for aperiodic input.
    fn absolute_threshold(&self) -> Option<(usize, f64)> {
        let cmnd = &self.cumulative;

        let mut tau = 2;
        while tau < cmnd.len() {
            if cmnd[tau] < self.threshold {
                while tau + 1 < cmnd.len() && cmnd[tau + 1] < cmnd[tau] {
                    tau += 1;
                }
                return Some((tau, 1.0 - cmnd[tau]));
            }
            tau += 1;
        }

        let mut min_value = f64::INFINITY;
        let mut candidate = 0;
        for (tau, &value) in cmnd.iter().enumerate().skip(2) {
            if value < min_value {
                min_value = value;
                candidate = tau;
            }
        }

        if candidate == 0 || !min_value.is_finite() {
            return None;
        }
        Some((candidate, 1.0 - min_value))
    }
}

/// Vertex of the parabola through `(tau - 1, tau, tau + 1)`.
///
/// Falls back to `tau` when a neighbour is missing or the curve is flat.
fn parabolic_interpolation(values: &[f64], tau: usize) -> f64 {
    if tau == 0 || tau + 1 >= values.len() {
        return tau as f64;
    }
    let y0 = values[tau - 1];
    let y1 = values[tau];
    let y2 = values[tau + 1];

    let denominator = y0 + y2 - 2.0 * y1;
    if denominator.abs() < INTERPOLATION_EPSILON {
        return tau as f64;
    }
    tau as f64 + 0.5 * (y0 - y2) / denominator
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::PI;

    fn sine(frequency: f64, sample_rate: f64, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * frequency * i as f64 / sample_rate).sin() as f32)
            .collect()
    }

    /// Deterministic white noise in [-1, 1].
    fn noise(len: usize, mut seed: u64) -> Vec<f32> {
        (0..len)
            .map(|_| {
                seed = seed
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                ((seed >> 33) as f64 / (1u64 << 31) as f64 * 2.0 - 1.0) as f32
            })
            .collect()
    }

    #[test]
    fn detects_sine_frequencies() {
        let sample_rate = 44_100.0;
        for frequency in [82.41, 110.0, 220.0, 440.0, 880.0, 1318.5] {
            let mut detector = YinDetector::new(sample_rate, 2048, 0.15);
            let result = detector.process(&sine(frequency, sample_rate, 2048));
            assert!(result.is_valid, "{} Hz not detected", frequency);
            assert!(
                (result.frequency - frequency).abs() / frequency < 0.01,
                "{} Hz detected as {}",
                frequency,
                result.frequency
            );
            assert!(result.probability > 1.0 - 0.15);
        }
    }

    #[test]
    fn a440_maps_to_a4() {
        let mut detector = YinDetector::new(48_000.0, 2048, 0.1);
        let result = detector.process(&sine(440.0, 48_000.0, 2048));
        assert!(result.is_valid);
        assert_eq!(result.note_name, "A4");
        assert_abs_diff_eq!(result.midi, 69.0, epsilon = 0.2);
        assert!(result.cents.abs() < 20.0);
    }

    #[test]
    fn silence_is_not_a_pitch() {
        let mut detector = YinDetector::new(44_100.0, 1024, 0.15);
        let result = detector.process(&vec![0.0; 1024]);
        assert!(!result.is_valid);
        assert_eq!(result.probability, 0.0);
    }

    #[test]
    fn noise_is_low_confidence() {
        let mut detector = YinDetector::new(44_100.0, 2048, 0.15);
        for seed in 1..6 {
            let result = detector.process(&noise(2048, seed));
            assert!(!result.is_valid || result.probability < 0.55);
        }
    }

    #[test]
    fn short_frames_are_rejected() {
        let mut detector = YinDetector::new(44_100.0, 2048, 0.15);
        let result = detector.process(&sine(440.0, 44_100.0, 2047));
        assert!(!result.is_valid);
        assert_eq!(result, PitchResult::default());
    }

    #[test]
    fn degenerate_configurations_are_rejected() {
        let frame = sine(440.0, 44_100.0, 2048);
        assert!(!YinDetector::new(0.0, 2048, 0.15).process(&frame).is_valid);
        assert!(!YinDetector::new(-44_100.0, 2048, 0.15).process(&frame).is_valid);
        assert!(!YinDetector::new(44_100.0, 3, 0.15).process(&frame).is_valid);
    }

    #[test]
    fn longer_input_uses_leading_frame() {
        let mut detector = YinDetector::new(44_100.0, 1024, 0.15);
        let mut input = sine(330.0, 44_100.0, 1024);
        input.extend(noise(1024, 9));
        let expected = YinDetector::new(44_100.0, 1024, 0.15).process(&input[..1024]);
        assert_eq!(detector.process(&input), expected);
    }

    #[test]
    fn repeated_calls_are_identical() {
        let mut detector = YinDetector::new(44_100.0, 2048, 0.2);
        let frame = sine(196.0, 44_100.0, 2048);
        let first = detector.process(&frame);
        detector.process(&noise(2048, 3));
        let second = detector.process(&frame);
        assert_eq!(first, second);
        assert_eq!(detector.last_result(), &second);
    }

    #[test]
    fn looser_threshold_never_rejects_more() {
        let sample_rate = 44_100.0;
        let mut corpus = vec![vec![0.0; 1024]];
        for seed in 1..8 {
            corpus.push(noise(1024, seed));
        }
        for frequency in [100.0, 250.0, 523.25, 1000.0] {
            let mut frame = sine(frequency, sample_rate, 1024);
            for (s, n) in frame.iter_mut().zip(noise(1024, frequency as u64)) {
                *s = 0.5 * *s + 0.5 * n;
            }
            corpus.push(frame);
            corpus.push(sine(frequency, sample_rate, 1024));
        }

        let thresholds = [0.001, 0.05, 0.15, 0.4, 0.999];
        let mut detector = YinDetector::new(sample_rate, 1024, thresholds[0]);
        for pair in thresholds.windows(2) {
            for frame in &corpus {
                detector.set_threshold(pair[0]);
                let strict = detector.process(frame).is_valid;
                detector.set_threshold(pair[1]);
                let loose = detector.process(frame).is_valid;
                assert!(!strict || loose);
            }
        }
    }

    #[test]
    fn threshold_is_clamped() {
        let mut detector = YinDetector::new(44_100.0, 1024, 2.0);
        assert_eq!(detector.threshold(), 0.999);
        detector.set_threshold(0.0);
        assert_eq!(detector.threshold(), 0.001);
    }

    #[test]
    fn parabola_vertex() {
        // Samples of (x - 2.25)^2 around x = 2.
        let values = [5.0625, 1.5625, 0.0625, 0.5625];
        assert_abs_diff_eq!(parabolic_interpolation(&values, 2), 2.25, epsilon = 1e-12);
        assert_eq!(parabolic_interpolation(&[1.0, 1.0, 1.0], 1), 1.0);
        assert_eq!(parabolic_interpolation(&values, 3), 3.0);
    }
}
