//! # Configuration Module
//!
//! Analysis and stream parameters. Out-of-range values are clamped into their
//! valid ranges rather than rejected, so a host can pass whatever the user
//! typed and still get a running detector.

use serde::{Deserialize, Serialize};

/// Default analysis frame length in samples.
pub const DEFAULT_BUFFER_SIZE: usize = 2048;

/// Smallest analysis frame accepted. Smaller requests are raised to this.
pub const MIN_BUFFER_SIZE: usize = 256;

/// Default YIN threshold.
pub const DEFAULT_THRESHOLD: f64 = 0.15;

/// Lower bound of the YIN threshold.
pub const MIN_THRESHOLD: f64 = 0.001;

/// Upper bound of the YIN threshold.
pub const MAX_THRESHOLD: f64 = 0.999;

/// Sample rate requested from the audio source when the host does not say otherwise.
pub const DEFAULT_SAMPLE_RATE: f64 = 48_000.0;

/// Clamps a YIN threshold into `[MIN_THRESHOLD, MAX_THRESHOLD]`.
///
/// NaN falls back to [`DEFAULT_THRESHOLD`].
pub fn clamp_threshold(threshold: f64) -> f64 {
    if threshold.is_nan() {
        return DEFAULT_THRESHOLD;
    }
    threshold.clamp(MIN_THRESHOLD, MAX_THRESHOLD)
}

/// Raises a requested frame length to at least [`MIN_BUFFER_SIZE`].
pub fn clamp_buffer_size(buffer_size: usize) -> usize {
    buffer_size.max(MIN_BUFFER_SIZE)
}

/// Parameters of one analysis stream.
///
/// Everything except `threshold` is fixed for the lifetime of a running stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisConfig {
    /// Sample rate of the incoming audio in Hz.
    pub sample_rate: f64,
    /// Number of samples per analysis frame.
    pub frame_size: usize,
    /// Stride between the starts of consecutive frames.
    pub hop_size: usize,
    /// YIN absolute threshold.
    pub threshold: f64,
}

impl AnalysisConfig {
    /// Builds a config from caller-supplied values, clamping each into range.
    ///
    /// The hop defaults to half the frame, giving 50% overlap.
    pub fn new(sample_rate: f64, buffer_size: usize, threshold: f64) -> Self {
        let frame_size = clamp_buffer_size(buffer_size);
        if frame_size != buffer_size {
            log::debug!("buffer size {} raised to {}", buffer_size, frame_size);
        }
        Self {
            sample_rate,
            frame_size,
            hop_size: (frame_size / 2).max(1),
            threshold: clamp_threshold(threshold),
        }
    }

    /// Overrides the hop size, clamped into `[1, frame_size]`.
    pub fn with_hop(mut self, hop_size: usize) -> Self {
        self.hop_size = hop_size.clamp(1, self.frame_size);
        self
    }

    /// Samples carried over from one frame into the next.
    pub fn overlap(&self) -> usize {
        self.frame_size - self.hop_size
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE, DEFAULT_BUFFER_SIZE, DEFAULT_THRESHOLD)
    }
}

/// How samples travel from the delivery callback to the estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "mode")]
pub enum Handoff {
    /// Frames are analysed synchronously inside the delivery callback.
    #[default]
    Direct,
    /// The callback only writes into a ring; a dedicated thread analyses.
    #[serde(rename_all = "camelCase")]
    Worker {
        /// Requested ring capacity in samples, rounded up to a power of two.
        ring_capacity: usize,
    },
}

/// Start-time options as handed over by an application layer.
///
/// Every field is optional in serialized form.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamOptions {
    /// Analysis frame length; [`DEFAULT_BUFFER_SIZE`] when absent.
    pub buffer_size: Option<usize>,
    /// YIN threshold; the controller's current threshold when absent.
    pub threshold: Option<f64>,
    /// Sample rate to request from the source.
    pub sample_rate: f64,
    pub handoff: Handoff,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            buffer_size: None,
            threshold: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            handoff: Handoff::Direct,
        }
    }
}
