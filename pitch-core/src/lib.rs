// pitch-core/src/lib.rs

//! Real-time monophonic pitch estimation.
//! This crate turns a live stream of mono `f32` samples into a stream of
//! pitch events: frequency, nearest note, cents offset and a confidence.
//! It is headless and knows nothing about how samples are captured or how
//! results are displayed; both sit behind the [`audio::SampleSource`] and
//! [`sink::PitchSink`] traits.

pub mod audio;
pub mod config;
pub mod error;
pub mod framing;
pub mod pitch;
pub mod ring;
pub mod sink;
pub mod stream;
pub mod tuning;

pub use config::{AnalysisConfig, Handoff, StreamOptions};
pub use error::StreamError;
pub use framing::{FrameAccumulator, PitchPipeline};
pub use pitch::YinDetector;
pub use ring::SampleRing;
pub use sink::PitchSink;
pub use stream::StreamController;

use serde::{Deserialize, Serialize};

/// Represents the result of a single analysis frame.
///
/// When `is_valid` is false the numeric fields carry no detected pitch and
/// must not be shown as one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PitchResult {
    /// Whether a pitch was detected in this frame.
    pub is_valid: bool,
    /// The detected fundamental in Hz.
    pub frequency: f64,
    /// The fractional MIDI note number of `frequency`.
    pub midi: f64,
    /// The deviation from the nearest note in cents.
    pub cents: f64,
    /// The name of the nearest note with octave, e.g. "A4".
    pub note_name: String,
    /// Confidence of the estimate (0.0 to 1.0).
    pub probability: f64,
}
