//! # Framing Module
//!
//! Assembles incoming chunks of any size into fixed-size, overlapping analysis
//! frames and runs the estimator on each completed frame.
//!
//! After a frame is dispatched the last `frame_size - hop_size` samples are
//! shifted to the front and become the start of the next frame, so frames
//! begin every `hop_size` samples regardless of how the input was chunked.

use crate::config::AnalysisConfig;
use crate::pitch::YinDetector;
use crate::PitchResult;

/// Sliding window over a sample stream.
#[derive(Debug, Clone)]
pub struct FrameAccumulator {
    buffer: Box<[f32]>,
    fill: usize,
    hop_size: usize,
    frames_emitted: u64,
}

impl FrameAccumulator {
    /// Creates an accumulator for frames of `frame_size` samples starting every
    /// `hop_size` samples. The hop is clamped into `[1, frame_size]`.
    ///
    /// # Panics
    /// If `frame_size` is zero.
    pub fn new(frame_size: usize, hop_size: usize) -> Self {
        assert!(frame_size > 0, "frame size must be greater than 0");
        Self {
            buffer: vec![0.0; frame_size].into_boxed_slice(),
            fill: 0,
            hop_size: hop_size.clamp(1, frame_size),
            frames_emitted: 0,
        }
    }

    /// Creates an accumulator sized by an analysis configuration.
    ///
    /// # Arguments
    /// * `config` - Supplies `frame_size` and `hop_size`
    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self::new(config.frame_size, config.hop_size)
    }

    /// Length of every dispatched frame, in samples.
    pub fn frame_size(&self) -> usize {
        self.buffer.len()
    }

    /// Distance between the starts of consecutive frames, in samples.
    pub fn hop_size(&self) -> usize {
        self.hop_size
    }

    /// Samples currently held towards the next frame.
    pub fn fill(&self) -> usize {
        self.fill
    }

    /// Frames dispatched since creation or the last [`reset`](Self::reset).
    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted
    }

    /// Appends `samples`, calling `on_frame` once for every frame completed.
    ///
    /// A single large chunk may complete several frames. Returns the number
    /// of frames dispatched by this call.
    pub fn ingest<F>(&mut self, samples: &[f32], mut on_frame: F) -> usize
    where
        F: FnMut(&[f32]),
    {
        let frame_size = self.buffer.len();
        let mut input = samples;
        let mut dispatched = 0;

        while !input.is_empty() {
            let to_copy = (frame_size - self.fill).min(input.len());
            self.buffer[self.fill..self.fill + to_copy].copy_from_slice(&input[..to_copy]);
            self.fill += to_copy;
            input = &input[to_copy..];

            if self.fill == frame_size {
                on_frame(&self.buffer);
                dispatched += 1;

                if self.hop_size < frame_size {
                    self.buffer.copy_within(self.hop_size.., 0);
                    self.fill = frame_size - self.hop_size;
                } else {
                    self.fill = 0;
                }
            }
        }

        self.frames_emitted += dispatched as u64;
        dispatched
    }

    /// Forgets all held samples.
    pub fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.fill = 0;
        self.frames_emitted = 0;
    }
}

/// An accumulator feeding a YIN estimator.
#[derive(Debug, Clone)]
pub struct PitchPipeline {
    accumulator: FrameAccumulator,
    detector: YinDetector,
}

impl PitchPipeline {
    /// Creates an empty pipeline.
    ///
    /// # Arguments
    /// * `config` - Frame, hop, sample rate and initial threshold
    ///
    /// # Returns
    /// A pipeline that emits its first result once `frame_size` samples have
    /// been ingested.
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            accumulator: FrameAccumulator::from_config(config),
            detector: YinDetector::from_config(config),
        }
    }

    /// Feeds a chunk of samples, calling `on_result` with the estimate of
    /// every frame completed, in order.
    pub fn ingest<F>(&mut self, samples: &[f32], mut on_result: F) -> usize
    where
        F: FnMut(PitchResult),
    {
        let Self {
            accumulator,
            detector,
        } = self;
        accumulator.ingest(samples, |frame| on_result(detector.process(frame)))
    }

    /// Like [`ingest`](Self::ingest), but asks `threshold` for the current
    /// threshold before analysing each frame.
    ///
    /// A change made while one chunk is being processed (for example from
    /// `on_result`) applies to the very next frame of the same chunk.
    ///
    /// # Arguments
    /// * `samples` - Chunk of mono samples, any length
    /// * `threshold` - Source of the threshold, read once per frame
    /// * `on_result` - Called with each frame's estimate, in order
    ///
    /// # Returns
    /// The number of frames analysed.
    pub fn ingest_with_threshold<T, F>(
        &mut self,
        samples: &[f32],
        mut threshold: T,
        mut on_result: F,
    ) -> usize
    where
        T: FnMut() -> f64,
        F: FnMut(PitchResult),
    {
        let Self {
            accumulator,
            detector,
        } = self;
        accumulator.ingest(samples, |frame| {
            let current = threshold();
            if current != detector.threshold() {
                detector.set_threshold(current);
            }
            on_result(detector.process(frame))
        })
    }

    /// Threshold used for the next frame.
    pub fn threshold(&self) -> f64 {
        self.detector.threshold()
    }

    /// Takes effect from the next completed frame.
    pub fn set_threshold(&mut self, threshold: f64) {
        self.detector.set_threshold(threshold);
    }

    pub fn detector(&self) -> &YinDetector {
        &self.detector
    }

    pub fn accumulator(&self) -> &FrameAccumulator {
        &self.accumulator
    }

    /// Drops any partially assembled frame. The threshold is kept.
    pub fn reset(&mut self) {
        self.accumulator.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn ramp(len: usize) -> Vec<f32> {
        (0..len).map(|i| i as f32).collect()
    }

    /// Feeds `input` in the given chunk sizes (cycled) and returns each
    /// frame's first sample, which for a ramp is the frame's start index.
    fn frame_starts(accumulator: &mut FrameAccumulator, input: &[f32], chunks: &[usize]) -> Vec<f32> {
        let mut starts = Vec::new();
        let mut offset = 0;
        for &chunk in chunks.iter().cycle() {
            if offset >= input.len() {
                break;
            }
            let end = (offset + chunk).min(input.len());
            accumulator.ingest(&input[offset..end], |frame| starts.push(frame[0]));
            offset = end;
        }
        starts
    }

    #[test]
    fn no_frame_until_full() {
        let mut accumulator = FrameAccumulator::new(256, 128);
        let mut frames = 0;
        assert_eq!(accumulator.ingest(&ramp(255), |_| frames += 1), 0);
        assert_eq!(frames, 0);
        assert_eq!(accumulator.fill(), 255);

        assert_eq!(accumulator.ingest(&[255.0], |frame| {
            frames += 1;
            assert_eq!(frame, ramp(256).as_slice());
        }), 1);
        assert_eq!(frames, 1);
        assert_eq!(accumulator.fill(), 128);
    }

    #[test]
    fn retains_overlap_between_frames() {
        let mut accumulator = FrameAccumulator::new(8, 2);
        let mut frames: Vec<Vec<f32>> = Vec::new();
        accumulator.ingest(&ramp(12), |frame| frames.push(frame.to_vec()));
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0], ramp(8));
        assert_eq!(frames[1], (2..10).map(|i| i as f32).collect::<Vec<_>>());
        assert_eq!(frames[2], (4..12).map(|i| i as f32).collect::<Vec<_>>());
        assert_eq!(accumulator.fill(), 6);
        assert_eq!(accumulator.frames_emitted(), 3);
    }

    #[test]
    fn hop_equal_to_frame_clears_buffer() {
        let mut accumulator = FrameAccumulator::new(4, 4);
        let mut starts = Vec::new();
        accumulator.ingest(&ramp(10), |frame| starts.push(frame[0]));
        assert_eq!(starts, vec![0.0, 4.0]);
        assert_eq!(accumulator.fill(), 2);
    }

    #[test]
    fn boundaries_do_not_depend_on_chunking() {
        let input = ramp(5000);
        let whole = frame_starts(&mut FrameAccumulator::new(512, 256), &input, &[input.len()]);
        let single = frame_starts(&mut FrameAccumulator::new(512, 256), &input, &[1]);
        let ragged = frame_starts(&mut FrameAccumulator::new(512, 256), &input, &[7, 300, 1, 1024, 33]);

        let expected: Vec<f32> = (0..18).map(|i| (i * 256) as f32).collect();
        assert_eq!(whole, expected);
        assert_eq!(single, expected);
        assert_eq!(ragged, expected);
    }

    #[test]
    fn reset_starts_over() {
        let mut accumulator = FrameAccumulator::new(16, 8);
        accumulator.ingest(&ramp(20), |_| {});
        accumulator.reset();
        assert_eq!(accumulator.fill(), 0);
        assert_eq!(accumulator.frames_emitted(), 0);

        let mut starts = Vec::new();
        accumulator.ingest(&ramp(16), |frame| starts.push(frame[0]));
        assert_eq!(starts, vec![0.0]);
    }

    #[test]
    fn pipeline_results_match_across_chunkings() {
        let config = AnalysisConfig::new(44_100.0, 1024, 0.15);
        let input: Vec<f32> = (0..8000)
            .map(|i| {
                let t = i as f64 / 44_100.0;
                let frequency = if i < 4000 { 220.0 } else { 330.0 };
                (2.0 * PI * frequency * t).sin() as f32
            })
            .collect();

        let mut whole = Vec::new();
        PitchPipeline::new(&config).ingest(&input, |result| whole.push(result));

        let mut pipeline = PitchPipeline::new(&config);
        let mut single = Vec::new();
        for sample in &input {
            pipeline.ingest(std::slice::from_ref(sample), |result| single.push(result));
        }

        assert_eq!(whole.len(), (8000 - 1024) / 512 + 1);
        assert_eq!(whole, single);
        assert!(whole[0].is_valid);
        assert!((whole[0].frequency - 220.0).abs() < 2.2);
    }

    #[test]
    fn pipeline_threshold_updates_apply_to_next_frame() {
        let mut pipeline = PitchPipeline::new(&AnalysisConfig::new(44_100.0, 512, 0.15));
        pipeline.set_threshold(0.5);
        assert_eq!(pipeline.threshold(), 0.5);
        assert_eq!(pipeline.detector().threshold(), 0.5);
        pipeline.ingest(&vec![0.0; 600], |result| assert!(!result.is_valid));
        assert_eq!(pipeline.accumulator().fill(), 600 - 256);
    }

    #[test]
    fn threshold_source_is_read_for_every_frame() {
        let config = AnalysisConfig::new(44_100.0, 512, 0.15);
        let input: Vec<f32> = (0..2048)
            .map(|i| (2.0 * PI * 261.63 * i as f64 / 44_100.0).sin() as f32)
            .collect();

        let mut current = 0.15;
        let mut pipeline = PitchPipeline::new(&config);
        let frames = pipeline.ingest_with_threshold(
            &input,
            || {
                current += 0.1;
                current
            },
            |_| {},
        );

        assert_eq!(frames, (2048 - 512) / 256 + 1);
        assert!((pipeline.threshold() - (0.15 + 0.1 * frames as f64)).abs() < 1e-9);
    }

    #[test]
    fn pipeline_reset_discards_partial_frame() {
        let config = AnalysisConfig::new(44_100.0, 512, 0.15);
        let mut pipeline = PitchPipeline::new(&config);
        pipeline.set_threshold(0.4);

        let mut results = 0;
        pipeline.ingest(&vec![0.0; 400], |_| results += 1);
        assert_eq!(pipeline.accumulator().fill(), 400);
        pipeline.reset();
        assert_eq!(pipeline.accumulator().fill(), 0);
        assert_eq!(pipeline.threshold(), 0.4);

        pipeline.ingest(&vec![0.0; 400], |_| results += 1);
        assert_eq!(results, 0);
        pipeline.ingest(&vec![0.0; 112], |_| results += 1);
        assert_eq!(results, 1);
    }
}
